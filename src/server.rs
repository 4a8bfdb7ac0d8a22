use crate::client::{OutboundClient, ProxyBody};
use crate::config::Config;
use crate::dispatch::{Route, route};
use crate::error::ProxyError;
use crate::forwarder::Forwarder;
use crate::tunnel::TunnelEstablisher;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, info};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;

/// Owns the listening socket and drives one handler task per inbound
/// connection. All per-request state lives inside the handler; the only thing
/// shared across connections is the outbound client's pool.
pub struct ProxyServer {
    listener: TcpListener,
    forwarder: Arc<Forwarder>,
    tunnel: Arc<TunnelEstablisher>,
    header_read_timeout: Duration,
}

impl ProxyServer {
    /// Bind the listener. A bind failure here is fatal; it propagates all the
    /// way out of main since no request could ever be served.
    pub async fn bind(config: &Config) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let client = OutboundClient::new(&config.outbound)?;

        Ok(Self {
            listener,
            forwarder: Arc::new(Forwarder::new(client)),
            tunnel: Arc::new(TunnelEstablisher::new(&config.tunnel)),
            header_read_timeout: Duration::from_secs(config.header_read_timeout_secs),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        info!("Forward proxy listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let forwarder = self.forwarder.clone();
            let tunnel = self.tunnel.clone();
            let header_read_timeout = self.header_read_timeout;

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let forwarder = forwarder.clone();
                    let tunnel = tunnel.clone();
                    async move { Ok::<_, Infallible>(handle(req, peer, &forwarder, &tunnel).await) }
                });

                // auto_date_header is off so tunnel acknowledgments carry no
                // headers at all; forwarded responses relay the upstream Date.
                if let Err(e) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .preserve_header_case(true)
                    .auto_date_header(false)
                    .header_read_timeout(header_read_timeout)
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    peer: SocketAddr,
    forwarder: &Forwarder,
    tunnel: &TunnelEstablisher,
) -> Response<ProxyBody> {
    // Advisory record per request; never blocks or fails the dispatch.
    info!("Received {} request for {} from {}", req.method(), req.uri(), peer);

    match route(&req) {
        Route::Tunnel => tunnel.establish(req).await,
        Route::Forward => forwarder.forward(req).await,
    }
}
