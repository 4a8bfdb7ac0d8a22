use crate::client::{ProxyBody, empty_body};
use crate::config::TunnelConfig;
use crate::forwarder::status_response;
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

/// Builds CONNECT tunnels: dials the target, takes over the caller's raw
/// socket, acknowledges with `200 Connection Established` and relays bytes in
/// both directions until both sides are done.
pub struct TunnelEstablisher {
    dial_timeout: Duration,
    handshake_timeout: Duration,
}

impl TunnelEstablisher {
    pub fn new(config: &TunnelConfig) -> Self {
        Self {
            dial_timeout: Duration::from_secs(config.dial_timeout_secs),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
        }
    }

    /// Handle one CONNECT request.
    ///
    /// The target is dialed before anything is written back, so an
    /// unreachable target surfaces as a plain 502 with no handshake bytes on
    /// the wire. Once the 200 is on its way the tunnel either runs to
    /// completion or is torn down without any further in-band signal.
    pub async fn establish(&self, mut req: Request<Incoming>) -> Response<ProxyBody> {
        let Some(authority) = req.uri().authority().cloned() else {
            error!("Invalid CONNECT target: {}", req.uri());
            return status_response(StatusCode::INTERNAL_SERVER_ERROR, "Invalid CONNECT target");
        };

        let host = authority.host();
        let port = authority.port_u16().unwrap_or(443);
        let addr = format!("{}:{}", host, port);

        let target = match timeout(self.dial_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Error connecting to target {}: {}", addr, e);
                return status_response(StatusCode::BAD_GATEWAY, "Failed to connect to target");
            }
            Err(_) => {
                error!(
                    "Timed out connecting to target {} after {}s",
                    addr,
                    self.dial_timeout.as_secs()
                );
                return status_response(StatusCode::BAD_GATEWAY, "Failed to connect to target");
            }
        };

        // Raw-socket takeover is an optional capability of the inbound
        // connection; resolve it before acknowledging. Without it the target
        // connection is dropped again.
        let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
            error!("Connection for {} does not support raw takeover", addr);
            drop(target);
            return status_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to hijack connection",
            );
        };

        let handshake_timeout = self.handshake_timeout;
        tokio::spawn(async move {
            // Resolves once the acknowledgment has been flushed to the caller.
            let upgraded = match timeout(handshake_timeout, on_upgrade).await {
                Ok(Ok(upgraded)) => upgraded,
                Ok(Err(e)) => {
                    warn!("Error hijacking connection for {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!(
                        "Tunnel handshake to caller stalled for {} ({}s)",
                        addr,
                        handshake_timeout.as_secs()
                    );
                    return;
                }
            };

            relay(upgraded, target, &addr).await;
        });

        // Hyper writes this status line before resolving the upgrade; the
        // custom reason phrase puts the literal
        // `HTTP/1.1 200 Connection Established\r\n\r\n` on the wire.
        let mut response = Response::builder()
            .status(StatusCode::OK)
            .body(empty_body())
            .unwrap();
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(b"Connection Established"));
        response
    }
}

/// Copy bytes both ways until both directions have seen end-of-stream or
/// failed. The single owning task joins both directions before either socket
/// is released, so an early close on one side cannot truncate the other.
async fn relay(upgraded: Upgraded, target: TcpStream, addr: &str) {
    let caller = TokioIo::new(upgraded);
    let (mut caller_read, mut caller_write) = tokio::io::split(caller);
    let (mut target_read, mut target_write) = target.into_split();

    let caller_to_target = async {
        let copied = tokio::io::copy(&mut caller_read, &mut target_write).await;
        // Half-close so the target sees end-of-stream and can finish draining.
        let _ = target_write.shutdown().await;
        copied
    };

    let target_to_caller = async {
        let copied = tokio::io::copy(&mut target_read, &mut caller_write).await;
        let _ = caller_write.shutdown().await;
        copied
    };

    let (upstream, downstream) = tokio::join!(caller_to_target, target_to_caller);

    match (&upstream, &downstream) {
        (Ok(up), Ok(down)) => {
            debug!("Tunnel to {} closed ({} bytes up, {} bytes down)", addr, up, down);
        }
        _ => {
            if let Err(e) = upstream {
                warn!("Error in client->target relay for {}: {}", addr, e);
            }
            if let Err(e) = downstream {
                warn!("Error in target->client relay for {}: {}", addr, e);
            }
        }
    }
}
