use crate::config::OutboundConfig;
use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, HOST, LOCATION};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::debug;
use tokio::time::{Duration, Instant, timeout_at};
use url::Url;

/// Body type shared by the inbound service and the outbound client.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

pub fn full_body<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Pooled HTTPS client for outbound requests.
///
/// Redirects are followed here, up to `max_redirects` hops; past the cap the
/// last hop's response is handed back unmodified instead of erroring out.
pub struct OutboundClient {
    client: Client<HttpsConnector<HttpConnector>, ProxyBody>,
    request_timeout: Duration,
    max_redirects: usize,
}

impl OutboundClient {
    pub fn new(config: &OutboundConfig) -> Result<Self, ProxyError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(
            config.tls_handshake_timeout_secs,
        )));

        let tls = hyper_tls::native_tls::TlsConnector::new()
            .map_err(|e| ProxyError::Config(format!("Failed to build TLS connector: {}", e)))?;
        let https = HttpsConnector::from((http, tls.into()));

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build(https);

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_redirects: config.max_redirects,
        })
    }

    /// Issue one outbound request, following redirects.
    ///
    /// The request timeout is a single deadline spanning the whole chain: all
    /// hops together must produce response headers before it elapses.
    ///
    /// The body stream is consumed by the first hop; follow-up hops are
    /// re-issued with an empty body, so method-preserving redirects (307/308)
    /// after a consumed body are returned as-is rather than replayed.
    pub async fn execute(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ProxyError> {
        let deadline = Instant::now() + self.request_timeout;
        let mut method = req.method().clone();
        let headers = req.headers().clone();
        let mut uri = req.uri().clone();

        let mut response = self.send(req, deadline).await?;

        let mut hops = 0;
        while response.status().is_redirection() && hops < self.max_redirects {
            let Some(next_uri) = next_location(&uri, &response) else {
                break;
            };
            let Some(next_method) = redirect_method(&method, response.status()) else {
                break;
            };

            debug!(
                "following redirect ({}) from {} to {}",
                response.status(),
                uri,
                next_uri
            );

            let mut next = Request::builder()
                .method(next_method.clone())
                .uri(next_uri.clone())
                .body(empty_body())
                .map_err(|e| ProxyError::Http(e.to_string()))?;
            for (name, value) in headers.iter() {
                next.headers_mut().append(name.clone(), value.clone());
            }
            // Host follows the new target and the replayed body is empty
            next.headers_mut().remove(HOST);
            next.headers_mut().remove(CONTENT_LENGTH);

            response = self.send(next, deadline).await?;
            method = next_method;
            uri = next_uri;
            hops += 1;
        }

        Ok(response.map(|body| body.boxed()))
    }

    async fn send(
        &self,
        req: Request<ProxyBody>,
        deadline: Instant,
    ) -> Result<Response<Incoming>, ProxyError> {
        timeout_at(deadline, self.client.request(req))
            .await
            .map_err(|_| {
                ProxyError::Connection(format!(
                    "Request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| ProxyError::Http(e.to_string()))
    }
}

/// Resolve the Location header of a redirect against the URI it came from.
fn next_location(current: &Uri, response: &Response<Incoming>) -> Option<Uri> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    resolve_location(current, location)
}

fn resolve_location(current: &Uri, location: &str) -> Option<Uri> {
    let base = Url::parse(&current.to_string()).ok()?;
    let next = base.join(location).ok()?;
    next.as_str().parse::<Uri>().ok()
}

/// Method used for the next hop, or None when the hop cannot be replayed.
fn redirect_method(method: &Method, status: StatusCode) -> Option<Method> {
    let is_safe = *method == Method::GET || *method == Method::HEAD;
    match status {
        StatusCode::SEE_OTHER => Some(Method::GET),
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            if is_safe {
                Some(method.clone())
            } else {
                Some(Method::GET)
            }
        }
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
            if is_safe { Some(method.clone()) } else { None }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_location() {
        let current: Uri = "http://example.com/a/b".parse().unwrap();
        let next = resolve_location(&current, "/c").unwrap();
        assert_eq!(next, "http://example.com/c");
    }

    #[test]
    fn test_resolve_absolute_location() {
        let current: Uri = "http://example.com/a".parse().unwrap();
        let next = resolve_location(&current, "https://other.example/x?y=1").unwrap();
        assert_eq!(next, "https://other.example/x?y=1");
    }

    #[test]
    fn test_redirect_method_see_other_becomes_get() {
        assert_eq!(
            redirect_method(&Method::POST, StatusCode::SEE_OTHER),
            Some(Method::GET)
        );
    }

    #[test]
    fn test_redirect_method_found_preserves_get() {
        assert_eq!(
            redirect_method(&Method::GET, StatusCode::FOUND),
            Some(Method::GET)
        );
        assert_eq!(
            redirect_method(&Method::POST, StatusCode::FOUND),
            Some(Method::GET)
        );
    }

    #[test]
    fn test_redirect_method_temporary_needs_replayable_body() {
        assert_eq!(
            redirect_method(&Method::HEAD, StatusCode::TEMPORARY_REDIRECT),
            Some(Method::HEAD)
        );
        assert_eq!(
            redirect_method(&Method::POST, StatusCode::TEMPORARY_REDIRECT),
            None
        );
    }

    #[test]
    fn test_non_redirect_status() {
        assert_eq!(redirect_method(&Method::GET, StatusCode::OK), None);
    }
}
