use crate::client::{OutboundClient, ProxyBody, full_body};
use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, COOKIE, HOST, HeaderValue};
use hyper::{Request, Response, StatusCode, Uri};
use log::{debug, error};
use url::Url;

// Headers forced onto every outbound request so the destination serves the
// zh-CN variant regardless of what the caller asked for.
pub const ACCEPT_OVERRIDE: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const ACCEPT_LANGUAGE_OVERRIDE: &str = "zh-CN,zh;q=0.9";
pub const CONNECTION_OVERRIDE: &str = "keep-alive";
pub const COOKIE_OVERRIDE: &str = "zhwikiVariant=zh-cn";

pub(crate) fn status_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .body(full_body(message))
        .unwrap()
}

/// Relays one plain-HTTP request to its destination.
pub struct Forwarder {
    client: OutboundClient,
}

impl Forwarder {
    pub fn new(client: OutboundClient) -> Self {
        Self { client }
    }

    /// Produce the destination's response for `req`, or the best status code
    /// obtainable: 500 when no outbound request could be built, 502 when the
    /// destination was unreachable. Never an error; every failure is mapped
    /// here.
    pub async fn forward<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let target = match extract_target_uri(&req) {
            Ok(target) => target,
            Err(e) => {
                error!("Error resolving target for {}: {}", req.uri(), e);
                return status_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create request",
                );
            }
        };

        let outbound = match build_outbound(req, &target) {
            Ok(outbound) => outbound,
            Err(e) => {
                error!("Error creating request for {}: {}", target, e);
                return status_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create request",
                );
            }
        };

        match self.client.execute(outbound).await {
            Ok(response) => {
                debug!("Forwarded request to {} - status {}", target, response.status());
                response
            }
            Err(e) => {
                error!("Error forwarding request to {}: {}", target, e);
                status_response(StatusCode::BAD_GATEWAY, "Failed to forward request")
            }
        }
    }
}

/// Absolute target of a proxied request.
///
/// Absolute-form request lines are used as-is (scheme defaulting to plain
/// http when absent); origin-form lines are rebuilt from the Host header.
pub fn extract_target_uri<B>(req: &Request<B>) -> Result<Uri, ProxyError> {
    let uri = req.uri();

    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    if let Some(authority) = uri.authority() {
        let absolute = format!(
            "http://{}{}",
            authority,
            uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        );
        return absolute
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::Uri(e.to_string()));
    }

    if let Some(host) = req.headers().get(HOST) {
        let host = host
            .to_str()
            .map_err(|e| ProxyError::Config(format!("Invalid Host header: {}", e)))?;

        let absolute = match uri.path_and_query() {
            Some(pq) => format!("http://{}{}", host, pq),
            None => format!("http://{}", host),
        };

        let url = Url::parse(&absolute)?;
        return url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::Uri(e.to_string()));
    }

    Err(ProxyError::Config(
        "Cannot determine target URI".to_string(),
    ))
}

/// Outbound mirror of the inbound request: same method and body stream, every
/// inbound header copied in order, then the fixed overrides applied on top.
fn build_outbound<B>(req: Request<B>, target: &Uri) -> Result<Request<ProxyBody>, ProxyError>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    let (parts, body) = req.into_parts();

    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(target.clone())
        .body(body.boxed())
        .map_err(|e| ProxyError::Http(e.to_string()))?;

    let headers = outbound.headers_mut();
    for (name, value) in parts.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_OVERRIDE));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_OVERRIDE));
    headers.insert(CONNECTION, HeaderValue::from_static(CONNECTION_OVERRIDE));
    headers.insert(COOKIE, HeaderValue::from_static(COOKIE_OVERRIDE));

    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::empty_body;
    use hyper::Method;

    #[test]
    fn test_absolute_form_target() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://example.com/path?q=1")
            .body(empty_body())
            .unwrap();

        let target = extract_target_uri(&req).unwrap();
        assert_eq!(target, "http://example.com/path?q=1");
    }

    #[test]
    fn test_missing_scheme_defaults_to_http() {
        // authority-form target carries no scheme
        let uri: Uri = "example.com:8443".parse().unwrap();
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(empty_body())
            .unwrap();

        let target = extract_target_uri(&req).unwrap();
        assert_eq!(target.scheme_str(), Some("http"));
        assert_eq!(target.host(), Some("example.com"));
        assert_eq!(target.port_u16(), Some(8443));
    }

    #[test]
    fn test_origin_form_uses_host_header() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/page?x=2")
            .header(HOST, "example.com:8000")
            .body(empty_body())
            .unwrap();

        let target = extract_target_uri(&req).unwrap();
        assert_eq!(target.scheme_str(), Some("http"));
        assert_eq!(target.host(), Some("example.com"));
        assert_eq!(target.port_u16(), Some(8000));
        assert_eq!(target.path_and_query().unwrap().as_str(), "/page?x=2");
    }

    #[test]
    fn test_origin_form_without_host_fails() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/page")
            .body(empty_body())
            .unwrap();

        assert!(extract_target_uri(&req).is_err());
    }

    #[test]
    fn test_overrides_replace_client_headers() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://example.com/")
            .header(ACCEPT_LANGUAGE, "en-US")
            .header(COOKIE, "session=abc")
            .body(empty_body())
            .unwrap();

        let target = req.uri().clone();
        let outbound = build_outbound(req, &target).unwrap();

        assert_eq!(
            outbound.headers().get(ACCEPT_LANGUAGE).unwrap(),
            ACCEPT_LANGUAGE_OVERRIDE
        );
        assert_eq!(outbound.headers().get(COOKIE).unwrap(), COOKIE_OVERRIDE);
        assert_eq!(
            outbound.headers().get(CONNECTION).unwrap(),
            CONNECTION_OVERRIDE
        );
        assert_eq!(outbound.headers().get(ACCEPT).unwrap(), ACCEPT_OVERRIDE);
        // override leaves a single value even when the client sent several
        assert_eq!(outbound.headers().get_all(COOKIE).iter().count(), 1);
    }

    #[test]
    fn test_multi_valued_headers_survive_in_order() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("http://example.com/")
            .header("x-trace", "first")
            .header("x-trace", "second")
            .body(empty_body())
            .unwrap();

        let target = req.uri().clone();
        let outbound = build_outbound(req, &target).unwrap();

        let values: Vec<_> = outbound.headers().get_all("x-trace").iter().collect();
        assert_eq!(values, vec!["first", "second"]);
        assert_eq!(outbound.method(), Method::POST);
    }
}
