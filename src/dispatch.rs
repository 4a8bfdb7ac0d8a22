use hyper::{Method, Request};

/// Routing outcome for one inbound request. Only the method matters:
/// CONNECT opens a tunnel, everything else is relayed as plain HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Forward,
    Tunnel,
}

pub fn route<B>(req: &Request<B>) -> Route {
    if *req.method() == Method::CONNECT {
        Route::Tunnel
    } else {
        Route::Forward
    }
}
