pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod server;
pub mod tunnel;

pub use config::Config;
pub use error::ProxyError;
pub use server::ProxyServer;
