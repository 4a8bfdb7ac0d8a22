use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_header_read_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_redirects() -> usize {
    10
}

fn default_tls_handshake_timeout() -> u64 {
    10
}

fn default_pool_idle_timeout() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_handshake_timeout() -> u64 {
    10
}

/// Tunables for the outbound HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Deadline for the whole outbound exchange, redirect hops included,
    /// up to the final hop's response headers (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Redirect hops followed before the last response is returned as-is
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Bound on establishing the outbound connection, TLS included (seconds)
    #[serde(default = "default_tls_handshake_timeout")]
    pub tls_handshake_timeout_secs: u64,
    /// How long idle pooled connections are kept (seconds)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
    /// Maximum idle pooled connections per destination host
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_redirects: default_max_redirects(),
            tls_handshake_timeout_secs: default_tls_handshake_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

/// Tunables for CONNECT tunnel establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Bound on dialing the tunnel target (seconds)
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// Bound on flushing the Connection Established line to the caller (seconds)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dial_timeout_secs: default_dial_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Bound on reading an inbound request head (seconds)
    #[serde(default = "default_header_read_timeout")]
    pub header_read_timeout_secs: u64,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            header_read_timeout_secs: default_header_read_timeout(),
            outbound: OutboundConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
