use clap::Parser;
use log::{error, info};
use std::path::Path;
use tokio::signal;
use wiki_relay::{Config, ProxyServer};

#[derive(Parser)]
#[clap(
    version = "0.1.0",
    about = "A forward HTTP proxy that relays plain requests with zh-CN negotiation headers and tunnels CONNECT traffic"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:8080)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "Outbound request timeout in seconds")]
    request_timeout: Option<u64>,

    #[clap(long, value_name = "NUM", help = "Redirect hops followed before returning the last response")]
    max_redirects: Option<usize>,

    #[clap(long, value_name = "SECONDS", help = "CONNECT dial timeout in seconds")]
    dial_timeout: Option<u64>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(config_file) = args.generate_config {
        Config::default().to_file(&config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let mut config = if let Some(config_file) = &args.config {
        if !Path::new(config_file).exists() {
            return Err(format!("Configuration file not found: {}", config_file).into());
        }
        Config::from_file(config_file)?
    } else {
        Config::default()
    };

    // CLI flags win over file values
    if let Some(listen) = args.listen {
        config.listen_addr = listen
            .parse()
            .map_err(|e| format!("Invalid listen address {}: {}", listen, e))?;
    }
    if let Some(secs) = args.request_timeout {
        config.outbound.request_timeout_secs = secs;
    }
    if let Some(hops) = args.max_redirects {
        config.outbound.max_redirects = hops;
    }
    if let Some(secs) = args.dial_timeout {
        config.tunnel.dial_timeout_secs = secs;
    }

    info!("Starting proxy server...");
    let server = ProxyServer::bind(&config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping proxy");
        }
    }

    Ok(())
}
