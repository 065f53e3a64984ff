use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use fastway::config::LogLevel;
use fastway::{CliConfig, Gateway, admin};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "fastway";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = match CliConfig::load().await {
        Ok(config) => config,
        Err(fastway::config::ConfigError::Cli(e)) => e.exit(),
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            std::process::exit(2);
        }
    };

    init_tracing(config.log_level);
    run(config).await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_new(level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn listen(who: &str, addr: SocketAddr, reuse_port: bool) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(reuse_port)?;
    #[cfg(not(unix))]
    let _ = reuse_port;

    socket.bind(addr)?;
    let listener = socket.listen(1024)?;

    info!("{APP_NAME} {who} listener at {}", listener.local_addr()?);
    Ok(listener)
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run(config: CliConfig) -> std::io::Result<()> {
    let clients = listen("client", config.client_addr, config.reuse_port)?;
    let servers = listen("server", config.server_addr, config.reuse_port)?;

    let gateway = match Gateway::new(config.gateway) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("invalid gateway configuration: {e}");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };

    let client_loop = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.serve_clients(clients).await }
    });
    let server_loop = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.serve_servers(servers).await }
    });

    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }

    info!("{APP_NAME} shutting down");
    gateway.stop();

    let _ = client_loop.await;
    let _ = server_loop.await;

    info!("final stats:\n{}", admin::format_stats(&admin::gateway_stats(&gateway)));
    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
