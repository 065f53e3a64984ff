use clap::Parser;
use secrecy::SecretString;
use std::{ffi::OsString, net::SocketAddr, path::PathBuf, time::Duration};

use super::gateway_config::{ConfigError, GatewayConfig, set};
use super::types::{LogLevel, RoutePolicy};

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

/// Process-level settings: where to listen, how loud to log, and the
/// gateway configuration with flags layered over the optional file.
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub reuse_port: bool,
    pub log_level: LogLevel,
    pub gateway: GatewayConfig,
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Static -----------------------------------------------------

impl CliConfig {
    /// Parse the process arguments and environment.
    pub async fn load() -> Result<CliConfig, ConfigError> {
        Self::load_from(std::env::args_os()).await
    }

    pub async fn load_from<I, T>(args: I) -> Result<CliConfig, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Args::try_parse_from(args)?;

        // validated once, after flags are layered over the file

        let mut gateway = match &args.config_file {
            Some(path) => GatewayConfig::from_file_async(path).await?,
            None => GatewayConfig::default(),
        };

        args.apply(&mut gateway);
        gateway.validate()?;

        Ok(CliConfig {
            client_addr: args.client_addr,
            server_addr: args.server_addr,
            reuse_port: args.reuse_port,
            log_level: args.log_level,
            gateway,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fastway",
    version,
    about = "Multiplexes many client connections over a few authenticated server links"
)]
struct Args {
    // Optional TOML file; flags below win over it.
    #[arg(long = "config", env = "FASTWAY_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[arg(long = "client-addr", env = "FASTWAY_CLIENT_ADDR", default_value = "0.0.0.0:0")]
    client_addr: SocketAddr,

    #[arg(long = "server-addr", env = "FASTWAY_SERVER_ADDR", default_value = "0.0.0.0:0")]
    server_addr: SocketAddr,

    #[arg(long = "reuse-port", env = "FASTWAY_REUSE_PORT")]
    reuse_port: bool,

    #[arg(long = "log", env = "FASTWAY_LOG", default_value = "info")]
    log_level: LogLevel,

    #[arg(long = "max-packet-size", env = "FASTWAY_MAX_PACKET_SIZE")]
    max_packet_size: Option<usize>,

    #[arg(long = "heartbeat-missed", env = "FASTWAY_HEARTBEAT_MISSED")]
    heartbeat_missed_threshold: Option<u32>,

    #[arg(long = "route-policy", env = "FASTWAY_ROUTE_POLICY")]
    route_policy: Option<RoutePolicy>,

    // Buffer pool
    #[arg(long = "pool-min-chunk", env = "FASTWAY_POOL_MIN_CHUNK")]
    pool_min_chunk: Option<usize>,

    #[arg(long = "pool-max-chunk", env = "FASTWAY_POOL_MAX_CHUNK")]
    pool_max_chunk: Option<usize>,

    #[arg(long = "pool-factor", env = "FASTWAY_POOL_FACTOR")]
    pool_growth_factor: Option<usize>,

    // 0 = unbounded
    #[arg(long = "pool-size", env = "FASTWAY_POOL_SIZE")]
    pool_budget: Option<usize>,

    // Client side
    #[arg(long = "client-max-conn", env = "FASTWAY_CLIENT_MAX_CONN")]
    client_max_conn: Option<usize>,

    #[arg(long = "client-buffer-size", env = "FASTWAY_CLIENT_BUFFER_SIZE")]
    client_buffer_size: Option<usize>,

    #[arg(long = "client-send-queue", env = "FASTWAY_CLIENT_SEND_QUEUE")]
    client_send_queue: Option<usize>,

    #[arg(
        long = "client-ping-interval",
        env = "FASTWAY_CLIENT_PING_INTERVAL",
        value_parser = humantime::parse_duration
    )]
    client_ping_interval: Option<Duration>,

    // Server side
    #[arg(long = "server-auth-key", env = "FASTWAY_SERVER_AUTH_KEY", hide_env_values = true)]
    server_auth_key: Option<String>,

    #[arg(
        long = "server-auth-timeout",
        env = "FASTWAY_SERVER_AUTH_TIMEOUT",
        value_parser = humantime::parse_duration
    )]
    server_auth_timeout: Option<Duration>,

    #[arg(long = "server-buffer-size", env = "FASTWAY_SERVER_BUFFER_SIZE")]
    server_buffer_size: Option<usize>,

    #[arg(long = "server-send-queue", env = "FASTWAY_SERVER_SEND_QUEUE")]
    server_send_queue: Option<usize>,

    #[arg(
        long = "server-ping-interval",
        env = "FASTWAY_SERVER_PING_INTERVAL",
        value_parser = humantime::parse_duration
    )]
    server_ping_interval: Option<Duration>,

    #[arg(
        long = "server-id-reuse-delay",
        env = "FASTWAY_SERVER_ID_REUSE_DELAY",
        value_parser = humantime::parse_duration
    )]
    server_id_reuse_delay: Option<Duration>,
}

impl Args {
    fn apply(&self, config: &mut GatewayConfig) {
        set(&mut config.max_packet_size, self.max_packet_size);
        set(
            &mut config.heartbeat_missed_threshold,
            self.heartbeat_missed_threshold,
        );
        set(&mut config.route_policy, self.route_policy);

        set(&mut config.pool.min_chunk, self.pool_min_chunk);
        set(&mut config.pool.max_chunk, self.pool_max_chunk);
        set(&mut config.pool.growth_factor, self.pool_growth_factor);
        set(&mut config.pool.budget, self.pool_budget);

        set(&mut config.client.max_virtual_conns, self.client_max_conn);
        set(&mut config.client.buffer_size, self.client_buffer_size);
        set(&mut config.client.send_queue_size, self.client_send_queue);
        set(&mut config.client.ping_interval, self.client_ping_interval);

        set(
            &mut config.server.auth_key,
            self.server_auth_key
                .clone()
                .map(|key| SecretString::new(key.into_boxed_str())),
        );
        set(&mut config.server.auth_timeout, self.server_auth_timeout);
        set(&mut config.server.buffer_size, self.server_buffer_size);
        set(&mut config.server.send_queue_size, self.server_send_queue);
        set(&mut config.server.ping_interval, self.server_ping_interval);
        set(&mut config.server.id_reuse_delay, self.server_id_reuse_delay);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
