pub mod cli;
pub mod gateway_config;
pub mod types;

pub use cli::CliConfig;
pub use gateway_config::{ClientConfig, ConfigError, GatewayConfig, ServerConfig};
pub use types::{LogLevel, RoutePolicy};
