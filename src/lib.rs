pub mod admin;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod pool;
pub mod shared_types;
pub mod wire;

pub use config::{CliConfig, GatewayConfig};
pub use errors::GatewayError;
pub use gateway::Gateway;
