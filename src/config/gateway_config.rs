use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

use super::types::RoutePolicy;
use crate::gateway::id_arena::DEFAULT_ID_REUSE_DELAY;
use crate::gateway::{Role, SessionSettings};
use crate::pool::PoolConfig;
use crate::wire::DEFAULT_MAX_PACKET_SIZE;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Largest payload a frame may declare; the length prefix is a u32.
pub const MAX_PACKET_SIZE_LIMIT: usize = u32::MAX as usize - crate::wire::HEADER_SIZE;

// -----------------------------------------------------------------------------
// ----- GatewayConfig ---------------------------------------------------------

/// Everything the gateway core needs. Built once at startup and handed to
/// `Gateway::new`; nothing reads configuration from globals.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_packet_size: usize,
    pub heartbeat_missed_threshold: u32,
    pub route_policy: RoutePolicy,
    pub pool: PoolConfig,
    pub client: ClientConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub max_virtual_conns: usize,
    pub buffer_size: usize,
    pub send_queue_size: usize,
    pub ping_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub auth_key: SecretString,
    pub auth_timeout: Duration,
    pub buffer_size: usize,
    pub send_queue_size: usize,
    pub ping_interval: Duration,

    /// How long a virtual id the gateway closed stays unused on a server that
    /// never echoes the CLOSE.
    pub id_reuse_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            heartbeat_missed_threshold: 3,
            route_policy: RoutePolicy::default(),
            pool: PoolConfig::default(),
            client: ClientConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_virtual_conns: 8,
            buffer_size: 2 * 1024,
            send_queue_size: 1024,
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_key: SecretString::new(String::new().into_boxed_str()),
            auth_timeout: Duration::from_secs(3),
            buffer_size: 64 * 1024,
            send_queue_size: 102_400,
            ping_interval: Duration::from_secs(30),
            id_reuse_delay: DEFAULT_ID_REUSE_DELAY,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayConfig: Static -------------------------------------------------

impl GatewayConfig {
    /// Defaults overlaid with whatever the TOML file at `path` sets. Not
    /// validated here: flags may still be layered on top.
    pub async fn from_file_async(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config = GatewayConfig::default();
        ConfigFile::parse(&raw)?.apply(&mut config);
        Ok(config)
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayConfig: Public -------------------------------------------------

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packet_size == 0 || self.max_packet_size > MAX_PACKET_SIZE_LIMIT {
            return Err(invalid("max_packet_size", "must be between 1 and 4 GiB - 9"));
        }
        if self.heartbeat_missed_threshold == 0 {
            return Err(invalid("heartbeat_missed_threshold", "must be > 0"));
        }

        if self.pool.min_chunk == 0 {
            return Err(invalid("pool.min_chunk", "must be > 0"));
        }
        if self.pool.max_chunk < self.pool.min_chunk {
            return Err(invalid("pool.max_chunk", "must be >= pool.min_chunk"));
        }
        if self.pool.growth_factor < 2 {
            return Err(invalid("pool.growth_factor", "must be >= 2"));
        }
        if self.pool.budget != 0 && self.pool.budget < self.pool.max_chunk {
            return Err(invalid("pool.budget", "must be 0 or >= pool.max_chunk"));
        }

        if self.client.max_virtual_conns == 0 {
            return Err(invalid("client.max_virtual_conns", "must be > 0"));
        }
        if self.client.buffer_size == 0 {
            return Err(invalid("client.buffer_size", "must be > 0"));
        }
        if self.client.send_queue_size == 0 {
            return Err(invalid("client.send_queue_size", "must be > 0"));
        }

        if self.server.buffer_size == 0 {
            return Err(invalid("server.buffer_size", "must be > 0"));
        }
        if self.server.send_queue_size == 0 {
            return Err(invalid("server.send_queue_size", "must be > 0"));
        }
        if self.server.auth_timeout.is_zero() {
            return Err(invalid("server.auth_timeout", "must be > 0"));
        }
        if self.server.id_reuse_delay.is_zero() {
            return Err(invalid("server.id_reuse_delay", "must be > 0"));
        }
        if self.server.auth_key.expose_secret().is_empty() {
            return Err(invalid("server.auth_key", "must be set"));
        }

        Ok(())
    }

    pub fn auth_key(&self) -> &[u8] {
        self.server.auth_key.expose_secret().as_bytes()
    }

    pub fn client_settings(&self) -> SessionSettings {
        SessionSettings {
            role: Role::Client,
            buffer_size: self.client.buffer_size,
            send_queue_size: self.client.send_queue_size,
            max_virtual_conns: Some(self.client.max_virtual_conns),
            ping_interval: self.client.ping_interval,
        }
    }

    pub fn server_settings(&self) -> SessionSettings {
        SessionSettings {
            role: Role::Server,
            buffer_size: self.server.buffer_size,
            send_queue_size: self.server.send_queue_size,
            max_virtual_conns: None,
            ping_interval: self.server.ping_interval,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    max_packet_size: Option<usize>,

    #[serde(default)]
    heartbeat_missed_threshold: Option<u32>,

    #[serde(default)]
    route_policy: Option<RoutePolicy>,

    #[serde(default)]
    pool: PoolSection,

    #[serde(default)]
    client: ClientSection,

    #[serde(default)]
    server: ServerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolSection {
    min_chunk: Option<usize>,
    max_chunk: Option<usize>,
    growth_factor: Option<usize>,
    budget: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientSection {
    max_virtual_conns: Option<usize>,
    buffer_size: Option<usize>,
    send_queue_size: Option<usize>,

    #[serde(default, deserialize_with = "de_duration")]
    ping_interval: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    auth_key: Option<String>,

    #[serde(default, deserialize_with = "de_duration")]
    auth_timeout: Option<Duration>,

    buffer_size: Option<usize>,
    send_queue_size: Option<usize>,

    #[serde(default, deserialize_with = "de_duration")]
    ping_interval: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    id_reuse_delay: Option<Duration>,
}

impl ConfigFile {
    fn parse(raw: &str) -> Result<ConfigFile, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })
    }

    fn apply(self, config: &mut GatewayConfig) {
        set(&mut config.max_packet_size, self.max_packet_size);
        set(
            &mut config.heartbeat_missed_threshold,
            self.heartbeat_missed_threshold,
        );
        set(&mut config.route_policy, self.route_policy);

        set(&mut config.pool.min_chunk, self.pool.min_chunk);
        set(&mut config.pool.max_chunk, self.pool.max_chunk);
        set(&mut config.pool.growth_factor, self.pool.growth_factor);
        set(&mut config.pool.budget, self.pool.budget);

        let client = &mut config.client;
        set(&mut client.max_virtual_conns, self.client.max_virtual_conns);
        set(&mut client.buffer_size, self.client.buffer_size);
        set(&mut client.send_queue_size, self.client.send_queue_size);
        set(&mut client.ping_interval, self.client.ping_interval);

        let server = &mut config.server;
        set(
            &mut server.auth_key,
            self.server
                .auth_key
                .map(|key| SecretString::new(key.into_boxed_str())),
        );
        set(&mut server.auth_timeout, self.server.auth_timeout);
        set(&mut server.buffer_size, self.server.buffer_size);
        set(&mut server.send_queue_size, self.server.send_queue_size);
        set(&mut server.ping_interval, self.server.ping_interval);
        set(&mut server.id_reuse_delay, self.server.id_reuse_delay);
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

pub(crate) fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Durations are either humantime strings ("30s", "250ms") or integer
/// milliseconds.
fn de_duration<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"30s\" or integer milliseconds")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(DurationVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error(transparent)]
    Cli(#[from] clap::Error),
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn keyed() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.server.auth_key = SecretString::new("hunter2".to_string().into_boxed_str());
        config
    }

    #[test]
    fn defaults_are_valid_once_a_key_is_set() {
        let config = keyed();
        config.validate().unwrap();

        assert_eq!(config.max_packet_size, 512 * 1024);
        assert_eq!(config.heartbeat_missed_threshold, 3);
        assert_eq!(config.client.max_virtual_conns, 8);
        assert_eq!(config.server.send_queue_size, 102_400);
        assert_eq!(config.pool.budget, 10 * 1024 * 1024);
        assert_eq!(config.server.id_reuse_delay, Duration::from_secs(30));
    }

    #[test]
    fn empty_auth_key_is_rejected() {
        assert!(matches!(
            GatewayConfig::default().validate(),
            Err(ConfigError::Invalid {
                field: "server.auth_key",
                ..
            })
        ));
    }

    #[test]
    fn zero_server_queue_is_rejected() {
        let mut config = keyed();
        config.server.send_queue_size = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "server.send_queue_size",
                ..
            })
        ));
    }

    #[test]
    fn bad_pool_parameters_are_rejected() {
        let mut config = keyed();
        config.pool.growth_factor = 1;
        assert!(config.validate().is_err());

        let mut config = keyed();
        config.pool.max_chunk = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn settings_follow_role() {
        let config = GatewayConfig::default();

        let client = config.client_settings();
        assert_eq!(client.role, Role::Client);
        assert_eq!(client.max_virtual_conns, Some(8));

        let server = config.server_settings();
        assert_eq!(server.role, Role::Server);
        assert_eq!(server.max_virtual_conns, None);
        assert_eq!(server.buffer_size, 64 * 1024);
    }

    #[tokio::test]
    async fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
max_packet_size = 1024
route_policy = "round-robin"

[pool]
budget = 0

[client]
max_virtual_conns = 2
ping_interval = "250ms"

[server]
auth_key = "hunter2"
auth_timeout = 1500
id_reuse_delay = "2m"
"#
        )
        .unwrap();

        let config = GatewayConfig::from_file_async(file.path()).await.unwrap();

        assert_eq!(config.max_packet_size, 1024);
        assert_eq!(config.route_policy, RoutePolicy::RoundRobin);
        assert_eq!(config.pool.budget, 0);
        assert_eq!(config.client.max_virtual_conns, 2);
        assert_eq!(config.client.ping_interval, Duration::from_millis(250));
        assert_eq!(config.auth_key(), b"hunter2");
        assert_eq!(config.server.auth_timeout, Duration::from_millis(1500));
        assert_eq!(config.server.id_reuse_delay, Duration::from_secs(120));

        // untouched fields keep their defaults
        assert_eq!(config.client.send_queue_size, 1024);
    }

    #[tokio::test]
    async fn file_values_are_left_for_the_caller_to_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server]\nsend_queue_size = 0\n").unwrap();

        let config = GatewayConfig::from_file_async(file.path()).await.unwrap();
        assert_eq!(config.server.send_queue_size, 0);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[client]\nmax_conns = 2\n").unwrap();

        let err = GatewayConfig::from_file_async(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = GatewayConfig::from_file_async(Path::new("/nonexistent/fastway.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
