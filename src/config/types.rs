use serde::Deserialize;

// -----------------------------------------------------------------------------
// ----- LogLevel --------------------------------------------------------------

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RoutePolicy -----------------------------------------------------------

/// How an OPEN picks among the active server sessions.
#[derive(clap::ValueEnum, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RoutePolicy {
    /// Fewest live virtual connections; ties go round-robin.
    #[default]
    LeastLoaded,

    RoundRobin,
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
