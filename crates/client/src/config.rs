use std::time::Duration;

/// Default server endpoint for a local development server.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3001/ws";

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://host:3001/ws`.
    pub url: String,
    /// Bound on opening the connection (default: 5 s).
    pub connect_timeout: Duration,
    /// Default bound on a single call (default: 10 s).
    pub call_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `EASEL_WS_URL`            | `ws://127.0.0.1:3001/ws`  |
    /// | `EASEL_CALL_TIMEOUT_SECS` | `10`                      |
    pub fn from_env() -> Self {
        let url = std::env::var("EASEL_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.into());

        let call_timeout_secs: u64 = std::env::var("EASEL_CALL_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("EASEL_CALL_TIMEOUT_SECS must be a valid u64");

        Self {
            url,
            call_timeout: Duration::from_secs(call_timeout_secs),
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.into(),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Attempts before the connection is latched as failed.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}
