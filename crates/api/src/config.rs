use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local WebUI on the same host.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3001`).
    pub port: u16,
    /// Base URL of the generation backend.
    pub backend_url: String,
    /// Per-request backend timeout in seconds (default: `300`).
    pub backend_timeout_secs: u64,
    /// Root directory for generated artifacts.
    pub output_dir: PathBuf,
    /// JSON file backing the config store.
    pub config_file: PathBuf,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on a single remote-call handler (default: `600`).
    pub handler_timeout_secs: u64,
    /// How long finished jobs and stopped configs stay visible (default: `300`).
    pub job_retention_secs: u64,
    /// Emit JSON logs instead of the human-readable format.
    pub json_logs: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                          |
    /// |------------------------|----------------------------------|
    /// | `HOST`                 | `0.0.0.0`                        |
    /// | `PORT`                 | `3001`                           |
    /// | `AUTO1111_API_URL`     | `http://127.0.0.1:7860`          |
    /// | `BACKEND_TIMEOUT_SECS` | `300`                            |
    /// | `OUTPUT_DIR`           | `./output`                       |
    /// | `CONFIG_FILE`          | `./data/generation-configs.json` |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`          |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                             |
    /// | `HANDLER_TIMEOUT_SECS` | `600`                            |
    /// | `JOB_RETENTION_SECS`   | `300`                            |
    /// | `LOG_FORMAT`           | `pretty`                         |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3001".into())
            .parse()
            .expect("PORT must be a valid u16");

        let backend_url = std::env::var("AUTO1111_API_URL")
            .unwrap_or_else(|_| easel_sdapi::DEFAULT_BASE_URL.into());

        let backend_timeout_secs = secs_from_env("BACKEND_TIMEOUT_SECS", 300);

        let output_dir = std::env::var("OUTPUT_DIR")
            .unwrap_or_else(|_| "./output".into())
            .into();

        let config_file = std::env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "./data/generation-configs.json".into())
            .into();

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            host,
            port,
            backend_url,
            backend_timeout_secs,
            output_dir,
            config_file,
            cors_origins,
            request_timeout_secs: secs_from_env("REQUEST_TIMEOUT_SECS", 30),
            handler_timeout_secs: secs_from_env("HANDLER_TIMEOUT_SECS", 600),
            job_retention_secs: secs_from_env("JOB_RETENTION_SECS", 300),
            json_logs,
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            backend_url: easel_sdapi::DEFAULT_BASE_URL.into(),
            backend_timeout_secs: 300,
            output_dir: "./output".into(),
            config_file: "./data/generation-configs.json".into(),
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 30,
            handler_timeout_secs: 600,
            job_retention_secs: 300,
            json_logs: false,
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid u64")),
        Err(_) => default,
    }
}
