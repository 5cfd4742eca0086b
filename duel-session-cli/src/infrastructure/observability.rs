use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_level: tracing::Level,
    pub json_format: bool,
    pub show_thread_ids: bool,
    pub show_targets: bool,
    /// Whether to write logs to stderr at all
    pub show_logs: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: tracing::Level::INFO,
            json_format: false,
            show_thread_ids: false,
            show_targets: true,
            show_logs: true,
        }
    }
}

impl LogConfig {
    /// Development configuration (verbose, human-readable)
    pub fn dev() -> Self {
        Self {
            default_level: tracing::Level::DEBUG,
            show_thread_ids: true,
            ..Default::default()
        }
    }

    /// Warnings only, keeps the interactive prompt readable
    pub fn quiet() -> Self {
        Self {
            default_level: tracing::Level::WARN,
            show_targets: false,
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json_format = true;
        self
    }

    pub fn without_logs(mut self) -> Self {
        self.show_logs = false;
        self
    }

    /// `RUST_LOG` wins; otherwise the configured level for our crates
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = self.default_level.to_string().to_lowercase();
            EnvFilter::new(format!(
                "warn,duel_session_cli={level},duel_session_p2p={level},duel_session_core={level}"
            ))
        })
    }

    pub fn init(self) -> Result<(), String> {
        let env_filter = self.env_filter();
        let registry = tracing_subscriber::registry().with(env_filter);

        if !self.show_logs {
            return registry
                .try_init()
                .map_err(|e| format!("Failed to initialize tracing: {}", e));
        }

        if self.json_format {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(self.show_targets)
                .with_thread_ids(self.show_thread_ids)
                .with_writer(std::io::stderr);
            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| format!("Failed to initialize tracing: {}", e))
        } else {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(self.show_targets)
                .with_thread_ids(self.show_thread_ids)
                .with_writer(std::io::stderr);
            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| format!("Failed to initialize tracing: {}", e))
        }
    }
}
