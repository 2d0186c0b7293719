use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Require JWT authentication on streaming and intake routes
    #[arg(long, env = "JWT_REQUIRED")]
    pub jwt_required: Option<bool>,

    /// Reject oversized attachments instead of tagging them
    #[arg(long, env = "REJECT_OVERSIZED_ATTACHMENTS")]
    pub reject_oversized: Option<bool>,

    /// Install the Prometheus recorder and expose /metrics
    #[arg(long, env = "METRICS_ENABLED")]
    pub metrics_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub stream: StreamConfig,
    pub attachments: AttachmentsConfig,
    pub identity: IdentityConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub jwt_required: bool,
    /// HS256 key. Empty means bearer tokens are never trusted.
    pub jwt_secret: String,
    /// Let any caller use `POST /events/publish`. Otherwise publishing needs
    /// a token carrying the `publisher` role.
    pub publish_open: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Outbound buffer per connected client, in events.
    pub channel_capacity: usize,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttachmentsConfig {
    pub max_body_bytes: usize,
    #[serde(default)]
    pub max_item_kb: Option<u64>,
    pub reject_oversized: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub storage_path: String,
    pub storage_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("security.jwt_required", false)?
            .set_default("security.jwt_secret", "")?
            .set_default("security.publish_open", false)?
            .set_default("stream.channel_capacity", 64)?
            .set_default("stream.keep_alive_secs", 15)?
            .set_default("attachments.max_body_bytes", 10 * 1024 * 1024)?
            .set_default("attachments.reject_oversized", false)?
            .set_default("identity.storage_path", ".study-relay/session.json")?
            .set_default("identity.storage_key", "study_relay.session_id")?
            .set_default("telemetry.metrics_enabled", false)?;

        // An explicit file must exist; the working-directory fallback is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // Prefixed environment, e.g. RELAY_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Priority: CLI flag > CLI env alias > prefixed env > config file > defaults.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(required) = cli.jwt_required {
            builder = builder.set_override("security.jwt_required", required)?;
        }
        if let Some(reject) = cli.reject_oversized {
            builder = builder.set_override("attachments.reject_oversized", reject)?;
        }
        if let Some(enabled) = cli.metrics_enabled {
            builder = builder.set_override("telemetry.metrics_enabled", enabled)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Reject settings the server cannot run safely with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.security.jwt_required && self.security.jwt_secret.is_empty() {
            return Err(config::ConfigError::Message(
                "security.jwt_required is set but security.jwt_secret is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Address the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
            },
            security: SecurityConfig {
                jwt_required: false,
                jwt_secret: String::new(),
                publish_open: false,
            },
            stream: StreamConfig {
                channel_capacity: 64,
                keep_alive_secs: 15,
            },
            attachments: AttachmentsConfig {
                max_body_bytes: 10 * 1024 * 1024,
                max_item_kb: None,
                reject_oversized: false,
            },
            identity: IdentityConfig {
                storage_path: ".study-relay/session.json".to_string(),
                storage_key: "study_relay.session_id".to_string(),
            },
            telemetry: TelemetryConfig {
                metrics_enabled: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let config = AppConfig::load_from_args([
            "study-relay",
            "--port",
            "4100",
            "--jwt-required",
            "true",
        ])
        .unwrap();

        assert_eq!(config.server.port, 4100);
        assert!(config.security.jwt_required);
        assert_eq!(config.stream.channel_capacity, 64);
        assert!(config.attachments.max_item_kb.is_none());
    }

    #[test]
    fn test_unknown_flag_is_config_error() {
        let err = AppConfig::load_from_args(["study-relay", "--no-such-flag"]).unwrap_err();
        assert!(matches!(err, config::ConfigError::Message(_)));
    }

    #[test]
    fn test_required_jwt_needs_secret() {
        let mut cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.security.jwt_required = true;
        assert!(matches!(
            cfg.validate(),
            Err(config::ConfigError::Message(_))
        ));

        cfg.security.jwt_secret = "s3cret".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_bind_address() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
    }
}
