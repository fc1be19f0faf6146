//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{AgentConfig, ConfigError, SessionSettings, SynthesizerConfig, TranscriberConfig};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-session pipeline policy
    #[serde(default)]
    pub session: SessionSettings,

    /// Agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Transcriber backend
    #[serde(default)]
    pub transcriber: TranscriberConfig,

    /// Synthesizer backend
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_session()?;
        self.validate_agent()?;
        self.validate_credentials()?;

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_sessions".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "server.ws_path".to_string(),
                message: format!("Must start with '/', got {}", self.server.ws_path),
            });
        }

        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        let session = &self.session;

        if session.bus_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.bus_depth".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !(10..=100).contains(&session.frame_ms) {
            return Err(ConfigError::InvalidValue {
                field: "session.frame_ms".to_string(),
                message: format!("Must be between 10 and 100, got {}", session.frame_ms),
            });
        }

        for (field, value) in [
            ("session.transcriber_timeout_ms", session.transcriber_timeout_ms),
            ("session.agent_timeout_ms", session.agent_timeout_ms),
            ("session.synthesizer_timeout_ms", session.synthesizer_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Timeout must be positive".to_string(),
                });
            }
        }

        if session.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_consecutive_failures".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if session.apology.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "session.apology".to_string(),
                message: "Apology text cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    fn validate_agent(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;

        if agent.prompt_preamble.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "agent.prompt_preamble".to_string(),
                message: "Persona preamble cannot be empty".to_string(),
            });
        }

        if agent.max_concurrent_generations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.max_concurrent_generations".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&agent.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "agent.llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", agent.llm.temperature),
            });
        }

        if agent.llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.llm.max_tokens".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Remote backends need keys; strict environments refuse to start without them
    fn validate_credentials(&self) -> Result<(), ConfigError> {
        let synthesizer = self
            .synthesizer
            .needs_api_key()
            .then(|| ("synthesizer.api_key", self.synthesizer.api_key()));
        let missing = [
            ("agent.llm.api_key", self.agent.llm.api_key.as_deref()),
            ("transcriber.api_key", self.transcriber.api_key.as_deref()),
        ]
        .into_iter()
        .chain(synthesizer)
        .filter(|(_, key)| key.map_or(true, |k| k.trim().is_empty()))
        .map(|(field, _)| field);

        for field in missing {
            if self.environment.is_strict() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
            tracing::warn!(field, "API key not configured; the backend will reject requests");
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path for conversations
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_ws_path() -> String {
    "/conversation".to_string()
}
fn default_max_sessions() -> usize {
    100
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_sessions: default_max_sessions(),
            cors_enabled: default_true(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (PARLEY__ prefix, `__` between sections)
/// 2. config/{env}.{toml,yaml,json} (if env specified)
/// 3. config/default.{toml,yaml,json}
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Same as [`load_settings`] with an explicit config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::from(dir.join("default")).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("PARLEY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    // Validate
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::OpenAiSpeechConfig;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.ws_path, "/conversation");
        assert_eq!(settings.session.max_consecutive_failures, 3);
        assert!(settings.session.allow_interruptions);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.session.bus_depth = 0;
        assert!(settings.validate().is_err());

        settings.session.bus_depth = 10;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_timeout_validation() {
        let mut settings = Settings::default();
        settings.session.agent_timeout_ms = 0;

        match settings.validate_session() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "session.agent_timeout_ms")
            },
            other => panic!("expected invalid timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_agent_validation() {
        let mut settings = Settings::default();
        settings.agent.llm.temperature = 2.5;
        assert!(settings.validate_agent().is_err());

        settings.agent.llm.temperature = 0.7;
        settings.agent.max_concurrent_generations = 0;
        assert!(settings.validate_agent().is_err());

        settings.agent.max_concurrent_generations = 4;
        settings.agent.prompt_preamble = " ".to_string();
        assert!(settings.validate_agent().is_err());
    }

    #[test]
    fn test_server_validation() {
        let mut settings = Settings::default();

        settings.server.port = 0;
        assert!(settings.validate_server().is_err());

        settings.server.port = 3000;
        settings.server.ws_path = "conversation".to_string();
        assert!(settings.validate_server().is_err());
    }

    #[test]
    fn test_strict_environment_requires_keys() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.agent.llm.api_key = None;
        assert!(matches!(
            settings.validate_credentials(),
            Err(ConfigError::MissingField(_))
        ));

        settings.environment = RuntimeEnvironment::Development;
        assert!(settings.validate_credentials().is_ok());
    }

    #[test]
    fn test_keyless_synthesizer_passes_strict_validation() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.agent.llm.api_key = Some("sk-llm".to_string());
        settings.transcriber.api_key = Some("dg-key".to_string());
        assert_eq!(settings.synthesizer.provider(), "stream_elements");
        assert!(settings.validate_credentials().is_ok());

        settings.synthesizer = SynthesizerConfig::OpenAi(OpenAiSpeechConfig {
            api_key: None,
            ..Default::default()
        });
        assert!(matches!(
            settings.validate_credentials(),
            Err(ConfigError::MissingField(field)) if field == "synthesizer.api_key"
        ));
    }

    #[test]
    fn test_load_layered_files() {
        let dir = tempfile::tempdir().unwrap();

        let mut default = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            default,
            "[server]\nport = 4000\n\n[session]\nbus_depth = 20\nmax_consecutive_failures = 5"
        )
        .unwrap();

        let mut staging = std::fs::File::create(dir.path().join("local.toml")).unwrap();
        writeln!(
            staging,
            "[session]\nbus_depth = 30\n\n[synthesizer]\nprovider = \"eleven_labs\"\nvoice_id = \"v1\""
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), Some("local")).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.session.bus_depth, 30);
        assert_eq!(settings.session.max_consecutive_failures, 5);
        assert_eq!(settings.synthesizer.provider(), "eleven_labs");
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(dir.path(), None).unwrap();
        assert_eq!(settings.server.port, 3000);
    }
}
