use config::{Config, ConfigError, Environment, File};
use iopanel_sdk::{PanelConfig, RetryPolicy};
use serde::Deserialize;
use std::{ops::Deref, sync::Arc};

pub const DEFAULT_CONFIG_FILE_NAME: &str = "iopanel.toml";

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Command line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub poll_interval_ms: Option<u64>,
}

impl Settings {
    /// Layering, lowest first: built-in defaults, the optional TOML file,
    /// `IOPANEL__*` environment variables, command line overrides.
    pub fn new(config_path: &str, overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load(config_path, Self::environment(), overrides)
    }

    fn environment() -> Environment {
        Environment::with_prefix("IOPANEL")
            .separator("__")
            .try_parsing(true)
    }

    fn load(
        config_path: &str,
        environment: Environment,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(environment)
            .set_override_option("panel.host", overrides.host.clone())?
            .set_override_option("panel.port", overrides.port.map(i64::from))?
            .set_override_option("panel.unit_id", overrides.unit_id.map(i64::from))?
            .set_override_option(
                "panel.poll_interval_ms",
                overrides
                    .poll_interval_ms
                    .and_then(|ms| i64::try_from(ms).ok()),
            )?;
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub panel: PanelConfig,
    /// Used by `watch` for the initial connect
    #[serde(default)]
    pub reconnect: RetryPolicy,
    /// Fallback when `RUST_LOG` is unset
    #[serde(default = "Inner::default_log_level")]
    pub log_level: String,
}

impl Inner {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Map;
    use iopanel_sdk::RegisterPolicy;

    const NO_FILE: &str = "/nonexistent/iopanel";

    /// Settings with a fixed environment instead of the process one.
    fn load_with_env(vars: &[(&str, &str)], overrides: &Overrides) -> Settings {
        let env: Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::load(NO_FILE, Settings::environment().source(Some(env)), overrides).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = load_with_env(&[], &Overrides::default());
        assert_eq!(settings.panel, PanelConfig::default());
        assert_eq!(settings.panel.register_policy, RegisterPolicy::StrictSentinel);
        assert_eq!(settings.reconnect, RetryPolicy::default());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_command_line_overrides_win() {
        let overrides = Overrides {
            host: Some("10.21.240.2".to_string()),
            port: Some(5000),
            unit_id: Some(7),
            poll_interval_ms: Some(0),
        };
        let settings = load_with_env(&[("IOPANEL__PANEL__PORT", "1502")], &overrides);
        assert_eq!(settings.panel.host, "10.21.240.2");
        assert_eq!(settings.panel.port, 5000);
        assert_eq!(settings.panel.unit_id, 7);
        assert_eq!(settings.panel.poll_interval(), None);
    }

    #[test]
    fn test_environment_layer() {
        let settings = load_with_env(
            &[
                ("IOPANEL__PANEL__HOST", "192.168.1.50"),
                ("IOPANEL__PANEL__PORT", "1502"),
                ("IOPANEL__LOG_LEVEL", "debug"),
            ],
            &Overrides::default(),
        );
        assert_eq!(settings.panel.host, "192.168.1.50");
        assert_eq!(settings.panel.port, 1502);
        assert_eq!(settings.log_level, "debug");
    }
}
