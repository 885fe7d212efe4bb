//! Application settings, read from config files and the environment.

use config::{Config, ConfigError, Environment, File};
use serde_derive::Deserialize;

use crate::MAX_OUTBOX_AGE_SECS;

pub const ENV_PREFIX: &str = "courier";

/// The node settings, read from Environment or settings file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path of the node database file (`:memory:` for a transient store)
    pub db_path: String,
    /// Use human readable (simplified, non-JSON) logs
    pub human_logs: bool,
    /// The host name to send recorded metrics
    pub statsd_host: Option<String>,
    /// The port number to send recorded metrics
    pub statsd_port: u16,
    /// The root label to apply to metrics.
    pub statsd_label: String,
    /// Age in seconds after which undelivered outbox rows may be flushed
    pub outbox_max_age_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "courier.db".to_owned(),
            human_logs: false,
            statsd_host: Some("localhost".to_owned()),
            statsd_port: 8125,
            statsd_label: "courier".to_owned(),
            outbox_max_age_secs: MAX_OUTBOX_AGE_SECS,
        }
    }
}

impl Settings {
    /// Load the settings from the config files in order first then the environment.
    pub fn with_env_and_config_files(filenames: &[String]) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        // Merge the configs from the files
        for filename in filenames {
            s = s.add_source(File::with_name(filename));
        }

        // Merge the environment overrides
        s = s.add_source(Environment::with_prefix(&ENV_PREFIX.to_uppercase()).separator("__"));

        let built = s.build()?;
        let s = built.try_deserialize::<Settings>()?;
        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.is_empty() {
            return Err(ConfigError::Message(format!(
                "Invalid {}_DB_PATH: cannot be empty",
                ENV_PREFIX
            )));
        }
        if self.outbox_max_age_secs <= 0 {
            return Err(ConfigError::Message(format!(
                "Invalid {}_OUTBOX_MAX_AGE_SECS: must be positive",
                ENV_PREFIX
            )));
        }
        Ok(())
    }

    pub fn test_settings() -> Self {
        Self {
            db_path: ":memory:".to_owned(),
            statsd_host: None,
            human_logs: true,
            ..Default::default()
        }
    }
}
