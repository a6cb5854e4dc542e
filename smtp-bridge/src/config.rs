use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/smtpbridge/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Seconds between two dispatch cycles
    pub dispatch_interval: u64,
    #[serde(default)]
    pub dry_mode: bool,
    /// Directory receiving mails the provider failed to send
    #[serde(default)]
    pub fallback_dir: Option<PathBuf>,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub sender: SenderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Name announced in the greeting, defaults to the machine hostname
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// `user:password` entries accepted by AUTH PLAIN
    #[serde(default)]
    pub auth_users: Vec<String>,
    #[serde(default)]
    pub allow_anon: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenderConfig {
    pub provider: String,
    /// Provider specific settings, passed through untouched
    #[serde(default)]
    pub settings: toml::Table,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_max_message_size() -> usize {
    256 * 1024 * 1024 // 256 MiB
}

fn default_max_recipients() -> usize {
    500
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch_interval == 0 {
            return Err(BridgeError::Config(
                "dispatch_interval must be at least 1 second".to_string(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(BridgeError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.smtp.host, self.smtp.port)
    }

    /// Name used in the SMTP greeting and EHLO reply
    pub fn greeting_name(&self) -> String {
        self.smtp
            .hostname
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().to_string())
    }

    pub fn fallback_dir(&self) -> PathBuf {
        self.fallback_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn provider_setting(&self, key: &str) -> Option<&toml::Value> {
        self.sender.settings.get(key)
    }

    pub fn provider_str_setting(&self, key: &str) -> Option<&str> {
        self.provider_setting(key).and_then(toml::Value::as_str)
    }

    pub fn provider_int_setting(&self, key: &str) -> Option<i64> {
        self.provider_setting(key).and_then(toml::Value::as_integer)
    }

    pub fn provider_bool_setting(&self, key: &str) -> Option<bool> {
        self.provider_setting(key).and_then(toml::Value::as_bool)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch_interval: 5,
            dry_mode: false,
            fallback_dir: None,
            smtp: SmtpConfig {
                host: "127.0.0.1".to_string(),
                port: 1025,
                hostname: None,
                max_message_size: default_max_message_size(),
                max_recipients: default_max_recipients(),
                shutdown_grace_secs: default_shutdown_grace(),
            },
            auth: AuthConfig::default(),
            queue: QueueConfig::default(),
            sender: SenderConfig {
                provider: "ses".to_string(),
                settings: toml::Table::new(),
            },
            logging: LoggingConfig::default(),
        }
    }
}
