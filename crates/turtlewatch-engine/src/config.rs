use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_INTERVAL_MINUTES: u64 = 10;
pub const DEFAULT_OLLAMA_HOST: &str = "http://host.docker.internal:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "gemma3:27b";
pub const DEFAULT_MODEL_NUM_CTX: u64 = 10_000;
pub const DEFAULT_CAPTURE_URL: &str = "http://capture:5000";
pub const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SETTLE_SECS: u64 = 5;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("image directory is not configured (set TURTLEWATCH_IMAGE_DIR or HOST_IMAGE_DIR)")]
    MissingImageDir,
    #[error("interval must be a whole number of minutes greater than zero, got {raw:?}")]
    InvalidInterval { raw: String },
    #[error("{key} must be a non-negative whole number, got {raw:?}")]
    InvalidNumber { key: &'static str, raw: String },
    #[error("{key} must be true or false, got {raw:?}")]
    InvalidFlag { key: &'static str, raw: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct MessagingCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

impl MessagingCredentials {
    /// All four parts or nothing.
    pub fn from_parts(
        account_sid: Option<String>,
        auth_token: Option<String>,
        from_number: Option<String>,
        to_number: Option<String>,
    ) -> Option<Self> {
        Some(Self {
            account_sid: account_sid?,
            auth_token: auth_token?,
            from_number: from_number?,
            to_number: to_number?,
        })
    }
}

impl fmt::Debug for MessagingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingCredentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .field("to_number", &self.to_number)
            .finish()
    }
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub interval_minutes: u64,
    pub image_dir: PathBuf,
    pub model_endpoint: String,
    pub model_name: String,
    pub model_num_ctx: u64,
    pub capture_url: String,
    pub capture_timeout: Duration,
    pub analysis_timeout: Duration,
    pub notify_timeout: Duration,
    pub settle_timeout: Duration,
    /// Longest image edge sent to the model; 0 sends the file untouched.
    pub max_image_dim: u32,
    pub events_path: Option<PathBuf>,
    pub bind_addr: String,
    pub autostart: bool,
    pub messaging: Option<MessagingCredentials>,
    pub messaging_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let interval_minutes = match env.first(&["TURTLEWATCH_INTERVAL_MINUTES", "INTERVAL"]) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(minutes) if minutes > 0 => minutes,
                _ => return Err(ConfigError::InvalidInterval { raw }),
            },
            None => DEFAULT_INTERVAL_MINUTES,
        };
        let image_dir = env
            .first(&["TURTLEWATCH_IMAGE_DIR", "HOST_IMAGE_DIR"])
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingImageDir)?;
        if !image_dir.is_dir() {
            warn!(
                dir = %image_dir.display(),
                "image directory does not exist yet; cycles will skip until it appears"
            );
        }

        let messaging = MessagingCredentials::from_parts(
            env.first(&["TWILIO_ACCOUNT_SID"]),
            env.first(&["TWILIO_AUTH_TOKEN"]),
            env.first(&["TWILIO_PHONE_NUMBER"]),
            env.first(&["RECIPIENT_PHONE_NUMBER"]),
        );
        if messaging.is_none() {
            let present = [
                "TWILIO_ACCOUNT_SID",
                "TWILIO_AUTH_TOKEN",
                "TWILIO_PHONE_NUMBER",
                "RECIPIENT_PHONE_NUMBER",
            ]
            .iter()
            .filter(|key| env.first(&[**key]).is_some())
            .count();
            if present > 0 {
                warn!(present, "messaging credentials incomplete; SMS alerts disabled");
            }
        }

        Ok(Self {
            interval_minutes,
            image_dir,
            model_endpoint: trim_base_url(
                env.first(&["TURTLEWATCH_OLLAMA_HOST", "OLLAMA_HOST"])
                    .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            ),
            model_name: env
                .first(&["TURTLEWATCH_OLLAMA_MODEL", "OLLAMA_MODEL"])
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            model_num_ctx: env.number("TURTLEWATCH_MODEL_NUM_CTX", DEFAULT_MODEL_NUM_CTX)?,
            capture_url: trim_base_url(
                env.first(&["TURTLEWATCH_CAPTURE_URL", "CAPTURE_SERVICE_URL"])
                    .unwrap_or_else(|| DEFAULT_CAPTURE_URL.to_string()),
            ),
            capture_timeout: env.seconds(
                "TURTLEWATCH_CAPTURE_TIMEOUT_SECS",
                DEFAULT_CAPTURE_TIMEOUT_SECS,
            )?,
            analysis_timeout: env.seconds(
                "TURTLEWATCH_ANALYSIS_TIMEOUT_SECS",
                DEFAULT_ANALYSIS_TIMEOUT_SECS,
            )?,
            notify_timeout: env
                .seconds("TURTLEWATCH_NOTIFY_TIMEOUT_SECS", DEFAULT_NOTIFY_TIMEOUT_SECS)?,
            settle_timeout: env.seconds("TURTLEWATCH_SETTLE_SECS", DEFAULT_SETTLE_SECS)?,
            max_image_dim: u32::try_from(env.number("TURTLEWATCH_MAX_IMAGE_DIM", 0)?)
                .unwrap_or(u32::MAX),
            events_path: env.first(&["TURTLEWATCH_EVENTS_PATH"]).map(PathBuf::from),
            bind_addr: env
                .first(&["TURTLEWATCH_BIND"])
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            autostart: env.flag("TURTLEWATCH_AUTOSTART", true)?,
            messaging,
            messaging_api_base: trim_base_url(
                env.first(&["TWILIO_API_BASE"])
                    .unwrap_or_else(|| DEFAULT_TWILIO_API_BASE.to_string()),
            ),
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn messaging_enabled(&self) -> bool {
        self.messaging.is_some()
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn first(&self, keys: &[&str]) -> Option<String> {
        for key in keys {
            if let Some(value) = (self.0)(key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }

    fn number(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.first(&[key]) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { key, raw }),
            None => Ok(default),
        }
    }

    fn seconds(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.number(key, default).map(Duration::from_secs)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.first(&[key]) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { key, raw }),
        }
    }
}

fn trim_base_url(raw: String) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{Config, ConfigError, MessagingCredentials};

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_image_dir_is_set() -> anyhow::Result<()> {
        let config = load(&[("HOST_IMAGE_DIR", "/images")])?;
        assert_eq!(config.image_dir, PathBuf::from("/images"));
        assert_eq!(config.interval_minutes, 10);
        assert_eq!(config.interval(), Duration::from_secs(600));
        assert_eq!(config.model_endpoint, "http://host.docker.internal:11434");
        assert_eq!(config.model_name, "gemma3:27b");
        assert_eq!(config.model_num_ctx, 10_000);
        assert_eq!(config.capture_url, "http://capture:5000");
        assert_eq!(config.capture_timeout, Duration::from_secs(10));
        assert_eq!(config.max_image_dim, 0);
        assert!(config.autostart);
        assert!(config.events_path.is_none());
        assert!(!config.messaging_enabled());
        Ok(())
    }

    #[test]
    fn prefixed_keys_win_over_legacy_names() -> anyhow::Result<()> {
        let config = load(&[
            ("TURTLEWATCH_IMAGE_DIR", "/data/frames"),
            ("HOST_IMAGE_DIR", "/images"),
            ("TURTLEWATCH_INTERVAL_MINUTES", "3"),
            ("INTERVAL", "45"),
            ("OLLAMA_HOST", "http://gpu-box:11434/"),
            ("TURTLEWATCH_CAPTURE_URL", "http://camera.local:5000/"),
        ])?;
        assert_eq!(config.image_dir, PathBuf::from("/data/frames"));
        assert_eq!(config.interval_minutes, 3);
        assert_eq!(config.model_endpoint, "http://gpu-box:11434");
        assert_eq!(config.capture_url, "http://camera.local:5000");
        Ok(())
    }

    #[test]
    fn missing_image_dir_is_fatal() {
        assert_eq!(
            load(&[("INTERVAL", "5")]).err(),
            Some(ConfigError::MissingImageDir)
        );
        assert_eq!(
            load(&[("HOST_IMAGE_DIR", "   ")]).err(),
            Some(ConfigError::MissingImageDir)
        );
    }

    #[test]
    fn interval_must_be_positive_integer() {
        for raw in ["0", "-2", "1.5", "soon"] {
            assert_eq!(
                load(&[("HOST_IMAGE_DIR", "/images"), ("INTERVAL", raw)]).err(),
                Some(ConfigError::InvalidInterval {
                    raw: raw.to_string()
                }),
                "raw {raw:?}"
            );
        }
    }

    #[test]
    fn invalid_numbers_and_flags_are_reported() {
        assert_eq!(
            load(&[
                ("HOST_IMAGE_DIR", "/images"),
                ("TURTLEWATCH_SETTLE_SECS", "a while")
            ])
            .err(),
            Some(ConfigError::InvalidNumber {
                key: "TURTLEWATCH_SETTLE_SECS",
                raw: "a while".to_string()
            })
        );
        assert_eq!(
            load(&[
                ("HOST_IMAGE_DIR", "/images"),
                ("TURTLEWATCH_AUTOSTART", "maybe")
            ])
            .err(),
            Some(ConfigError::InvalidFlag {
                key: "TURTLEWATCH_AUTOSTART",
                raw: "maybe".to_string()
            })
        );
    }

    #[test]
    fn complete_messaging_credentials_enable_sms() -> anyhow::Result<()> {
        let config = load(&[
            ("HOST_IMAGE_DIR", "/images"),
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("TWILIO_PHONE_NUMBER", "+15550001111"),
            ("RECIPIENT_PHONE_NUMBER", "+15552223333"),
        ])?;
        assert_eq!(
            config.messaging,
            Some(MessagingCredentials {
                account_sid: "AC123".to_string(),
                auth_token: "secret".to_string(),
                from_number: "+15550001111".to_string(),
                to_number: "+15552223333".to_string(),
            })
        );
        assert!(!format!("{:?}", config.messaging).contains("secret"));
        Ok(())
    }

    #[test]
    fn partial_messaging_credentials_disable_sms() -> anyhow::Result<()> {
        let config = load(&[
            ("HOST_IMAGE_DIR", "/images"),
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_PHONE_NUMBER", "+15550001111"),
            ("RECIPIENT_PHONE_NUMBER", "+15552223333"),
        ])?;
        assert!(config.messaging.is_none());
        assert!(!config.messaging_enabled());
        Ok(())
    }
}
