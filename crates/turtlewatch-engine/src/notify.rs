use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{Config, MessagingCredentials};
use crate::response_json_or_error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyStatus {
    Sent { sid: String },
    Disabled,
    Failed,
}

impl NotifyStatus {
    pub fn delivered(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Delivers alert text to a human. Implementations swallow their own failures.
pub trait AlertSink: Send + Sync {
    fn notify(&self, message: &str) -> NotifyStatus;
}

/// SMS delivery through the Twilio Messages API.
pub struct TwilioNotifier {
    credentials: Option<MessagingCredentials>,
    api_base: String,
    http: HttpClient,
}

impl TwilioNotifier {
    pub fn new(
        credentials: Option<MessagingCredentials>,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build SMS HTTP client")?;
        Ok(Self {
            credentials,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.messaging.clone(),
            &config.messaging_api_base,
            config.notify_timeout,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    fn send(&self, credentials: &MessagingCredentials, message: &str) -> Result<String> {
        let endpoint = format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base, credentials.account_sid
        );
        let response = self
            .http
            .post(endpoint)
            .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
            .form(&[
                ("From", credentials.from_number.as_str()),
                ("To", credentials.to_number.as_str()),
                ("Body", message),
            ])
            .send()
            .context("SMS provider unreachable")?;
        let parsed = response_json_or_error("twilio", response)?;
        Ok(parsed
            .get("sid")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }
}

impl AlertSink for TwilioNotifier {
    fn notify(&self, message: &str) -> NotifyStatus {
        let Some(credentials) = &self.credentials else {
            warn!("SMS notifications disabled (messaging credentials incomplete); alert not sent");
            return NotifyStatus::Disabled;
        };
        match self.send(credentials, message) {
            Ok(sid) => {
                info!(sid = %sid, "alert SMS sent");
                NotifyStatus::Sent { sid }
            }
            Err(err) => {
                error!("alert SMS failed: {err:#}");
                NotifyStatus::Failed
            }
        }
    }
}
