use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use tracing::{error, info};

use crate::config::Config;
use crate::truncate_text;

/// Asks something to drop a fresh image into `output_dir`.
pub trait CaptureTrigger: Send + Sync {
    /// `true` only when the request was accepted; failures are logged, never raised.
    fn trigger_capture(&self, output_dir: &Path) -> bool;
}

/// Client for the capture service's `GET /capture-now?output_dir=...` endpoint.
pub struct HttpCaptureClient {
    base_url: String,
    http: HttpClient,
}

impl HttpCaptureClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build capture HTTP client")?;
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.capture_url, config.capture_timeout)
    }

    pub fn capture_url(&self) -> String {
        format!("{}/capture-now", self.base_url)
    }

    fn request(&self, output_dir: &Path) -> Result<String> {
        let output_dir = output_dir.to_string_lossy();
        let response = self
            .http
            .get(self.capture_url())
            .query(&[("output_dir", output_dir.as_ref())])
            .send()
            .with_context(|| format!("capture service unreachable at {}", self.base_url))?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            bail!(
                "capture service returned {}: {}",
                status.as_u16(),
                truncate_text(body.trim(), 256)
            );
        }
        Ok(body)
    }
}

impl CaptureTrigger for HttpCaptureClient {
    fn trigger_capture(&self, output_dir: &Path) -> bool {
        match self.request(output_dir) {
            Ok(body) => {
                info!(
                    response = %truncate_text(body.trim(), 256),
                    "capture service accepted request"
                );
                true
            }
            Err(err) => {
                error!("capture request failed: {err:#}");
                false
            }
        }
    }
}
