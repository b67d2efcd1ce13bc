use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use turtlewatch_contracts::analysis::{normalize, AnalysisRecord, INSTRUCTION_PROMPT};

use crate::config::Config;
use crate::{response_json_or_error, truncate_text};

/// A vision-language model that answers a text prompt about one image.
pub trait VisionModel: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the model's raw textual answer.
    fn describe(&self, prompt: &str, image_base64: &str) -> Result<String>;
}

/// Ollama `/api/generate` transport.
pub struct OllamaVisionModel {
    endpoint: String,
    model: String,
    num_ctx: u64,
    http: HttpClient,
}

impl OllamaVisionModel {
    pub fn new(endpoint: &str, model: &str, num_ctx: u64, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build vision model HTTP client")?;
        Ok(Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            num_ctx,
            http,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.model_endpoint,
            &config.model_name,
            config.model_num_ctx,
            config.analysis_timeout,
        )
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint)
    }
}

impl VisionModel for OllamaVisionModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn describe(&self, prompt: &str, image_base64: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "images": [image_base64],
            "stream": false,
            "format": "json",
            "options": {
                "num_ctx": self.num_ctx,
            },
        });
        let response = self
            .http
            .post(self.generate_url())
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("vision model unreachable at {}", self.endpoint))?;
        let parsed = response_json_or_error("ollama", response)?;
        parsed
            .get("response")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("ollama reply has no `response` text"))
    }
}

/// Encodes an image, asks the model about it, and normalizes the answer.
pub struct AnalysisClient {
    model: Box<dyn VisionModel>,
    prompt: String,
    max_image_dim: u32,
}

impl AnalysisClient {
    pub fn new(model: Box<dyn VisionModel>) -> Self {
        Self {
            model,
            prompt: INSTRUCTION_PROMPT.to_string(),
            max_image_dim: 0,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_max_image_dim(mut self, max_image_dim: u32) -> Self {
        self.max_image_dim = max_image_dim;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Never fails: unreadable files and model errors produce the default record.
    pub fn analyze(&self, image_path: &Path) -> AnalysisRecord {
        let encoded = match encode_image(image_path, self.max_image_dim) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(image = %image_path.display(), "cannot analyse image: {err:#}");
                return AnalysisRecord::default();
            }
        };
        let raw = match self.model.describe(&self.prompt, &encoded) {
            Ok(raw) => raw,
            Err(err) => {
                error!(model = self.model.name(), "vision model request failed: {err:#}");
                return AnalysisRecord::default();
            }
        };
        debug!(raw = %truncate_text(&raw, 2000), "vision model answer");

        let record = normalize(&raw);
        if record.is_unknown() {
            warn!(
                model = self.model.name(),
                raw = %truncate_text(&raw, 300),
                "model answer did not yield a well-being classification"
            );
        }
        record
    }
}

/// Reads `path` and returns it base64-encoded, shrunk to `max_dim` when that
/// is non-zero and the image is larger.
pub fn encode_image(path: &Path, max_dim: u32) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    if max_dim == 0 {
        return Ok(BASE64.encode(bytes));
    }
    let payload = downscale(&bytes, max_dim).unwrap_or(bytes);
    Ok(BASE64.encode(payload))
}

fn downscale(bytes: &[u8], max_dim: u32) -> Option<Vec<u8>> {
    let decoded = match image::load_from_memory(bytes) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!("image decode failed, sending original bytes: {err}");
            return None;
        }
    };
    if decoded.width() <= max_dim && decoded.height() <= max_dim {
        return None;
    }
    let resized = decoded
        .resize(max_dim, max_dim, FilterType::Triangle)
        .to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&resized)
        .ok()?;
    Some(out)
}
