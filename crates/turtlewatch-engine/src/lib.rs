use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;
use tracing::info;
use turtlewatch_contracts::events::CycleJournal;

pub mod cancel;
pub mod capture;
pub mod config;
pub mod notify;
pub mod scheduler;
pub mod selector;
pub mod vision;

#[cfg(test)]
mod test_support;

use capture::HttpCaptureClient;
use config::Config;
use notify::TwilioNotifier;
use scheduler::{CycleRunner, SchedulerSupervisor};
use vision::{AnalysisClient, OllamaVisionModel};

/// Everything the process shares between the control surface and the loop.
pub struct Monitor {
    pub config: Arc<Config>,
    pub analysis: Arc<AnalysisClient>,
    pub supervisor: SchedulerSupervisor,
}

impl Monitor {
    pub fn from_config(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let analysis = Arc::new(build_analysis_client(&config)?);
        let runner = build_cycle_runner(&config, Arc::clone(&analysis))?;
        let supervisor = SchedulerSupervisor::new(runner, config.interval());
        Ok(Self {
            config,
            analysis,
            supervisor,
        })
    }
}

pub fn build_analysis_client(config: &Config) -> Result<AnalysisClient> {
    let model = OllamaVisionModel::from_config(config)?;
    Ok(AnalysisClient::new(Box::new(model)).with_max_image_dim(config.max_image_dim))
}

pub fn build_cycle_runner(config: &Config, analysis: Arc<AnalysisClient>) -> Result<CycleRunner> {
    let capture = HttpCaptureClient::from_config(config)?;
    let notifier = TwilioNotifier::from_config(config)?;
    let mut runner = CycleRunner::new(
        config.image_dir.clone(),
        Box::new(capture),
        analysis,
        Box::new(notifier),
    )
    .with_settle_timeout(config.settle_timeout);
    if let Some(path) = &config.events_path {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(path = %path.display(), run_id = %run_id, "journaling cycles");
        runner = runner.with_journal(CycleJournal::new(path, run_id));
    }
    Ok(runner)
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
