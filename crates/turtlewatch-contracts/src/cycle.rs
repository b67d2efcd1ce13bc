use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CaptureFailed,
    NoImage,
    StaleImage,
    Failed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CaptureFailed => "capture_failed",
            Self::NoImage => "no_image",
            Self::StaleImage => "stale_image",
            Self::Failed => "failed",
        }
    }
}

/// What happened during one capture → analyse → alert iteration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub started_at: String,
    pub capture_ok: bool,
    pub image: Option<PathBuf>,
    pub image_sha256: Option<String>,
    pub record: Option<AnalysisRecord>,
    pub alert_sent: bool,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
}

impl CycleOutcome {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ..Self::default()
        }
    }

    pub fn skip(mut self, reason: SkipReason) -> Self {
        self.skipped = Some(reason);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.skipped = Some(SkipReason::Failed);
        self.error = Some(error.into());
        self
    }

    pub fn completed(&self) -> bool {
        self.skipped.is_none() && self.record.is_some()
    }

    /// One-line description for log output.
    pub fn summary(&self) -> String {
        if let Some(reason) = self.skipped {
            return format!("cycle {} skipped ({})", self.cycle, reason.as_str());
        }
        let wellbeing = self
            .record
            .as_ref()
            .map(|record| record.wellbeing.as_str())
            .unwrap_or("unknown");
        format!(
            "cycle {} analysed {} wellbeing={} alert_sent={}",
            self.cycle,
            self.image
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            wellbeing,
            self.alert_sent
        )
    }
}
