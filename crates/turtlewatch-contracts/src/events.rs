use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::cycle::CycleOutcome;

pub const CYCLE_FINISHED: &str = "cycle_finished";

/// Append-only JSONL journal of scheduler cycles.
///
/// Each line is one compact object carrying `type`, `run_id` and `ts` next to
/// the serialized [`CycleOutcome`] fields.
#[derive(Debug, Clone)]
pub struct CycleJournal {
    inner: Arc<CycleJournalInner>,
}

#[derive(Debug)]
struct CycleJournalInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl CycleJournal {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CycleJournalInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Appends one `cycle_finished` line for `outcome` and returns it.
    pub fn record(&self, outcome: &CycleOutcome) -> anyhow::Result<Value> {
        let event = self.cycle_event(outcome)?;
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        if let Some(parent) = self.inner.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow!("cycle journal lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to {}", self.inner.path.display()))?;
        Ok(event)
    }

    fn cycle_event(&self, outcome: &CycleOutcome) -> anyhow::Result<Value> {
        let Value::Object(fields) = serde_json::to_value(outcome)? else {
            bail!("cycle outcome did not serialize to an object");
        };
        let mut event = json!({
            "type": CYCLE_FINISHED,
            "run_id": self.inner.run_id,
            "ts": now_utc_iso(),
        });
        if let Value::Object(header) = &mut event {
            header.extend(fields);
        }
        Ok(event)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
