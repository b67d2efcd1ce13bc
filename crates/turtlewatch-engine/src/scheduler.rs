//! The capture → select → analyse → decide → notify loop.
//!
//! [`CycleRunner`] executes one iteration and contains every failure inside
//! it, panics included. [`SchedulerSupervisor`] owns the runner, guarantees at
//! most one loop per process and sleeps between cycles on a
//! [`CancellationToken`].

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use turtlewatch_contracts::alerts::{alert_message_now, should_alert};
use turtlewatch_contracts::cycle::{CycleOutcome, SkipReason};
use turtlewatch_contracts::events::CycleJournal;

use crate::cancel::CancellationToken;
use crate::capture::CaptureTrigger;
use crate::notify::AlertSink;
use crate::selector::{latest_image, ImageCandidate};
use crate::vision::AnalysisClient;

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct CycleRunner {
    image_dir: PathBuf,
    settle_timeout: Duration,
    capture: Box<dyn CaptureTrigger>,
    analysis: Arc<AnalysisClient>,
    notifier: Box<dyn AlertSink>,
    journal: Option<CycleJournal>,
    cycles: u64,
    last_fingerprint: Option<String>,
}

impl CycleRunner {
    pub fn new(
        image_dir: impl Into<PathBuf>,
        capture: Box<dyn CaptureTrigger>,
        analysis: Arc<AnalysisClient>,
        notifier: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            image_dir: image_dir.into(),
            settle_timeout: Duration::from_secs(5),
            capture,
            analysis,
            notifier,
            journal: None,
            cycles: 0,
            last_fingerprint: None,
        }
    }

    /// Upper bound on how long to wait for the triggered capture to show up.
    pub fn with_settle_timeout(mut self, settle_timeout: Duration) -> Self {
        self.settle_timeout = settle_timeout;
        self
    }

    pub fn with_journal(mut self, journal: CycleJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles
    }

    /// Runs one full cycle. Never panics and never returns an error: every
    /// failure becomes a skipped or failed [`CycleOutcome`].
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let started = CycleOutcome::new(self.cycles);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_steps(started.clone())));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                error!(cycle = started.cycle, "cycle failed: {err:#}");
                started.failed(format!("{err:#}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(cycle = started.cycle, "cycle panicked: {message}");
                started.failed(format!("panic: {message}"))
            }
        };
        self.record(&outcome);
        outcome
    }

    fn run_steps(&mut self, mut outcome: CycleOutcome) -> Result<CycleOutcome> {
        let cycle = outcome.cycle;
        let baseline = latest_image(&self.image_dir);

        info!(cycle, dir = %self.image_dir.display(), "triggering capture");
        outcome.capture_ok = self.capture.trigger_capture(&self.image_dir);
        if !outcome.capture_ok {
            warn!(cycle, "capture failed; skipping cycle");
            return Ok(outcome.skip(SkipReason::CaptureFailed));
        }

        let Some(image) = self.await_capture(baseline.as_ref()) else {
            warn!(cycle, dir = %self.image_dir.display(), "no eligible image found; skipping cycle");
            return Ok(outcome.skip(SkipReason::NoImage));
        };
        let fingerprint = fingerprint_file(&image)?;
        outcome.image = Some(image.clone());
        outcome.image_sha256 = Some(fingerprint.clone());
        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            warn!(cycle, image = %image.display(), "image already analysed; skipping cycle");
            return Ok(outcome.skip(SkipReason::StaleImage));
        }

        info!(cycle, image = %image.display(), model = self.analysis.model_name(), "analysing image");
        let record = self.analysis.analyze(&image);
        info!(cycle, wellbeing = %record.wellbeing, "analysis finished");
        if !record.is_unknown() {
            self.last_fingerprint = Some(fingerprint);
        }

        if should_alert(&record) {
            warn!(cycle, "distress detected; sending alert");
            outcome.alert_sent = self.notifier.notify(&alert_message_now(&record)).delivered();
        }
        outcome.record = Some(record);
        Ok(outcome)
    }

    /// Polls the image directory until something other than `baseline` shows
    /// up, falling back to the latest image once the settle window closes.
    fn await_capture(&self, baseline: Option<&ImageCandidate>) -> Option<PathBuf> {
        let deadline = Instant::now() + self.settle_timeout;
        loop {
            if let Some(current) = latest_image(&self.image_dir) {
                if baseline != Some(&current) {
                    return Some(current.path);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(SETTLE_POLL_INTERVAL.min(remaining));
        }

        let fallback = latest_image(&self.image_dir)?;
        warn!(
            image = %fallback.path.display(),
            waited_ms = self.settle_timeout.as_millis() as u64,
            "no new image appeared; using latest available"
        );
        Some(fallback.path)
    }

    fn record(&self, outcome: &CycleOutcome) {
        info!("{}", outcome.summary());
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(outcome) {
                warn!(path = %journal.path().display(), "cycle journal write failed: {err:#}");
            }
        }
    }
}

fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic payload".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

impl StartStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::AlreadyRunning => "already_running",
        }
    }
}

/// Owns the one scheduler loop a process may run.
#[derive(Clone)]
pub struct SchedulerSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    interval: Duration,
    running: AtomicBool,
    runner: Mutex<Option<CycleRunner>>,
    cancel: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerSupervisor {
    pub fn new(runner: CycleRunner, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                interval,
                running: AtomicBool::new(false),
                runner: Mutex::new(Some(runner)),
                cancel: Mutex::new(CancellationToken::new()),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawns the loop unless one is already running.
    pub fn start(&self) -> Result<StartStatus> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(StartStatus::AlreadyRunning);
        }

        let runner = match self.inner.runner.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(runner) = runner else {
            self.inner.running.store(false, Ordering::SeqCst);
            bail!("scheduler runner is unavailable");
        };

        let token = CancellationToken::new();
        if let Ok(mut slot) = self.inner.cancel.lock() {
            *slot = token.clone();
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("turtlewatch-scheduler".to_string())
            .spawn(move || {
                let runner = run_loop(runner, inner.interval, &token);
                if let Ok(mut slot) = inner.runner.lock() {
                    *slot = Some(runner);
                }
                inner.running.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(handle) => {
                if let Ok(mut slot) = self.inner.handle.lock() {
                    *slot = Some(handle);
                }
                Ok(StartStatus::Started)
            }
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                Err(err).context("failed to spawn scheduler thread")
            }
        }
    }

    /// Signals the loop and waits for the in-flight cycle to finish.
    pub fn stop(&self) -> Result<()> {
        let token = self
            .inner
            .cancel
            .lock()
            .map_err(|_| anyhow!("scheduler token lock poisoned"))?
            .clone();
        token.cancel();
        let handle = self
            .inner
            .handle
            .lock()
            .map_err(|_| anyhow!("scheduler handle lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("scheduler thread panicked"))?;
        }
        Ok(())
    }
}

fn run_loop(mut runner: CycleRunner, interval: Duration, token: &CancellationToken) -> CycleRunner {
    info!(interval_secs = interval.as_secs(), "scheduler loop started");
    while !token.is_cancelled() {
        runner.run_cycle();
        info!(
            "waiting {} minutes for next capture",
            interval.as_secs_f64() / 60.0
        );
        if token.wait_timeout(interval) {
            break;
        }
    }
    info!(cycles = runner.cycles_run(), "scheduler loop stopped");
    runner
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use turtlewatch_contracts::analysis::Wellbeing;
    use turtlewatch_contracts::cycle::SkipReason;
    use turtlewatch_contracts::events::CycleJournal;

    use super::{CycleRunner, SchedulerSupervisor, StartStatus};
    use crate::capture::CaptureTrigger;
    use crate::notify::{AlertSink, NotifyStatus};
    use crate::vision::{AnalysisClient, VisionModel};

    const DISTRESSED: &str = r#"{"turtle_well_being":"distressed","carapace_up":true}"#;
    const GOOD: &str = r#"{"turtle_well_being":"good"}"#;

    #[derive(Clone, Copy)]
    enum CaptureMode {
        Fail,
        Nothing,
        WriteNow,
        WriteLater(Duration),
        Panic,
    }

    struct StubCapture {
        mode: CaptureMode,
        calls: Arc<AtomicUsize>,
    }

    impl CaptureTrigger for StubCapture {
        fn trigger_capture(&self, output_dir: &Path) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let path = output_dir.join(format!("tr_{call:04}.jpg"));
            match self.mode {
                CaptureMode::Fail => false,
                CaptureMode::Nothing => true,
                CaptureMode::WriteNow => fs::write(path, format!("frame {call}")).is_ok(),
                CaptureMode::WriteLater(delay) => {
                    thread::spawn(move || {
                        thread::sleep(delay);
                        let _ = fs::write(path, format!("frame {call}"));
                    });
                    true
                }
                CaptureMode::Panic => panic!("camera driver exploded"),
            }
        }
    }

    struct StubModel {
        answer: String,
        calls: Arc<AtomicUsize>,
    }

    impl VisionModel for StubModel {
        fn name(&self) -> &str {
            "stub-vision"
        }

        fn describe(&self, _prompt: &str, _image_base64: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.answer.is_empty() {
                bail!("model offline");
            }
            Ok(self.answer.clone())
        }
    }

    #[derive(Clone, Default)]
    struct StubNotifier {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl StubNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages
                .lock()
                .map(|messages| messages.clone())
                .unwrap_or_default()
        }
    }

    impl AlertSink for StubNotifier {
        fn notify(&self, message: &str) -> NotifyStatus {
            if let Ok(mut messages) = self.messages.lock() {
                messages.push(message.to_string());
            }
            NotifyStatus::Sent {
                sid: "SM-test".to_string(),
            }
        }
    }

    struct Harness {
        runner: CycleRunner,
        capture_calls: Arc<AtomicUsize>,
        model_calls: Arc<AtomicUsize>,
        notifier: StubNotifier,
    }

    fn harness(dir: &Path, mode: CaptureMode, answer: &str) -> Harness {
        let capture_calls = Arc::new(AtomicUsize::new(0));
        let model_calls = Arc::new(AtomicUsize::new(0));
        let notifier = StubNotifier::default();
        let analysis = AnalysisClient::new(Box::new(StubModel {
            answer: answer.to_string(),
            calls: Arc::clone(&model_calls),
        }));
        let runner = CycleRunner::new(
            dir,
            Box::new(StubCapture {
                mode,
                calls: Arc::clone(&capture_calls),
            }),
            Arc::new(analysis),
            Box::new(notifier.clone()),
        )
        .with_settle_timeout(Duration::ZERO);
        Harness {
            runner,
            capture_calls,
            model_calls,
            notifier,
        }
    }

    fn seed_image(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes())?;
        Ok(path)
    }

    #[test]
    fn distressed_analysis_sends_one_alert() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut h = harness(temp.path(), CaptureMode::WriteNow, DISTRESSED);

        let outcome = h.runner.run_cycle();

        assert!(outcome.capture_ok);
        assert_eq!(outcome.skipped, None);
        assert_eq!(outcome.image, Some(temp.path().join("tr_0001.jpg")));
        assert_eq!(outcome.image_sha256.as_ref().map(String::len), Some(64));
        let record = outcome.record.clone().unwrap_or_default();
        assert_eq!(record.wellbeing, Wellbeing::Distressed);
        assert!(record.carapace_up);
        assert!(outcome.alert_sent);

        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("distressed"));
        assert!(messages[0].contains("Carapace Up: true"));
        Ok(())
    }

    #[test]
    fn healthy_analysis_sends_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut h = harness(temp.path(), CaptureMode::WriteNow, GOOD);
        let outcome = h.runner.run_cycle();
        assert!(outcome.completed());
        assert!(!outcome.alert_sent);
        assert!(h.notifier.messages().is_empty());
        Ok(())
    }

    #[test]
    fn capture_failure_skips_selection_and_analysis() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_image(temp.path(), "leftover.jpg")?;
        let mut h = harness(temp.path(), CaptureMode::Fail, DISTRESSED);

        let outcome = h.runner.run_cycle();

        assert!(!outcome.capture_ok);
        assert_eq!(outcome.skipped, Some(SkipReason::CaptureFailed));
        assert_eq!(outcome.image, None);
        assert_eq!(h.model_calls.load(Ordering::SeqCst), 0);
        assert!(h.notifier.messages().is_empty());
        Ok(())
    }

    #[test]
    fn empty_directory_skips_cycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut h = harness(temp.path(), CaptureMode::Nothing, DISTRESSED);
        let outcome = h.runner.run_cycle();
        assert!(outcome.capture_ok);
        assert_eq!(outcome.skipped, Some(SkipReason::NoImage));
        assert_eq!(h.model_calls.load(Ordering::SeqCst), 0);

        let mut missing = harness(&temp.path().join("missing"), CaptureMode::Nothing, DISTRESSED);
        assert_eq!(missing.runner.run_cycle().skipped, Some(SkipReason::NoImage));
        Ok(())
    }

    #[test]
    fn reanalysing_the_same_image_is_skipped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_image(temp.path(), "tr_only.jpg")?;
        let mut h = harness(temp.path(), CaptureMode::Nothing, DISTRESSED);

        let first = h.runner.run_cycle();
        let second = h.runner.run_cycle();

        assert!(first.alert_sent);
        assert_eq!(second.skipped, Some(SkipReason::StaleImage));
        assert_eq!(second.image_sha256, first.image_sha256);
        assert_eq!(h.model_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.messages().len(), 1);
        Ok(())
    }

    #[test]
    fn unusable_analysis_is_retried_on_the_same_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_image(temp.path(), "tr_only.jpg")?;
        let mut h = harness(temp.path(), CaptureMode::Nothing, "");

        let first = h.runner.run_cycle();
        let second = h.runner.run_cycle();

        assert_eq!(first.record.map(|record| record.wellbeing), Some(Wellbeing::Unknown));
        assert_eq!(second.skipped, None);
        assert_eq!(h.model_calls.load(Ordering::SeqCst), 2);
        assert!(h.notifier.messages().is_empty());
        Ok(())
    }

    #[test]
    fn waits_for_the_triggered_capture_to_land() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        seed_image(temp.path(), "tr_0000_old.jpg")?;
        let h = harness(
            temp.path(),
            CaptureMode::WriteLater(Duration::from_millis(300)),
            GOOD,
        );
        let mut runner = h.runner.with_settle_timeout(Duration::from_secs(5));

        let outcome = runner.run_cycle();

        assert_eq!(outcome.image, Some(temp.path().join("tr_0001.jpg")));
        Ok(())
    }

    #[test]
    fn panics_become_failed_cycles() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut h = harness(temp.path(), CaptureMode::Panic, DISTRESSED);

        let first = h.runner.run_cycle();
        let second = h.runner.run_cycle();

        assert_eq!(first.skipped, Some(SkipReason::Failed));
        assert!(first
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("camera driver exploded"));
        assert_eq!(second.cycle, 2);
        assert_eq!(h.capture_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.runner.cycles_run(), 2);
        Ok(())
    }

    #[test]
    fn outcomes_are_journaled() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = temp.path().join("images");
        fs::create_dir(&images)?;
        let journal_path = temp.path().join("cycles.jsonl");
        let h = harness(&images, CaptureMode::Fail, GOOD);
        let mut runner = h
            .runner
            .with_journal(CycleJournal::new(&journal_path, "run-test"));

        runner.run_cycle();
        runner.run_cycle();

        let content = fs::read_to_string(&journal_path)?;
        let rows: Vec<serde_json::Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["cycle"], 2);
        assert_eq!(rows[1]["skipped"], "capture_failed");
        assert_eq!(rows[1]["run_id"], "run-test");
        Ok(())
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn supervised_loop_alerts_once_per_interval() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let h = harness(temp.path(), CaptureMode::WriteNow, DISTRESSED);
        let notifier = h.notifier.clone();
        let supervisor = SchedulerSupervisor::new(h.runner, Duration::from_secs(60));

        assert_eq!(supervisor.start()?, StartStatus::Started);
        assert!(supervisor.is_running());
        assert!(wait_until(Duration::from_secs(5), || !notifier
            .messages()
            .is_empty()));
        thread::sleep(Duration::from_millis(100));

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("distressed"));

        supervisor.stop()?;
        assert!(!supervisor.is_running());
        Ok(())
    }

    #[test]
    fn second_start_reports_already_running() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let h = harness(temp.path(), CaptureMode::Fail, GOOD);
        let capture_calls = Arc::clone(&h.capture_calls);
        let supervisor = SchedulerSupervisor::new(h.runner, Duration::from_secs(60));

        let racers: Vec<_> = (0..4)
            .map(|_| {
                let supervisor = supervisor.clone();
                thread::spawn(move || supervisor.start().ok())
            })
            .collect();
        let statuses: Vec<Option<StartStatus>> = racers
            .into_iter()
            .map(|handle| handle.join().unwrap_or(None))
            .collect();
        let started = statuses
            .iter()
            .filter(|status| **status == Some(StartStatus::Started))
            .count();
        assert_eq!(started, 1);
        assert_eq!(supervisor.start()?, StartStatus::AlreadyRunning);

        assert!(wait_until(Duration::from_secs(5), || capture_calls
            .load(Ordering::SeqCst)
            >= 1));
        supervisor.stop()?;
        assert!(!supervisor.is_running());

        assert_eq!(supervisor.start()?, StartStatus::Started);
        assert!(wait_until(Duration::from_secs(5), || capture_calls
            .load(Ordering::SeqCst)
            >= 2));
        supervisor.stop()?;
        Ok(())
    }
}
