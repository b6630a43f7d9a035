//! Build orchestration: validate -> verify files -> run lpmake -> verify image.
//!
//! One [`BuildOrchestrator`] owns the config session and runs at most one build
//! at a time. Callers share it behind an `Arc`, drive a run with
//! [`BuildOrchestrator::start`] and observe it through [`BuildOrchestrator::subscribe`].

pub mod executor;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, RwLock};

pub use executor::{run_builder, ExecutorEvent, PROGRESS_CAP, PROGRESS_TICK};
pub use state::{BuildEvent, BuildOutcome, BuildState};

use crate::command::CommandBuilder;
use crate::config::{validator, ConfigSession};
use crate::error::{BuildError, ConfigError, ResultCode, StartRejected};
use crate::models::{file_size, SuperConfig, ValidationIssue, ValidationReport};
use crate::planner::format_file_size;
use crate::system::paths::ToolLocator;
use crate::system::verification::Verifier;

/// Buffered events per subscriber before slow listeners start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Drives super image builds and publishes their progress.
pub struct BuildOrchestrator {
    state: RwLock<BuildState>,
    session: RwLock<ConfigSession>,
    locator: Arc<dyn ToolLocator>,
    events: broadcast::Sender<BuildEvent>,
    /// Internal stop signal; reset at the start of every run
    stop_tx: watch::Sender<bool>,
    progress: AtomicU32,
}

impl BuildOrchestrator {
    pub fn new(locator: Arc<dyn ToolLocator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: RwLock::new(BuildState::Idle),
            session: RwLock::new(ConfigSession::new()),
            locator,
            events,
            stop_tx,
            progress: AtomicU32::new(0),
        }
    }

    /// Register a listener. Events emitted before this call are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> BuildState {
        *self.state.read().await
    }

    /// Progress of the current (or last) run, 0..=100.
    pub fn progress(&self) -> u32 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn locator(&self) -> Arc<dyn ToolLocator> {
        Arc::clone(&self.locator)
    }

    // ---- Session access --------------------------------------------------

    /// Load a manifest. Rejected while a build is running.
    pub async fn load_config(&self, manifest: &Path) -> Result<SuperConfig, ConfigError> {
        let state = self.state.read().await;
        if *state != BuildState::Idle {
            return Err(ConfigError::Busy);
        }
        let mut session = self.session.write().await;
        let config = session.load(manifest)?.clone();
        log::info!(target: "parsed", "[Config] Loaded {} ({} partitions, {})",
            manifest.display(), config.partitions.len(), config.layout);
        Ok(config)
    }

    pub async fn set_config(&self, config: SuperConfig) -> Result<(), ConfigError> {
        let state = self.state.read().await;
        if *state != BuildState::Idle {
            return Err(ConfigError::Busy);
        }
        self.session.write().await.set_config(config);
        Ok(())
    }

    pub async fn config(&self) -> Option<SuperConfig> {
        self.session.read().await.config().cloned()
    }

    pub async fn set_output_dir(&self, dir: impl Into<PathBuf>) {
        self.session.write().await.set_output_dir(dir);
    }

    /// Redirect one partition's image. Only allowed while idle; marks the
    /// session modified.
    pub async fn update_partition_path(
        &self,
        index: usize,
        path: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let state = self.state.read().await;
        if *state != BuildState::Idle {
            return Err(ConfigError::Busy);
        }
        self.session.write().await.update_partition_path(index, path)
    }

    pub async fn has_unsaved_changes(&self) -> bool {
        self.session.read().await.has_unsaved_changes()
    }

    /// Persist the edited configuration to the temp directory.
    pub async fn save_modified_config(&self) -> Result<PathBuf, ConfigError> {
        self.session.write().await.save_modified_config()
    }

    /// Persist the edited configuration into `dir`.
    pub async fn save_modified_config_in(&self, dir: &Path) -> Result<PathBuf, ConfigError> {
        self.session.write().await.save_modified_config_in(dir)
    }

    // ---- Control ---------------------------------------------------------

    /// Request the running build to stop. Kills lpmake when building; before
    /// spawn the request is observed at the next per-partition check.
    /// Returns false when nothing is running.
    pub async fn stop(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            BuildState::Validating | BuildState::VerifyingFiles | BuildState::Building => {
                log::warn!(target: "parsed", "[Build] Stop requested while {}", state);
                self.stop_tx.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Run one build to completion.
    ///
    /// Guard failures return `Err` without touching state. Every accepted run
    /// ends with a [`BuildEvent::Finished`] and returns the same outcome.
    pub async fn start(
        &self,
        cancel: watch::Receiver<bool>,
    ) -> Result<BuildOutcome, StartRejected> {
        let (config, output_path) = {
            let mut state = self.state.write().await;
            if *state != BuildState::Idle {
                log::warn!("[Build] start() rejected: build already {}", *state);
                return Err(StartRejected::AlreadyRunning);
            }

            let session = self.session.read().await;
            let config = session
                .config()
                .cloned()
                .ok_or_else(|| StartRejected::ConfigurationMissing("no manifest loaded".into()))?;
            let output_path = session.output_path().ok_or_else(|| {
                StartRejected::ConfigurationMissing("no output directory selected".into())
            })?;
            if session.has_unsaved_changes() {
                return Err(StartRejected::UnsavedChanges);
            }

            // Reset under the lock; a stop() that sees Validating must not be wiped
            self.stop_tx.send_replace(false);
            *state = BuildState::Validating;
            (config, output_path)
        };

        self.progress.store(0, Ordering::Relaxed);
        self.emit(BuildEvent::StateChanged {
            from: BuildState::Idle,
            to: BuildState::Validating,
        });
        self.emit(BuildEvent::Progress(0));

        let started = Instant::now();
        let outcome = self.run(&config, &output_path, cancel, started).await;
        Ok(self.finish(outcome).await)
    }

    async fn run(
        &self,
        config: &SuperConfig,
        output_path: &Path,
        cancel: watch::Receiver<bool>,
        started: Instant,
    ) -> BuildOutcome {
        // Validation
        self.log(format!(
            "Validating {} partitions ({} device)",
            config.partitions.len(),
            config.layout
        ));
        let report = validator::validate(config);
        for warning in report.warning_messages() {
            self.emit(BuildEvent::Warning(warning));
        }
        self.emit(BuildEvent::ValidationReport(report.clone()));

        if !report.success() {
            let errors = report.error_messages();
            for error in &errors {
                log::error!("[Validate] {}", error);
            }
            return outcome(
                BuildState::Failed,
                validation_result_code(&report),
                format!("Validation failed with {} error(s)", errors.len()),
                errors,
                started,
            );
        }

        // Pre-flight file pass
        self.transition(BuildState::Validating, BuildState::VerifyingFiles).await;
        let mut stop_rx = self.stop_tx.subscribe();
        for (index, partition) in config.partitions.iter().enumerate() {
            if *cancel.borrow() || *stop_rx.borrow_and_update() {
                return self.cancelled_outcome(started);
            }
            match config.partition_path(partition) {
                None => self.log(format!(
                    "[{}/{}] {}: placeholder (no image)",
                    index + 1,
                    config.partitions.len(),
                    partition.name
                )),
                Some(path) => match file_size(&path) {
                    Some(size) => self.log(format!(
                        "[{}/{}] {}: {} ({})",
                        index + 1,
                        config.partitions.len(),
                        partition.name,
                        path.display(),
                        format_file_size(size)
                    )),
                    None => self.log(format!(
                        "[{}/{}] {}: {} not found, skipping image",
                        index + 1,
                        config.partitions.len(),
                        partition.name,
                        path.display()
                    )),
                },
            }
        }
        if *cancel.borrow() || *stop_rx.borrow_and_update() {
            return self.cancelled_outcome(started);
        }

        // Build
        let command = CommandBuilder::new(Arc::clone(&self.locator)).build(config, output_path);
        if let Some(parent) = output_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                let message = format!("Cannot create output directory {}: {}", parent.display(), e);
                return outcome(
                    BuildState::Failed,
                    ResultCode::InvalidPath,
                    message.clone(),
                    vec![message],
                    started,
                );
            }
        }

        self.transition(BuildState::VerifyingFiles, BuildState::Building).await;
        log::info!(target: "parsed", "[Build] {}", command.render());

        let events = self.events.clone();
        let progress = &self.progress;
        let result = run_builder(
            &command,
            |event| match event {
                ExecutorEvent::Line(line) => {
                    let _ = events.send(BuildEvent::Log(line));
                }
                ExecutorEvent::Progress(value) => {
                    progress.store(value, Ordering::Relaxed);
                    let _ = events.send(BuildEvent::Progress(value));
                }
            },
            cancel,
            stop_rx,
        )
        .await;

        match result {
            Ok(()) => {
                // lpmake is gone; from here stop() has nothing to kill
                self.transition(BuildState::Building, BuildState::Succeeded).await;
                self.succeeded_outcome(output_path, started).await
            }
            Err(BuildError::Cancelled) => self.cancelled_outcome(started),
            Err(e) => {
                let message = e.to_string();
                log::error!(target: "parsed", "[Build] {}", message);
                outcome(
                    BuildState::Failed,
                    ResultCode::from(&e),
                    message.clone(),
                    vec![message],
                    started,
                )
            }
        }
    }

    async fn succeeded_outcome(&self, output_path: &Path, started: Instant) -> BuildOutcome {
        let output_size = file_size(output_path);
        let message = match output_size {
            Some(size) => format!(
                "Super image built: {} ({})",
                output_path.display(),
                format_file_size(size)
            ),
            None => format!("Super image built: {}", output_path.display()),
        };
        log::info!(target: "parsed", "[Build] {}", message);

        let mut result = outcome(
            BuildState::Succeeded,
            ResultCode::Success,
            message,
            Vec::new(),
            started,
        );
        result.output_path = Some(output_path.to_path_buf());
        result.output_size = output_size;

        // Advisory only: a failed verification never changes the outcome
        let verification = Verifier::new(Arc::clone(&self.locator))
            .verify(output_path)
            .await;
        match &verification {
            Ok(status) if status.passed() => self.log(status.summary()),
            Ok(status) => self.emit(BuildEvent::Warning(status.summary())),
            Err(e) => self.emit(BuildEvent::Warning(format!(
                "Verification skipped ({}): {}",
                ResultCode::from(e),
                e
            ))),
        }
        self.emit(BuildEvent::Verification(verification));

        result
    }

    fn cancelled_outcome(&self, started: Instant) -> BuildOutcome {
        let message = if *self.stop_tx.borrow() {
            "Build stopped by user"
        } else {
            "Build cancelled"
        };
        log::warn!(target: "parsed", "[Build] {}", message);
        outcome(
            BuildState::Cancelled,
            ResultCode::Cancelled,
            message.to_string(),
            Vec::new(),
            started,
        )
    }

    /// Report the outcome state (unless already entered), publish `Finished`,
    /// and return to Idle.
    async fn finish(&self, outcome: BuildOutcome) -> BuildOutcome {
        let current = self.state().await;
        if current != outcome.state {
            self.transition(current, outcome.state).await;
        }
        self.emit(BuildEvent::Finished(outcome.clone()));
        self.stop_tx.send_replace(false);
        self.transition(outcome.state, BuildState::Idle).await;
        outcome
    }

    async fn transition(&self, from: BuildState, to: BuildState) {
        if !from.can_transition_to(to) {
            log::error!("[Build] Unexpected transition {} -> {}", from, to);
        }
        *self.state.write().await = to;
        log::debug!("[Build] State {} -> {}", from, to);
        self.emit(BuildEvent::StateChanged { from, to });
    }

    fn log(&self, message: String) {
        log::info!("[Build] {}", message);
        self.emit(BuildEvent::Log(message));
    }

    fn emit(&self, event: BuildEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn outcome(
    state: BuildState,
    code: ResultCode,
    message: String,
    errors: Vec<String>,
    started: Instant,
) -> BuildOutcome {
    BuildOutcome {
        state,
        code,
        message,
        errors,
        output_path: None,
        output_size: None,
        duration: started.elapsed(),
    }
}

/// SIZE_MISMATCH when capacity is the only problem, MISSING_PARTITIONS
/// otherwise.
pub fn validation_result_code(report: &ValidationReport) -> ResultCode {
    let only_size = !report.errors.is_empty()
        && report
            .errors
            .iter()
            .all(|e| matches!(e, ValidationIssue::TotalSizeExceeded { .. }));
    if report.success() {
        ResultCode::Success
    } else if only_size {
        ResultCode::SizeMismatch
    } else {
        ResultCode::MissingPartitions
    }
}
