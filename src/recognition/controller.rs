use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{RecognitionState, RecognitionStatus};
use crate::{
    attendance::{AttendanceRecorder, RecognitionResult},
    error::RecognitionError,
    ports::RecognitionEngine,
    settings::RecognitionSettings,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionSnapshot {
    pub state: RecognitionState,
    pub remaining_secs: u64,
    pub progress: u8,
}

impl RecognitionSnapshot {
    fn of(state: &RecognitionState) -> Self {
        Self {
            remaining_secs: state.remaining_secs(),
            progress: state.progress(),
            state: state.clone(),
        }
    }
}

/// Timers of the running attempt, tagged with its generation.
struct AttemptTickers {
    generation: u64,
    token: CancellationToken,
}

/// Drives one recognition attempt at a time: the engine call, the timeout
/// and progress tickers, verification of the result and the auto-reset
/// back to idle.
#[derive(Clone)]
pub struct RecognitionController {
    state: Arc<Mutex<RecognitionState>>,
    engine: Arc<dyn RecognitionEngine>,
    recorder: Arc<AttendanceRecorder>,
    settings: RecognitionSettings,
    tickers: Arc<Mutex<Option<AttemptTickers>>>,
    reset_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    updates: Arc<watch::Sender<RecognitionSnapshot>>,
}

impl RecognitionController {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        recorder: Arc<AttendanceRecorder>,
        settings: RecognitionSettings,
    ) -> Self {
        let (updates, _) = watch::channel(RecognitionSnapshot::default());
        Self {
            state: Arc::new(Mutex::new(RecognitionState::new())),
            engine,
            recorder,
            settings,
            tickers: Arc::new(Mutex::new(None)),
            reset_task: Arc::new(Mutex::new(None)),
            updates: Arc::new(updates),
        }
    }

    pub async fn get_snapshot(&self) -> RecognitionSnapshot {
        let mut guard = self.state.lock().await;
        guard.sync_elapsed_from_anchor();
        RecognitionSnapshot::of(&guard)
    }

    /// Every state change and progress tick is published here.
    pub fn subscribe(&self) -> watch::Receiver<RecognitionSnapshot> {
        self.updates.subscribe()
    }

    /// Begins a new attempt. Rejected while one is running; a start during the
    /// result hold preempts the pending reset.
    pub async fn start(&self) -> Result<RecognitionSnapshot, RecognitionError> {
        let (generation, snapshot) = {
            let mut state = self.state.lock().await;
            if matches!(
                state.status,
                RecognitionStatus::Running | RecognitionStatus::Recording
            ) {
                return Err(RecognitionError::AlreadyRunning);
            }
            let generation = state.begin_attempt(
                Uuid::new_v4().to_string(),
                self.settings.timeout().as_millis() as u64,
                Utc::now(),
                Instant::now(),
            );
            (generation, RecognitionSnapshot::of(&state))
        };

        self.cancel_reset().await;

        let token = CancellationToken::new();
        {
            let mut tickers = self.tickers.lock().await;
            if let Some(previous) = tickers.replace(AttemptTickers {
                generation,
                token: token.clone(),
            }) {
                previous.token.cancel();
            }
        }

        self.spawn_timeout_ticker(generation, token.clone());
        self.spawn_progress_ticker(generation, token.clone());
        self.spawn_engine_call(generation, token);

        log_info!(
            "recognition attempt {} started ({}s timeout)",
            snapshot.state.attempt_id.as_deref().unwrap_or("-"),
            self.settings.timeout_secs
        );
        self.updates.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Cancels the running attempt. Once the attendance call has been issued
    /// the attempt runs to completion.
    pub async fn cancel(&self) -> Result<RecognitionSnapshot, RecognitionError> {
        let (generation, snapshot) = {
            let mut state = self.state.lock().await;
            match state.status {
                RecognitionStatus::Running => {}
                RecognitionStatus::Recording => return Err(RecognitionError::RecordingInProgress),
                _ => return Err(RecognitionError::NotRunning),
            }
            state.finish(RecognitionStatus::Cancelled, "Recognition cancelled", None);
            (state.generation, RecognitionSnapshot::of(&state))
        };

        log_info!("recognition attempt cancelled");
        self.conclude(generation, snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Stops timers and pending resets, cancelling an attempt whose attendance
    /// call has not been issued yet.
    pub async fn shutdown(&self) {
        let concluded = {
            let mut state = self.state.lock().await;
            if state.status == RecognitionStatus::Running {
                state.finish(RecognitionStatus::Cancelled, "Recognition stopped", None);
                Some(RecognitionSnapshot::of(&state))
            } else {
                None
            }
        };

        if let Some(previous) = self.tickers.lock().await.take() {
            previous.token.cancel();
        }
        self.cancel_reset().await;
        if let Some(snapshot) = concluded {
            self.updates.send_replace(snapshot);
        }
    }

    /// Synchronous teardown for owners that cannot await: stops the
    /// attempt's timers, its engine call and any pending reset.
    pub fn shutdown_now(&self) {
        if let Ok(mut tickers) = self.tickers.try_lock() {
            if let Some(current) = tickers.take() {
                current.token.cancel();
            }
        }
        if let Ok(mut reset) = self.reset_task.try_lock() {
            if let Some(handle) = reset.take() {
                handle.abort();
            }
        }
    }

    fn spawn_timeout_ticker(&self, generation: u64, token: CancellationToken) {
        let this = self.clone();
        let tick = self.settings.timeout_tick();

        tokio::spawn(async move {
            let mut interval = time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let snapshot = {
                    let mut state = this.state.lock().await;
                    if !state.is_current(generation) {
                        break;
                    }
                    if state.current_elapsed_ms() < state.timeout_ms {
                        continue;
                    }
                    let message = format!(
                        "No face recognized within {}s",
                        state.timeout_ms / 1000
                    );
                    state.finish(RecognitionStatus::TimedOut, message, None);
                    RecognitionSnapshot::of(&state)
                };

                log_info!("recognition attempt timed out");
                this.conclude(generation, snapshot).await;
                break;
            }
        });
    }

    fn spawn_progress_ticker(&self, generation: u64, token: CancellationToken) {
        let state = self.state.clone();
        let updates = self.updates.clone();
        let tick = self.settings.progress_tick();

        tokio::spawn(async move {
            let mut interval = time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let snapshot = {
                    let mut guard = state.lock().await;
                    if !guard.is_current(generation) {
                        break;
                    }
                    guard.sync_elapsed_from_anchor();
                    RecognitionSnapshot::of(&guard)
                };
                updates.send_replace(snapshot);
            }
        });
    }

    fn spawn_engine_call(&self, generation: u64, token: CancellationToken) {
        let this = self.clone();
        let timeout_secs = self.settings.timeout_secs;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    log_debug!("abandoning engine call for attempt generation {generation}");
                    return;
                }
                result = this.engine.recognize_from_camera(timeout_secs) => result,
            };
            this.handle_result(generation, result, token).await;
        });
    }

    async fn handle_result(&self, generation: u64, result: RecognitionResult, token: CancellationToken) {
        if !result.success {
            let message = if result.message.trim().is_empty() {
                "Face not recognized".to_string()
            } else {
                result.message.clone()
            };
            log_info!("recognition failed: {message}");
            self.finish_running(generation, RecognitionStatus::Failed, message).await;
            return;
        }

        // Identity lookups still run on the attempt's clock: a timeout or
        // cancel drops them before anything is recorded.
        let verified = tokio::select! {
            _ = token.cancelled() => {
                log_debug!("attempt generation {generation} ended during identity checks");
                return;
            }
            verified = self.recorder.verify(&result) => verified,
        };

        let employee = match verified {
            Ok(employee) => employee,
            Err(err) => {
                log_warn!("recognized face rejected: {err}");
                self.finish_running(generation, RecognitionStatus::Failed, err.to_string()).await;
                return;
            }
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.begin_recording(generation) {
                log_debug!("discarding late recognition result for generation {generation}");
                return;
            }
            RecognitionSnapshot::of(&state)
        };
        self.stop_tickers(generation).await;
        self.updates.send_replace(snapshot);

        // Issued exactly once and awaited to the end, so the reported state
        // matches what the service stored.
        let (status, message, outcome) = match self.recorder.record(employee, &result).await {
            Ok(outcome) => (RecognitionStatus::Success, outcome.summary(), Some(outcome)),
            Err(err) => {
                log_warn!("attendance not recorded: {err}");
                (RecognitionStatus::Failed, err.to_string(), None)
            }
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.is_recording(generation) {
                return;
            }
            state.finish(status, message, outcome);
            RecognitionSnapshot::of(&state)
        };
        self.conclude(generation, snapshot).await;
    }

    /// Ends a still-running attempt; a no-op once it timed out or was cancelled.
    async fn finish_running(&self, generation: u64, status: RecognitionStatus, message: String) {
        let snapshot = {
            let mut state = self.state.lock().await;
            if !state.is_current(generation) {
                log_debug!("discarding late recognition result for generation {generation}");
                return;
            }
            state.finish(status, message, None);
            RecognitionSnapshot::of(&state)
        };
        self.conclude(generation, snapshot).await;
    }

    /// Publishes a terminal snapshot, stops the attempt's timers and
    /// schedules the return to idle.
    async fn conclude(&self, generation: u64, snapshot: RecognitionSnapshot) {
        self.stop_tickers(generation).await;
        let hold = self.hold_for(snapshot.state.status);
        self.updates.send_replace(snapshot);
        self.schedule_reset(generation, hold).await;
    }

    async fn stop_tickers(&self, generation: u64) {
        let mut tickers = self.tickers.lock().await;
        if tickers
            .as_ref()
            .is_some_and(|current| current.generation == generation)
        {
            if let Some(current) = tickers.take() {
                current.token.cancel();
            }
        }
    }

    async fn schedule_reset(&self, generation: u64, hold: Duration) {
        let state = self.state.clone();
        let updates = self.updates.clone();

        let handle = tokio::spawn(async move {
            time::sleep(hold).await;
            let snapshot = {
                let mut guard = state.lock().await;
                if guard.generation != generation || !guard.status.is_terminal() {
                    return;
                }
                guard.reset();
                RecognitionSnapshot::of(&guard)
            };
            updates.send_replace(snapshot);
        });

        if let Some(previous) = self.reset_task.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn cancel_reset(&self) {
        if let Some(handle) = self.reset_task.lock().await.take() {
            handle.abort();
        }
    }

    fn hold_for(&self, status: RecognitionStatus) -> Duration {
        let ms = match status {
            RecognitionStatus::Success => self.settings.success_hold_ms,
            RecognitionStatus::Cancelled => self.settings.cancel_hold_ms,
            _ => self.settings.failure_hold_ms,
        };
        Duration::from_millis(ms)
    }
}
