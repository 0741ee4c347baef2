// start_test entry point: sequences one run around the measurement engine.

use crate::config::{ConfigError, RunConfig};
use crate::engine::{MeasurementEngine, ProgressEmitter};
use crate::events::EventBus;
use crate::history::{HistoryLog, HistoryStore};
use crate::lifecycle::{RunEvent, RunState, TransitionError};
use crate::progress::ProgressEvent;
use crate::results::SpeedTestResult;
use crate::session::{SessionState, SessionStore};
use crate::subscription::SubscriptionManager;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(SpeedTestResult),
    Failed(String), // Engine error, rendered with Display
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// Reasons `start_test` refuses to run. Engine failures are not among them; those end
/// up in `SessionState::error` and `RunOutcome::Failed`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a speed test is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
}

pub struct Orchestrator<E> {
    engine: E,
    config: RunConfig,
    bus: EventBus,
    session: SessionStore,
    history: HistoryStore,
    subscriptions: Mutex<SubscriptionManager>,
    run_state: Mutex<RunState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: MeasurementEngine> Orchestrator<E> {
    pub fn new(engine: E, config: RunConfig) -> Result<Self, ConfigError> {
        Self::with_bus(engine, config, EventBus::new())
    }

    /// Builds an orchestrator listening on an existing bus, e.g. one the engine host owns.
    pub fn with_bus(engine: E, config: RunConfig, bus: EventBus) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Orchestrator {
            subscriptions: Mutex::new(SubscriptionManager::new(bus.clone(), config.progress_topic.clone())),
            history: HistoryStore::new(config.history_capacity),
            session: SessionStore::new(),
            run_state: Mutex::new(RunState::Idle),
            engine,
            config,
            bus,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn session(&self) -> SessionState {
        self.session.snapshot()
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session.watch()
    }

    pub fn history(&self) -> HistoryLog {
        self.history.snapshot()
    }

    pub fn watch_history(&self) -> watch::Receiver<HistoryLog> {
        self.history.watch()
    }

    pub fn run_state(&self) -> RunState {
        *lock(&self.run_state)
    }

    pub fn has_subscription(&self) -> bool {
        lock(&self.subscriptions).is_active()
    }

    /// Runs one speed test to completion.
    ///
    /// The session is reset, a progress subscription is installed, the engine is invoked
    /// and, whatever happens after the reset (success, engine error, this future being
    /// dropped), the subscription is released and the session returns to idle exactly once.
    /// A call made while another run is in flight is rejected without touching that run.
    pub async fn start_test(&self) -> Result<RunOutcome, StartError> {
        {
            let mut state = lock(&self.run_state);
            if !state.is_idle() {
                return Err(StartError::AlreadyRunning);
            }
            *state = state.next(RunEvent::Start)?;
        }
        let _guard = RunGuard {
            subscriptions: &self.subscriptions,
            session: &self.session,
            run_state: &self.run_state,
        };
        let started = Instant::now();

        self.session.reset_for_run();
        let session = self.session.clone();
        let mut subscription = lock(&self.subscriptions)
            .subscribe(Box::new(move |event: ProgressEvent| session.apply_progress(&event)));
        self.advance(RunEvent::Subscribed)?;
        info!(connections = self.config.connections, "speed test started");

        let emitter = ProgressEmitter::new(self.bus.clone(), self.config.progress_topic.clone());
        let engine_run = self.engine.start_speed_test(self.config.connections, emitter);
        tokio::pin!(engine_run);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(payload) = subscription.recv() => {
                    subscription.dispatch(payload);
                }
                outcome = &mut engine_run => break outcome,
            }
        };
        // Ticks emitted right before the engine returned are still queued.
        subscription.drain();

        let outcome = match outcome {
            Ok(result) => {
                self.advance(RunEvent::EngineResolved)?;
                self.session.complete(result.clone());
                let evicted = self.history.append(result.clone());
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    download_mbps = result.download_mbps(),
                    upload_mbps = result.upload_mbps(),
                    latency_ms = result.latency_ms(),
                    history_len = self.history.len(),
                    evicted,
                    "speed test completed"
                );
                RunOutcome::Completed(result)
            }
            Err(e) => {
                let message = e.to_string();
                self.advance(RunEvent::EngineRejected)?;
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, error = %message, "speed test failed");
                self.session.fail(message.clone());
                RunOutcome::Failed(message)
            }
        };
        Ok(outcome)
    }

    fn advance(&self, event: RunEvent) -> Result<RunState, TransitionError> {
        let mut state = lock(&self.run_state);
        *state = state.next(event)?;
        Ok(*state)
    }
}

/// Finalizes the run when dropped: releases the subscription, then puts the
/// session back to idle, then moves the lifecycle to Idle.
struct RunGuard<'a> {
    subscriptions: &'a Mutex<SubscriptionManager>,
    session: &'a SessionStore,
    run_state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let released = lock(self.subscriptions).unsubscribe();
        self.session.finalize();
        let mut state = lock(self.run_state);
        let from = *state;
        match from.next(RunEvent::Finalized) {
            Ok(next) => *state = next,
            Err(e) => {
                warn!(error = %e, "forcing run state to idle");
                *state = RunState::Idle;
            }
        }
        if from == RunState::Starting || from == RunState::Running {
            warn!(state = ?from, released, "run abandoned before the engine finished");
        }
    }
}
