// Observable session state

use crate::progress::{Phase, ProgressEvent};
use crate::results::SpeedTestResult;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of the current (or most recent) run as observers see it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub progress: f64,    // Percentage as reported, not clamped
    pub speed_mbps: f64,  // Last known throughput sample
    pub latency_ms: f64,  // Last known latency sample
    pub result: Option<SpeedTestResult>,
    pub error: Option<String>,
    pub running: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            phase: Phase::Idle,
            progress: 0.0,
            speed_mbps: 0.0,
            latency_ms: 0.0,
            result: None,
            error: None,
            running: false,
        }
    }
}

impl SessionState {
    pub fn reset_for_run(&mut self) {
        self.running = true;
        self.phase = Phase::Starting;
        self.speed_mbps = 0.0;
        self.progress = 0.0;
        self.latency_ms = 0.0;
        self.result = None;
        self.error = None;
    }

    /// Phase and progress always follow the event. Samples only overwrite when present,
    /// so phase-only ticks keep the last known speed and latency.
    pub fn apply_progress(&mut self, event: &ProgressEvent) {
        self.phase = event.phase.clone();
        self.progress = event.progress;
        if let Some(speed) = event.speed_mbps {
            self.speed_mbps = speed;
        }
        if let Some(latency) = event.latency_ms {
            self.latency_ms = latency;
        }
    }

    pub fn complete(&mut self, result: SpeedTestResult) {
        self.result = Some(result);
    }

    pub fn fail(&mut self, message: String) {
        self.error = Some(message);
    }

    /// Numeric fields are left as they were so the last reading stays visible.
    pub fn finalize(&mut self) {
        self.running = false;
        self.phase = Phase::Idle;
    }
}

/// Shared handle publishing `SessionState` through a watch channel.
/// Observers that fall behind only ever see the latest value.
#[derive(Debug, Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        SessionStore { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn reset_for_run(&self) {
        self.tx.send_modify(SessionState::reset_for_run);
    }

    pub fn apply_progress(&self, event: &ProgressEvent) {
        self.tx.send_modify(|state| state.apply_progress(event));
    }

    pub fn complete(&self, result: SpeedTestResult) {
        self.tx.send_modify(|state| state.complete(result));
    }

    pub fn fail(&self, message: String) {
        self.tx.send_modify(|state| state.fail(message));
    }

    pub fn finalize(&self) {
        self.tx.send_modify(SessionState::finalize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tick(phase: Phase, progress: f64, speed: Option<f64>, latency: Option<f64>) -> ProgressEvent {
        ProgressEvent { phase, progress, speed_mbps: speed, latency_ms: latency }
    }

    #[test]
    fn test_default_is_idle() {
        let state = SessionState::default();
        assert_eq!(state.phase, Phase::Idle);
        assert!(!state.running);
        assert!(state.result.is_none());
        assert!(state.error.is_none());
    }

    #[test]
    fn test_reset_for_run_clears_previous_run() {
        let mut state = SessionState {
            phase: Phase::Idle,
            progress: 100.0,
            speed_mbps: 88.0,
            latency_ms: 9.0,
            result: Some(SpeedTestResult::new()),
            error: None,
            running: false,
        };
        state.reset_for_run();
        assert!(state.running);
        assert_eq!(state.phase, Phase::Starting);
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.speed_mbps, 0.0);
        assert_eq!(state.latency_ms, 0.0);
        assert!(state.result.is_none());

        state.error = Some("boom".to_string());
        state.reset_for_run();
        assert!(state.error.is_none());
    }

    #[test]
    fn test_absent_samples_do_not_clobber() {
        let mut state = SessionState::default();
        state.reset_for_run();
        state.apply_progress(&tick(Phase::Download, 50.0, Some(100.0), None));
        state.apply_progress(&tick(Phase::Download, 60.0, None, None));
        assert_eq!(state.phase, Phase::Download);
        assert_eq!(state.progress, 60.0);
        assert_eq!(state.speed_mbps, 100.0);
        assert_eq!(state.latency_ms, 0.0);
    }

    #[test]
    fn test_progress_passes_through_unclamped() {
        let mut state = SessionState::default();
        state.apply_progress(&tick(Phase::Upload, 140.0, None, None));
        assert_eq!(state.progress, 140.0);
    }

    #[test]
    fn test_finalize_keeps_readings() {
        let mut state = SessionState::default();
        state.reset_for_run();
        state.apply_progress(&tick(Phase::Download, 100.0, Some(123.4), Some(12.0)));
        state.finalize();
        assert!(!state.running);
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.speed_mbps, 123.4);
        assert_eq!(state.latency_ms, 12.0);
        assert_eq!(state.progress, 100.0);
    }

    #[tokio::test]
    async fn test_store_notifies_watchers() {
        let store = SessionStore::new();
        let mut rx = store.watch();
        store.reset_for_run();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().running);

        // Two updates before the observer looks: it only sees the latest.
        store.apply_progress(&tick(Phase::Latency, 5.0, None, Some(20.0)));
        store.apply_progress(&tick(Phase::Latency, 10.0, None, Some(18.0)));
        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.progress, 10.0);
        assert_eq!(seen.latency_ms, 18.0);
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.snapshot(), seen);
    }

    proptest! {
        #[test]
        fn prop_last_present_sample_wins(
            initial_speed in 0.0f64..1000.0,
            initial_latency in 0.0f64..500.0,
            ticks in prop::collection::vec(
                (prop::option::of(0.0f64..1000.0), prop::option::of(0.0f64..500.0)),
                0..40,
            ),
        ) {
            let mut state = SessionState { speed_mbps: initial_speed, latency_ms: initial_latency, ..Default::default() };
            for (i, (speed, latency)) in ticks.iter().enumerate() {
                state.apply_progress(&tick(Phase::Download, i as f64, *speed, *latency));
            }
            let expected_speed = ticks.iter().rev().find_map(|(s, _)| *s).unwrap_or(initial_speed);
            let expected_latency = ticks.iter().rev().find_map(|(_, l)| *l).unwrap_or(initial_latency);
            prop_assert_eq!(state.speed_mbps, expected_speed);
            prop_assert_eq!(state.latency_ms, expected_latency);
        }
    }
}
