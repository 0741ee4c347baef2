// Measurement engine seam

use crate::events::EventBus;
use crate::progress::{Phase, ProgressPayload};
use crate::results::SpeedTestResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// The external engine that opens connections and measures. The orchestrator only
/// invokes it and listens to what it emits through the `ProgressEmitter`.
#[async_trait]
pub trait MeasurementEngine: Send + Sync {
    /// Rendered with `Display` into the session's error field.
    type Error: fmt::Display + Send;

    async fn start_speed_test(
        &self,
        connections: usize,
        progress: ProgressEmitter,
    ) -> Result<SpeedTestResult, Self::Error>;
}

/// Publishes progress ticks on the run's topic.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    bus: EventBus,
    topic: String,
}

impl ProgressEmitter {
    pub fn new(bus: EventBus, topic: impl Into<String>) -> Self {
        ProgressEmitter { bus, topic: topic.into() }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn emit(&self, payload: &ProgressPayload) -> usize {
        match self.bus.emit(&self.topic, payload) {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "failed to serialize progress payload");
                0
            }
        }
    }

    pub fn progress(
        &self,
        phase: Phase,
        progress: f64,
        speed_mbps: Option<f64>,
        latency_ms: Option<f64>,
    ) -> usize {
        self.emit(&ProgressPayload {
            phase: phase.to_string(),
            progress,
            speed_mbps,
            latency_ms,
        })
    }

    /// Sends an arbitrary JSON value, for engines that build their own payloads.
    pub fn emit_raw(&self, value: Value) -> usize {
        self.bus.emit_value(&self.topic, value)
    }
}
