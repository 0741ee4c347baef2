// Progress payload decoding and phase labels

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Run phase as shown to observers. Lifecycle phases (`Idle`, `Starting`) are set by the
/// orchestrator, the rest are reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    Idle,
    Starting,
    Latency,
    Download,
    Upload,
    PacketLoss,
    Done,
    Other(String), // Engine phase this client has no name for
}

impl Phase {
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        match label.to_ascii_lowercase().as_str() {
            "idle" => Phase::Idle,
            "starting" => Phase::Starting,
            "latency" => Phase::Latency,
            "download" => Phase::Download,
            "upload" => Phase::Upload,
            "packet_loss" => Phase::PacketLoss,
            "done" => Phase::Done,
            _ => Phase::Other(label.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Latency => "latency",
            Phase::Download => "download",
            Phase::Upload => "upload",
            Phase::PacketLoss => "packet_loss",
            Phase::Done => "done",
            Phase::Other(label) => label,
        }
    }
}

impl From<String> for Phase {
    fn from(label: String) -> Self {
        Phase::from_label(&label)
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        phase.as_str().to_string()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of one tick on the progress topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub phase: String,
    pub progress: f64,
    #[serde(default)]
    pub speed_mbps: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
}

/// A decoded tick. `None` samples mean "no new value", never "reset".
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub progress: f64,
    pub speed_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed progress payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<ProgressPayload> for ProgressEvent {
    fn from(payload: ProgressPayload) -> Self {
        ProgressEvent {
            phase: Phase::from_label(&payload.phase),
            progress: payload.progress,
            speed_mbps: payload.speed_mbps.filter(|v| v.is_finite()),
            latency_ms: payload.latency_ms.filter(|v| v.is_finite()),
        }
    }
}

/// Decodes a raw topic payload. Progress is not range-checked; values above 100 or below 0
/// are passed through as reported.
pub fn decode(value: &Value) -> Result<ProgressEvent, DecodeError> {
    let payload = ProgressPayload::deserialize(value)?;
    Ok(payload.into())
}
