// Core library crate for speedrun.
// It owns the run lifecycle around an external measurement engine:
// progress subscription, observable session state and bounded history.

pub mod config;       // Run configuration and validation
pub mod engine;       // Measurement engine seam and progress emitter
pub mod events;       // Topic-keyed progress event bus
pub mod history;      // Bounded log of completed results
pub mod lifecycle;    // Run state machine and transition table
pub mod orchestrator; // start_test entry point
pub mod progress;     // Progress payload decoding and phases
pub mod results;      // Final measurement records
pub mod session;      // Observable session state
pub mod subscription; // Single live subscription with exactly-once release

pub use config::{ConfigError, RunConfig};
pub use engine::{MeasurementEngine, ProgressEmitter};
pub use events::EventBus;
pub use history::HistoryLog;
pub use lifecycle::RunState;
pub use orchestrator::{Orchestrator, RunOutcome, StartError};
pub use progress::{Phase, ProgressEvent, ProgressPayload};
pub use results::{LatencyResult, SpeedTestResult, ThroughputResult};
pub use session::SessionState;
