// Simulated measurement engine used by the speedrun binary.
// Walks the usual phases and emits progress ticks, without touching the network.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use speedrun_core::engine::{MeasurementEngine, ProgressEmitter};
use speedrun_core::progress::Phase;
use speedrun_core::results::{LatencyResult, SpeedTestResult, ThroughputResult};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const LATENCY_SAMPLES: usize = 10;
const THROUGHPUT_TICKS: usize = 20;
const PACKET_LOSS_PROBES: usize = 10;

#[derive(Debug, Clone)]
pub struct SimulatedEngineConfig {
    pub tick: Duration,
    pub base_latency_ms: f64,
    pub per_connection_mbps: f64, // Throughput each connection contributes before jitter
    pub fail_with: Option<String>, // Reject after the latency phase with this message
    pub seed: Option<u64>,
}

impl Default for SimulatedEngineConfig {
    fn default() -> Self {
        SimulatedEngineConfig {
            tick: Duration::from_millis(50),
            base_latency_ms: 18.0,
            per_connection_mbps: 25.0,
            fail_with: None,
            seed: None,
        }
    }
}

pub struct SimulatedEngine {
    config: SimulatedEngineConfig,
    rng: Mutex<StdRng>,
}

impl SimulatedEngine {
    pub fn new(config: SimulatedEngineConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        SimulatedEngine { config, rng: Mutex::new(rng) }
    }

    // Multiplicative jitter in [1 - spread, 1 + spread].
    fn jitter(&self, spread: f64) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        rng.gen_range((1.0 - spread)..=(1.0 + spread))
    }

    /// Overall percentage, given a phase's share of the run and how far into it we are.
    fn overall(start: f64, span: f64, step: usize, steps: usize) -> f64 {
        start + span * (step + 1) as f64 / steps as f64
    }

    async fn throughput_phase(
        &self,
        phase: Phase,
        start: f64,
        span: f64,
        target_mbps: f64,
        progress: &ProgressEmitter,
    ) -> ThroughputResult {
        let mut bytes = 0u64;
        for step in 0..THROUGHPUT_TICKS {
            // Ramp up over the first quarter, like a TCP window opening.
            let ramp = ((step + 1) as f64 / (THROUGHPUT_TICKS as f64 / 4.0)).min(1.0);
            let mbps = target_mbps * ramp * self.jitter(0.08);
            bytes += (mbps * 1_000_000.0 / 8.0 * self.config.tick.as_secs_f64()) as u64;
            // Every other tick carries no sample.
            let sample = (step % 2 == 1).then_some(mbps);
            progress.progress(phase.clone(), Self::overall(start, span, step, THROUGHPUT_TICKS), sample, None);
            tokio::time::sleep(self.config.tick).await;
        }
        ThroughputResult::new(bytes, self.config.tick.as_secs_f64() * THROUGHPUT_TICKS as f64)
    }
}

#[async_trait]
impl MeasurementEngine for SimulatedEngine {
    type Error = String;

    async fn start_speed_test(
        &self,
        connections: usize,
        progress: ProgressEmitter,
    ) -> Result<SpeedTestResult, String> {
        debug!(connections, topic = progress.topic(), "simulated engine starting");
        let mut result = SpeedTestResult::new();
        result.server_location = Some("SIM".to_string());

        let mut samples = Vec::with_capacity(LATENCY_SAMPLES);
        for step in 0..LATENCY_SAMPLES {
            let rtt = self.config.base_latency_ms * self.jitter(0.25);
            samples.push(rtt);
            progress.progress(Phase::Latency, Self::overall(0.0, 20.0, step, LATENCY_SAMPLES), None, Some(rtt));
            tokio::time::sleep(self.config.tick).await;
        }
        result.latency = LatencyResult::from_samples(samples);

        if let Some(message) = &self.config.fail_with {
            return Err(message.clone());
        }

        let download_target = self.config.per_connection_mbps * connections as f64;
        result.download = Some(self.throughput_phase(Phase::Download, 20.0, 40.0, download_target, &progress).await);
        // Upload links are usually the narrow side.
        let upload_target = download_target * 0.35;
        result.upload = Some(self.throughput_phase(Phase::Upload, 60.0, 30.0, upload_target, &progress).await);

        let mut lost = 0usize;
        for step in 0..PACKET_LOSS_PROBES {
            if self.jitter(0.5) > 1.45 {
                lost += 1;
            }
            progress.progress(Phase::PacketLoss, Self::overall(90.0, 10.0, step, PACKET_LOSS_PROBES), None, None);
            tokio::time::sleep(self.config.tick).await;
        }
        result.packet_loss = Some(lost as f64 / PACKET_LOSS_PROBES as f64 * 100.0);

        progress.progress(Phase::Done, 100.0, None, None);
        Ok(result)
    }
}
