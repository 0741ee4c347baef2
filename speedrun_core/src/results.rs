// Final measurement records produced by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed speed-test run as reported by the measurement engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub timestamp: DateTime<Utc>,
    pub server_location: Option<String>,
    pub latency: Option<LatencyResult>,
    pub download: Option<ThroughputResult>,
    pub upload: Option<ThroughputResult>,
    pub packet_loss: Option<f64>, // Percentage of probes lost
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyResult {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    /// Mean absolute difference between consecutive round trips.
    pub jitter_ms: f64,
    pub samples: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputResult {
    pub bps: f64,
    pub mbps: f64,
    pub bytes_transferred: u64,
    pub duration_secs: f64,
}

impl ThroughputResult {
    /// Derives bits per second from a byte count; zero for non-positive durations.
    pub fn new(bytes_transferred: u64, duration_secs: f64) -> Self {
        let bps = if duration_secs > 0.0 {
            bytes_transferred as f64 * 8.0 / duration_secs
        } else {
            0.0
        };
        ThroughputResult {
            bps,
            mbps: bps / 1_000_000.0,
            bytes_transferred,
            duration_secs,
        }
    }

    /// Builds a record straight from a megabit rate, e.g. when the engine only reports a summary.
    pub fn from_mbps(mbps: f64) -> Self {
        ThroughputResult {
            bps: mbps * 1_000_000.0,
            mbps,
            bytes_transferred: 0,
            duration_secs: 0.0,
        }
    }
}

impl LatencyResult {
    /// Summarizes raw round-trip samples. Returns None for an empty sample set.
    pub fn from_samples(samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        let jitter_ms = if samples.len() < 2 {
            0.0
        } else {
            let diffs: f64 = samples.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            diffs / (samples.len() - 1) as f64
        };
        Some(LatencyResult { min_ms, avg_ms, max_ms, jitter_ms, samples })
    }
}

impl SpeedTestResult {
    pub fn new() -> Self {
        SpeedTestResult {
            timestamp: Utc::now(),
            server_location: None,
            latency: None,
            download: None,
            upload: None,
            packet_loss: None,
        }
    }

    pub fn download_mbps(&self) -> Option<f64> {
        self.download.as_ref().map(|d| d.mbps)
    }

    pub fn upload_mbps(&self) -> Option<f64> {
        self.upload.as_ref().map(|u| u.mbps)
    }

    /// Average round trip, the figure shown as "latency" in summaries.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency.as_ref().map(|l| l.avg_ms)
    }
}

impl Default for SpeedTestResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_from_bytes() {
        let r = ThroughputResult::new(1_000_000, 1.0);
        assert!((r.bps - 8_000_000.0).abs() < 0.01);
        assert!((r.mbps - 8.0).abs() < 0.01);
    }

    #[test]
    fn test_throughput_non_positive_duration() {
        assert_eq!(ThroughputResult::new(1_000_000, 0.0).bps, 0.0);
        assert_eq!(ThroughputResult::new(1_000, -1.0).mbps, 0.0);
    }

    #[test]
    fn test_latency_summary() {
        let l = LatencyResult::from_samples(vec![10.0, 14.0, 12.0]).unwrap();
        assert_eq!(l.min_ms, 10.0);
        assert_eq!(l.max_ms, 14.0);
        assert!((l.avg_ms - 12.0).abs() < 1e-9);
        // |14-10| + |12-14| over two gaps
        assert!((l.jitter_ms - 3.0).abs() < 1e-9);

        assert!(LatencyResult::from_samples(Vec::new()).is_none());
        assert_eq!(LatencyResult::from_samples(vec![5.0]).unwrap().jitter_ms, 0.0);
    }

    #[test]
    fn test_summary_accessors() {
        let mut result = SpeedTestResult::new();
        assert!(result.download_mbps().is_none());
        assert!(result.latency_ms().is_none());

        result.download = Some(ThroughputResult::from_mbps(123.4));
        result.latency = LatencyResult::from_samples(vec![12.0]);
        assert_eq!(result.download_mbps(), Some(123.4));
        assert_eq!(result.latency_ms(), Some(12.0));
        assert!(result.upload_mbps().is_none());
    }

    #[test]
    fn test_result_json_shape() {
        let mut result = SpeedTestResult::new();
        result.server_location = Some("FRA".to_string());
        result.download = Some(ThroughputResult::new(10_000_000, 2.0));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["server_location"], "FRA");
        assert!(value["upload"].is_null());

        let back: SpeedTestResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
