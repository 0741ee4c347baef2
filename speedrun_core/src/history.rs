// Bounded log of completed results

use crate::results::SpeedTestResult;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

/// Completed results in insertion order. Once full, each append evicts the oldest entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryLog {
    #[serde(skip)]
    capacity: usize,
    entries: VecDeque<SpeedTestResult>,
}

impl HistoryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        HistoryLog {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Appends and trims to capacity. Returns how many entries were evicted.
    pub fn push(&mut self, result: SpeedTestResult) -> usize {
        self.entries.push_back(result);
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&SpeedTestResult> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeedTestResult> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<SpeedTestResult> {
        self.entries.iter().cloned().collect()
    }
}

/// Watch-backed history handle owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    tx: Arc<watch::Sender<HistoryLog>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(HistoryLog::with_capacity(capacity));
        HistoryStore { tx: Arc::new(tx) }
    }

    pub fn append(&self, result: SpeedTestResult) -> usize {
        let mut evicted = 0;
        self.tx.send_modify(|log| evicted = log.push(result));
        evicted
    }

    pub fn snapshot(&self) -> HistoryLog {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    pub fn watch(&self) -> watch::Receiver<HistoryLog> {
        self.tx.subscribe()
    }
}
