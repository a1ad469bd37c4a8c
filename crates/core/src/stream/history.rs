//! Bounded result history and rolling performance buffers

use crate::result::AnalysisResult;
use std::collections::VecDeque;

/// Outcome of appending to a [`ResultHistory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAppend {
    /// Recorded; `evicted` is true when the oldest entry was dropped
    Recorded { evicted: bool },
    /// Older than the newest entry, not recorded
    Late,
}

/// Ring buffer of results with non-decreasing timestamps
#[derive(Debug)]
pub struct ResultHistory {
    entries: VecDeque<AnalysisResult>,
    capacity: usize,
}

impl ResultHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append a result, evicting the oldest entry when full
    ///
    /// A result whose timestamp is older than the newest recorded entry is
    /// rejected so the history stays ordered by producer time.
    pub fn push(&mut self, result: AnalysisResult) -> HistoryAppend {
        if let Some(last) = self.entries.back() {
            if result.timestamp < last.timestamp {
                return HistoryAppend::Late;
            }
        }

        self.entries.push_back(result);

        let mut evicted = false;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted = true;
        }
        HistoryAppend::Recorded { evicted }
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.entries.back().map(|r| r.timestamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Rolling window of recent latencies and confidences
#[derive(Debug)]
pub struct PerformanceWindow {
    latencies: VecDeque<f64>,
    confidences: VecDeque<f64>,
    capacity: usize,
}

impl PerformanceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            latencies: VecDeque::with_capacity(capacity),
            confidences: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, latency_ms: f64, confidence: Option<f64>) {
        if self.latencies.len() >= self.capacity {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);

        if let Some(confidence) = confidence {
            if self.confidences.len() >= self.capacity {
                self.confidences.pop_front();
            }
            self.confidences.push_back(confidence);
        }
    }

    pub fn avg_latency(&self) -> Option<f64> {
        mean(&self.latencies)
    }

    pub fn avg_confidence(&self) -> Option<f64> {
        mean(&self.confidences)
    }

    pub fn len(&self) -> usize {
        self.latencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latencies.is_empty()
    }

    pub fn clear(&mut self) {
        self.latencies.clear();
        self.confidences.clear();
    }
}

/// Lifetime aggregates used for the close summary
#[derive(Debug, Clone, Default)]
pub struct PerformanceTotals {
    pub processed: u64,
    latency_sum: f64,
    latency_min: Option<f64>,
    latency_max: Option<f64>,
    confidence_sum: f64,
    /// Chunks whose latency met the target
    pub met: u64,
    /// Latency overruns plus collaborator failures
    pub missed: u64,
}

impl PerformanceTotals {
    pub fn record(&mut self, latency_ms: f64, confidence: f64, met_target: bool) {
        self.processed += 1;
        self.latency_sum += latency_ms;
        self.latency_min = Some(self.latency_min.map_or(latency_ms, |m| m.min(latency_ms)));
        self.latency_max = Some(self.latency_max.map_or(latency_ms, |m| m.max(latency_ms)));
        self.confidence_sum += confidence;
        if met_target {
            self.met += 1;
        } else {
            self.missed += 1;
        }
    }

    pub fn record_miss(&mut self) {
        self.missed += 1;
    }

    pub fn avg_latency(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.latency_sum / self.processed as f64
        }
    }

    pub fn min_latency(&self) -> f64 {
        self.latency_min.unwrap_or(0.0)
    }

    pub fn max_latency(&self) -> f64 {
        self.latency_max.unwrap_or(0.0)
    }

    pub fn avg_confidence(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.confidence_sum / self.processed as f64
        }
    }

    /// Fraction of chunks that met the latency target (1.0 when none ran)
    pub fn compliance(&self) -> f64 {
        compliance(self.met, self.missed)
    }
}

pub(crate) fn compliance(met: u64, missed: u64) -> f64 {
    let total = met + missed;
    if total == 0 {
        1.0
    } else {
        met as f64 / total as f64
    }
}

fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
