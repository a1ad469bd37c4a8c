//! Process-wide counters
//!
//! Lock-free atomics updated from the pipeline, sync engine and router.
//! Gauges (active sessions, streams, links) are read from the registries
//! when a snapshot is taken.

use crate::stream::history::compliance;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    chunks_submitted: AtomicU64,
    chunks_processed: AtomicU64,
    collaborator_failures: AtomicU64,
    collaborator_timeouts: AtomicU64,
    latency_warnings: AtomicU64,
    late_results: AtomicU64,
    discarded_results: AtomicU64,
    synced_pairs: AtomicU64,
    unmatched_results: AtomicU64,
    drift_corrections: AtomicU64,
    deadline_met: AtomicU64,
    deadline_missed: AtomicU64,
    latency_us_total: AtomicU64,
    dropped_messages: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
}

/// Gauges sampled from the registries
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub active_sessions: usize,
    pub active_streams: usize,
    pub active_links: usize,
}

/// Serializable view of the metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    pub active_sessions: usize,
    pub active_streams: usize,
    pub active_links: usize,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub chunks_submitted: u64,
    pub chunks_processed: u64,
    pub collaborator_failures: u64,
    pub collaborator_timeouts: u64,
    pub latency_warnings: u64,
    pub late_results: u64,
    pub discarded_results: u64,
    pub synced_pairs: u64,
    pub unmatched_results: u64,
    pub drift_corrections: u64,
    pub avg_latency_ms: f64,
    pub deadline_met: u64,
    pub deadline_missed: u64,
    /// met / (met + missed); 1.0 before any chunk completes
    pub compliance: f64,
    pub dropped_messages: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            chunks_submitted: AtomicU64::new(0),
            chunks_processed: AtomicU64::new(0),
            collaborator_failures: AtomicU64::new(0),
            collaborator_timeouts: AtomicU64::new(0),
            latency_warnings: AtomicU64::new(0),
            late_results: AtomicU64::new(0),
            discarded_results: AtomicU64::new(0),
            synced_pairs: AtomicU64::new(0),
            unmatched_results: AtomicU64::new(0),
            drift_corrections: AtomicU64::new(0),
            deadline_met: AtomicU64::new(0),
            deadline_missed: AtomicU64::new(0),
            latency_us_total: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
        }
    }

    pub fn chunk_submitted(&self) {
        bump(&self.chunks_submitted, 1);
    }

    /// A chunk completed; `met` is whether it met its latency target
    pub fn chunk_processed(&self, latency_ms: f64, met: bool) {
        bump(&self.chunks_processed, 1);
        bump(&self.latency_us_total, (latency_ms.max(0.0) * 1000.0) as u64);
        if met {
            bump(&self.deadline_met, 1);
        } else {
            bump(&self.deadline_missed, 1);
            bump(&self.latency_warnings, 1);
        }
    }

    pub fn collaborator_failed(&self, timed_out: bool) {
        bump(&self.collaborator_failures, 1);
        bump(&self.deadline_missed, 1);
        if timed_out {
            bump(&self.collaborator_timeouts, 1);
        }
    }

    pub fn late_result(&self) {
        bump(&self.late_results, 1);
    }

    pub fn result_discarded(&self) {
        bump(&self.discarded_results, 1);
    }

    pub fn synced_pair(&self) {
        bump(&self.synced_pairs, 1);
    }

    pub fn unmatched(&self, count: usize) {
        bump(&self.unmatched_results, count as u64);
    }

    pub fn drift_correction(&self) {
        bump(&self.drift_corrections, 1);
    }

    pub fn message_dropped(&self) {
        bump(&self.dropped_messages, 1);
    }

    pub fn session_opened(&self) {
        bump(&self.sessions_opened, 1);
    }

    pub fn session_closed(&self) {
        bump(&self.sessions_closed, 1);
    }

    /// (met, missed, compliance)
    pub fn compliance(&self) -> (u64, u64, f64) {
        let met = self.deadline_met.load(Ordering::Relaxed);
        let missed = self.deadline_missed.load(Ordering::Relaxed);
        (met, missed, compliance(met, missed))
    }

    pub fn latency_warnings(&self) -> u64 {
        self.latency_warnings.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, gauges: Gauges) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let processed = load(&self.chunks_processed);
        let (met, missed, compliance) = self.compliance();

        MetricsSnapshot {
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            active_sessions: gauges.active_sessions,
            active_streams: gauges.active_streams,
            active_links: gauges.active_links,
            sessions_opened: load(&self.sessions_opened),
            sessions_closed: load(&self.sessions_closed),
            chunks_submitted: load(&self.chunks_submitted),
            chunks_processed: processed,
            collaborator_failures: load(&self.collaborator_failures),
            collaborator_timeouts: load(&self.collaborator_timeouts),
            latency_warnings: load(&self.latency_warnings),
            late_results: load(&self.late_results),
            discarded_results: load(&self.discarded_results),
            synced_pairs: load(&self.synced_pairs),
            unmatched_results: load(&self.unmatched_results),
            drift_corrections: load(&self.drift_corrections),
            avg_latency_ms: if processed == 0 {
                0.0
            } else {
                load(&self.latency_us_total) as f64 / 1000.0 / processed as f64
            },
            deadline_met: met,
            deadline_missed: missed,
            compliance,
            dropped_messages: load(&self.dropped_messages),
        }
    }
}
