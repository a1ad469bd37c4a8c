//! Audio and visual analysis streams
//!
//! Each stream moves through `created -> active -> stopped` and owns its
//! bounded result history and rolling performance buffers. Stopping is
//! terminal and idempotent: the summary computed on the first stop is cached
//! and returned to every later caller.

pub mod history;
pub mod manager;

pub use history::{HistoryAppend, PerformanceTotals, PerformanceWindow, ResultHistory};
pub use manager::{StreamManager, Submission};

use crate::collaborator::SportContext;
use crate::config::StreamLimits;
use crate::result::AnalysisResult;
use crate::session::ScopedId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tokio::time::Instant;

/// Stream modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Audio,
    Visual,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Audio => "audio",
            Modality::Visual => "visual",
        }
    }

    pub fn other(&self) -> Modality {
        match self {
            Modality::Audio => Modality::Visual,
            Modality::Visual => Modality::Audio,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing quality requested by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Low,
    #[default]
    Standard,
    High,
}

/// Stream configuration supplied with `start_audio_stream` / `start_visual_stream`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sport context used for insight annotation (defaults to "general")
    pub sport: Option<String>,

    /// Venue/environment hint (e.g. "indoor_arena")
    pub environment: Option<String>,

    pub quality: QualityTier,

    /// Client feature flags forwarded to collaborators
    pub features: Vec<String>,

    /// Audio sample rate in Hz (required for audio)
    pub sample_rate: Option<u32>,

    /// Audio channel count
    pub channels: Option<u16>,

    /// Frame width (required for visual)
    pub width: Option<u32>,

    /// Frame height (required for visual)
    pub height: Option<u32>,

    /// Pixel/container format (required for visual)
    pub format: Option<String>,

    /// Overrides the modality's configured latency target
    pub target_latency_ms: Option<u64>,
}

impl StreamConfig {
    /// Validate modality-specific fields
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if:
    /// - audio: `sample_rate` is missing or outside the configured bounds,
    ///   or `channels` is 0 or above 8
    /// - visual: `width`, `height` or `format` is missing, the resolution is
    ///   zero or above the configured maximum, or the format is not allowed
    /// - `target_latency_ms` is 0
    pub fn validate(&self, modality: Modality, limits: &StreamLimits) -> Result<()> {
        match modality {
            Modality::Audio => {
                let rate = self.sample_rate.ok_or_else(|| {
                    Error::InvalidConfig("audio stream requires sample_rate".to_string())
                })?;
                if rate < limits.min_sample_rate || rate > limits.max_sample_rate {
                    return Err(Error::InvalidConfig(format!(
                        "sample_rate {} outside supported range {}-{}",
                        rate, limits.min_sample_rate, limits.max_sample_rate
                    )));
                }
                if let Some(channels) = self.channels {
                    if channels == 0 || channels > 8 {
                        return Err(Error::InvalidConfig(format!(
                            "channels must be in range 1-8, got {}",
                            channels
                        )));
                    }
                }
            }
            Modality::Visual => {
                let (width, height) = match (self.width, self.height) {
                    (Some(w), Some(h)) => (w, h),
                    _ => {
                        return Err(Error::InvalidConfig(
                            "visual stream requires width and height".to_string(),
                        ))
                    }
                };
                if width == 0 || height == 0 || width > limits.max_width || height > limits.max_height
                {
                    return Err(Error::InvalidConfig(format!(
                        "resolution {}x{} outside supported range (max {}x{})",
                        width, height, limits.max_width, limits.max_height
                    )));
                }
                let format = self.format.as_deref().ok_or_else(|| {
                    Error::InvalidConfig("visual stream requires format".to_string())
                })?;
                if !limits.visual_formats.iter().any(|f| f == format) {
                    return Err(Error::InvalidConfig(format!(
                        "unsupported visual format '{}'",
                        format
                    )));
                }
            }
        }

        if self.target_latency_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "target_latency_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sport_context(&self) -> SportContext {
        SportContext {
            sport: self.sport.clone().unwrap_or_else(|| "general".to_string()),
            environment: self.environment.clone(),
        }
    }
}

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Created,
    Active,
    Stopped,
}

/// Final performance summary computed when a stream stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: String,
    pub modality: Modality,
    pub chunks_submitted: u64,
    pub chunks_processed: u64,
    pub results_recorded: u64,
    pub late_results: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// In-flight chunks whose results were dropped by the stop
    pub discarded: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_confidence: f64,
    /// Fraction of chunks that met the latency target
    pub compliance: f64,
    pub target_latency_ms: u64,
    pub duration_ms: u64,
}

/// Live status returned by `get_stream_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub stream_id: String,
    pub modality: Modality,
    pub state: StreamState,
    pub config: StreamConfig,
    pub target_latency_ms: u64,
    pub history_len: usize,
    pub in_flight: u64,
    pub recent_avg_latency_ms: Option<f64>,
    pub recent_avg_confidence: Option<f64>,
    pub compliance: f64,
    pub link_id: Option<String>,
}

/// Outcome of handing a completed result to its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Appended to history
    Recorded { met_target: bool },
    /// Processed but older than the newest history entry
    Late { met_target: bool },
    /// Stream already stopped; result dropped
    Discarded,
}

#[derive(Debug, Default, Clone)]
struct StreamCounters {
    submitted: u64,
    recorded: u64,
    late: u64,
    failures: u64,
    timeouts: u64,
    discarded: u64,
    in_flight: u64,
}

/// One audio or visual stream owned by a session
#[derive(Debug)]
pub struct Stream {
    key: ScopedId,
    modality: Modality,
    config: StreamConfig,
    state: StreamState,
    target_latency_ms: u64,
    history: ResultHistory,
    window: PerformanceWindow,
    totals: PerformanceTotals,
    counters: StreamCounters,
    summary: Option<StreamSummary>,

    /// Flipped to `true` on stop; in-flight submissions watch it
    cancel: watch::Sender<bool>,

    pub(crate) link_id: Option<String>,
    opened_at: Instant,
}

impl Stream {
    pub fn new(
        key: ScopedId,
        modality: Modality,
        config: StreamConfig,
        target_latency_ms: u64,
        limits: &StreamLimits,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            key,
            modality,
            config,
            state: StreamState::Created,
            target_latency_ms,
            history: ResultHistory::new(limits.history_capacity),
            window: PerformanceWindow::new(limits.performance_window),
            totals: PerformanceTotals::default(),
            counters: StreamCounters::default(),
            summary: None,
            cancel,
            link_id: None,
            opened_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &ScopedId {
        &self.key
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn target_latency_ms(&self) -> u64 {
        self.target_latency_ms
    }

    pub fn history(&self) -> &ResultHistory {
        &self.history
    }

    pub fn link_id(&self) -> Option<&str> {
        self.link_id.as_deref()
    }

    pub(crate) fn activate(&mut self) {
        if self.state == StreamState::Created {
            self.state = StreamState::Active;
        }
    }

    /// Account for an accepted chunk and hand back a cancellation receiver
    pub(crate) fn begin_submission(&mut self) -> Result<watch::Receiver<bool>> {
        if self.state != StreamState::Active {
            return Err(Error::StreamNotActive(self.key.id.clone()));
        }
        self.counters.submitted += 1;
        self.counters.in_flight += 1;
        Ok(self.cancel.subscribe())
    }

    pub(crate) fn record_result(&mut self, result: AnalysisResult) -> RecordOutcome {
        // Chunks still in flight at stop were already counted as discarded
        if self.state == StreamState::Stopped {
            return RecordOutcome::Discarded;
        }
        self.counters.in_flight = self.counters.in_flight.saturating_sub(1);

        let met_target = result.latency_ms <= self.target_latency_ms as f64;
        let confidence = result.confidence();
        self.totals.record(result.latency_ms, confidence, met_target);
        self.window.record(result.latency_ms, Some(confidence));

        match self.history.push(result) {
            HistoryAppend::Recorded { .. } => {
                self.counters.recorded += 1;
                RecordOutcome::Recorded { met_target }
            }
            HistoryAppend::Late => {
                self.counters.late += 1;
                RecordOutcome::Late { met_target }
            }
        }
    }

    /// Account for a failed or timed-out collaborator call
    ///
    /// Returns `false` if the stream had already stopped.
    pub(crate) fn record_failure(&mut self, error: &Error, latency_ms: f64) -> bool {
        if self.state == StreamState::Stopped {
            return false;
        }
        self.counters.in_flight = self.counters.in_flight.saturating_sub(1);
        self.counters.failures += 1;
        if matches!(error, Error::CollaboratorTimeout { .. }) {
            self.counters.timeouts += 1;
        }
        self.totals.record_miss();
        self.window.record(latency_ms, None);
        true
    }

    /// Stop the stream
    ///
    /// Returns the summary and whether this call performed the transition.
    pub(crate) fn stop(&mut self) -> (StreamSummary, bool) {
        if let Some(summary) = &self.summary {
            return (summary.clone(), false);
        }

        self.state = StreamState::Stopped;
        // Best effort: wakes in-flight submissions so they abandon their calls
        let _ = self.cancel.send(true);

        // In-flight calls can no longer be recorded
        self.counters.discarded += self.counters.in_flight;
        self.counters.in_flight = 0;

        let summary = self.build_summary();
        self.history.clear();
        self.window.clear();
        self.summary = Some(summary.clone());
        (summary, true)
    }

    fn build_summary(&self) -> StreamSummary {
        StreamSummary {
            stream_id: self.key.id.clone(),
            modality: self.modality,
            chunks_submitted: self.counters.submitted,
            chunks_processed: self.totals.processed,
            results_recorded: self.counters.recorded,
            late_results: self.counters.late,
            failures: self.counters.failures,
            timeouts: self.counters.timeouts,
            discarded: self.counters.discarded,
            avg_latency_ms: self.totals.avg_latency(),
            min_latency_ms: self.totals.min_latency(),
            max_latency_ms: self.totals.max_latency(),
            avg_confidence: self.totals.avg_confidence(),
            compliance: self.totals.compliance(),
            target_latency_ms: self.target_latency_ms,
            duration_ms: self.opened_at.elapsed().as_millis() as u64,
        }
    }

    pub fn report(&self) -> StreamReport {
        StreamReport {
            stream_id: self.key.id.clone(),
            modality: self.modality,
            state: self.state,
            config: self.config.clone(),
            target_latency_ms: self.target_latency_ms,
            history_len: self.history.len(),
            in_flight: self.counters.in_flight,
            recent_avg_latency_ms: self.window.avg_latency(),
            recent_avg_confidence: self.window.avg_confidence(),
            compliance: self.totals.compliance(),
            link_id: self.link_id.clone(),
        }
    }
}
