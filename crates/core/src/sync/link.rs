//! Audio/visual link state and the alignment algorithm

use super::clock_drift::{DriftEstimate, DriftRateEstimator};
use crate::config::SyncSettings;
use crate::result::AnalysisResult;
use crate::session::ScopedId;
use crate::stream::Modality;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Tunables for one link
#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Maximum residual skew for a synced pair (ms)
    pub precision_ms: f64,
    /// Upper edge of the band in which the offset is corrected (ms)
    pub tolerance_ms: f64,
    pub alpha: f64,
    pub horizon: Duration,
    pub max_buffered: usize,
    pub drift_history: usize,
}

impl LinkSpec {
    /// Build from server defaults, with an optional per-link precision
    pub fn from_settings(settings: &SyncSettings, precision_ms: Option<f64>) -> Result<Self> {
        let precision_ms = precision_ms.unwrap_or(settings.precision_ms);
        if !(precision_ms > 0.0 && precision_ms < settings.drift_tolerance_ms) {
            return Err(Error::InvalidConfig(format!(
                "precision_ms must be in (0, {}), got {}",
                settings.drift_tolerance_ms, precision_ms
            )));
        }
        Ok(Self {
            precision_ms,
            tolerance_ms: settings.drift_tolerance_ms,
            alpha: settings.ewma_alpha,
            horizon: settings.buffer_horizon(),
            max_buffered: settings.max_buffered.max(1),
            drift_history: settings.drift_history.max(1),
        })
    }
}

/// Two results aligned within the link's precision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedPair {
    pub audio: AnalysisResult,
    pub visual: AnalysisResult,
    /// Residual skew after offset correction (ms)
    pub skew_ms: f64,
    /// Offset in effect when the pair matched (ms)
    pub offset_ms: f64,
}

/// Record of one clock offset update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftCorrection {
    /// Audio producer time at which the skew was observed (ms)
    pub producer_ms: f64,
    /// Raw visual-minus-audio timestamp difference (ms)
    pub observed_skew_ms: f64,
    /// Skew left after the previous offset (ms)
    pub residual_ms: f64,
    pub previous_offset_ms: f64,
    pub offset_ms: f64,
    pub drift: Option<DriftEstimate>,
}

/// Output of feeding one result into a link
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Paired(SyncedPair),
    DriftCorrected(DriftCorrection),
}

/// Result of [`Link::on_result`]
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub events: Vec<SyncEvent>,
    /// Results evicted because a buffer hit its cap
    pub overflowed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    pub audio_received: u64,
    pub visual_received: u64,
    pub synced_pairs: u64,
    pub drift_corrections: u64,
    pub unmatched: u64,
}

/// Status returned by `get_link_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    pub link_id: String,
    pub audio_stream_id: String,
    pub visual_stream_id: String,
    pub precision_ms: f64,
    pub tolerance_ms: f64,
    pub offset_ms: f64,
    pub buffered_audio: usize,
    pub buffered_visual: usize,
    pub counters: LinkCounters,
    pub drift: Option<DriftEstimate>,
    pub recent_corrections: Vec<DriftCorrection>,
    pub age_ms: u64,
}

#[derive(Debug)]
struct Buffered {
    result: AnalysisResult,
    buffered_at: Instant,
    /// Already contributed a skew observation to an offset correction
    observed: bool,
}

/// Pairing of one audio stream and one visual stream
///
/// Offset convention: `offset_ms` estimates how far the visual producer's
/// clock runs ahead of the audio producer's clock, so the residual skew of a
/// candidate pair is `(visual_ts - offset_ms) - audio_ts`.
#[derive(Debug)]
pub struct Link {
    key: ScopedId,
    audio_stream_id: String,
    visual_stream_id: String,
    spec: LinkSpec,
    offset_ms: f64,
    corrections: VecDeque<DriftCorrection>,
    audio: VecDeque<Buffered>,
    visual: VecDeque<Buffered>,
    drift: DriftRateEstimator,
    counters: LinkCounters,
    created_at: Instant,
}

impl Link {
    pub fn new(
        key: ScopedId,
        audio_stream_id: String,
        visual_stream_id: String,
        spec: LinkSpec,
    ) -> Result<Self> {
        if audio_stream_id == visual_stream_id {
            return Err(Error::LinkMismatch(format!(
                "cannot link stream {} to itself",
                audio_stream_id
            )));
        }
        Ok(Self {
            key,
            audio_stream_id,
            visual_stream_id,
            spec,
            offset_ms: 0.0,
            corrections: VecDeque::new(),
            audio: VecDeque::new(),
            visual: VecDeque::new(),
            drift: DriftRateEstimator::new(),
            counters: LinkCounters::default(),
            created_at: Instant::now(),
        })
    }

    pub fn key(&self) -> &ScopedId {
        &self.key
    }

    pub fn audio_stream_id(&self) -> &str {
        &self.audio_stream_id
    }

    pub fn visual_stream_id(&self) -> &str {
        &self.visual_stream_id
    }

    pub fn spec(&self) -> &LinkSpec {
        &self.spec
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    pub fn buffered(&self, modality: Modality) -> usize {
        match modality {
            Modality::Audio => self.audio.len(),
            Modality::Visual => self.visual.len(),
        }
    }

    fn residual(&self, audio_ts: f64, visual_ts: f64) -> f64 {
        (visual_ts - self.offset_ms) - audio_ts
    }

    /// Feed a result from one of the linked streams
    ///
    /// Searches the other modality's buffer for the closest partner after
    /// offset correction. Within precision the pair is emitted and the
    /// partner evicted. Within the tolerance band the offset is nudged by an
    /// EWMA of the observed skew; both results stay buffered and may still
    /// pair until they age out, but neither feeds another correction.
    /// Otherwise the result is buffered to wait for a partner.
    pub fn on_result(&mut self, result: AnalysisResult, now: Instant) -> SyncOutcome {
        let modality = result.modality;
        match modality {
            Modality::Audio => self.counters.audio_received += 1,
            Modality::Visual => self.counters.visual_received += 1,
        }

        let mut outcome = SyncOutcome::default();
        let mut observed = false;

        if let Some((index, residual)) = self.closest_partner(&result) {
            if residual.abs() <= self.spec.precision_ms {
                let partner = match modality {
                    Modality::Audio => self.visual.remove(index),
                    Modality::Visual => self.audio.remove(index),
                };
                if let Some(partner) = partner {
                    let (audio, visual) = match modality {
                        Modality::Audio => (result, partner.result),
                        Modality::Visual => (partner.result, result),
                    };
                    self.drift
                        .add_observation(audio.timestamp, visual.timestamp - audio.timestamp);
                    self.counters.synced_pairs += 1;
                    outcome.events.push(SyncEvent::Paired(SyncedPair {
                        skew_ms: residual,
                        offset_ms: self.offset_ms,
                        audio,
                        visual,
                    }));
                    return outcome;
                }
            } else if residual.abs() <= self.spec.tolerance_ms && !self.partner_observed(modality, index) {
                let correction = self.apply_correction(&result, index, residual);
                outcome.events.push(SyncEvent::DriftCorrected(correction));
                observed = true;
            }
        }

        outcome.overflowed = self.buffer(result, observed, now);
        outcome
    }

    fn closest_partner(&self, result: &AnalysisResult) -> Option<(usize, f64)> {
        let candidates = match result.modality {
            Modality::Audio => &self.visual,
            Modality::Visual => &self.audio,
        };

        candidates
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let residual = match result.modality {
                    Modality::Audio => self.residual(result.timestamp, entry.result.timestamp),
                    Modality::Visual => self.residual(entry.result.timestamp, result.timestamp),
                };
                (index, residual)
            })
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
    }

    fn partner_observed(&self, modality: Modality, index: usize) -> bool {
        let partners = match modality {
            Modality::Audio => &self.visual,
            Modality::Visual => &self.audio,
        };
        partners.get(index).map_or(true, |e| e.observed)
    }

    fn apply_correction(&mut self, result: &AnalysisResult, index: usize, residual: f64) -> DriftCorrection {
        let (audio_ts, visual_ts) = match result.modality {
            Modality::Audio => (
                result.timestamp,
                self.visual.get(index).map_or(result.timestamp, |e| e.result.timestamp),
            ),
            Modality::Visual => (
                self.audio.get(index).map_or(result.timestamp, |e| e.result.timestamp),
                result.timestamp,
            ),
        };
        let observed = visual_ts - audio_ts;

        let partner = match result.modality {
            Modality::Audio => self.visual.get_mut(index),
            Modality::Visual => self.audio.get_mut(index),
        };
        if let Some(partner) = partner {
            partner.observed = true;
        }

        let previous = self.offset_ms;
        // EWMA of observed skew: offset' = (1 - a) * offset + a * observed
        self.offset_ms = previous + self.spec.alpha * residual;
        self.drift.add_observation(audio_ts, observed);
        self.counters.drift_corrections += 1;

        let correction = DriftCorrection {
            producer_ms: audio_ts,
            observed_skew_ms: observed,
            residual_ms: residual,
            previous_offset_ms: previous,
            offset_ms: self.offset_ms,
            drift: self.drift.estimate(),
        };

        if self.corrections.len() >= self.spec.drift_history {
            self.corrections.pop_front();
        }
        self.corrections.push_back(correction.clone());
        correction
    }

    /// Insert in timestamp order, evicting the oldest entries past the cap
    fn buffer(&mut self, result: AnalysisResult, observed: bool, now: Instant) -> usize {
        let max = self.spec.max_buffered;
        let buffer = match result.modality {
            Modality::Audio => &mut self.audio,
            Modality::Visual => &mut self.visual,
        };

        let position = buffer.partition_point(|e| e.result.timestamp <= result.timestamp);
        buffer.insert(
            position,
            Buffered {
                result,
                buffered_at: now,
                observed,
            },
        );

        let mut overflowed = 0;
        while buffer.len() > max {
            buffer.pop_front();
            overflowed += 1;
        }
        self.counters.unmatched += overflowed as u64;
        overflowed
    }

    /// Discard results that waited longer than the buffer horizon
    ///
    /// Returns the number of unmatched results evicted.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let horizon = self.spec.horizon;
        let mut evicted = 0;
        for buffer in [&mut self.audio, &mut self.visual] {
            let before = buffer.len();
            buffer.retain(|e| now.saturating_duration_since(e.buffered_at) < horizon);
            evicted += before - buffer.len();
        }
        self.counters.unmatched += evicted as u64;
        evicted
    }

    /// Drop all buffered results; returns how many were discarded
    pub fn teardown(&mut self) -> usize {
        let discarded = self.audio.len() + self.visual.len();
        self.audio.clear();
        self.visual.clear();
        self.counters.unmatched += discarded as u64;
        discarded
    }

    pub fn report(&self) -> LinkReport {
        LinkReport {
            link_id: self.key.id.clone(),
            audio_stream_id: self.audio_stream_id.clone(),
            visual_stream_id: self.visual_stream_id.clone(),
            precision_ms: self.spec.precision_ms,
            tolerance_ms: self.spec.tolerance_ms,
            offset_ms: self.offset_ms,
            buffered_audio: self.audio.len(),
            buffered_visual: self.visual.len(),
            counters: self.counters,
            drift: self.drift.estimate(),
            recent_corrections: self.corrections.iter().cloned().collect(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
        }
    }
}
