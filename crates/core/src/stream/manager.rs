//! Stream Lifecycle Manager
//!
//! Owns every stream in the process, keyed by `(session, stream id)`. The
//! map lock is only held to find a stream; each stream has its own
//! `parking_lot` mutex which is never held across an `.await`, so chunk
//! processing on different streams proceeds concurrently while mutations of
//! one stream are serialized.

use super::{Modality, RecordOutcome, Stream, StreamConfig, StreamReport, StreamState, StreamSummary};
use crate::collaborator::SportContext;
use crate::config::{LatencyTargets, StreamLimits};
use crate::result::AnalysisResult;
use crate::session::ScopedId;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Ticket for one accepted chunk
///
/// Carries everything the pipeline needs so the stream lock is not held
/// while the collaborator call is in flight.
#[derive(Debug, Clone)]
pub struct Submission {
    pub key: ScopedId,
    pub modality: Modality,
    pub context: SportContext,
    pub target_latency_ms: u64,
    /// Server-side acceptance instant; latency is measured from here
    pub accepted_at: Instant,
    /// Becomes `true` when the stream stops
    pub cancel: watch::Receiver<bool>,
}

/// Creates, configures and tears down streams
pub struct StreamManager {
    streams: RwLock<HashMap<ScopedId, Arc<Mutex<Stream>>>>,
    limits: StreamLimits,
    latency: LatencyTargets,
}

impl StreamManager {
    pub fn new(limits: StreamLimits, latency: LatencyTargets) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            limits,
            latency,
        }
    }

    /// Open a stream for a session
    ///
    /// Validates modality-specific config, then moves the stream through
    /// `created` to `active`. A stopped stream with the same id is replaced.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if required fields are missing or out of range
    /// - `DuplicateStream` if a non-stopped stream with this id exists
    /// - `CapacityExceeded` if the session already has the maximum number of
    ///   live streams
    pub async fn open_stream(
        &self,
        session_id: &str,
        requested_id: Option<String>,
        modality: Modality,
        config: StreamConfig,
    ) -> Result<ScopedId> {
        config.validate(modality, &self.limits)?;

        let stream_id = match requested_id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::InvalidConfig("stream_id must not be empty".to_string()))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        let key = ScopedId::new(session_id, stream_id);

        let target_latency_ms = config.target_latency_ms.unwrap_or(match modality {
            Modality::Audio => self.latency.audio_ms,
            Modality::Visual => self.latency.visual_ms,
        });

        let mut streams = self.streams.write().await;

        if let Some(existing) = streams.get(&key) {
            if existing.lock().state() != StreamState::Stopped {
                return Err(Error::DuplicateStream(key.id.clone()));
            }
        }

        let live = streams
            .iter()
            .filter(|(k, s)| k.session == session_id && s.lock().state() != StreamState::Stopped)
            .count();
        if live >= self.limits.max_streams_per_session {
            return Err(Error::CapacityExceeded(format!(
                "session already has {} live streams",
                live
            )));
        }

        let mut stream = Stream::new(key.clone(), modality, config, target_latency_ms, &self.limits);
        stream.activate();
        streams.insert(key.clone(), Arc::new(Mutex::new(stream)));

        info!(
            session_id = %key.session,
            stream_id = %key.id,
            modality = %modality,
            target_latency_ms,
            "Stream opened"
        );
        Ok(key)
    }

    pub async fn lookup(&self, key: &ScopedId) -> Result<Arc<Mutex<Stream>>> {
        self.streams
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::StreamNotFound(key.id.clone()))
    }

    /// Stop a stream and return its summary
    ///
    /// Idempotent: closing a stopped stream returns the cached summary. The
    /// boolean is `true` only for the call that performed the transition;
    /// callers use it to decide whether link teardown is still needed.
    pub async fn close_stream(&self, key: &ScopedId) -> Result<(StreamSummary, bool)> {
        let stream = self.lookup(key).await?;
        let (summary, transitioned) = stream.lock().stop();

        if transitioned {
            info!(
                session_id = %key.session,
                stream_id = %key.id,
                processed = summary.chunks_processed,
                avg_latency_ms = summary.avg_latency_ms,
                compliance = summary.compliance,
                "Stream closed"
            );
        } else {
            debug!(stream_id = %key.id, "Stream already stopped, returning cached summary");
        }
        Ok((summary, transitioned))
    }

    /// Accept a chunk for processing
    ///
    /// # Errors
    ///
    /// `StreamNotFound` for unknown streams, `StreamNotActive` if the stream
    /// is not `active`, `InvalidConfig` if the modality does not match.
    pub async fn begin_submission(&self, key: &ScopedId, modality: Modality) -> Result<Submission> {
        let stream = self.lookup(key).await?;
        let mut stream = stream.lock();

        if stream.modality() != modality {
            return Err(Error::InvalidConfig(format!(
                "stream {} is a {} stream, not {}",
                key.id,
                stream.modality(),
                modality
            )));
        }

        let cancel = stream.begin_submission()?;
        Ok(Submission {
            key: key.clone(),
            modality,
            context: stream.config().sport_context(),
            target_latency_ms: stream.target_latency_ms(),
            accepted_at: Instant::now(),
            cancel,
        })
    }

    /// Append a completed result
    ///
    /// Returns the outcome and the stream's current link, if any.
    pub async fn record_result(
        &self,
        key: &ScopedId,
        result: AnalysisResult,
    ) -> Result<(RecordOutcome, Option<String>)> {
        let stream = self.lookup(key).await?;
        let mut stream = stream.lock();
        let outcome = stream.record_result(result);
        Ok((outcome, stream.link_id.clone()))
    }

    /// Account for a failed chunk; returns `false` if the stream had stopped
    pub async fn record_failure(&self, key: &ScopedId, error: &Error, latency_ms: f64) -> Result<bool> {
        let stream = self.lookup(key).await?;
        let recorded = stream.lock().record_failure(error, latency_ms);
        Ok(recorded)
    }

    /// Attach a link to a stream
    ///
    /// Fails with `LinkMismatch` if the stream is already linked or is not
    /// active.
    pub async fn attach_link(&self, key: &ScopedId, link_id: &str) -> Result<Modality> {
        let stream = self
            .lookup(key)
            .await
            .map_err(|_| Error::LinkMismatch(format!("stream {} does not exist", key.id)))?;
        let mut stream = stream.lock();

        if stream.state() != StreamState::Active {
            return Err(Error::LinkMismatch(format!("stream {} is not active", key.id)));
        }
        if let Some(existing) = stream.link_id() {
            return Err(Error::LinkMismatch(format!(
                "stream {} already belongs to link {}",
                key.id, existing
            )));
        }
        stream.link_id = Some(link_id.to_string());
        Ok(stream.modality())
    }

    /// Clear a stream's link if it still points at `link_id`
    pub async fn detach_link(&self, key: &ScopedId, link_id: &str) {
        if let Ok(stream) = self.lookup(key).await {
            let mut stream = stream.lock();
            if stream.link_id() == Some(link_id) {
                stream.link_id = None;
            }
        }
    }

    pub async fn status(&self, key: &ScopedId) -> Result<StreamReport> {
        Ok(self.lookup(key).await?.lock().report())
    }

    /// Drop one stream record
    pub async fn discard(&self, key: &ScopedId) -> bool {
        self.streams.write().await.remove(key).is_some()
    }

    /// Drop every stream record owned by a session
    ///
    /// Streams must already be stopped; afterwards `lookup` on any of the
    /// session's former stream ids returns `StreamNotFound`.
    pub async fn release_session(&self, session_id: &str) -> usize {
        let mut streams = self.streams.write().await;
        let before = streams.len();
        streams.retain(|key, _| key.session != session_id);
        before - streams.len()
    }

    /// Ids of a session's streams that are not yet stopped
    pub async fn live_streams(&self, session_id: &str) -> Vec<ScopedId> {
        self.streams
            .read()
            .await
            .iter()
            .filter(|(k, s)| k.session == session_id && s.lock().state() != StreamState::Stopped)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of streams in the `active` state
    pub async fn active_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .filter(|s| s.lock().state() == StreamState::Active)
            .count()
    }
}
