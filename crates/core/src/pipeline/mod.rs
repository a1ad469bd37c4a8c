//! Frame Processing Pipeline
//!
//! One pipeline serves every session. Each accepted chunk runs in its own
//! task: the collaborator is called without any stream lock held, bounded
//! by the configured timeout and abandoned if the stream stops first. The
//! completed result is then recorded on its stream, reported to the
//! controller, delivered to the owning session and, for linked streams,
//! fed to the sync engine.

use crate::broadcast::Router;
use crate::collaborator::{Collaborators, Insight, SportContext};
use crate::controller::{ControllerHandle, Observation, ParameterSnapshot};
use crate::metrics::Metrics;
use crate::protocol::ServerMessage;
use crate::result::{AnalysisResult, ResultPayload};
use crate::session::ScopedId;
use crate::stream::manager::{StreamManager, Submission};
use crate::stream::{Modality, RecordOutcome};
use crate::sync::{SyncEngine, SyncEvent};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Resolves once the stream stops (or its record is gone)
async fn stopped(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stopped| *stopped).await;
}

/// Shared handles the per-chunk tasks need
#[derive(Clone)]
pub struct Pipeline {
    streams: Arc<StreamManager>,
    sync: Arc<SyncEngine>,
    controller: ControllerHandle,
    collaborators: Collaborators,
    router: Arc<Router>,
    metrics: Arc<Metrics>,
    call_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        streams: Arc<StreamManager>,
        sync: Arc<SyncEngine>,
        controller: ControllerHandle,
        collaborators: Collaborators,
        router: Arc<Router>,
        metrics: Arc<Metrics>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            streams,
            sync,
            controller,
            collaborators,
            router,
            metrics,
            call_timeout,
        }
    }

    /// Accept a chunk and start processing it
    ///
    /// Rejections (`StreamNotFound`, `StreamNotActive`, modality mismatch)
    /// are returned synchronously. Everything after acceptance is reported to
    /// the owning session as events.
    pub async fn submit(
        &self,
        key: &ScopedId,
        modality: Modality,
        data: Bytes,
        timestamp: f64,
    ) -> Result<JoinHandle<()>> {
        let ticket = self.streams.begin_submission(key, modality).await?;
        self.metrics.chunk_submitted();
        debug!(
            session_id = %key.session,
            stream_id = %key.id,
            bytes = data.len(),
            timestamp,
            "Chunk accepted"
        );

        let pipeline = self.clone();
        Ok(tokio::spawn(async move {
            pipeline.process(ticket, data, timestamp).await;
        }))
    }

    async fn process(self, ticket: Submission, data: Bytes, timestamp: f64) {
        let Submission {
            key,
            modality,
            context,
            target_latency_ms,
            accepted_at,
            mut cancel,
        } = ticket;

        let params = self.controller.snapshot();
        let analysis = self.analyze(modality, data, &params, &context);

        let outcome = tokio::select! {
            biased;
            _ = stopped(&mut cancel) => {
                // The stream counted this chunk as discarded when it stopped
                debug!(stream_id = %key.id, "Stream stopped, abandoning collaborator call");
                self.metrics.result_discarded();
                return;
            }
            outcome = tokio::time::timeout(self.call_timeout, analysis) => outcome,
        };

        let latency_ms = accepted_at.elapsed().as_secs_f64() * 1000.0;
        let outcome = outcome.unwrap_or_else(|_| {
            Err(Error::CollaboratorTimeout {
                collaborator: self.collaborator_name(modality).to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })
        });

        match outcome {
            Ok((payload, insights)) => {
                let result = AnalysisResult {
                    stream_id: key.id.clone(),
                    timestamp,
                    modality,
                    payload,
                    latency_ms,
                    insights,
                };
                self.complete(&key, result, target_latency_ms).await;
            }
            Err(err) => self.fail(&key, err, latency_ms, target_latency_ms).await,
        }
    }

    async fn analyze(
        &self,
        modality: Modality,
        data: Bytes,
        params: &ParameterSnapshot,
        context: &SportContext,
    ) -> Result<(ResultPayload, Vec<Insight>)> {
        match modality {
            Modality::Audio => {
                let transcription = self.collaborators.speech.recognize_speech(data, params).await?;
                let insights = if transcription.transcript.trim().is_empty() {
                    Vec::new()
                } else {
                    self.collaborators
                        .annotator
                        .annotate(&transcription.transcript, context)
                };
                Ok((
                    ResultPayload::Transcript {
                        text: transcription.transcript,
                        confidence: transcription.confidence,
                    },
                    insights,
                ))
            }
            Modality::Visual => {
                let set = self.collaborators.detector.detect_objects(data, params).await?;
                Ok((
                    ResultPayload::Detections {
                        detections: set.detections,
                        confidence: set.confidence,
                    },
                    Vec::new(),
                ))
            }
        }
    }

    fn collaborator_name(&self, modality: Modality) -> &str {
        match modality {
            Modality::Audio => self.collaborators.speech.name(),
            Modality::Visual => self.collaborators.detector.name(),
        }
    }

    async fn complete(&self, key: &ScopedId, result: AnalysisResult, target_latency_ms: u64) {
        let (recorded, link_id) = match self.streams.record_result(key, result.clone()).await {
            Ok(recorded) => recorded,
            Err(_) => {
                // Session released while the call was in flight
                self.metrics.result_discarded();
                return;
            }
        };

        let met_target = match recorded {
            RecordOutcome::Discarded => {
                debug!(stream_id = %key.id, "Stream stopped, result discarded");
                self.metrics.result_discarded();
                return;
            }
            RecordOutcome::Recorded { met_target } => met_target,
            RecordOutcome::Late { met_target } => {
                debug!(
                    stream_id = %key.id,
                    timestamp = result.timestamp,
                    "Result completed out of order, not recorded in history"
                );
                self.metrics.late_result();
                met_target
            }
        };

        self.metrics.chunk_processed(result.latency_ms, met_target);
        self.observe(result.latency_ms, target_latency_ms, Some(result.confidence()))
            .await;

        if !met_target {
            warn!(
                session_id = %key.session,
                stream_id = %key.id,
                latency_ms = result.latency_ms,
                target_ms = target_latency_ms,
                "Latency target missed"
            );
            self.deliver(
                key,
                ServerMessage::LatencyWarning {
                    stream_id: key.id.clone(),
                    modality: result.modality,
                    latency_ms: result.latency_ms,
                    target_ms: target_latency_ms,
                },
            )
            .await;
        }

        debug!(
            stream_id = %key.id,
            latency_ms = result.latency_ms,
            confidence = result.confidence(),
            "Chunk processed"
        );

        let processed = match result.modality {
            Modality::Audio => ServerMessage::AudioProcessed {
                stream_id: key.id.clone(),
                result: result.clone(),
            },
            Modality::Visual => ServerMessage::FrameProcessed {
                stream_id: key.id.clone(),
                result: result.clone(),
            },
        };
        self.deliver(key, processed).await;

        if let Some(link_id) = link_id {
            self.align(key, link_id, result).await;
        }
    }

    async fn align(&self, stream: &ScopedId, link_id: String, result: AnalysisResult) {
        let link = ScopedId::new(stream.session.clone(), link_id);
        let Some(outcome) = self.sync.on_result(&link, result).await else {
            return;
        };
        if outcome.overflowed > 0 {
            self.metrics.unmatched(outcome.overflowed);
        }

        for event in outcome.events {
            let message = match event {
                SyncEvent::Paired(pair) => {
                    self.metrics.synced_pair();
                    debug!(link_id = %link.id, skew_ms = pair.skew_ms, "Synced pair");
                    ServerMessage::SyncedPair {
                        link_id: link.id.clone(),
                        audio: pair.audio,
                        visual: pair.visual,
                        skew_ms: pair.skew_ms,
                        offset_ms: pair.offset_ms,
                    }
                }
                SyncEvent::DriftCorrected(correction) => {
                    self.metrics.drift_correction();
                    debug!(
                        link_id = %link.id,
                        offset_ms = correction.offset_ms,
                        residual_ms = correction.residual_ms,
                        "Clock offset corrected"
                    );
                    ServerMessage::DriftCorrectionApplied {
                        link_id: link.id.clone(),
                        offset_ms: correction.offset_ms,
                        previous_offset_ms: correction.previous_offset_ms,
                        observed_skew_ms: correction.observed_skew_ms,
                        drift: correction.drift,
                    }
                }
            };
            self.deliver(stream, message).await;
        }
    }

    async fn fail(&self, key: &ScopedId, err: Error, latency_ms: f64, target_latency_ms: u64) {
        match self.streams.record_failure(key, &err, latency_ms).await {
            Ok(true) => {}
            _ => {
                self.metrics.result_discarded();
                return;
            }
        }

        let timed_out = matches!(err, Error::CollaboratorTimeout { .. });
        self.metrics.collaborator_failed(timed_out);
        warn!(
            session_id = %key.session,
            stream_id = %key.id,
            latency_ms,
            error = %err,
            "Collaborator call failed, chunk dropped"
        );

        self.observe(latency_ms, target_latency_ms, None).await;
        self.deliver(key, ServerMessage::error(&err, Some(key.id.clone())))
            .await;
    }

    async fn observe(&self, latency_ms: f64, target_ms: u64, confidence: Option<f64>) {
        let observation = Observation {
            latency_ms,
            target_ms: target_ms as f64,
            confidence,
        };
        if let Err(e) = self.controller.observe(observation).await {
            debug!(error = %e, "Controller unavailable, observation dropped");
        }
    }

    async fn deliver(&self, key: &ScopedId, message: ServerMessage) {
        if let Err(e) = self.router.send_to(&key.session, message).await {
            debug!(session_id = %key.session, error = %e, "Delivery failed");
        }
    }
}
