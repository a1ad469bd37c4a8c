//! Audio-Visual Synchronization Engine
//!
//! Holds every live link. Each link sits behind its own mutex so results for
//! different links are aligned concurrently while one link's buffers see a
//! single mutator at a time.

use super::link::{Link, LinkReport, LinkSpec, SyncOutcome};
use crate::config::SyncSettings;
use crate::result::AnalysisResult;
use crate::session::ScopedId;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// A link that was torn down
#[derive(Debug, Clone)]
pub struct RemovedLink {
    pub key: ScopedId,
    pub audio_stream_id: String,
    pub visual_stream_id: String,
    /// Buffered unmatched results dropped by the teardown
    pub discarded: usize,
}

pub struct SyncEngine {
    links: RwLock<HashMap<ScopedId, Arc<Mutex<Link>>>>,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Build a link without registering it
    ///
    /// Callers attach both streams first and then [`SyncEngine::insert`] it,
    /// so a rejected request leaves no state behind.
    pub async fn prepare(
        &self,
        key: ScopedId,
        audio_stream_id: String,
        visual_stream_id: String,
        precision_ms: Option<f64>,
    ) -> Result<Link> {
        if self.links.read().await.contains_key(&key) {
            return Err(Error::LinkMismatch(format!("link {} already exists", key.id)));
        }
        let spec = LinkSpec::from_settings(&self.settings, precision_ms)?;
        Link::new(key, audio_stream_id, visual_stream_id, spec)
    }

    pub async fn insert(&self, link: Link) -> Result<LinkReport> {
        let key = link.key().clone();
        let report = link.report();
        let mut links = self.links.write().await;
        if links.contains_key(&key) {
            return Err(Error::LinkMismatch(format!("link {} already exists", key.id)));
        }
        links.insert(key.clone(), Arc::new(Mutex::new(link)));

        info!(
            session_id = %key.session,
            link_id = %key.id,
            audio_stream_id = %report.audio_stream_id,
            visual_stream_id = %report.visual_stream_id,
            precision_ms = report.precision_ms,
            "Link created"
        );
        Ok(report)
    }

    /// Feed a result into its link
    ///
    /// Returns `None` when the link no longer exists (torn down while the
    /// result was in flight).
    pub async fn on_result(&self, key: &ScopedId, result: AnalysisResult) -> Option<SyncOutcome> {
        let link = self.links.read().await.get(key).cloned()?;
        let outcome = link.lock().on_result(result, Instant::now());
        if outcome.overflowed > 0 {
            debug!(link_id = %key.id, evicted = outcome.overflowed, "Sync buffer full, evicted oldest");
        }
        Some(outcome)
    }

    /// Tear down a link, discarding its buffered results
    pub async fn remove(&self, key: &ScopedId) -> Option<RemovedLink> {
        let link = self.links.write().await.remove(key)?;
        let mut link = link.lock();
        let discarded = link.teardown();

        info!(
            session_id = %key.session,
            link_id = %key.id,
            discarded,
            "Link torn down"
        );
        Some(RemovedLink {
            key: key.clone(),
            audio_stream_id: link.audio_stream_id().to_string(),
            visual_stream_id: link.visual_stream_id().to_string(),
            discarded,
        })
    }

    /// Evict results older than each link's horizon
    ///
    /// Returns `(link, evicted)` for every link that evicted something.
    pub async fn sweep(&self, now: Instant) -> Vec<(ScopedId, usize)> {
        let links: Vec<(ScopedId, Arc<Mutex<Link>>)> = self
            .links
            .read()
            .await
            .iter()
            .map(|(k, l)| (k.clone(), l.clone()))
            .collect();

        links
            .into_iter()
            .filter_map(|(key, link)| {
                let evicted = link.lock().sweep_expired(now);
                (evicted > 0).then_some((key, evicted))
            })
            .collect()
    }

    pub async fn status(&self, key: &ScopedId) -> Result<LinkReport> {
        let link = self
            .links
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::LinkNotFound(key.id.clone()))?;
        let report = link.lock().report();
        Ok(report)
    }

    /// Links that involve the given stream
    pub async fn links_for_stream(&self, stream: &ScopedId) -> Vec<ScopedId> {
        self.links
            .read()
            .await
            .iter()
            .filter(|(key, link)| {
                let link = link.lock();
                key.session == stream.session
                    && (link.audio_stream_id() == stream.id || link.visual_stream_id() == stream.id)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn links_for_session(&self, session_id: &str) -> Vec<ScopedId> {
        self.links
            .read()
            .await
            .keys()
            .filter(|key| key.session == session_id)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.links.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultPayload;
    use crate::stream::Modality;
    use std::time::Duration;

    fn result(stream: &str, modality: Modality, ts: f64) -> AnalysisResult {
        let payload = match modality {
            Modality::Audio => ResultPayload::Transcript {
                text: "dunk".to_string(),
                confidence: 0.9,
            },
            Modality::Visual => ResultPayload::Detections {
                detections: vec![],
                confidence: 0.7,
            },
        };
        AnalysisResult {
            stream_id: stream.to_string(),
            timestamp: ts,
            modality,
            payload,
            latency_ms: 20.0,
            insights: vec![],
        }
    }

    async fn engine_with_link() -> (SyncEngine, ScopedId) {
        let engine = SyncEngine::new(SyncSettings::default());
        let key = ScopedId::new("s1", "l1");
        let link = engine
            .prepare(key.clone(), "a1".into(), "v1".into(), Some(20.0))
            .await
            .unwrap();
        engine.insert(link).await.unwrap();
        (engine, key)
    }

    #[tokio::test]
    async fn test_duplicate_link_rejected() {
        let (engine, key) = engine_with_link().await;
        let err = engine
            .prepare(key, "a2".into(), "v2".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LinkMismatch(_)));
    }

    #[tokio::test]
    async fn test_on_result_routes_to_link() {
        let (engine, key) = engine_with_link().await;
        engine
            .on_result(&key, result("a1", Modality::Audio, 1000.0))
            .await
            .unwrap();
        let outcome = engine
            .on_result(&key, result("v1", Modality::Visual, 1010.0))
            .await
            .unwrap();
        assert_eq!(outcome.events.len(), 1);

        let missing = ScopedId::new("s1", "gone");
        assert!(engine
            .on_result(&missing, result("a1", Modality::Audio, 1.0))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reports_evictions() {
        let (engine, key) = engine_with_link().await;
        engine
            .on_result(&key, result("v1", Modality::Visual, 5000.0))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(2_100)).await;
        let evicted = engine.sweep(Instant::now()).await;
        assert_eq!(evicted, vec![(key.clone(), 1)]);
        assert_eq!(engine.status(&key).await.unwrap().counters.unmatched, 1);
    }

    #[tokio::test]
    async fn test_remove_and_lookup_by_stream() {
        let (engine, key) = engine_with_link().await;
        engine
            .on_result(&key, result("a1", Modality::Audio, 1000.0))
            .await
            .unwrap();

        assert_eq!(
            engine.links_for_stream(&ScopedId::new("s1", "v1")).await,
            vec![key.clone()]
        );
        assert!(engine
            .links_for_stream(&ScopedId::new("s2", "v1"))
            .await
            .is_empty());

        let removed = engine.remove(&key).await.unwrap();
        assert_eq!(removed.discarded, 1);
        assert!(engine.remove(&key).await.is_none());
        assert!(matches!(
            engine.status(&key).await,
            Err(Error::LinkNotFound(_))
        ));
    }
}
