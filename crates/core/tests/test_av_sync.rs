//! Audio/visual alignment through the full coordinator path

mod common;

use common::{collaborators, coordinator, test_config, Client};
use matchpoint_core::collaborator::{ScriptedObjectDetector, ScriptedSpeechRecognizer};
use matchpoint_core::{ScopedId, ServerMessage};
use serde_json::json;
use std::time::Duration;

fn instant_collaborators() -> matchpoint_core::Collaborators {
    collaborators(
        ScriptedSpeechRecognizer::new("what a dunk", 0.9),
        ScriptedObjectDetector::new(vec![], 0.8),
    )
}

#[tokio::test(start_paused = true)]
async fn test_linked_streams_pair_and_evict_unmatched() {
    let coordinator = coordinator(test_config(), instant_collaborators());
    let mut client = Client::connect(&coordinator).await;

    client.start_audio("a1").await;
    client.start_visual("v1").await;
    client.link("l1", "a1", "v1", 20.0).await;

    client.process_audio("a1", 1000.0).await;
    client.process_frame("v1", 1010.0).await;

    let pair = client
        .recv_until(|m| matches!(m, ServerMessage::SyncedPair { .. }))
        .await;
    match pair {
        ServerMessage::SyncedPair {
            link_id,
            audio,
            visual,
            skew_ms,
            ..
        } => {
            assert_eq!(link_id, "l1");
            assert_eq!(audio.timestamp, 1000.0);
            assert_eq!(visual.timestamp, 1010.0);
            assert!(skew_ms.abs() <= 20.0);
            assert_eq!(audio.insights.len(), 1);
        }
        _ => unreachable!(),
    }

    // No audio counterpart will arrive for this frame
    client.process_frame("v1", 5000.0).await;
    client
        .recv_until(|m| {
            matches!(m, ServerMessage::FrameProcessed { result, .. } if result.timestamp == 5000.0)
        })
        .await;

    let link = ScopedId::new(client.session_id.clone(), "l1");
    let status = coordinator.sync_engine().status(&link).await.unwrap();
    assert_eq!(status.buffered_visual, 1);
    assert_eq!(status.counters.synced_pairs, 1);

    tokio::time::advance(Duration::from_millis(2_500)).await;
    let evicted = coordinator
        .sync_engine()
        .sweep(tokio::time::Instant::now())
        .await;
    assert_eq!(evicted, vec![(link.clone(), 1)]);

    let status = coordinator.sync_engine().status(&link).await.unwrap();
    assert_eq!(status.buffered_visual, 0);
    assert_eq!(status.counters.unmatched, 1);

    // The link keeps working after the eviction
    client.send(json!({"type": "get_link_status", "link_id": "l1"})).await;
    let reply = client
        .recv_until(|m| matches!(m, ServerMessage::LinkStatus { .. }))
        .await;
    assert!(matches!(reply, ServerMessage::LinkStatus { status } if status.counters.synced_pairs == 1));
}

#[tokio::test(start_paused = true)]
async fn test_corrected_results_still_pair() {
    let coordinator = coordinator(test_config(), instant_collaborators());
    let mut client = Client::connect(&coordinator).await;

    client.start_audio("a1").await;
    client.start_visual("v1").await;
    client.link("l1", "a1", "v1", 20.0).await;

    client.process_audio("a1", 1000.0).await;
    client
        .recv_until(|m| matches!(m, ServerMessage::AudioProcessed { .. }))
        .await;

    // 30ms is outside precision but inside the tolerance band
    client.process_frame("v1", 1030.0).await;
    let correction = client
        .recv_until(|m| matches!(m, ServerMessage::DriftCorrectionApplied { .. }))
        .await;
    let offset = match correction {
        ServerMessage::DriftCorrectionApplied { offset_ms, observed_skew_ms, .. } => {
            assert_eq!(observed_skew_ms, 30.0);
            offset_ms
        }
        _ => unreachable!(),
    };
    assert!((offset - 6.0).abs() < 1e-9);

    // The audio result was kept and pairs with a later frame
    client.process_frame("v1", 1012.0).await;
    let pair = client
        .recv_until(|m| matches!(m, ServerMessage::SyncedPair { .. }))
        .await;
    match pair {
        ServerMessage::SyncedPair { audio, visual, skew_ms, .. } => {
            assert_eq!(audio.timestamp, 1000.0);
            assert_eq!(visual.timestamp, 1012.0);
            assert!((skew_ms - 6.0).abs() < 1e-9);
        }
        _ => unreachable!(),
    }

    let link = ScopedId::new(client.session_id.clone(), "l1");
    let status = coordinator.sync_engine().status(&link).await.unwrap();
    assert_eq!(status.counters.drift_corrections, 1);
    assert_eq!(status.counters.synced_pairs, 1);
    assert_eq!(status.counters.unmatched, 0);
    assert_eq!(status.buffered_visual, 1);
    assert_eq!(coordinator.metrics_snapshot().await.unmatched_results, 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_evicts() {
    let mut config = test_config();
    config.sync.sweep_interval_ms = 100;
    let coordinator = coordinator(config, instant_collaborators());
    coordinator.start_background_tasks();
    let mut client = Client::connect(&coordinator).await;

    client.start_audio("a1").await;
    client.start_visual("v1").await;
    client.link("l1", "a1", "v1", 20.0).await;

    client.process_frame("v1", 5000.0).await;
    client
        .recv_until(|m| matches!(m, ServerMessage::FrameProcessed { .. }))
        .await;

    tokio::time::sleep(Duration::from_millis(3_000)).await;

    let link = ScopedId::new(client.session_id.clone(), "l1");
    let status = coordinator.sync_engine().status(&link).await.unwrap();
    assert_eq!(status.buffered_visual, 0);
    assert_eq!(status.counters.unmatched, 1);
    assert!(coordinator.metrics_snapshot().await.unmatched_results >= 1);
}

#[tokio::test]
async fn test_link_rejections() {
    let coordinator = coordinator(test_config(), instant_collaborators());
    let mut client = Client::connect(&coordinator).await;

    client.start_audio("a1").await;
    client.start_audio("a2").await;
    client.start_visual("v1").await;

    // Audio linked to audio
    client
        .send(json!({
            "type": "link_audio_visual",
            "audio_stream_id": "a1",
            "visual_stream_id": "a2"
        }))
        .await;
    assert_eq!(common::error_code(&client.recv().await), Some("link_mismatch"));

    // Missing stream
    client
        .send(json!({
            "type": "link_audio_visual",
            "audio_stream_id": "a1",
            "visual_stream_id": "nope"
        }))
        .await;
    assert_eq!(common::error_code(&client.recv().await), Some("link_mismatch"));

    // The failed attempts left a1 free to link
    client.link("l1", "a1", "v1", 20.0).await;

    // A stream belongs to at most one link
    client
        .send(json!({
            "type": "link_audio_visual",
            "link_id": "l2",
            "audio_stream_id": "a2",
            "visual_stream_id": "v1"
        }))
        .await;
    assert_eq!(common::error_code(&client.recv().await), Some("link_mismatch"));

    client.send(json!({"type": "unlink_audio_visual", "link_id": "l1"})).await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Unlinked { reason, .. } if reason == "requested"
    ));

    client.send(json!({"type": "unlink_audio_visual", "link_id": "l1"})).await;
    assert_eq!(common::error_code(&client.recv().await), Some("link_not_found"));
}

#[tokio::test]
async fn test_precision_must_be_below_tolerance() {
    let coordinator = coordinator(test_config(), instant_collaborators());
    let mut client = Client::connect(&coordinator).await;
    client.start_audio("a1").await;
    client.start_visual("v1").await;

    client
        .send(json!({
            "type": "link_audio_visual",
            "audio_stream_id": "a1",
            "visual_stream_id": "v1",
            "precision_ms": 500.0
        }))
        .await;
    assert_eq!(common::error_code(&client.recv().await), Some("invalid_config"));
    assert_eq!(coordinator.sync_engine().count().await, 0);
}
