//! Per-chunk failures stay local to the chunk

mod common;

use common::{collaborators, coordinator, error_code, test_config, Client};
use matchpoint_core::collaborator::{ScriptStep, ScriptedObjectDetector, ScriptedSpeechRecognizer};
use matchpoint_core::{ScopedId, ServerMessage, StreamState};
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_error_and_stream_keeps_running() {
    let speech = ScriptedSpeechRecognizer::new("timeout called", 0.8).then(ScriptStep::Hang);
    let coordinator = coordinator(
        test_config(),
        collaborators(speech, ScriptedObjectDetector::new(vec![], 0.8)),
    );
    let mut client = Client::connect(&coordinator).await;
    client.start_audio("a1").await;

    client.process_audio("a1", 100.0).await;
    match client.recv().await {
        ServerMessage::Error {
            code, stream_id, ..
        } => {
            assert_eq!(code, "collaborator_timeout");
            assert_eq!(stream_id.as_deref(), Some("a1"));
        }
        other => panic!("expected error, got {:?}", other),
    }

    let key = ScopedId::new(client.session_id.clone(), "a1");
    let status = coordinator.streams().status(&key).await.unwrap();
    assert_eq!(status.state, StreamState::Active);

    client.process_audio("a1", 200.0).await;
    match client
        .recv_until(|m| matches!(m, ServerMessage::AudioProcessed { .. }))
        .await
    {
        ServerMessage::AudioProcessed { result, .. } => {
            assert_eq!(result.timestamp, 200.0);
            assert_eq!(result.insights[0].term, "timeout");
        }
        _ => unreachable!(),
    }

    client.send(json!({"type": "stop_audio_stream", "stream_id": "a1"})).await;
    match client
        .recv_until(|m| matches!(m, ServerMessage::AudioStreamStopped { .. }))
        .await
    {
        ServerMessage::AudioStreamStopped { summary, .. } => {
            assert_eq!(summary.chunks_submitted, 2);
            assert_eq!(summary.chunks_processed, 1);
            assert_eq!(summary.failures, 1);
            assert_eq!(summary.timeouts, 1);
            assert_eq!(summary.compliance, 0.5);
        }
        _ => unreachable!(),
    }

    let metrics = coordinator.metrics_snapshot().await;
    assert_eq!(metrics.collaborator_timeouts, 1);
    assert_eq!(metrics.deadline_missed, 1);
}

#[tokio::test]
async fn test_detector_failure_is_local_to_the_chunk() {
    let detector = ScriptedObjectDetector::new(vec![], 0.8)
        .then(ScriptStep::Fail(Duration::ZERO, "model unavailable".to_string()));
    let coordinator = coordinator(
        test_config(),
        collaborators(ScriptedSpeechRecognizer::new("", 0.8), detector),
    );
    let mut client = Client::connect(&coordinator).await;
    let mut bystander = Client::connect(&coordinator).await;
    client.start_visual("v1").await;
    bystander.start_visual("v1").await;

    client.process_frame("v1", 1.0).await;
    let failure = client.recv().await;
    assert_eq!(error_code(&failure), Some("collaborator_failure"));

    client.process_frame("v1", 2.0).await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::FrameProcessed { .. }
    ));

    // Other sessions are unaffected
    bystander.process_frame("v1", 1.0).await;
    assert!(matches!(
        bystander.recv().await,
        ServerMessage::FrameProcessed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_result_discarded_after_stop() {
    let speech = ScriptedSpeechRecognizer::new("slow", 0.8)
        .then(ScriptStep::Respond(Duration::from_millis(500)));
    let coordinator = coordinator(
        test_config(),
        collaborators(speech, ScriptedObjectDetector::new(vec![], 0.8)),
    );
    let mut client = Client::connect(&coordinator).await;
    client.start_audio("a1").await;

    client.process_audio("a1", 1.0).await;
    client.send(json!({"type": "stop_audio_stream", "stream_id": "a1"})).await;
    match client.recv().await {
        ServerMessage::AudioStreamStopped { summary, .. } => {
            assert_eq!(summary.chunks_submitted, 1);
            assert_eq!(summary.discarded, 1);
            assert_eq!(summary.chunks_processed, 0);
        }
        other => panic!("unexpected message: {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    client.send(json!({"type": "ping"})).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { .. }));
    assert_eq!(coordinator.metrics_snapshot().await.discarded_results, 1);

    client.process_audio("a1", 2.0).await;
    assert_eq!(error_code(&client.recv().await), Some("stream_not_active"));
}
