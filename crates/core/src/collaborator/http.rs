//! HTTP/JSON clients for the recognition and detection services
//!
//! Payloads are sent base64-encoded alongside the current parameter snapshot:
//!
//! ```text
//! POST {speech_url}/recognize   {"audio": "<base64>", "parameters": {...}}
//!   -> {"transcript": "...", "confidence": 0.93}
//! POST {detection_url}/detect   {"frame": "<base64>", "parameters": {...}}
//!   -> {"detections": [{"label": "...", "confidence": 0.8}], "confidence": 0.8}
//! ```

use super::{DetectionSet, ObjectDetector, SpeechRecognizer, Transcription};
use crate::controller::ParameterSnapshot;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    audio: String,
    parameters: &'a ParameterSnapshot,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    frame: String,
    parameters: &'a ParameterSnapshot,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

async fn post_json<B: Serialize, T: DeserializeOwned>(
    client: &reqwest::Client,
    collaborator: &str,
    url: &str,
    body: &B,
) -> Result<T> {
    let failure = |message: String| Error::CollaboratorFailure {
        collaborator: collaborator.to_string(),
        message,
    };

    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| failure(format!("request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(failure(format!("service error {}: {}", status, body)));
    }

    response
        .json()
        .await
        .map_err(|e| failure(format!("failed to parse response: {}", e)))
}

/// Speech recognition over HTTP
pub struct HttpSpeechRecognizer {
    client: reqwest::Client,
    url: String,
}

impl HttpSpeechRecognizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: endpoint(base_url, "recognize"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SpeechRecognizer for HttpSpeechRecognizer {
    async fn recognize_speech(
        &self,
        audio: Bytes,
        params: &ParameterSnapshot,
    ) -> Result<Transcription> {
        debug!(url = %self.url, bytes = audio.len(), "Sending audio to recognizer");
        let request = RecognizeRequest {
            audio: STANDARD.encode(&audio),
            parameters: params,
        };
        post_json(&self.client, self.name(), &self.url, &request).await
    }

    fn name(&self) -> &str {
        "speech"
    }
}

/// Object detection over HTTP
pub struct HttpObjectDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpObjectDetector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: endpoint(base_url, "detect"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ObjectDetector for HttpObjectDetector {
    async fn detect_objects(
        &self,
        frame: Bytes,
        params: &ParameterSnapshot,
    ) -> Result<DetectionSet> {
        debug!(url = %self.url, bytes = frame.len(), "Sending frame to detector");
        let request = DetectRequest {
            frame: STANDARD.encode(&frame),
            parameters: params,
        };
        post_json(&self.client, self.name(), &self.url, &request).await
    }

    fn name(&self) -> &str {
        "detection"
    }
}
