//! Timestamped pipeline output for a single chunk or frame

use crate::collaborator::{Detection, Insight};
use crate::stream::Modality;
use serde::{Deserialize, Serialize};

/// Modality-specific payload of a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    /// Speech recognition output
    Transcript {
        text: String,
        confidence: f64,
    },
    /// Object/pose detection output
    Detections {
        detections: Vec<Detection>,
        confidence: f64,
    },
}

impl ResultPayload {
    pub fn confidence(&self) -> f64 {
        match self {
            ResultPayload::Transcript { confidence, .. } => *confidence,
            ResultPayload::Detections { confidence, .. } => *confidence,
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            ResultPayload::Transcript { .. } => Modality::Audio,
            ResultPayload::Detections { .. } => Modality::Visual,
        }
    }
}

/// One processed chunk/frame
///
/// Results are immutable once built; the history, the sync engine and the
/// outbound message each hold their own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Stream that produced the result
    pub stream_id: String,

    /// Producer timestamp in milliseconds (client clock)
    pub timestamp: f64,

    pub modality: Modality,

    pub payload: ResultPayload,

    /// Server-side processing latency in milliseconds
    pub latency_ms: f64,

    /// Sport-context annotations (empty when none apply)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<Insight>,
}

impl AnalysisResult {
    pub fn confidence(&self) -> f64 {
        self.payload.confidence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_confidence_and_modality() {
        let payload = ResultPayload::Transcript {
            text: "three pointer".to_string(),
            confidence: 0.92,
        };
        assert_eq!(payload.confidence(), 0.92);
        assert_eq!(payload.modality(), Modality::Audio);

        let payload = ResultPayload::Detections {
            detections: vec![],
            confidence: 0.4,
        };
        assert_eq!(payload.modality(), Modality::Visual);
    }

    #[test]
    fn test_result_serializes_payload_kind() {
        let result = AnalysisResult {
            stream_id: "a1".to_string(),
            timestamp: 1000.0,
            modality: Modality::Audio,
            payload: ResultPayload::Transcript {
                text: "goal".to_string(),
                confidence: 0.8,
            },
            latency_ms: 42.0,
            insights: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["payload"]["kind"], "transcript");
        assert_eq!(json["modality"], "audio");
        assert!(json.get("insights").is_none());
    }
}
