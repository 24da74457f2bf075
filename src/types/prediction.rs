//! Prediction request and response payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Bin, ProcessorId};

fn default_is_3d() -> u8 {
    1
}

/// Ranking request for one or more BINs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// BINs to rank processors for
    pub bins: Vec<Bin>,

    /// 3-D Secure flag (0 or 1)
    #[serde(default = "default_is_3d")]
    pub is_3d: u8,

    /// Override for the number of processors returned
    #[serde(default)]
    pub top_n: Option<usize>,

    /// Override for the minimum internal-processor probability (0.0 - 1.0)
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl PredictionRequest {
    pub fn new(bins: Vec<Bin>, is_3d: u8) -> Self {
        Self {
            bins,
            is_3d,
            top_n: None,
            threshold: None,
        }
    }
}

/// One entry of a ranked processor list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProcessor {
    pub processor_id: ProcessorId,
    pub processor_name: String,

    /// Predicted approval probability as a percentage, two decimals
    pub predicted_success_percent: f64,

    /// Dense rank starting at 1
    pub rank: u32,

    /// True when the list was drawn from external processors
    pub fallback_used: bool,

    /// True when the BIN had no history or the scorer failed for this entry
    pub cold_start: bool,
}

/// Ranked processors for a single BIN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Unique response identifier
    pub response_id: String,

    pub bin: Bin,
    pub is_3d: u8,

    /// Whether the BIN appears in the statistics snapshot
    pub bin_known: bool,

    /// No internal processor reached the threshold
    pub fallback_used: bool,

    /// Model artifact version that produced the ranking
    pub model_version: String,

    pub processors: Vec<RankedProcessor>,

    pub generated_at: DateTime<Utc>,
}

impl PredictionResponse {
    /// Create a response for a ranked list
    pub fn new(
        bin: Bin,
        is_3d: u8,
        model_version: String,
        fallback_used: bool,
        processors: Vec<RankedProcessor>,
    ) -> Self {
        Self {
            response_id: uuid::Uuid::new_v4().to_string(),
            bin,
            is_3d,
            bin_known: false,
            fallback_used,
            model_version,
            processors,
            generated_at: Utc::now(),
        }
    }

    /// Mark whether the BIN had history in the snapshot
    pub fn with_bin_known(mut self, bin_known: bool) -> Self {
        self.bin_known = bin_known;
        self
    }

    /// Highest ranked processor, if any
    pub fn top(&self) -> Option<&RankedProcessor> {
        self.processors.first()
    }
}

/// Reply sent back over the message bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PredictionReply {
    Ok { results: Vec<PredictionResponse> },
    Error { message: String },
}

impl PredictionReply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request: PredictionRequest = serde_json::from_str(r#"{"bins":[510123]}"#).unwrap();
        assert_eq!(request.bins, vec![510123]);
        assert_eq!(request.is_3d, 1);
        assert!(request.top_n.is_none());
        assert!(request.threshold.is_none());
    }

    #[test]
    fn test_reply_is_tagged() {
        let reply = PredictionReply::error("bad input");
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"status":"error","message":"bad input"}"#);
    }

    #[test]
    fn test_response_top() {
        let entry = RankedProcessor {
            processor_id: 3,
            processor_name: "Adyen".to_string(),
            predicted_success_percent: 91.25,
            rank: 1,
            fallback_used: false,
            cold_start: false,
        };
        let response = PredictionResponse::new(510123, 1, "v1".to_string(), false, vec![entry])
            .with_bin_known(true);

        assert!(response.bin_known);
        assert_eq!(response.top().map(|p| p.processor_id), Some(3));
    }
}
