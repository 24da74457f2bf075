//! Prediction requests arriving over NATS

use anyhow::Result;
use async_nats::{Client, Message, Subscriber};
use tracing::info;

use crate::error::ServingError;
use crate::types::PredictionRequest;

/// Subscribes to the request subject and decodes what arrives.
///
/// Routers started with the same queue group share one subscription, so
/// each request is answered once.
pub struct RequestConsumer {
    client: Client,
    subject: String,
    queue_group: Option<String>,
}

impl RequestConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            queue_group: None,
        }
    }

    pub fn with_queue_group(mut self, queue_group: Option<String>) -> Self {
        self.queue_group = queue_group.filter(|g| !g.is_empty());
        self
    }

    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = match &self.queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(self.subject.clone(), group.clone())
                    .await?
            }
            None => self.client.subscribe(self.subject.clone()).await?,
        };
        info!(
            subject = %self.subject,
            queue_group = ?self.queue_group,
            "Subscribed to prediction requests"
        );
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Decode a request message
    pub fn decode(message: &Message) -> Result<PredictionRequest, ServingError> {
        parse_request(&message.payload)
    }
}

/// Parse and sanity-check a JSON request body.
///
/// Checks only the shape of the request; threshold and top-N overrides are
/// validated against the serving defaults later.
pub fn parse_request(payload: &[u8]) -> Result<PredictionRequest, ServingError> {
    let request: PredictionRequest = serde_json::from_slice(payload)
        .map_err(|e| ServingError::InvalidRequest(format!("malformed request: {}", e)))?;

    if request.bins.is_empty() {
        return Err(ServingError::InvalidRequest("no BINs given".to_string()));
    }
    if request.is_3d > 1 {
        return Err(ServingError::InvalidRequest(format!(
            "is_3d must be 0 or 1, got {}",
            request.is_3d
        )));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_defaults() {
        let request = parse_request(br#"{"bins": [510123, 462263]}"#).unwrap();
        assert_eq!(request.bins, vec![510123, 462263]);
        assert_eq!(request.is_3d, 1);
        assert!(request.top_n.is_none());
        assert!(request.threshold.is_none());
    }

    #[test]
    fn test_parse_request_overrides() {
        let request =
            parse_request(br#"{"bins": [510123], "is_3d": 0, "top_n": 3, "threshold": 0.6}"#)
                .unwrap();
        assert_eq!(request.is_3d, 0);
        assert_eq!(request.top_n, Some(3));
        assert_eq!(request.threshold, Some(0.6));
    }

    #[test]
    fn test_parse_request_rejects_bad_input() {
        let payloads: [&[u8]; 4] = [
            b"not json",
            br#"{"bins": []}"#,
            br#"{"bins": [510123], "is_3d": 2}"#,
            br#"{"bins": ["510123x"]}"#,
        ];
        for payload in payloads {
            assert!(matches!(
                parse_request(payload),
                Err(ServingError::InvalidRequest(_))
            ));
        }
    }
}
