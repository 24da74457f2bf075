//! NATS publisher for prediction replies

use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::debug;

use crate::types::PredictionReply;

/// Publishes replies to the requester, or to a fixed subject when the
/// request carried no reply inbox
#[derive(Clone)]
pub struct ResponsePublisher {
    client: Client,
    subject: String,
}

impl ResponsePublisher {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn publish(&self, reply_to: Option<&Subject>, reply: &PredictionReply) -> Result<()> {
        let payload = serde_json::to_vec(reply)?;

        match reply_to {
            Some(inbox) => {
                self.client.publish(inbox.clone(), payload.into()).await?;
                debug!(subject = %inbox, "Published prediction reply");
            }
            None => {
                self.client
                    .publish(self.subject.clone(), payload.into())
                    .await?;
                debug!(subject = %self.subject, "Published prediction reply");
            }
        }

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running NATS server
}
