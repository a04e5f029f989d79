//! SQS queue integration for async job processing
//!
//! Provides:
//! - SQS client wrapper with retry logic on send
//! - Message serialization/deserialization
//! - Job message types for the vision and extraction workers

use crate::errors::{AppError, Result};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            dlq_url: None,
            visibility_timeout: 120,
            wait_time_seconds: 20,
            max_messages: 10,
        }
    }
}

/// SQS queue client wrapper
pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    /// Create a new queue client
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Create with existing AWS config
    pub fn with_client(client: SqsClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    /// Send a message, retrying transient SQS failures with backoff.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let result = retry(policy, || async {
            self.client
                .send_message()
                .queue_url(&self.config.url)
                .message_body(&body)
                .send()
                .await
                .map_err(backoff::Error::transient)
        })
        .await
        .map_err(|e| AppError::QueueError {
            message: format!("Failed to send message: {}", e),
        })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Send a message with delay
    pub async fn send_delayed<T: Serialize>(
        &self,
        message: &T,
        delay_seconds: i32,
    ) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let result = self
            .client
            .send_message()
            .queue_url(&self.config.url)
            .message_body(&body)
            .delay_seconds(delay_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send delayed message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, delay_seconds, "Delayed message sent to queue");

        Ok(message_id)
    }

    /// Receive messages from the queue
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        Ok(messages)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Change visibility timeout (extend processing time)
    pub async fn extend_visibility(
        &self,
        receipt_handle: &str,
        additional_seconds: i32,
    ) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(additional_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to extend visibility: {}", e),
            })?;

        debug!(additional_seconds, "Extended message visibility");
        Ok(())
    }

    /// Parse message body as JSON
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

/// One page-OCR job for the vision worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionJobMessage {
    pub page_id: Uuid,
    pub batch_id: Uuid,
}

/// What an extraction job points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionTarget {
    ApprovedContent(Uuid),
    ExamQuestion(Uuid),
}

/// One extraction job: exactly one of the two target ids is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJobMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_content_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_question_id: Option<Uuid>,
}

impl ExtractionJobMessage {
    pub fn for_content(approved_content_id: Uuid) -> Self {
        Self {
            approved_content_id: Some(approved_content_id),
            exam_question_id: None,
        }
    }

    pub fn for_exam_question(exam_question_id: Uuid) -> Self {
        Self {
            approved_content_id: None,
            exam_question_id: Some(exam_question_id),
        }
    }

    /// Resolve the job target. A message carrying neither id (or both) is a
    /// producer bug and fails here rather than deep in the worker.
    pub fn target(&self) -> Result<ExtractionTarget> {
        match (self.approved_content_id, self.exam_question_id) {
            (Some(id), None) => Ok(ExtractionTarget::ApprovedContent(id)),
            (None, Some(id)) => Ok(ExtractionTarget::ExamQuestion(id)),
            _ => Err(AppError::QueueError {
                message: "Extraction job must carry exactly one target id".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_job_round_trips() {
        let msg = VisionJobMessage {
            page_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: VisionJobMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.page_id, parsed.page_id);
        assert_eq!(msg.batch_id, parsed.batch_id);
    }

    #[test]
    fn extraction_job_resolves_content_target() {
        let id = Uuid::new_v4();
        let msg = ExtractionJobMessage::for_content(id);
        assert_eq!(msg.target().unwrap(), ExtractionTarget::ApprovedContent(id));
    }

    #[test]
    fn extraction_job_resolves_exam_target() {
        let id = Uuid::new_v4();
        let msg = ExtractionJobMessage::for_exam_question(id);
        assert_eq!(msg.target().unwrap(), ExtractionTarget::ExamQuestion(id));
    }

    #[test]
    fn extraction_job_without_target_is_rejected() {
        let msg: ExtractionJobMessage = serde_json::from_str("{}").unwrap();
        assert!(msg.target().is_err());
    }

    #[test]
    fn extraction_job_with_both_targets_is_rejected() {
        let msg = ExtractionJobMessage {
            approved_content_id: Some(Uuid::new_v4()),
            exam_question_id: Some(Uuid::new_v4()),
        };
        assert!(msg.target().is_err());
    }

    #[test]
    fn absent_target_field_deserializes_as_none() {
        let json = format!(r#"{{"approved_content_id": "{}"}}"#, Uuid::new_v4());
        let msg: ExtractionJobMessage = serde_json::from_str(&json).unwrap();
        assert!(msg.exam_question_id.is_none());
        assert!(matches!(
            msg.target().unwrap(),
            ExtractionTarget::ApprovedContent(_)
        ));
    }
}
