//! Knowledge extraction service abstraction
//!
//! Turns approved content (or an exam question) into knowledge point drafts
//! that the worker persists. The provider is an external model service; a
//! mock stands in for tests and local development.

use crate::db::models::BlockType;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One knowledge point as returned by the extraction provider, not yet
/// persisted or tied to a source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePointDraft {
    pub category: String,
    pub title: String,
    pub body: String,
}

/// Trait for knowledge extraction providers
#[async_trait]
pub trait KnowledgeExtractor: Send + Sync {
    /// Extract knowledge points from a piece of approved content.
    async fn extract_content(
        &self,
        content: &str,
        block_type: BlockType,
    ) -> Result<Vec<KnowledgePointDraft>>;

    /// Extract knowledge points from an exam question and its answer.
    async fn extract_exam_question(
        &self,
        question: &str,
        answer: Option<&str>,
    ) -> Result<Vec<KnowledgePointDraft>>;

    fn provider_name(&self) -> &str;
}

/// HTTP extraction client
pub struct HttpKnowledgeExtractor {
    client: reqwest::Client,
    provider: String,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ContentRequest<'a> {
    content: &'a str,
    block_type: &'a str,
}

#[derive(Serialize)]
struct ExamRequest<'a> {
    question: &'a str,
    answer: Option<&'a str>,
}

#[derive(Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    knowledge_points: Vec<KnowledgePointDraft>,
}

impl HttpKnowledgeExtractor {
    pub fn new(
        provider: String,
        api_key: String,
        base_url: String,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            provider,
            api_key,
            base_url,
            max_retries,
        }
    }

    async fn post_with_retry<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Vec<KnowledgePointDraft>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                let delay = Duration::from_millis(200 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.post(path, body).await {
                Ok(drafts) => return Ok(drafts),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Extraction request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::ExtractionError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Vec<KnowledgePointDraft>> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExtractionError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExtractionError {
                message: format!("API error {}: {}", status, text),
            });
        }

        let result: ExtractResponse =
            response.json().await.map_err(|e| AppError::ExtractionError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(result.knowledge_points)
    }
}

#[async_trait]
impl KnowledgeExtractor for HttpKnowledgeExtractor {
    async fn extract_content(
        &self,
        content: &str,
        block_type: BlockType,
    ) -> Result<Vec<KnowledgePointDraft>> {
        let block_type = match block_type {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::Algorithm => "algorithm",
        };
        self.post_with_retry("/v1/extract/content", &ContentRequest {
            content,
            block_type,
        })
        .await
    }

    async fn extract_exam_question(
        &self,
        question: &str,
        answer: Option<&str>,
    ) -> Result<Vec<KnowledgePointDraft>> {
        self.post_with_retry("/v1/extract/exam", &ExamRequest { question, answer })
            .await
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

/// Mock extractor for testing: one draft per call, derived from the input.
pub struct MockKnowledgeExtractor;

#[async_trait]
impl KnowledgeExtractor for MockKnowledgeExtractor {
    async fn extract_content(
        &self,
        content: &str,
        _block_type: BlockType,
    ) -> Result<Vec<KnowledgePointDraft>> {
        Ok(vec![KnowledgePointDraft {
            category: "concept".to_string(),
            title: content.chars().take(32).collect(),
            body: content.to_string(),
        }])
    }

    async fn extract_exam_question(
        &self,
        question: &str,
        answer: Option<&str>,
    ) -> Result<Vec<KnowledgePointDraft>> {
        Ok(vec![KnowledgePointDraft {
            category: "exam".to_string(),
            title: question.chars().take(32).collect(),
            body: answer.unwrap_or(question).to_string(),
        }])
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

/// Create an extractor for the named provider.
pub fn create_extractor(
    provider: &str,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
) -> Arc<dyn KnowledgeExtractor> {
    match provider {
        "mock" => Arc::new(MockKnowledgeExtractor),
        name => {
            let key = api_key.unwrap_or_default();
            let base = base_url.unwrap_or_else(|| "http://localhost:9500".to_string());
            Arc::new(HttpKnowledgeExtractor::new(
                name.to_string(),
                key,
                base,
                timeout_secs,
                max_retries,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_extractor_drafts_from_content() {
        let extractor = MockKnowledgeExtractor;
        let drafts = extractor
            .extract_content("Dijkstra's algorithm finds shortest paths", BlockType::Text)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].category, "concept");
    }

    #[tokio::test]
    async fn mock_extractor_prefers_answer_body() {
        let extractor = MockKnowledgeExtractor;
        let drafts = extractor
            .extract_exam_question("What is a B-tree?", Some("A balanced tree"))
            .await
            .unwrap();
        assert_eq!(drafts[0].body, "A balanced tree");
    }
}
