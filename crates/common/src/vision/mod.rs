//! Vision/OCR service abstraction
//!
//! A page image goes out, structured content grouped by kind comes back:
//! plain text blocks, tables, and algorithm boxes, plus an optional
//! classification of where the page sits in the lesson taxonomy.
//!
//! [`ExtractedContent::flatten`] collapses the grouped response into the one
//! block the worker persists for the page.

use crate::db::models::BlockType;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A table or algorithm item: rendered text plus the structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredItem {
    pub text: String,
    pub payload: serde_json::Value,
}

/// Content the vision service extracted from one page, grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    #[serde(default)]
    pub text_blocks: Vec<String>,

    #[serde(default)]
    pub tables: Vec<StructuredItem>,

    #[serde(default)]
    pub algorithms: Vec<StructuredItem>,
}

/// Taxonomy placement the vision service inferred for the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub lesson: String,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
}

/// Full parse result for one page.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedPage {
    #[serde(default)]
    pub content: ExtractedContent,

    pub classification: Option<Classification>,
}

/// The single block a page's parse collapses into.
#[derive(Debug, Clone)]
pub struct FlattenedBlock {
    pub block_type: BlockType,
    pub raw_text: String,
    pub structured_payload: Option<serde_json::Value>,
}

impl ExtractedContent {
    /// Collapse the grouped response into the one block the page persists.
    ///
    /// Every segment joins the raw text in display order (tables, then
    /// algorithms, then prose); the block type is the highest kind present,
    /// TABLE over ALGORITHM over TEXT. Structured payloads ride along under
    /// their kind. `None` when the parse extracted nothing.
    pub fn flatten(self) -> Option<FlattenedBlock> {
        if self.is_empty() {
            return None;
        }

        let block_type = if !self.tables.is_empty() {
            BlockType::Table
        } else if !self.algorithms.is_empty() {
            BlockType::Algorithm
        } else {
            BlockType::Text
        };

        let mut segments = Vec::new();
        let mut tables = Vec::new();
        let mut algorithms = Vec::new();
        for item in self.tables {
            segments.push(item.text);
            tables.push(item.payload);
        }
        for item in self.algorithms {
            segments.push(item.text);
            algorithms.push(item.payload);
        }
        segments.extend(self.text_blocks);

        let structured_payload = if tables.is_empty() && algorithms.is_empty() {
            None
        } else {
            Some(serde_json::json!({
                "tables": tables,
                "algorithms": algorithms,
            }))
        };

        Some(FlattenedBlock {
            block_type,
            raw_text: segments.join("\n\n"),
            structured_payload,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.text_blocks.is_empty() && self.tables.is_empty() && self.algorithms.is_empty()
    }
}

/// Trait for vision/OCR providers
#[async_trait]
pub trait VisionParser: Send + Sync {
    /// Parse one page image. `content_type` is the admin-supplied hint that
    /// steers the provider's extraction prompt.
    async fn parse_page(
        &self,
        file_path: &str,
        file_type: &str,
        content_type: &str,
    ) -> Result<ParsedPage>;

    fn provider_name(&self) -> &str;
}

/// HTTP vision client
pub struct HttpVisionParser {
    client: reqwest::Client,
    provider: String,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    file_path: &'a str,
    file_type: &'a str,
    content_type: &'a str,
}

impl HttpVisionParser {
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

    async fn request_with_retry(&self, request: &ParseRequest<'_>) -> Result<ParsedPage> {
        let mut last_error = None;

        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                let delay = Duration::from_millis(200 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(request).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Vision request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::VisionError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, request: &ParseRequest<'_>) -> Result<ParsedPage> {
        let url = format!("{}/v1/parse", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::VisionError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VisionError {
                message: format!("API error {}: {}", status, body),
            });
        }

        response.json().await.map_err(|e| AppError::VisionError {
            message: format!("Failed to parse response: {}", e),
        })
    }
}

#[async_trait]
impl VisionParser for HttpVisionParser {
    async fn parse_page(
        &self,
        file_path: &str,
        file_type: &str,
        content_type: &str,
    ) -> Result<ParsedPage> {
        self.request_with_retry(&ParseRequest {
            file_path,
            file_type,
            content_type,
        })
        .await
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

/// Mock parser for testing: one text block, classified under a fixed lesson.
pub struct MockVisionParser;

#[async_trait]
impl VisionParser for MockVisionParser {
    async fn parse_page(
        &self,
        file_path: &str,
        _file_type: &str,
        content_type: &str,
    ) -> Result<ParsedPage> {
        Ok(ParsedPage {
            content: ExtractedContent {
                text_blocks: vec![format!("{} content from {}", content_type, file_path)],
                tables: vec![],
                algorithms: vec![],
            },
            classification: Some(Classification {
                lesson: "Mock Lesson".to_string(),
                topic: Some("Mock Topic".to_string()),
                subtopic: None,
            }),
        })
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

/// Create a vision parser for the named provider.
pub fn create_vision_parser(
    provider: &str,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
) -> Arc<dyn VisionParser> {
    match provider {
        "mock" => Arc::new(MockVisionParser),
        name => {
            let key = api_key.unwrap_or_default();
            let base = base_url.unwrap_or_else(|| "http://localhost:9400".to_string());
            Arc::new(HttpVisionParser::new(
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

    fn mixed_content() -> ExtractedContent {
        ExtractedContent {
            text_blocks: vec!["prose".to_string()],
            tables: vec![StructuredItem {
                text: "table".to_string(),
                payload: serde_json::json!({"rows": 2}),
            }],
            algorithms: vec![StructuredItem {
                text: "algo".to_string(),
                payload: serde_json::json!({"steps": 3}),
            }],
        }
    }

    #[test]
    fn mixed_content_flattens_to_one_table_block() {
        let block = mixed_content().flatten().unwrap();
        assert_eq!(block.block_type, BlockType::Table);

        let payload = block.structured_payload.unwrap();
        assert_eq!(payload["tables"].as_array().unwrap().len(), 1);
        assert_eq!(payload["algorithms"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn flatten_joins_every_segment_in_display_order() {
        let block = mixed_content().flatten().unwrap();
        assert_eq!(block.raw_text, "table\n\nalgo\n\nprose");
    }

    #[test]
    fn algorithms_outrank_text_when_no_table_exists() {
        let content = ExtractedContent {
            text_blocks: vec!["prose".to_string()],
            tables: vec![],
            algorithms: vec![StructuredItem {
                text: "algo".to_string(),
                payload: serde_json::json!({"steps": 3}),
            }],
        };

        let block = content.flatten().unwrap();
        assert_eq!(block.block_type, BlockType::Algorithm);
    }

    #[test]
    fn text_only_content_carries_no_payload() {
        let content = ExtractedContent {
            text_blocks: vec!["a".to_string(), "b".to_string()],
            tables: vec![],
            algorithms: vec![],
        };

        let block = content.flatten().unwrap();
        assert_eq!(block.block_type, BlockType::Text);
        assert_eq!(block.raw_text, "a\n\nb");
        assert!(block.structured_payload.is_none());
    }

    #[test]
    fn empty_content_flattens_to_nothing() {
        let content = ExtractedContent::default();
        assert!(content.is_empty());
        assert!(content.flatten().is_none());
    }

    #[tokio::test]
    async fn mock_parser_returns_classified_text() {
        let parser = MockVisionParser;
        let parsed = parser
            .parse_page("/tmp/page-0.png", "image/png", "textbook")
            .await
            .unwrap();
        assert_eq!(parsed.content.text_blocks.len(), 1);
        assert!(parsed.classification.is_some());
    }

    #[test]
    fn grouped_response_deserializes_with_missing_kinds() {
        let parsed: ParsedPage = serde_json::from_str(
            r#"{"content": {"text_blocks": ["a"]}, "classification": null}"#,
        )
        .unwrap();
        assert_eq!(parsed.content.text_blocks, vec!["a".to_string()]);
        assert!(parsed.content.tables.is_empty());
        assert!(parsed.classification.is_none());
    }
}
