//! OpenAI-compatible batch embedding client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyloom_core::embedding::Embedder;
use storyloom_core::error::EmbeddingError;
use tracing::{debug, warn};

/// Calls `POST {base}/embeddings` on any OpenAI-compatible endpoint.
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, EmbeddingError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured("missing embedding API key".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client,
        })
    }

    /// Put each returned vector at its input position.
    ///
    /// Entries with an out-of-range index are dropped; any input left
    /// without a vector fails the whole batch.
    fn place_by_index(
        data: Vec<EmbeddingData>,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
        for item in data {
            match slots.get_mut(item.index) {
                Some(slot) => *slot = Some(item.embedding),
                None => warn!(index = item.index, expected, "Dropping out-of-range embedding"),
            }
        }

        let received = slots.iter().filter(|s| s.is_some()).count();
        if received != expected {
            return Err(EmbeddingError::Incomplete { expected, received });
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        debug!(model = %self.model, inputs = texts.len(), "Requesting embeddings");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status_code: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        Self::place_by_index(parsed.data, texts.len())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, v: f32) -> EmbeddingData {
        EmbeddingData {
            index,
            embedding: vec![v],
        }
    }

    #[test]
    fn vectors_are_reordered_by_index() {
        let placed = OpenAiEmbedder::place_by_index(vec![item(1, 2.0), item(0, 1.0)], 2).unwrap();
        assert_eq!(placed, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn missing_position_is_an_error() {
        let err = OpenAiEmbedder::place_by_index(vec![item(0, 1.0)], 2).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Incomplete {
                expected: 2,
                received: 1
            }
        ));
    }

    #[test]
    fn out_of_range_index_is_dropped() {
        let err = OpenAiEmbedder::place_by_index(vec![item(0, 1.0), item(5, 9.0)], 2).unwrap_err();
        assert!(matches!(err, EmbeddingError::Incomplete { received: 1, .. }));

        let ok = OpenAiEmbedder::place_by_index(vec![item(0, 1.0), item(7, 9.0)], 1).unwrap();
        assert_eq!(ok, vec![vec![1.0]]);
    }

    #[test]
    fn response_decodes_openai_shape() {
        let json = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn blank_key_is_rejected() {
        let result = OpenAiEmbedder::new("https://api.openai.com/v1", " ", "m", 5);
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let embedder = OpenAiEmbedder::new("http://127.0.0.1:1", "k", "m", 1).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
        assert_eq!(embedder.model(), "m");
    }
}
