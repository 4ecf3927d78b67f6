//! Embeddings from a local Ollama server over its `/api/embed` endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
};

pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    endpoint: String,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl OllamaEmbedder {
    /// `dimension` is the length the configured model produces; responses
    /// are checked against it by the caller.
    pub fn new(base_url: &str, model: &str, dimension: usize) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(DEFAULT_TIMEOUT))
            .build()
            .into();

        Self {
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post_with_retry(&self, body: &str) -> Result<String> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry_attempts {
            let result = self
                .agent
                .post(self.endpoint.as_str())
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string());

            let err = match result {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            let retryable = match &err {
                ureq::Error::StatusCode(status) => *status >= 500,
                ureq::Error::ConnectionFailed
                | ureq::Error::HostNotFound
                | ureq::Error::Timeout(_)
                | ureq::Error::Io(_) => true,
                _ => false,
            };
            if !retryable {
                return Err(Error::EmbeddingUnavailable(format!(
                    "{}: {err}",
                    self.endpoint
                )));
            }

            warn!(
                attempt,
                attempts = self.retry_attempts,
                "ollama request failed: {err}"
            );
            last_error = err.to_string();

            if attempt < self.retry_attempts {
                let delay = Duration::from_millis(
                    BACKOFF_BASE_MS * 2u64.pow(attempt - 1),
                );
                debug!(?delay, "waiting before retry");
                std::thread::sleep(delay);
            }
        }

        error!(endpoint = %self.endpoint, "all ollama attempts failed");
        Err(Error::EmbeddingUnavailable(format!(
            "{} after {} attempts: {last_error}",
            self.endpoint, self.retry_attempts
        )))
    }
}

impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })?;
        let text = self.post_with_retry(&body)?;
        let response: EmbedResponse =
            serde_json::from_str(&text).map_err(|e| {
                Error::EmbeddingUnavailable(format!(
                    "unexpected response from {}: {e}",
                    self.endpoint
                ))
            })?;

        debug!(
            model = %self.model,
            count = response.embeddings.len(),
            "ollama embeddings received"
        );
        Ok(response.embeddings)
    }
}
