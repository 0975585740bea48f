//! Model service client.
//!
//! The [`ModelClient`] trait decouples the pipeline from the actual
//! generation backend. Errors are classified structurally at this boundary;
//! the pipeline never pattern-matches provider message text to decide whether
//! to retry.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::conversation::{Role, Turn};
use crate::io::config::ModelConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Classified model-service failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Quota or throughput exhaustion; retry with a growing wait.
    RateLimited { reason: String },
    /// Network or server-side trouble; retry with a short fixed wait.
    Transient { reason: String },
    /// Bad credential or request; retrying cannot help.
    Fatal { reason: String },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::RateLimited { reason } => write!(f, "rate limited: {reason}"),
            ModelError::Transient { reason } => write!(f, "transient service error: {reason}"),
            ModelError::Fatal { reason } => write!(f, "fatal service error: {reason}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// Abstraction over the generation backend.
pub trait ModelClient {
    /// Send the ordered conversation and return the responder's text.
    ///
    /// A well-formed but empty reply is `Ok` with an empty string, not an
    /// error.
    fn generate(&self, turns: &[Turn]) -> Result<String, ModelError>;
}

/// Client for the Gemini `generateContent` surface.
pub struct GeminiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: config.name.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

impl ModelClient for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model, turns = turns.len()))]
    fn generate(&self, turns: &[Turn]) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest::from_turns(turns, self.temperature, self.max_output_tokens);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(classify_request_error)?;

        let status = response.status().as_u16();
        let text = response.text().map_err(classify_request_error)?;
        if !(200..300).contains(&status) {
            return Err(classify_status(status, &text));
        }

        // A reply we cannot parse carries no artifacts; treat it like an
        // empty reply rather than failing the stage.
        match serde_json::from_str::<GenerateResponse>(&text) {
            Ok(parsed) => {
                let reply = parsed.first_candidate_text();
                debug!(chars = reply.len(), "model reply received");
                Ok(reply)
            }
            Err(err) => {
                warn!(err = %err, "malformed model response, treating as empty");
                Ok(String::new())
            }
        }
    }
}

fn classify_request_error(err: reqwest::Error) -> ModelError {
    ModelError::Transient {
        reason: err.to_string(),
    }
}

/// Map an HTTP status (plus a body snippet for the reason) to an error kind.
pub fn classify_status(status: u16, body: &str) -> ModelError {
    let reason = format!("HTTP {status}: {}", snippet(body, 200));
    match status {
        429 => ModelError::RateLimited { reason },
        408 => ModelError::Transient { reason },
        400..=499 => ModelError::Fatal { reason },
        _ => ModelError::Transient { reason },
    }
}

fn snippet(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

impl<'a> GenerateRequest<'a> {
    fn from_turns(turns: &'a [Turn], temperature: f64, max_output_tokens: u32) -> Self {
        let contents = turns
            .iter()
            .map(|turn| Content {
                role: wire_role(turn.role),
                parts: vec![Part { text: &turn.text }],
            })
            .collect();
        Self {
            contents,
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens,
            },
        }
    }
}

/// The engine's roles mapped to the provider's vocabulary.
fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Initiator => "user",
        Role::Responder => "model",
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn first_candidate_text(&self) -> String {
        let Some(content) = self.candidates.first().and_then(|c| c.content.as_ref()) else {
            return String::new();
        };
        content
            .parts
            .iter()
            .map(|part| part.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        let err = classify_status(429, "quota exceeded");
        assert!(matches!(err, ModelError::RateLimited { .. }));
    }

    #[test]
    fn classifies_client_errors_as_fatal() {
        assert!(matches!(
            classify_status(401, "bad key"),
            ModelError::Fatal { .. }
        ));
        assert!(matches!(
            classify_status(404, "no such model"),
            ModelError::Fatal { .. }
        ));
        assert!(matches!(
            classify_status(400, "bad request"),
            ModelError::Fatal { .. }
        ));
    }

    #[test]
    fn classifies_server_errors_and_timeouts_as_transient() {
        assert!(matches!(
            classify_status(500, "oops"),
            ModelError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(503, "overloaded"),
            ModelError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(408, "slow"),
            ModelError::Transient { .. }
        ));
    }

    #[test]
    fn request_body_maps_roles_to_wire_vocabulary() {
        let turns = vec![Turn::initiator("hello"), Turn::responder("hi")];
        let request = GenerateRequest::from_turns(&turns, 0.7, 1024);
        let value = serde_json::to_value(&request).expect("serialize");

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn empty_candidates_yield_empty_text() {
        let parsed: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).expect("parse");
        assert_eq!(parsed.first_candidate_text(), "");
        let parsed: GenerateResponse = serde_json::from_str("{}").expect("parse");
        assert_eq!(parsed.first_candidate_text(), "");
    }

    #[test]
    fn candidate_parts_are_joined() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.first_candidate_text(), "ab");
    }
}
