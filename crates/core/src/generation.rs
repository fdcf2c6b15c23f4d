use crate::embeddings::api_url;
use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_ANSWER_TOKENS: usize = 200;

/// Retrieved passages plus the question, rendered into the text the generator sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundedPrompt {
    /// Nearest passage first.
    pub passages: Vec<String>,
    pub question: String,
}

impl GroundedPrompt {
    pub fn new(passages: Vec<String>, question: impl Into<String>) -> Self {
        Self {
            passages,
            question: question.into(),
        }
    }

    pub fn context(&self) -> String {
        self.passages.join("\n\n")
    }

    pub fn render(&self) -> String {
        format!(
            "You are an AI assistant for a PDF. Use ONLY the content below.\n\n\
             Relevant PDF Content:\n\
             ----------------------\n\
             {context}\n\n\
             Question:\n\
             {question}\n\n\
             Answer clearly and concisely.",
            context = self.context(),
            question = self.question.trim(),
        )
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produces at most roughly `max_tokens` tokens of answer text.
    async fn generate(&self, prompt: &GroundedPrompt, max_tokens: usize) -> Result<String, ModelError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Completions from an Ollama-compatible `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: Client,
    endpoint: Url,
    model: String,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self, ModelError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: api_url(base_url, "api/generate")?,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &GroundedPrompt, max_tokens: usize) -> Result<String, ModelError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&GenerateRequest {
                model: &self.model,
                prompt: prompt.render(),
                stream: false,
                options: GenerateOptions {
                    num_predict: max_tokens,
                },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ModelError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.response.trim().to_string())
    }
}

/// Answers with the context sentence sharing the most terms with the question.
///
/// Needs no model, so it works offline and always quotes the document.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveGenerator;

fn terms(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|term| term.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn sentences(passage: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut start = 0;
    let mut chars = passage.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        let boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if boundary || ch == '\n' {
            let end = index + ch.len_utf8();
            let sentence = passage[start..end].trim();
            if !sentence.is_empty() {
                found.push(sentence);
            }
            start = end;
        }
    }
    let tail = passage[start..].trim();
    if !tail.is_empty() {
        found.push(tail);
    }
    found
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    async fn generate(&self, prompt: &GroundedPrompt, max_tokens: usize) -> Result<String, ModelError> {
        let wanted = terms(&prompt.question);
        let mut best: Option<(&str, usize)> = None;

        for passage in &prompt.passages {
            for sentence in sentences(passage) {
                let overlap = terms(sentence).intersection(&wanted).count();
                if best.map_or(true, |(_, score)| overlap > score) {
                    best = Some((sentence, overlap));
                }
            }
        }

        let (sentence, _) = best.ok_or_else(|| ModelError::BackendResponse {
            backend: "extractive".to_string(),
            details: "prompt has no context to answer from".to_string(),
        })?;

        Ok(sentence
            .split_whitespace()
            .take(max_tokens.max(1))
            .collect::<Vec<_>>()
            .join(" "))
    }
}
