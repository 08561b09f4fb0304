//! Downstream LLM-backed services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },
    #[error("Unusable provider response: {0}")]
    InvalidResponse(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Failed to build services: {0}")]
    Build(String),
}

/// Single prompt sent to a raw LLM client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// System instruction.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    pub temperature: f32,
}

/// Raw credentialed LLM client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name, for logging and cache keys.
    fn provider(&self) -> &str;

    /// Model the client is bound to.
    fn model(&self) -> &str;

    /// Run one completion and return the text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError>;
}

/// Translation options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    pub target_language: String,
}

/// Translation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub original: String,
    /// Translated text, trimmed.
    pub translated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    pub target_language: String,
    pub provider: String,
    pub model: String,
}

/// Translates text.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        options: &TranslationOptions,
    ) -> Result<TranslationResult, ServiceError>;
}

/// Target difficulty of generated content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

/// Generation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    /// Number of sentences; ignored for articles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Language to write in; defaults to the configured target language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Shape of generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Sentences,
    Article,
}

/// Generated practice content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub format: ContentFormat,
    pub words: Vec<String>,
    /// Sentences, or paragraphs for an article.
    pub segments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Generates practice content around vocabulary words.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_sentences(
        &self,
        words: &[String],
        options: &GenerationOptions,
    ) -> Result<GeneratedContent, ServiceError>;

    async fn generate_article(
        &self,
        words: &[String],
        options: &GenerationOptions,
    ) -> Result<GeneratedContent, ServiceError>;
}
