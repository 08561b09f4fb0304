//! LLM-backed services and the bundle that keeps them together.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use lingo_relay_core::{
    ProviderSettings,
    services::{
        CompletionRequest, ContentFormat, ContentGenerator, Difficulty, GeneratedContent,
        GenerationOptions, LlmClient, ServiceError, TranslationOptions, TranslationResult,
        Translator,
    },
};

/// Raw client plus the services built on it, bound to one set of settings.
///
/// Either the whole bundle exists or none of it does.
pub struct ServiceBundle {
    settings: ProviderSettings,
    raw_client: Arc<dyn LlmClient>,
    translator: Arc<dyn Translator>,
    generator: Arc<dyn ContentGenerator>,
}

impl fmt::Debug for ServiceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBundle")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ServiceBundle {
    /// Assemble a bundle from already-built parts.
    #[must_use]
    pub fn new(
        settings: ProviderSettings,
        raw_client: Arc<dyn LlmClient>,
        translator: Arc<dyn Translator>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        Self {
            settings,
            raw_client,
            translator,
            generator,
        }
    }

    /// Bundle whose translator and generator prompt `client`.
    #[must_use]
    pub fn from_client(settings: ProviderSettings, client: Arc<dyn LlmClient>) -> Self {
        let translator = Arc::new(LlmTranslator::new(Arc::clone(&client)));
        let generator = Arc::new(LlmContentGenerator::new(Arc::clone(&client)));
        Self::new(settings, client, translator, generator)
    }

    /// Settings the bundle was built from.
    #[must_use]
    pub const fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Client the services prompt.
    #[must_use]
    pub fn raw_client(&self) -> &Arc<dyn LlmClient> {
        &self.raw_client
    }

    /// Translation service.
    #[must_use]
    pub fn translator(&self) -> &Arc<dyn Translator> {
        &self.translator
    }

    /// Sentence and article generation service.
    #[must_use]
    pub fn generator(&self) -> &Arc<dyn ContentGenerator> {
        &self.generator
    }
}

/// Builds service bundles from provider settings.
pub trait ServiceFactory: Send + Sync {
    /// Build a fresh bundle.
    ///
    /// # Errors
    /// Returns error if the settings cannot produce a working client.
    fn build(&self, settings: &ProviderSettings) -> Result<ServiceBundle, ServiceError>;
}

/// Factory that only knows how to make a raw client; the rest of the bundle
/// is layered on top with [`ServiceBundle::from_client`].
pub struct LlmServiceFactory<F> {
    make_client: F,
}

impl<F> LlmServiceFactory<F>
where
    F: Fn(&ProviderSettings) -> Result<Arc<dyn LlmClient>, ServiceError> + Send + Sync,
{
    #[must_use]
    pub const fn new(make_client: F) -> Self {
        Self { make_client }
    }
}

impl<F> ServiceFactory for LlmServiceFactory<F>
where
    F: Fn(&ProviderSettings) -> Result<Arc<dyn LlmClient>, ServiceError> + Send + Sync,
{
    fn build(&self, settings: &ProviderSettings) -> Result<ServiceBundle, ServiceError> {
        let client = (self.make_client)(settings)?;
        tracing::debug!(provider = %settings.provider, model = %settings.model, "service bundle built");
        Ok(ServiceBundle::from_client(settings.clone(), client))
    }
}

/// Translator prompting a raw LLM client.
pub struct LlmTranslator {
    client: Arc<dyn LlmClient>,
}

impl LlmTranslator {
    /// Translator prompting `client`.
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(
        &self,
        text: &str,
        options: &TranslationOptions,
    ) -> Result<TranslationResult, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("nothing to translate".to_string()));
        }

        let source = options
            .source_language
            .as_deref()
            .unwrap_or("the detected language");
        let request = CompletionRequest {
            system: format!(
                "Translate the user's text from {source} to {}. Reply with the translation only.",
                options.target_language
            ),
            prompt: text.to_string(),
            temperature: 0.2,
        };

        let translated = self.client.complete(request).await?.trim().to_string();
        if translated.is_empty() {
            return Err(ServiceError::InvalidResponse("empty translation".to_string()));
        }

        Ok(TranslationResult {
            original: text.to_string(),
            translated,
            source_language: options.source_language.clone(),
            target_language: options.target_language.clone(),
            provider: self.client.provider().to_string(),
            model: self.client.model().to_string(),
        })
    }
}

/// Content generator prompting a raw LLM client.
pub struct LlmContentGenerator {
    client: Arc<dyn LlmClient>,
}

impl LlmContentGenerator {
    /// Sentences requested when the caller does not say.
    pub const DEFAULT_SENTENCE_COUNT: u32 = 5;

    /// Generator prompting `client`.
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

const fn difficulty_label(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Beginner => "beginner-level",
        Difficulty::Intermediate => "intermediate-level",
        Difficulty::Advanced => "advanced",
    }
}

fn check_words(words: &[String]) -> Result<(), ServiceError> {
    if words.iter().all(|w| w.trim().is_empty()) {
        return Err(ServiceError::InvalidInput("no words given".to_string()));
    }
    Ok(())
}

/// Strip list markers such as `1.`, `2)` or `-` from a generated line.
fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    let unnumbered = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let unmarked = if unnumbered.len() < line.len() && unnumbered.starts_with(['.', ')']) {
        &unnumbered[1..]
    } else if unnumbered.len() < line.len() {
        line
    } else {
        line.trim_start_matches(['-', '*', '•'])
    };
    unmarked.trim()
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate_sentences(
        &self,
        words: &[String],
        options: &GenerationOptions,
    ) -> Result<GeneratedContent, ServiceError> {
        check_words(words)?;
        let count = options.count.unwrap_or(Self::DEFAULT_SENTENCE_COUNT).max(1);
        let language = options.language.as_deref().unwrap_or("English");

        let request = CompletionRequest {
            system: format!(
                "Write {count} {} example sentences in {language}. One sentence per line, no commentary.",
                difficulty_label(options.difficulty)
            ),
            prompt: format!("Use these words: {}", words.join(", ")),
            temperature: 0.7,
        };
        let text = self.client.complete(request).await?;

        let segments: Vec<String> = text
            .lines()
            .map(strip_marker)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            return Err(ServiceError::InvalidResponse("no sentences generated".to_string()));
        }

        Ok(GeneratedContent {
            format: ContentFormat::Sentences,
            words: words.to_vec(),
            segments,
            title: None,
        })
    }

    async fn generate_article(
        &self,
        words: &[String],
        options: &GenerationOptions,
    ) -> Result<GeneratedContent, ServiceError> {
        check_words(words)?;
        let language = options.language.as_deref().unwrap_or("English");

        let request = CompletionRequest {
            system: format!(
                "Write a short {} article in {language}. Put the title on the first line, then paragraphs separated by blank lines.",
                difficulty_label(options.difficulty)
            ),
            prompt: format!("Use these words: {}", words.join(", ")),
            temperature: 0.7,
        };
        let text = self.client.complete(request).await?;

        let mut blocks = text
            .split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty());
        let first = blocks
            .next()
            .ok_or_else(|| ServiceError::InvalidResponse("empty article".to_string()))?;

        // The title may share a block with the first paragraph.
        let (title, rest) = first.split_once('\n').unwrap_or((first, ""));
        let title = title.trim().trim_start_matches('#').trim().to_string();
        let segments: Vec<String> = std::iter::once(rest.trim())
            .chain(blocks)
            .filter(|block| !block.is_empty())
            .map(str::to_string)
            .collect();

        Ok(GeneratedContent {
            format: ContentFormat::Article,
            words: words.to_vec(),
            segments,
            title: Some(title),
        })
    }
}
