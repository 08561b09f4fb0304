//! Background coordinator.
//!
//! Owns the live [`ServiceBundle`] and keeps it consistent with the stored
//! configuration. Handlers never hold on to a bundle: every operation asks
//! [`Coordinator::services`] for the current one right before using it.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use futures::StreamExt;
use lingo_relay_core::{
    Config, ConfigPatch, ConfigStore, MessageKind, ProviderSettings, RelayError, Request,
    Response, Tuning, VocabularyStore,
    message::{GenerateRequest, TranslateRequest, VocabularyInput, VocabularyRemoval},
    services::{ContentFormat, GeneratedContent, TranslationOptions, TranslationResult},
    traits::VocabularyEntry,
};
use lingo_relay_router::{Handler, Router};
use lingo_relay_throttle::{CacheStats, DebounceQueue, ExecuteOptions, RetryPolicy, TtlCache};
use serde::Serialize;
use serde_json::json;
use tokio::{sync::RwLock, task::JoinHandle};

use crate::{ServiceBundle, ServiceFactory, handler::CoordinatorHandler};

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    /// Not started yet, or suspended. The next operation initializes lazily.
    Uninitialized,
    /// Configuration has no usable credential; no services exist.
    NoCredentials,
    /// A service bundle built from the current settings is live.
    ServicesActive,
    /// Cleaned up. [`Coordinator::initialize`] starts it again.
    Terminated,
}

impl CoordinatorState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::NoCredentials => "NO_CREDENTIALS",
            Self::ServicesActive => "SERVICES_ACTIVE",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// First install or update: persist the default configuration.
    Installed,
    /// Host started: initialize and follow configuration changes.
    Startup,
    /// Host is about to suspend: release services.
    Suspend,
}

/// Snapshot reported by `get-stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub state: CoordinatorState,
    /// Translation cache counters.
    pub translation_cache: CacheStats,
    pub cache_hit_rate: f64,
    pub cache_error_rate: f64,
    /// Generation kinds waiting out their quiet period.
    pub pending_generations: Vec<String>,
    /// Outbound requests of this context still in flight.
    pub pending_requests: usize,
}

struct Inner {
    state: CoordinatorState,
    bundle: Option<Arc<ServiceBundle>>,
}

/// Lifecycle state machine for the background context.
pub struct Coordinator {
    me: Weak<Self>,
    router: Arc<Router>,
    config: Arc<dyn ConfigStore>,
    vocabulary: Arc<dyn VocabularyStore>,
    factory: Arc<dyn ServiceFactory>,
    inner: RwLock<Inner>,
    translations: TtlCache<TranslationResult>,
    generations: DebounceQueue<GeneratedContent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

fn execute_options(tuning: &Tuning) -> ExecuteOptions {
    ExecuteOptions {
        ttl: tuning.cache_ttl(),
        retry: RetryPolicy::new(tuning.retries),
    }
}

fn translation_key(text: &str, options: &TranslationOptions, settings: &ProviderSettings) -> String {
    format!(
        "{}|{}|{}|{}|{text}",
        settings.provider,
        settings.model,
        options.source_language.as_deref().unwrap_or("auto"),
        options.target_language,
    )
}

impl Coordinator {
    /// Create a coordinator for the context served by `router`.
    ///
    /// Cache capacity and the debounce quiet period are taken from `tuning`;
    /// TTL and retries follow the live configuration on every call.
    #[must_use]
    pub fn new(
        router: Arc<Router>,
        config: Arc<dyn ConfigStore>,
        vocabulary: Arc<dyn VocabularyStore>,
        factory: Arc<dyn ServiceFactory>,
        tuning: Tuning,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            router,
            config,
            vocabulary,
            factory,
            inner: RwLock::new(Inner {
                state: CoordinatorState::Uninitialized,
                bundle: None,
            }),
            translations: TtlCache::new(tuning.cache_capacity, execute_options(&tuning)),
            generations: DebounceQueue::new(tuning.debounce()),
            watcher: Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CoordinatorState {
        self.inner.read().await.state
    }

    /// Router of the context this coordinator serves.
    #[must_use]
    pub const fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Move to `state`. Once terminated, only [`Coordinator::initialize`]
    /// leaves `Terminated`; any other transition is dropped.
    ///
    /// Returns the state actually in effect.
    async fn transition(
        &self,
        state: CoordinatorState,
        bundle: Option<Arc<ServiceBundle>>,
    ) -> CoordinatorState {
        let mut inner = self.inner.write().await;
        if inner.state == CoordinatorState::Terminated && state != CoordinatorState::Terminated {
            tracing::debug!(to = %state, "transition dropped after cleanup");
            return CoordinatorState::Terminated;
        }
        if inner.state != state {
            tracing::info!(from = %inner.state, to = %state, "coordinator state changed");
        }
        inner.state = state;
        inner.bundle = bundle;
        state
    }

    /// Build services for `config`, or drop them if it has no credential.
    async fn load(&self, config: &Config) -> Result<CoordinatorState, RelayError> {
        let Some(settings) = config.provider_settings() else {
            return Ok(self.transition(CoordinatorState::NoCredentials, None).await);
        };
        match self.factory.build(&settings) {
            Ok(bundle) => Ok(self
                .transition(CoordinatorState::ServicesActive, Some(Arc::new(bundle)))
                .await),
            Err(e) => {
                self.transition(CoordinatorState::NoCredentials, None).await;
                Err(e.into())
            }
        }
    }

    /// Load configuration and build services if a credential is present.
    ///
    /// A configuration that cannot be loaded is treated as having no
    /// credential.
    ///
    /// # Errors
    /// Returns error if the credential is present but services cannot be
    /// built. The coordinator is left in `NoCredentials`.
    pub async fn initialize(&self) -> Result<CoordinatorState, RelayError> {
        {
            let mut inner = self.inner.write().await;
            if inner.state == CoordinatorState::Terminated {
                tracing::info!("restarting coordinator after cleanup");
                inner.state = CoordinatorState::Uninitialized;
            }
        }
        match self.config.get().await {
            Ok(config) => self.load(&config).await,
            Err(e) => {
                tracing::warn!("Failed to load configuration, continuing without services: {e}");
                Ok(self.transition(CoordinatorState::NoCredentials, None).await)
            }
        }
    }

    /// React to a configuration change.
    ///
    /// Always rebuilds when a credential is present, even if the provider
    /// settings look unchanged. Cached translations are discarded.
    pub async fn on_config_changed(&self) -> CoordinatorState {
        if self.state().await == CoordinatorState::Terminated {
            tracing::debug!("configuration change ignored after cleanup");
            return CoordinatorState::Terminated;
        }
        self.translations.clear();

        let loaded = match self.config.get().await {
            Ok(config) => self.load(&config).await,
            Err(e) => Err(e.into()),
        };
        match loaded {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Failed to apply configuration change: {e}");
                self.transition(CoordinatorState::NoCredentials, None).await
            }
        }
    }

    /// Follow configuration changes in the background.
    ///
    /// Replaces any previous watcher. Must be called from within a tokio
    /// runtime.
    pub fn watch_config(&self) {
        let mut changes = self.config.subscribe();
        let me = self.me.clone();
        let task = tokio::spawn(async move {
            while changes.next().await.is_some() {
                let Some(coordinator) = me.upgrade() else {
                    break;
                };
                coordinator.on_config_changed().await;
            }
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_watching(&self) {
        let task = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Live configuration and service bundle.
    async fn live(&self) -> Result<(Config, Arc<ServiceBundle>), RelayError> {
        let terminated = || RelayError::not_configured("coordinator has been cleaned up");

        let config = match self.config.get().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load configuration, dropping services: {e}");
                return match self.transition(CoordinatorState::NoCredentials, None).await {
                    CoordinatorState::Terminated => Err(terminated()),
                    _ => Err(RelayError::not_configured(format!(
                        "configuration unavailable: {e}"
                    ))),
                };
            }
        };
        let Some(settings) = config.provider_settings() else {
            return match self.transition(CoordinatorState::NoCredentials, None).await {
                CoordinatorState::Terminated => Err(terminated()),
                _ => Err(RelayError::not_configured("no API key configured")),
            };
        };

        {
            let inner = self.inner.read().await;
            if inner.state == CoordinatorState::Terminated {
                return Err(terminated());
            }
            if let Some(bundle) = inner.bundle.as_ref().filter(|b| b.settings() == &settings) {
                return Ok((config, Arc::clone(bundle)));
            }
        }

        let mut inner = self.inner.write().await;
        if inner.state == CoordinatorState::Terminated {
            return Err(terminated());
        }
        // Another caller may have rebuilt while we waited for the lock.
        if let Some(bundle) = inner.bundle.as_ref().filter(|b| b.settings() == &settings) {
            return Ok((config, Arc::clone(bundle)));
        }

        if inner.bundle.is_some() {
            tracing::info!("Provider settings changed, rebuilding services");
        }
        match self.factory.build(&settings) {
            Ok(bundle) => {
                let bundle = Arc::new(bundle);
                inner.bundle = Some(Arc::clone(&bundle));
                inner.state = CoordinatorState::ServicesActive;
                Ok((config, bundle))
            }
            Err(e) => {
                inner.bundle = None;
                inner.state = CoordinatorState::NoCredentials;
                Err(e.into())
            }
        }
    }

    /// Current service bundle, rebuilt first if it no longer matches the
    /// stored configuration.
    ///
    /// # Errors
    /// Returns `NotConfigured` without a credential, or the build error.
    pub async fn services(&self) -> Result<Arc<ServiceBundle>, RelayError> {
        self.live().await.map(|(_, bundle)| bundle)
    }

    /// Translate text, served from cache when possible.
    ///
    /// # Errors
    /// Returns `NotConfigured` without services, a validation error for blank
    /// text, or the translator's error once retries are exhausted.
    pub async fn translate(&self, request: TranslateRequest) -> Result<TranslationResult, RelayError> {
        if request.text.trim().is_empty() {
            return Err(RelayError::validation("text must not be empty"));
        }
        let (config, bundle) = self.live().await?;

        let options = TranslationOptions {
            source_language: request.source_language,
            target_language: request
                .target_language
                .unwrap_or_else(|| config.target_language.clone()),
        };
        let text = request.text;
        let key = translation_key(&text, &options, bundle.settings());
        let translator = bundle.translator();

        let result = self
            .translations
            .execute(
                &key,
                || translator.translate(&text, &options),
                execute_options(&config.tuning),
            )
            .await?;
        Ok(result)
    }

    /// Generate example sentences. Bursts collapse onto the latest call.
    ///
    /// # Errors
    /// Returns `Superseded` if a newer call replaced this one, otherwise as
    /// [`Coordinator::translate`].
    pub async fn generate_sentences(
        &self,
        request: GenerateRequest,
    ) -> Result<GeneratedContent, RelayError> {
        self.generate(ContentFormat::Sentences, request).await
    }

    /// Generate a short article. Bursts collapse onto the latest call.
    ///
    /// # Errors
    /// See [`Coordinator::generate_sentences`].
    pub async fn generate_article(
        &self,
        request: GenerateRequest,
    ) -> Result<GeneratedContent, RelayError> {
        self.generate(ContentFormat::Article, request).await
    }

    async fn generate(
        &self,
        format: ContentFormat,
        request: GenerateRequest,
    ) -> Result<GeneratedContent, RelayError> {
        if request.words.iter().all(|w| w.trim().is_empty()) {
            return Err(RelayError::validation("at least one word is required"));
        }
        let kind = match format {
            ContentFormat::Sentences => MessageKind::GenerateSentences,
            ContentFormat::Article => MessageKind::GenerateArticle,
        };

        let me = self.me.clone();
        let job = async move {
            let coordinator = me
                .upgrade()
                .ok_or_else(|| RelayError::not_configured("coordinator has been dropped"))?;
            // Services are fetched when the job runs, not when it was queued.
            let (config, bundle) = coordinator.live().await?;

            let mut options = request.options;
            if options.language.is_none() {
                options.language = Some(config.target_language);
            }
            let generator = bundle.generator();
            let content = match format {
                ContentFormat::Sentences => {
                    generator.generate_sentences(&request.words, &options).await?
                }
                ContentFormat::Article => generator.generate_article(&request.words, &options).await?,
            };
            Ok::<_, RelayError>(content)
        };

        self.generations.schedule(kind.as_str(), job).await
    }

    async fn language_or_default(&self, language: Option<String>) -> Result<String, RelayError> {
        match language {
            Some(language) => Ok(language),
            None => Ok(self.config.get().await?.target_language),
        }
    }

    /// Save a vocabulary word, updating it if already saved.
    ///
    /// # Errors
    /// Returns a validation error for a blank word or translation, or the
    /// storage error.
    pub async fn add_word(&self, input: VocabularyInput) -> Result<VocabularyEntry, RelayError> {
        if input.word.trim().is_empty() || input.translation.trim().is_empty() {
            return Err(RelayError::validation("word and translation are required"));
        }
        let language = self.language_or_default(input.language.clone()).await?;
        Ok(self.vocabulary.add(input, &language).await?)
    }

    /// Remove a vocabulary word.
    ///
    /// # Errors
    /// Returns a storage error if the word is not saved.
    pub async fn remove_word(&self, removal: VocabularyRemoval) -> Result<VocabularyEntry, RelayError> {
        let language = self.language_or_default(removal.language).await?;
        Ok(self.vocabulary.remove(&removal.word, &language).await?)
    }

    /// Saved vocabulary, most recent first.
    ///
    /// # Errors
    /// Returns the storage error.
    pub async fn vocabulary(&self) -> Result<Vec<VocabularyEntry>, RelayError> {
        Ok(self.vocabulary.list().await?)
    }

    /// Snapshot of state, cache counters and in-flight work.
    pub async fn stats(&self) -> CoordinatorStats {
        let cache = self.translations.stats();
        CoordinatorStats {
            state: self.state().await,
            translation_cache: cache,
            cache_hit_rate: cache.hit_rate(),
            cache_error_rate: cache.error_rate(),
            pending_generations: self.generations.pending_keys(),
            pending_requests: self.router.pending_count(),
        }
    }

    /// Install the coordinator's handler for every message kind.
    ///
    /// # Errors
    /// Returns `DuplicateHandler` if another handler already owns a kind.
    /// Nothing stays registered on failure.
    pub fn register_handlers(&self) -> Result<(), RelayError> {
        let handler: Arc<dyn Handler> = Arc::new(CoordinatorHandler::new(self.me.clone()));
        for (installed, kind) in MessageKind::ALL.into_iter().enumerate() {
            if let Err(e) = self.router.register(kind, Arc::clone(&handler)) {
                for added in &MessageKind::ALL[..installed] {
                    self.router.unregister(*added);
                }
                return Err(e);
            }
        }
        tracing::info!(count = MessageKind::ALL.len(), "coordinator handlers registered");
        Ok(())
    }

    /// Serve one request.
    ///
    /// # Errors
    /// Returns the operation's error; the router turns it into an error
    /// response with the matching code.
    pub async fn handle(&self, request: Request) -> Result<Response, RelayError> {
        match request {
            Request::Ping => Ok(Response::success(json!({
                "pong": true,
                "context": self.router.context(),
                "state": self.state().await,
            }))),
            Request::GetConfig => Response::json(&self.config.get().await?.redacted()),
            Request::UpdateConfig(patch) => {
                let config = self.config.set(patch).await?;
                let state = self.on_config_changed().await;
                Ok(Response::success_with_message(
                    json!({ "config": config.redacted(), "state": state }),
                    "configuration updated",
                ))
            }
            Request::TranslateText(request) => Response::json(&self.translate(request).await?),
            Request::AddToVocabulary(input) => Response::json(&self.add_word(input).await?),
            Request::RemoveFromVocabulary(removal) => {
                Response::json(&self.remove_word(removal).await?)
            }
            Request::GetVocabulary => Response::json(&self.vocabulary().await?),
            Request::GenerateSentences(request) => {
                Response::json(&self.generate_sentences(request).await?)
            }
            Request::GenerateArticle(request) => {
                Response::json(&self.generate_article(request).await?)
            }
            Request::GetStats => Response::json(&self.stats().await),
        }
    }

    /// Dispatch a host lifecycle event.
    ///
    /// # Errors
    /// Returns the configuration or build error of the step that failed.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) -> Result<CoordinatorState, RelayError> {
        tracing::info!(?event, "lifecycle event");
        match event {
            LifecycleEvent::Installed => {
                // An empty patch stores whatever is current, defaults included.
                self.config.set(ConfigPatch::default()).await?;
                Ok(self.state().await)
            }
            LifecycleEvent::Startup => {
                self.watch_config();
                self.initialize().await
            }
            LifecycleEvent::Suspend => {
                self.stop_watching();
                self.generations.cancel_all();
                Ok(self.transition(CoordinatorState::Uninitialized, None).await)
            }
        }
    }

    /// Tear down: unregister handlers, stop watching, release services.
    pub async fn cleanup(&self) {
        let handlers = self.router.clear_handlers();
        self.stop_watching();
        let cancelled = self.generations.cancel_all();
        self.translations.clear();
        self.transition(CoordinatorState::Terminated, None).await;
        tracing::info!(handlers, cancelled, "coordinator cleaned up");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use lingo_relay_core::{
        ContextId, ErrorCode,
        services::{CompletionRequest, GenerationOptions, LlmClient, ServiceError},
        traits::{ChannelTransport, ConfigChanges, ConfigError, TransportError},
    };
    use serde_json::Value;

    use super::*;
    use crate::{
        LlmServiceFactory,
        storage::{MemoryConfigStore, MemoryVocabularyStore},
    };

    struct Nowhere;

    #[async_trait]
    impl ChannelTransport for Nowhere {
        async fn deliver(
            &self,
            _message: Value,
            _destination: Option<ContextId>,
        ) -> Result<Value, TransportError> {
            Err(TransportError::Closed)
        }
    }

    /// Answers every prompt with `[model] prompt`.
    struct Echo {
        model: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmClient for Echo {
        fn provider(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            &self.model
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("[{}] {}", self.model, request.prompt))
        }
    }

    /// Memory store whose reads can be made to fail.
    struct Flaky {
        store: MemoryConfigStore,
        failing: AtomicBool,
    }

    impl Flaky {
        fn fail(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }

        fn is_saved(&self) -> bool {
            self.store.is_saved()
        }
    }

    #[async_trait]
    impl ConfigStore for Flaky {
        async fn get(&self) -> Result<Config, ConfigError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ConfigError::Unavailable("storage offline".into()));
            }
            self.store.get().await
        }

        async fn set(&self, patch: ConfigPatch) -> Result<Config, ConfigError> {
            self.store.set(patch).await
        }

        fn subscribe(&self) -> ConfigChanges {
            self.store.subscribe()
        }
    }

    struct Harness {
        coordinator: Arc<Coordinator>,
        router: Arc<Router>,
        config: Arc<Flaky>,
        builds: Arc<AtomicUsize>,
        completions: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(store: MemoryConfigStore, fail_builds: bool) -> Self {
            let router = Arc::new(Router::new(ContextId::Coordinator, Arc::new(Nowhere)));
            let config = Arc::new(Flaky {
                store,
                failing: AtomicBool::new(false),
            });
            let builds = Arc::new(AtomicUsize::new(0));
            let completions = Arc::new(AtomicUsize::new(0));

            let (built, calls) = (Arc::clone(&builds), Arc::clone(&completions));
            let factory = LlmServiceFactory::new(move |settings: &ProviderSettings| {
                built.fetch_add(1, Ordering::SeqCst);
                if fail_builds {
                    return Err(ServiceError::Build("unreachable endpoint".into()));
                }
                Ok(Arc::new(Echo {
                    model: settings.model.clone(),
                    calls: Arc::clone(&calls),
                }) as Arc<dyn LlmClient>)
            });

            let coordinator = Coordinator::new(
                Arc::clone(&router),
                config.clone(),
                Arc::new(MemoryVocabularyStore::new()),
                Arc::new(factory),
                Tuning::default(),
            );
            Self {
                coordinator,
                router,
                config,
                builds,
                completions,
            }
        }

        fn unconfigured() -> Self {
            Self::new(MemoryConfigStore::new(), false)
        }

        fn configured() -> Self {
            Self::new(MemoryConfigStore::with_config(keyed()), false)
        }

        fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }

        fn completions(&self) -> usize {
            self.completions.load(Ordering::SeqCst)
        }
    }

    fn keyed() -> Config {
        Config {
            api_key: Some("sk-test".into()),
            ..Config::default()
        }
    }

    fn text(text: &str) -> TranslateRequest {
        TranslateRequest {
            text: text.to_string(),
            source_language: None,
            target_language: None,
        }
    }

    fn words(list: &[&str]) -> GenerateRequest {
        GenerateRequest {
            words: list.iter().map(|w| (*w).to_string()).collect(),
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_starts_without_credentials() {
        let h = Harness::unconfigured();
        assert_eq!(h.coordinator.state().await, CoordinatorState::Uninitialized);
        assert_eq!(
            h.coordinator.initialize().await.unwrap(),
            CoordinatorState::NoCredentials
        );

        let err = h.coordinator.translate(text("Hallo")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConfigured);
        assert_eq!(h.builds(), 0);
    }

    #[tokio::test]
    async fn test_update_config_activates_services() {
        let h = Harness::unconfigured();
        h.coordinator.initialize().await.unwrap();

        let response = h
            .coordinator
            .handle(Request::UpdateConfig(ConfigPatch::api_key("sk-1")))
            .await
            .unwrap();
        let data = response.into_result().unwrap();
        assert_eq!(data["state"], "SERVICES_ACTIVE");
        assert_eq!(data["config"]["apiKey"], "********");
        assert_eq!(h.coordinator.state().await, CoordinatorState::ServicesActive);

        let result = h.coordinator.translate(text("Hallo")).await.unwrap();
        assert_eq!(result.translated, "[gpt-4o-mini] Hallo");
        assert_eq!(result.target_language, "en");
    }

    #[tokio::test]
    async fn test_removing_key_drops_services() {
        let h = Harness::configured();
        assert_eq!(
            h.coordinator.initialize().await.unwrap(),
            CoordinatorState::ServicesActive
        );

        h.config.set(ConfigPatch::api_key("")).await.unwrap();
        assert_eq!(
            h.coordinator.on_config_changed().await,
            CoordinatorState::NoCredentials
        );

        let err = h.coordinator.services().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConfigured);
        let err = h.coordinator.translate(text("Hallo")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConfigured);
    }

    #[tokio::test]
    async fn test_config_load_failure_degrades_to_no_credentials() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();
        h.config.fail();

        let err = h.coordinator.translate(text("Hallo")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConfigured);
        assert_eq!(h.coordinator.state().await, CoordinatorState::NoCredentials);
        assert_eq!(h.completions(), 0);

        assert_eq!(
            h.coordinator.on_config_changed().await,
            CoordinatorState::NoCredentials
        );
        assert_eq!(
            h.coordinator.initialize().await.unwrap(),
            CoordinatorState::NoCredentials
        );
    }

    #[tokio::test]
    async fn test_config_change_always_rebuilds() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();
        h.coordinator.on_config_changed().await;
        h.coordinator.on_config_changed().await;
        assert_eq!(h.builds(), 3);
    }

    #[tokio::test]
    async fn test_stale_bundle_rebuilt_on_use() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();

        // Changed behind the coordinator's back: no notification, no watcher.
        h.config
            .set(ConfigPatch {
                model: Some("gpt-4o".into()),
                ..ConfigPatch::default()
            })
            .await
            .unwrap();

        let bundle = h.coordinator.services().await.unwrap();
        assert_eq!(bundle.settings().model, "gpt-4o");
        assert_eq!(h.builds(), 2);

        h.coordinator.services().await.unwrap();
        assert_eq!(h.builds(), 2);
    }

    #[tokio::test]
    async fn test_translation_is_cached() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();

        h.coordinator.translate(text("Hallo")).await.unwrap();
        h.coordinator.translate(text("Hallo")).await.unwrap();
        assert_eq!(h.completions(), 1);

        let other_target = TranslateRequest {
            target_language: Some("fr".into()),
            ..text("Hallo")
        };
        h.coordinator.translate(other_target).await.unwrap();
        assert_eq!(h.completions(), 2);

        let stats = h.coordinator.stats().await;
        assert_eq!(stats.translation_cache.hits, 1);
        assert_eq!(stats.translation_cache.misses, 2);
    }

    #[tokio::test]
    async fn test_config_change_clears_translation_cache() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();

        h.coordinator.translate(text("Hallo")).await.unwrap();
        h.coordinator.on_config_changed().await;
        h.coordinator.translate(text("Hallo")).await.unwrap();
        assert_eq!(h.completions(), 2);
    }

    #[tokio::test]
    async fn test_build_failure_reaches_initialize_only() {
        let h = Harness::new(MemoryConfigStore::with_config(keyed()), true);

        let err = h.coordinator.initialize().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceError);
        assert_eq!(h.coordinator.state().await, CoordinatorState::NoCredentials);

        assert_eq!(
            h.coordinator.on_config_changed().await,
            CoordinatorState::NoCredentials
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_burst_is_debounced() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();

        let (first, second) = tokio::join!(
            h.coordinator.generate_sentences(words(&["Hund"])),
            h.coordinator.generate_sentences(words(&["Katze"])),
        );

        assert_eq!(first.unwrap_err().code(), ErrorCode::Superseded);
        let content = second.unwrap();
        assert_eq!(content.words, vec!["Katze".to_string()]);
        assert_eq!(h.completions(), 1);
    }

    #[tokio::test]
    async fn test_blank_generation_rejected_up_front() {
        let h = Harness::configured();
        let err = h.coordinator.generate_article(words(&[])).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_watcher_follows_config() {
        let h = Harness::unconfigured();
        h.coordinator.initialize().await.unwrap();
        h.coordinator.watch_config();

        h.config.set(ConfigPatch::api_key("sk-live")).await.unwrap();

        let mut state = h.coordinator.state().await;
        for _ in 0..100 {
            if state == CoordinatorState::ServicesActive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = h.coordinator.state().await;
        }
        assert_eq!(state, CoordinatorState::ServicesActive);
    }

    #[tokio::test]
    async fn test_cleanup_and_restart() {
        let h = Harness::configured();
        h.coordinator.register_handlers().unwrap();
        h.coordinator.initialize().await.unwrap();

        h.coordinator.cleanup().await;
        assert_eq!(h.coordinator.state().await, CoordinatorState::Terminated);
        assert!(!h.router.handles(MessageKind::Ping));

        let err = h.coordinator.translate(text("Hallo")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConfigured);

        assert_eq!(
            h.coordinator.initialize().await.unwrap(),
            CoordinatorState::ServicesActive
        );
        h.coordinator.register_handlers().unwrap();
        assert!(h.router.handles(MessageKind::Ping));
    }

    #[tokio::test]
    async fn test_cleanup_wins_over_late_load() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();
        h.coordinator.cleanup().await;

        // A config change that read the state before cleanup ran.
        let state = h.coordinator.load(&keyed()).await.unwrap();
        assert_eq!(state, CoordinatorState::Terminated);
        assert_eq!(h.coordinator.state().await, CoordinatorState::Terminated);
        assert!(h.coordinator.inner.read().await.bundle.is_none());
    }

    #[tokio::test]
    async fn test_register_handlers_is_all_or_nothing() {
        let h = Harness::configured();
        h.router
            .register_fn(MessageKind::GetStats, |_, _| async {
                Ok(Response::success(json!("taken")))
            })
            .unwrap();

        let err = h.coordinator.register_handlers().unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateHandler);
        assert!(!h.router.handles(MessageKind::Ping));
        assert!(!h.router.handles(MessageKind::TranslateText));
        assert!(h.router.handles(MessageKind::GetStats));
    }

    #[tokio::test]
    async fn test_install_then_startup() {
        let h = Harness::unconfigured();

        h.coordinator
            .handle_lifecycle(LifecycleEvent::Installed)
            .await
            .unwrap();
        assert!(h.config.is_saved());
        assert_eq!(h.config.get().await.unwrap(), Config::default());

        let state = h
            .coordinator
            .handle_lifecycle(LifecycleEvent::Startup)
            .await
            .unwrap();
        assert_eq!(state, CoordinatorState::NoCredentials);
    }

    #[tokio::test]
    async fn test_suspend_then_lazy_reinitialize() {
        let h = Harness::configured();
        h.coordinator.initialize().await.unwrap();

        h.coordinator
            .handle_lifecycle(LifecycleEvent::Suspend)
            .await
            .unwrap();
        assert_eq!(h.coordinator.state().await, CoordinatorState::Uninitialized);

        h.coordinator.translate(text("Hallo")).await.unwrap();
        assert_eq!(h.coordinator.state().await, CoordinatorState::ServicesActive);
        assert_eq!(h.builds(), 2);
    }

    #[tokio::test]
    async fn test_requests_through_router() {
        let h = Harness::configured();
        h.coordinator.register_handlers().unwrap();
        h.coordinator.initialize().await.unwrap();

        let blank = h
            .router
            .dispatch(json!({
                "id": "v1",
                "kind": "add-to-vocabulary",
                "timestamp": 1,
                "payload": { "word": " ", "translation": "dog" },
            }))
            .await;
        assert_eq!(blank.response.code(), Some(ErrorCode::ValidationError));

        let added = h
            .router
            .dispatch(json!({
                "id": "v2",
                "kind": "add-to-vocabulary",
                "timestamp": 2,
                "payload": { "word": "Hund", "translation": "dog", "language": "de" },
            }))
            .await;
        assert!(added.response.is_success());

        let listed = h
            .router
            .dispatch(json!({ "id": "v3", "kind": "get-vocabulary", "timestamp": 3 }))
            .await;
        let entries = listed.response.into_result().unwrap();
        assert_eq!(entries[0]["word"], "Hund");

        let stats = h
            .router
            .dispatch(json!({ "id": "s1", "kind": "get-stats", "timestamp": 4 }))
            .await;
        assert_eq!(stats.response.into_result().unwrap()["state"], "SERVICES_ACTIVE");

        let err = h.coordinator.register_handlers().unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateHandler);
    }
}
