//! Three execution contexts talking through one in-process hub.
//!
//! Run with: cargo run -p relay-demo
//!
//! Set `LINGO_RELAY_API_KEY` to configure services from the panel, and pass
//! `--serve` to keep the coordinator reachable at ws://127.0.0.1:3000/ws.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use lingo_relay_coordinator::{
    Coordinator, LifecycleEvent, LlmServiceFactory,
    storage::{MemoryConfigStore, MemoryVocabularyStore},
};
use lingo_relay_core::{
    ConfigPatch, ContextId, InboundSink, ProviderSettings, Request, Tuning,
    message::{GenerateRequest, TranslateRequest, VocabularyInput},
    services::{CompletionRequest, GenerationOptions, LlmClient, ServiceError},
};
use lingo_relay_router::Router;
use lingo_relay_transport::{LocalHub, websocket::create_ws_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stands in for a provider SDK: answers by echoing the prompt.
struct OfflineClient {
    provider: String,
    model: String,
}

#[async_trait]
impl LlmClient for OfflineClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
        Ok(format!("[{}/{}] {}", self.provider, self.model, request.prompt))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let tuning = Tuning::default();
    let hub = LocalHub::new();
    let router = |context: ContextId| {
        let router = Arc::new(
            Router::new(context, hub.endpoint(context)).with_timeout(tuning.request_timeout()),
        );
        hub.attach(context, &router);
        router
    };
    let agent = router(ContextId::Agent);
    let panel = router(ContextId::Panel);

    let factory = LlmServiceFactory::new(|settings: &ProviderSettings| {
        Ok(Arc::new(OfflineClient {
            provider: settings.provider.clone(),
            model: settings.model.clone(),
        }) as Arc<dyn LlmClient>)
    });
    let coordinator = Coordinator::new(
        router(ContextId::Coordinator),
        Arc::new(MemoryConfigStore::new()),
        Arc::new(MemoryVocabularyStore::new()),
        Arc::new(factory),
        tuning,
    );
    coordinator.register_handlers()?;
    coordinator.handle_lifecycle(LifecycleEvent::Installed).await?;
    let state = coordinator.handle_lifecycle(LifecycleEvent::Startup).await?;
    tracing::info!(%state, "coordinator started");

    if let Ok(api_key) = std::env::var("LINGO_RELAY_API_KEY") {
        let response = panel
            .send(&Request::UpdateConfig(ConfigPatch::api_key(api_key)), None)
            .await?;
        tracing::info!(success = response.is_success(), "panel updated configuration");
    }

    let translation = agent
        .send(
            &Request::TranslateText(TranslateRequest {
                text: "Der Hund schläft im Garten.".into(),
                source_language: Some("de".into()),
                target_language: None,
            }),
            Some(ContextId::Coordinator),
        )
        .await?;
    tracing::info!("translate-text -> {}", serde_json::to_string(&translation)?);

    agent
        .send(
            &Request::AddToVocabulary(VocabularyInput {
                word: "Hund".into(),
                translation: "dog".into(),
                context: Some("Der Hund schläft im Garten.".into()),
                language: Some("de".into()),
            }),
            None,
        )
        .await?;

    let sentences = panel
        .send(
            &Request::GenerateSentences(GenerateRequest {
                words: vec!["Hund".into()],
                options: GenerationOptions::default(),
            }),
            None,
        )
        .await?;
    tracing::info!("generate-sentences -> {}", serde_json::to_string(&sentences)?);

    let stats = panel.send(&Request::GetStats, None).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if std::env::args().any(|arg| arg == "--serve") {
        let sink: Arc<dyn InboundSink> = Arc::clone(coordinator.router()) as Arc<dyn InboundSink>;
        let app = create_ws_router(sink);

        let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
        tracing::info!("Coordinator listening on ws://{addr}/ws");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    } else {
        // Let the config watcher drain before tearing down.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    coordinator.cleanup().await;
    panel.shutdown();
    agent.shutdown();
    Ok(())
}
