//! Wiring a [`ChatService`] from configuration.

use std::sync::Arc;
use storyloom_config::AppConfig;
use storyloom_core::{ChunkStore, Error, Result, ThreadRepository, TurnRepository};
use storyloom_memory::{InMemoryStore, SqliteStore};
use storyloom_providers::{OpenAiEmbedder, build_from_config};
use tracing::info;

use crate::chat::{ChatService, ChatSettings};
use crate::context::PromptAssembler;
use crate::retrieval::RetrievalService;

/// Build the chat service described by `config`.
///
/// Retrieval is wired only when RAG is enabled and an embedding key is set;
/// otherwise turns run without context and nothing is indexed.
pub async fn build_chat_service(config: &AppConfig) -> Result<ChatService> {
    config.validate().map_err(|e| Error::Config {
        message: e.to_string(),
    })?;

    match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage");
            wire(Arc::new(InMemoryStore::new()), config)
        }
        _ => {
            info!(path = %config.storage.path, "Using SQLite storage");
            let store = SqliteStore::new(&config.storage.path).await?;
            wire(Arc::new(store), config)
        }
    }
}

fn wire<S>(store: Arc<S>, config: &AppConfig) -> Result<ChatService>
where
    S: ThreadRepository + TurnRepository + ChunkStore + 'static,
{
    let router = build_from_config(config)?;
    if router.is_empty() {
        tracing::warn!("No providers configured; every chat request will be rejected");
    }

    let assembler = PromptAssembler::new().with_dialogue_preamble(config.chat.system_prompt.clone());
    let mut service = ChatService::new(store.clone(), Arc::new(router))
        .with_assembler(assembler.clone())
        .with_settings(ChatSettings::from(&config.chat));

    match config.embedding.api_key.as_deref() {
        Some(key) if config.rag_active() => {
            let embedder = OpenAiEmbedder::new(
                &config.embedding.api_url,
                key,
                &config.embedding.model,
                config.embedding.timeout_secs,
            )?;
            let retrieval = RetrievalService::from_config(store, Arc::new(embedder), &config.rag)
                .with_assembler(assembler);
            info!(model = %config.embedding.model, "Retrieval enabled");
            service = service.with_retrieval(Arc::new(retrieval));
        }
        _ => info!("Retrieval disabled"),
    }

    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_config::ProviderConfig;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.backend = "memory".into();
        config
    }

    #[tokio::test]
    async fn rag_needs_an_embedding_key() {
        let mut config = memory_config();
        config.rag.enabled = true;
        config.embedding.api_key = None;
        let service = build_chat_service(&config).await.unwrap();
        assert!(service.retrieval().is_none());

        config.embedding.api_key = Some("sk-embed".into());
        let service = build_chat_service(&config).await.unwrap();
        assert!(service.retrieval().is_some());
    }

    #[tokio::test]
    async fn providers_with_keys_are_routed() {
        let mut config = memory_config();
        config.default_provider = "deepseek".into();
        config.providers.insert(
            "deepseek".into(),
            ProviderConfig {
                api_key: Some("sk-test".into()),
                ..Default::default()
            },
        );
        let service = build_chat_service(&config).await.unwrap();
        assert!(service.router().get("deepseek").is_some());
        assert!(service.router().resolve("deepseek-chat").is_some());
    }

    #[tokio::test]
    async fn chat_settings_follow_config() {
        let mut config = memory_config();
        config.chat.history_limit = 2;
        config.chat.system_prompt = Some("Be kind.".into());
        let service = build_chat_service(&config).await.unwrap();
        assert_eq!(service.settings().history_limit, 2);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = memory_config();
        config.rag.chunk_size = 0;
        let err = build_chat_service(&config)
            .await
            .err()
            .expect("config must be rejected");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn blank_embedding_key_disables_retrieval() {
        let mut config = memory_config();
        config.rag.enabled = true;
        config.embedding.api_key = Some(String::new());
        let service = build_chat_service(&config).await.unwrap();
        assert!(service.retrieval().is_none());
    }
}
