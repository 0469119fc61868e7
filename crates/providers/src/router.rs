//! Provider router, maps a requested model id to a backend and model name.

use std::collections::HashMap;
use std::sync::Arc;
use storyloom_core::error::ProviderError;
use storyloom_core::provider::Provider;
use tracing::debug;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

struct Route {
    provider: Arc<dyn Provider>,
    default_model: String,
}

/// Routes chat requests to the correct provider.
///
/// A model id is resolved as:
/// - a bare provider name: that provider with its default model
/// - `provider/model`: that provider with `model`
/// - anything else: the default provider with the id as the model name
pub struct ProviderRouter {
    routes: HashMap<String, Route>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        default_model: impl Into<String>,
    ) {
        self.routes.insert(
            name.into(),
            Route {
                provider,
                default_model: default_model.into(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.routes.get(name).map(|r| r.provider.clone())
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Resolve a model id to a provider and the upstream model name.
    pub fn resolve(&self, model_id: &str) -> Option<(Arc<dyn Provider>, String)> {
        let model_id = model_id.trim();

        if let Some(route) = self.routes.get(model_id) {
            return Some((route.provider.clone(), route.default_model.clone()));
        }

        if let Some((name, model)) = model_id.split_once('/')
            && let Some(route) = self.routes.get(name)
            && !model.is_empty()
        {
            return Some((route.provider.clone(), model.to_string()));
        }

        let route = self.routes.get(&self.default_provider)?;
        debug!(model = %model_id, provider = %self.default_provider, "Routing to default provider");
        Some((route.provider.clone(), model_id.to_string()))
    }

    /// Registered providers and their default models, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .routes
            .iter()
            .map(|(name, r)| (name.as_str(), r.default_model.as_str()))
            .collect();
        out.sort();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Build a router from every configured provider that has an API key.
pub fn build_from_config(config: &storyloom_config::AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let Some(api_key) = provider_config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            debug!(provider = %name, "Skipping provider without API key");
            continue;
        };

        let default_model = provider_config
            .default_model
            .clone()
            .unwrap_or_else(|| default_model_for(name).to_string());

        let provider: Arc<dyn Provider> = if name == "anthropic" {
            let mut p = AnthropicProvider::new(api_key)?;
            if let Some(url) = &provider_config.api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        } else {
            let base_url = provider_config
                .api_url
                .clone()
                .unwrap_or_else(|| default_base_url(name));
            Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)?)
        };

        router.register(name.clone(), provider, default_model);
    }

    Ok(router)
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "dashscope" | "qwen" => "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name {
        "anthropic" => "claude-sonnet-4-20250514",
        "deepseek" => "deepseek-chat",
        "dashscope" | "qwen" => "qwen-plus",
        "ollama" => "llama3.2",
        _ => "gpt-4o-mini",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_config::{AppConfig, ProviderConfig};

    fn openai() -> Arc<dyn Provider> {
        Arc::new(OpenAiCompatProvider::openai("sk-test").unwrap())
    }

    fn anthropic() -> Arc<dyn Provider> {
        Arc::new(AnthropicProvider::new("sk-ant").unwrap())
    }

    fn router() -> ProviderRouter {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", openai(), "gpt-4o-mini");
        router.register("anthropic", anthropic(), "claude-sonnet-4-20250514");
        router
    }

    #[test]
    fn bare_provider_name_uses_default_model() {
        let (p, model) = router().resolve("anthropic").unwrap();
        assert_eq!(p.name(), "anthropic");
        assert_eq!(model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn prefixed_model_is_honoured() {
        let (p, model) = router().resolve("anthropic/claude-3-5-haiku").unwrap();
        assert_eq!(p.name(), "anthropic");
        assert_eq!(model, "claude-3-5-haiku");
    }

    #[test]
    fn unknown_id_goes_to_default_provider_verbatim() {
        let (p, model) = router().resolve("gpt-4o").unwrap();
        assert_eq!(p.name(), "openai");
        assert_eq!(model, "gpt-4o");

        let (p, model) = router().resolve("meta/llama-3").unwrap();
        assert_eq!(p.name(), "openai");
        assert_eq!(model, "meta/llama-3");
    }

    #[test]
    fn missing_default_provider_resolves_nothing() {
        let mut router = ProviderRouter::new("openai");
        router.register("anthropic", anthropic(), "claude");
        assert!(router.resolve("gpt-4o").is_none());
        assert!(router.resolve("anthropic").is_some());
    }

    #[test]
    fn list_is_sorted() {
        let router = router();
        let names: Vec<_> = router.list().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["anthropic", "openai"]);
    }

    #[test]
    fn build_skips_providers_without_keys() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-test".into()),
                ..Default::default()
            },
        );
        config.providers.insert("anthropic".into(), ProviderConfig::default());

        let router = build_from_config(&config).unwrap();
        assert!(router.get("openai").is_some());
        assert!(router.get("anthropic").is_none());
        assert_eq!(router.list(), vec![("openai", "gpt-4o-mini")]);
    }

    #[test]
    fn default_config_builds_empty_router() {
        let router = build_from_config(&AppConfig::default()).unwrap();
        assert!(router.is_empty());
        assert!(router.resolve("gpt-4o").is_none());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("deepseek").contains("deepseek"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }
}
