pub mod types;

mod error;

pub use error::ProviderError;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// An opaque "generate streamed completion" endpoint. Concrete network
/// clients live outside the orchestration core; everything in cadre talks
/// to models through this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Injected model-resolution policy. Maps a model identifier (and, on auth
/// refresh, fresh credentials) to a provider handle. Workers call this on
/// their side of the isolation boundary so credentials never cross it.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self, model_identifier: &str) -> Result<Arc<dyn Provider>>;

    /// Called after an authentication failure. Implementations should
    /// obtain fresh credentials and return a rebuilt handle. The default
    /// re-resolves from scratch.
    async fn refresh(&self, model_identifier: &str) -> Result<Arc<dyn Provider>> {
        self.resolve(model_identifier).await
    }
}

/// Split a `provider/model` identifier. A bare model id resolves against
/// the default provider.
pub fn parse_model_identifier(identifier: &str) -> (&str, &str) {
    match identifier.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => (provider, model),
        _ => ("anthropic", identifier),
    }
}

/// Endpoint details a `ModelResolver` implementation needs to build a
/// concrete client.
pub struct ResolvedEndpoint {
    pub provider_id: String,
    pub model: String,
    pub credential: cadre_auth::Credential,
    pub base_url: Option<String>,
}

/// Resolve credentials and base URL for a model identifier from the
/// injected settings and the per-provider environment variables. Called on
/// the worker side of the isolation boundary, so secrets never cross it.
pub fn resolve_endpoint(
    model_identifier: &str,
    config: &cadre_config::Config,
) -> Result<ResolvedEndpoint> {
    let (provider_id, model) = parse_model_identifier(model_identifier);
    let entry = config.provider.entry(provider_id);
    let credential =
        cadre_auth::resolve_credential(provider_id, entry.and_then(|e| e.api_key.as_deref()))?;
    let base_url =
        cadre_auth::resolve_base_url(provider_id, entry.and_then(|e| e.base_url.as_deref()));
    Ok(ResolvedEndpoint {
        provider_id: provider_id.to_string(),
        model: model.to_string(),
        credential,
        base_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_identifier_splits() {
        assert_eq!(
            parse_model_identifier("openai/gpt-4o-mini"),
            ("openai", "gpt-4o-mini")
        );
    }

    #[test]
    fn bare_identifier_uses_default_provider() {
        assert_eq!(
            parse_model_identifier("claude-sonnet-4-5"),
            ("anthropic", "claude-sonnet-4-5")
        );
    }

    #[test]
    fn endpoint_resolution_uses_config_key() {
        let mut config = cadre_config::Config::default();
        config.provider.entries.insert(
            "openai".to_string(),
            cadre_config::ProviderEntry {
                api_key: Some("sk-test".to_string()),
                base_url: None,
                model: None,
            },
        );
        let endpoint = resolve_endpoint("openai/gpt-4o-mini", &config).unwrap();
        assert_eq!(endpoint.provider_id, "openai");
        assert_eq!(endpoint.model, "gpt-4o-mini");
        assert_eq!(endpoint.credential.header_value(), "sk-test");
        assert_eq!(endpoint.base_url.as_deref(), Some("https://api.openai.com/v1"));
    }
}
