use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

/// Used when a credential has no configuration, or its lookup fails.
pub const DEFAULT_MODELS: [&str; 3] = [
    "anthropic/claude-3.5-sonnet",
    "openai/gpt-4o-mini",
    "meta-llama/llama-3.1-8b-instruct",
];

/// Per-credential model order: one primary and up to three fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfiguration {
    pub primary: String,
    pub fallbacks: [Option<String>; 3],
}

impl ModelConfiguration {
    /// Primary first, then fallbacks in slot order. Blank entries are skipped.
    pub fn ordered(&self) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(self.fallbacks.iter().flatten())
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
pub trait ModelConfigStore: Send + Sync {
    async fn fallback_order(&self, credential_id: Uuid)
        -> anyhow::Result<Option<ModelConfiguration>>;
}

pub fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
}

pub struct ModelResolver {
    store: Arc<dyn ModelConfigStore>,
}

impl ModelResolver {
    pub fn new(store: Arc<dyn ModelConfigStore>) -> Self {
        Self { store }
    }

    /// Ordered model list for a credential. Never empty.
    pub async fn resolve(&self, credential_id: Uuid) -> Vec<String> {
        match self.store.fallback_order(credential_id).await {
            Ok(Some(config)) => {
                let models = config.ordered();
                if models.is_empty() {
                    debug!("Credential {} has a blank model configuration", credential_id);
                    default_models()
                } else {
                    models
                }
            }
            Ok(None) => default_models(),
            Err(e) => {
                warn!(
                    "Model configuration lookup failed for credential {}: {:#}. Using defaults",
                    credential_id, e
                );
                default_models()
            }
        }
    }
}
