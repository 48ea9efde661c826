//! Backend construction from configuration.
//!
//! Picks the adapter named by `backend.kind` and wraps it in the retrying
//! backend configured by `[retry]`.

use crucible_config::AppConfig;
use crucible_core::backend::Backend;
use crucible_core::error::BackendError;
use std::sync::Arc;
use tracing::info;

use crate::anthropic::AnthropicBackend;
use crate::openai_compat::{OPENAI_BASE_URL, OpenAiCompatBackend};
use crate::retry::{RetryPolicy, RetryingBackend};

/// Build the configured backend, wrapped with retry.
///
/// Anthropic always needs an API key. An OpenAI-compatible backend may run
/// without one when `base_url` points at a local server (Ollama, vLLM).
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let backend = &config.backend;

    let inner: Arc<dyn Backend> = match backend.kind.as_str() {
        "anthropic" => {
            let api_key = backend.api_key.clone().ok_or_else(|| {
                BackendError::NotConfigured(
                    "No Anthropic API key. Set ANTHROPIC_API_KEY or backend.api_key".into(),
                )
            })?;
            let mut b = AnthropicBackend::new(api_key, &backend.model)
                .with_max_tokens(backend.max_tokens)
                .with_temperature(backend.temperature);
            if let Some(url) = &backend.base_url {
                b = b.with_base_url(url);
            }
            Arc::new(b)
        }
        "openai" => {
            let api_key = match (&backend.api_key, &backend.base_url) {
                (Some(key), _) => key.clone(),
                (None, Some(_)) => String::new(),
                (None, None) => {
                    return Err(BackendError::NotConfigured(
                        "No OpenAI API key. Set OPENAI_API_KEY or backend.api_key".into(),
                    ));
                }
            };
            let base_url = backend.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Arc::new(
                OpenAiCompatBackend::new("openai", base_url, api_key, &backend.model)
                    .with_max_tokens(backend.max_tokens)
                    .with_temperature(backend.temperature),
            )
        }
        other => {
            return Err(BackendError::NotConfigured(format!("Unknown backend kind: {other}")));
        }
    };

    let policy = RetryPolicy::from_config(&config.retry);
    info!(
        backend = %inner.name(),
        model = %inner.model(),
        max_attempts = policy.max_attempts,
        "Backend ready"
    );

    Ok(Arc::new(RetryingBackend::new(inner).with_policy(policy)))
}
