use std::sync::Arc;

use agent_provider::{ModelClient, ProviderInitError};
use agent_provider_chat_api::{ChatApiModelClient, ChatApiProviderConfig, CHAT_API_PROVIDER_ID};
use agent_provider_mock::{ScriptedModelClient, MOCK_PROVIDER_ID};

use crate::config::{Settings, API_KEY_ENV_VAR, FALLBACK_API_KEY_ENV_VAR};

/// Builds the model client named by `settings.provider`.
pub fn provider_for_settings(settings: &Settings) -> Result<Arc<dyn ModelClient>, ProviderInitError> {
    match settings.provider.as_str() {
        CHAT_API_PROVIDER_ID => {
            let api_key = settings.api_key.as_deref().ok_or_else(|| {
                ProviderInitError::new(format!(
                    "provider '{CHAT_API_PROVIDER_ID}' needs an API key: set {API_KEY_ENV_VAR} or {FALLBACK_API_KEY_ENV_VAR}"
                ))
            })?;
            let config = ChatApiProviderConfig::new(api_key, settings.model.clone())
                .with_base_url(settings.api_base_url.clone());
            Ok(Arc::new(ChatApiModelClient::new(config)?))
        }
        other => provider_for_id(other),
    }
}

/// Providers that need no configuration beyond their id.
pub fn provider_for_id(provider_id: &str) -> Result<Arc<dyn ModelClient>, ProviderInitError> {
    match provider_id {
        MOCK_PROVIDER_ID => Ok(Arc::new(ScriptedModelClient::echo())),
        unknown => Err(ProviderInitError::new(format!(
            "Unsupported provider '{unknown}'. Available providers: {CHAT_API_PROVIDER_ID}, {MOCK_PROVIDER_ID}"
        ))),
    }
}
