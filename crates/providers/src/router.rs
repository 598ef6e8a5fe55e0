//! Provider selection from configuration.

use operative_config::{ApiProvider, AppConfig};
use operative_core::error::ProviderError;
use std::sync::Arc;

use crate::anthropic::{AnthropicProvider, Backend};

/// Build the backend the configuration selects.
pub fn backend_from_config(config: &AppConfig) -> Result<Backend, ProviderError> {
    let missing = || {
        ProviderError::NotConfigured(
            config
                .validate_auth()
                .unwrap_or_else(|| format!("{} credentials are incomplete", config.provider)),
        )
    };

    let backend = match config.provider {
        ApiProvider::Anthropic => Backend::direct(config.api_key.clone().ok_or_else(missing)?),
        ApiProvider::Vertex => {
            let vertex = &config.vertex;
            match (&vertex.project_id, &vertex.region, &vertex.access_token) {
                (Some(project), Some(region), Some(token)) => {
                    Backend::vertex(project, region, token)
                }
                _ => return Err(missing()),
            }
        }
        ApiProvider::Bedrock => {
            let token = config.bedrock.bearer_token.clone().ok_or_else(missing)?;
            Backend::bedrock(&config.bedrock.region, token)
        }
    };
    Ok(backend)
}

/// Build the configured provider.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<AnthropicProvider>, ProviderError> {
    let backend = backend_from_config(config)?;
    tracing::debug!(provider = backend.name(), model = config.model(), "Provider selected");
    Ok(Arc::new(AnthropicProvider::new(backend)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use operative_core::provider::Provider;

    #[test]
    fn builds_direct_provider() {
        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert!(provider.capabilities().supports_prompt_caching);
    }

    #[test]
    fn builds_bedrock_provider() {
        let mut config = AppConfig {
            provider: ApiProvider::Bedrock,
            ..AppConfig::default()
        };
        config.bedrock.bearer_token = Some("token".into());
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "bedrock");
        assert!(!provider.capabilities().supports_prompt_caching);
    }

    #[test]
    fn missing_credentials_are_reported() {
        let config = AppConfig {
            provider: ApiProvider::Vertex,
            ..AppConfig::default()
        };
        let err = backend_from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(err.to_string().contains("CLOUD_ML_REGION"));
    }
}
