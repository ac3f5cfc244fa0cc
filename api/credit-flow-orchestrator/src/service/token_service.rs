use crate::errors::FlowError;
use async_trait::async_trait;

/// Source of the partner bearer token. Implementations own caching and refresh.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn valid_token(&self) -> Result<String, FlowError>;
}

/// Token configured out of band (`PARTNER_API_TOKEN`).
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn valid_token(&self) -> Result<String, FlowError> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| FlowError::TokenUnavailable("PARTNER_API_TOKEN not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_unavailable() {
        let provider = StaticTokenProvider::new(None);
        assert!(matches!(
            provider.valid_token().await,
            Err(FlowError::TokenUnavailable(_))
        ));
        let provider = StaticTokenProvider::new(Some("  ".to_string()));
        assert!(provider.valid_token().await.is_err());
    }

    #[tokio::test]
    async fn configured_token_is_returned() {
        let provider = StaticTokenProvider::new(Some("abc".to_string()));
        assert_eq!(provider.valid_token().await.expect("token"), "abc");
    }
}
