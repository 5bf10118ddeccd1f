//! LLM Router
//!
//! Tries the configured default provider first, then every other provider
//! in registration order, until one answers.

use super::{LLMError, LLMProvider, Message};
use std::time::Duration;

/// Default per-provider timeout
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Ordered failover across LLM providers
pub struct LLMRouter {
    /// Available LLM providers
    providers: Vec<Box<dyn LLMProvider>>,

    /// Name of the provider tried first
    default_provider: String,

    timeout: Duration,
}

impl LLMRouter {
    /// Create a new LLM router
    ///
    /// # Arguments
    /// * `providers` - List of available LLM providers
    /// * `default_provider` - Name of the provider to try first
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, default_provider: impl Into<String>) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Limit how long each provider may take
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Providers in the order they will be tried
    pub fn rank_providers(&self) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        // Stable: everything except the default keeps registration order
        providers.sort_by_key(|p| p.name() != self.default_provider);
        providers
    }

    /// Call LLM providers with automatic failover
    ///
    /// Returns the completion text and the name of the provider that
    /// produced it, or `AllProvidersExhausted` if every provider failed.
    pub async fn call(&self, messages: &[Message]) -> super::Result<(String, String)> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let mut failures = Vec::new();

        for provider in self.rank_providers() {
            tracing::debug!(
                "Attempting provider: {} (timeout: {}s)",
                provider.name(),
                self.timeout.as_secs()
            );

            match tokio::time::timeout(self.timeout, provider.complete(messages)).await {
                Ok(Ok(text)) => {
                    tracing::info!("Provider {} succeeded", provider.name());
                    return Ok((text, provider.name().to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
                Err(_) => {
                    tracing::warn!(
                        "Provider {} timed out after {}s",
                        provider.name(),
                        self.timeout.as_secs()
                    );
                    failures.push(format!("{}: timed out", provider.name()));
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(LLMError::AllProvidersExhausted(failures.join("; ")))
    }

    /// Check the health of all registered providers
    /// Returns a list of (provider_name, is_healthy)
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockProvider {
        name: String,
        answer: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn boxed(name: &str, answer: Option<&str>, calls: &Arc<AtomicUsize>) -> Box<dyn LLMProvider> {
            Box::new(Self {
                name: name.to_string(),
                answer: answer.map(str::to_string),
                calls: Arc::clone(calls),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_local(&self) -> bool {
            self.name == "ollama"
        }

        async fn complete(&self, _messages: &[Message]) -> super::super::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .clone()
                .ok_or_else(|| LLMError::ProviderUnavailable(self.name.clone()))
        }
    }

    #[test]
    fn test_default_provider_ranked_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                MockProvider::boxed("ollama", None, &calls),
                MockProvider::boxed("gemini", None, &calls),
            ],
            "gemini",
        );

        let ranked = router.rank_providers();
        let names: Vec<&str> = ranked.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["gemini", "ollama"]);
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(
            vec![
                MockProvider::boxed("gemini", None, &calls),
                MockProvider::boxed("ollama", Some("Thought: ok"), &calls),
            ],
            "gemini",
        );

        let (text, provider) = router.call(&[Message::user("hi")]).await.unwrap();
        assert_eq!(text, "Thought: ok");
        assert_eq!(provider, "ollama");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = LLMRouter::new(vec![MockProvider::boxed("gemini", None, &calls)], "gemini");

        let result = router.call(&[Message::user("hi")]).await;
        assert!(matches!(result, Err(LLMError::AllProvidersExhausted(_))));
    }

    #[tokio::test]
    async fn test_no_providers() {
        let router = LLMRouter::new(vec![], "gemini");
        let result = router.call(&[Message::user("hi")]).await;
        assert!(matches!(result, Err(LLMError::ProviderUnavailable(_))));
    }
}
