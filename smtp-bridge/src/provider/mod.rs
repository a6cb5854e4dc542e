//! Outbound delivery providers
//!
//! A provider takes one accepted [`Mail`] and hands it to an email-sending
//! service. Providers are looked up by name in a [`ProviderRegistry`] once at
//! startup; an unknown name stops the bridge before it listens.
//!
//! Every provider must honour [`Config::dry_mode`]: in dry mode it returns
//! [`BridgeError::DryRun`] without contacting the service.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mail::Mail;
use std::collections::HashMap;
use std::sync::Arc;

pub mod ses;

pub use ses::SesProvider;

/// Sends one mail through an external service
#[async_trait::async_trait]
pub trait SenderProvider: Send + Sync {
    /// Deliver `mail`, returning an error if it was not accepted
    async fn send_mail(&self, mail: &Mail, config: &Config) -> Result<()>;

    /// Reject settings this provider can never send with
    ///
    /// Called once at startup, before the listener is bound.
    fn check_config(&self, _config: &Config) -> Result<()> {
        Ok(())
    }

    /// Name used in the `sender.provider` setting
    fn name(&self) -> &str;
}

/// Provider implementations keyed by name
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SenderProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SesProvider::new()));
        registry
    }

    /// Add a provider, replacing any provider with the same name
    pub fn register(&mut self, provider: Arc<dyn SenderProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn SenderProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::ProviderUnrecognized(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProvider;

    #[async_trait::async_trait]
    impl SenderProvider for NullProvider {
        async fn send_mail(&self, _mail: &Mail, _config: &Config) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn test_defaults_include_ses() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.resolve("ses").unwrap().name(), "ses");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::with_defaults();
        assert!(matches!(
            registry.resolve("mailgun"),
            Err(BridgeError::ProviderUnrecognized(name)) if name == "mailgun"
        ));
    }

    #[tokio::test]
    async fn test_register_custom_provider() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register(Arc::new(NullProvider));
        assert_eq!(registry.names(), vec!["null", "ses"]);

        let provider = registry.resolve("null").unwrap();
        assert!(provider
            .send_mail(&Mail::new("a@x.com"), &Config::default())
            .await
            .is_ok());
    }
}
