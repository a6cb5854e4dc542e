use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::provider::{ProviderRegistry, SenderProvider};
use crate::queue::MailQueue;
use crate::smtp::SmtpServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Owns the queue, the dispatcher and the SMTP listener
///
/// Shutdown order: stop the dispatcher, close the queue, then give open SMTP
/// connections their grace period. Mails still queued at that point are lost.
pub struct Bridge {
    config: Arc<Config>,
    queue: Arc<MailQueue>,
    provider: Arc<dyn SenderProvider>,
    server: SmtpServer,
}

impl Bridge {
    /// Resolve the provider and bind the SMTP listener
    ///
    /// Fails with [`ProviderUnrecognized`](crate::BridgeError::ProviderUnrecognized)
    /// before binding if the configured provider is unknown, and with a
    /// config error if the provider rejects its settings.
    pub async fn bind(config: Config, registry: &ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let provider = registry.resolve(&config.sender.provider)?;
        provider.check_config(&config)?;

        let config = Arc::new(config);
        let queue = Arc::new(MailQueue::new(config.queue.capacity));
        let server = SmtpServer::bind(Arc::clone(&config), Arc::clone(&queue)).await?;

        Ok(Self {
            config,
            queue,
            provider,
            server,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn queue(&self) -> Arc<MailQueue> {
        Arc::clone(&self.queue)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            config,
            queue,
            provider,
            server,
        } = self;

        info!("Starting server at {}", server.local_addr()?);

        let dispatcher_token = CancellationToken::new();
        let dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::clone(&config), provider);
        let mut dispatcher_task = tokio::spawn(dispatcher.run(dispatcher_token.clone()));

        let server_token = CancellationToken::new();
        let mut server_task = tokio::spawn(server.run(server_token.clone()));

        let early_exit = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = &mut server_task => Some(result),
        };

        dispatcher_token.cancel();
        let grace = Duration::from_secs(config.smtp.shutdown_grace_secs);
        if timeout(grace, &mut dispatcher_task).await.is_err() {
            warn!("Dispatch still running after {:?}, aborting it", grace);
            dispatcher_task.abort();
        }

        queue.close();

        let result = match early_exit {
            Some(result) => {
                error!("SMTP server stopped unexpectedly");
                result
            }
            None => {
                server_token.cancel();
                server_task.await
            }
        };

        if !queue.is_empty() {
            warn!("{} queued mails were not delivered", queue.len());
        }
        info!("Shutdown complete");

        result.map_err(std::io::Error::other)?
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    fn config() -> Config {
        let mut config = Config::default();
        config.smtp.host = "127.0.0.1".to_string();
        config.smtp.port = 1;
        config
    }

    #[tokio::test]
    async fn test_unknown_provider_is_fatal() {
        let mut config = config();
        config.sender.provider = "carrier-pigeon".to_string();

        let result = Bridge::bind(config, &ProviderRegistry::with_defaults()).await;
        assert!(matches!(result, Err(BridgeError::ProviderUnrecognized(_))));
    }

    #[tokio::test]
    async fn test_incomplete_provider_settings_are_fatal() {
        let mut config = config();
        config
            .sender
            .settings
            .insert("region".to_string(), toml::Value::String("eu-west-1".to_string()));

        let result = Bridge::bind(config, &ProviderRegistry::with_defaults()).await;
        assert!(matches!(result, Err(BridgeError::Config(msg)) if msg == "endpoint not set"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let mut config = config();
        config.dispatch_interval = 0;

        let result = Bridge::bind(config, &ProviderRegistry::with_defaults()).await;
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
