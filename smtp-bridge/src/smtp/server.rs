use crate::auth::Credentials;
use crate::config::Config;
use crate::error::Result;
use crate::queue::MailQueue;
use crate::smtp::connection::Connection;
use crate::smtp::session::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// SMTP listener spawning one task per connection
pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<Config>,
    credentials: Arc<Credentials>,
    queue: Arc<MailQueue>,
    hostname: String,
}

impl SmtpServer {
    /// Bind the configured address
    pub async fn bind(config: Arc<Config>, queue: Arc<MailQueue>) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let credentials = Arc::new(Credentials::from_entries(&config.auth.auth_users));
        let hostname = config.greeting_name();

        if credentials.is_empty() && !config.auth.allow_anon {
            warn!("No auth users configured and anonymous mode disabled, every MAIL will be refused");
        }

        Ok(Self {
            listener,
            config,
            credentials,
            queue,
            hostname,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn connection(&self) -> Connection {
        let session = Session::new(
            Arc::clone(&self.credentials),
            Arc::clone(&self.queue),
            self.config.auth.allow_anon,
        );

        Connection::new(
            session,
            self.hostname.clone(),
            self.config.smtp.max_message_size,
            self.config.smtp.max_recipients,
        )
    }

    /// Accept connections until `shutdown` fires
    ///
    /// Open connections then get the configured grace period to finish
    /// before they are aborted.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("SMTP server listening on {}", self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        info!("New SMTP connection from {}", addr);
                        let connection = self.connection();
                        connections.spawn(async move {
                            if let Err(e) = connection.handle(socket).await {
                                error!("Session error with {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        let Self { listener, config, .. } = self;
        drop(listener);

        let grace = Duration::from_secs(config.smtp.shutdown_grace_secs);
        if !connections.is_empty() {
            info!(
                "Waiting up to {:?} for {} open connections",
                grace,
                connections.len()
            );
        }

        let finished = timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            warn!(
                "Grace period elapsed, aborting {} connections",
                connections.len()
            );
            connections.shutdown().await;
        }

        info!("SMTP server stopped");
        Ok(())
    }
}
