//! Periodic dispatch of queued mail
//!
//! Every `dispatch_interval` seconds the dispatcher drains the queue and
//! calls the configured provider once per mail. A mail the provider refuses
//! is written to the fallback directory as JSON for manual recovery; if even
//! that fails, the mail is logged and dropped.
//!
//! Delivery failures are never reported back to the SMTP client: the
//! transaction was already acknowledged when the mail was queued.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mail::Mail;
use crate::provider::SenderProvider;
use crate::queue::MailQueue;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// File name prefix of fallback files
pub const FALLBACK_PREFIX: &str = "smtpbridge-mail-";

/// A mail the provider did not accept, as written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMail {
    pub id: String,
    pub failed_at: DateTime<Utc>,
    pub error: String,
    pub from: String,
    pub to: Vec<String>,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Raw message, base64 encoded
    pub mail_data: String,
}

impl FailedMail {
    pub fn new(mail: &Mail, error: &BridgeError) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            failed_at: Utc::now(),
            error: error.to_string(),
            from: mail.from.clone(),
            to: mail.to.clone(),
            headers: mail.headers.clone(),
            body: mail.body.clone(),
            mail_data: BASE64.encode(&mail.mail_data),
        }
    }

    /// Raw message bytes
    pub fn raw_data(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.mail_data)
            .map_err(|e| BridgeError::Persistence(format!("Invalid base64 data: {}", e)))
    }
}

/// Best-effort on-disk store for undeliverable mail
#[derive(Debug, Clone)]
pub struct FallbackStore {
    dir: PathBuf,
}

impl FallbackStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `mail` to a new uniquely named file and return its path
    pub async fn persist(&self, mail: &Mail, error: &BridgeError) -> Result<PathBuf> {
        let record = FailedMail::new(mail, error);
        let json = serde_json::to_vec_pretty(&record)?;

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            BridgeError::Persistence(format!("Failed to create {:?}: {}", self.dir, e))
        })?;

        let path = self.dir.join(format!("{}{}.json", FALLBACK_PREFIX, record.id));
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| BridgeError::Persistence(format!("Failed to create {:?}: {}", path, e)))?;

        file.write_all(&json)
            .await
            .map_err(|e| BridgeError::Persistence(format!("Failed to write {:?}: {}", path, e)))?;
        file.flush()
            .await
            .map_err(|e| BridgeError::Persistence(format!("Failed to write {:?}: {}", path, e)))?;

        Ok(path)
    }
}

/// Counters for one dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub persisted: usize,
    pub dropped: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.sent + self.persisted + self.dropped
    }
}

/// Drains the queue into a provider on a fixed interval
pub struct Dispatcher {
    queue: Arc<MailQueue>,
    config: Arc<Config>,
    provider: Arc<dyn SenderProvider>,
    fallback: FallbackStore,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<MailQueue>,
        config: Arc<Config>,
        provider: Arc<dyn SenderProvider>,
    ) -> Self {
        let fallback = FallbackStore::new(config.fallback_dir());
        Self {
            queue,
            config,
            provider,
            fallback,
        }
    }

    /// Run one dispatch cycle
    pub async fn dispatch_once(&self) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.queue.is_empty() {
            return report;
        }

        let mut drain = self.queue.drain().await;
        info!("Dispatching mail queue of size {}", self.queue.len());

        while let Some(mail) = drain.next_mail() {
            match self.provider.send_mail(&mail, &self.config).await {
                Ok(()) => {
                    debug!("Mail from {} sent via {}", mail.from, self.provider.name());
                    report.sent += 1;
                }
                Err(e) => {
                    match &e {
                        BridgeError::DryRun => info!("Mail from {} not sent: {}", mail.from, e),
                        _ => error!("Error sending mail from {}: {}", mail.from, e),
                    }

                    match self.fallback.persist(&mail, &e).await {
                        Ok(path) => {
                            info!("Wrote mail to {}", path.display());
                            report.persisted += 1;
                        }
                        Err(persist_error) => {
                            error!(
                                "Dropping mail from {} to {:?}: {}",
                                mail.from, mail.to, persist_error
                            );
                            report.dropped += 1;
                        }
                    }
                }
            }
        }

        if report.total() > 0 {
            info!(
                "Dispatch cycle done: {} sent, {} saved to {}, {} dropped",
                report.sent,
                report.persisted,
                self.fallback.dir().display(),
                report.dropped
            );
        }

        report
    }

    /// Dispatch on every tick until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.config.dispatch_interval.max(1));
        info!(
            "Starting mail queue dispatcher (every {:?}, provider {})",
            period,
            self.provider.name()
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.dispatch_once().await;
                }
            }
        }

        if !self.queue.is_empty() {
            warn!("Stopping dispatcher with {} undelivered mails", self.queue.len());
        }
        info!("Stopping mail queue dispatcher");
    }
}
