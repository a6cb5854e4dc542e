//! Amazon SES provider
//!
//! Builds an SES v2 `SendEmail` request from the accepted mail and passes it
//! to an [`SesClient`]. The default [`HttpSesClient`] posts the request as
//! JSON to the configured endpoint and does not sign it. AWS itself rejects
//! unsigned calls, so the endpoint must be a SigV4 signing proxy or an
//! SES-compatible service, and there is no default.
//!
//! Settings (`[sender.settings]`):
//! - `region` (required)
//! - `endpoint` (required): URL of the signing proxy or compatible service
//! - `profile`: forwarded to the endpoint as `X-Smtp-Bridge-Profile`
//! - `timeout_secs`: request timeout, 30 by default

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mail::{BodyKind, Mail};
use crate::provider::SenderProvider;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header carrying the credential profile to a signing proxy
pub const PROFILE_HEADER: &str = "X-Smtp-Bridge-Profile";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SendEmailRequest {
    pub from_email_address: String,
    pub destination: Destination,
    pub content: EmailContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Destination {
    pub to_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailContent {
    pub simple: SimpleMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimpleMessage {
    pub subject: Content,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Body {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Content {
    pub data: String,
    pub charset: String,
}

/// SES settings read from the provider section of the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SesSettings {
    pub region: String,
    pub endpoint: String,
    pub profile: Option<String>,
    pub timeout: Duration,
}

impl SesSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let region = config
            .provider_str_setting("region")
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BridgeError::Config("region not set".to_string()))?
            .to_string();

        let endpoint = config
            .provider_str_setting("endpoint")
            .filter(|e| !e.is_empty())
            .ok_or_else(|| BridgeError::Config("endpoint not set".to_string()))?
            .to_string();

        let timeout_secs = config
            .provider_int_setting("timeout_secs")
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            region,
            endpoint,
            profile: config.provider_str_setting("profile").map(str::to_string),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Transport for SES requests
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SesClient: Send + Sync {
    async fn send_email(&self, settings: &SesSettings, request: &SendEmailRequest) -> Result<()>;
}

/// Posts requests as JSON over HTTPS
#[derive(Clone, Default)]
pub struct HttpSesClient {
    client: reqwest::Client,
}

impl HttpSesClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SesClient for HttpSesClient {
    async fn send_email(&self, settings: &SesSettings, request: &SendEmailRequest) -> Result<()> {
        let mut builder = self
            .client
            .post(&settings.endpoint)
            .timeout(settings.timeout)
            .json(request);

        if let Some(profile) = &settings.profile {
            builder = builder.header(PROFILE_HEADER, profile);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BridgeError::Delivery(format!("SES request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("SES accepted mail ({})", status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(BridgeError::Delivery(format!(
            "SES returned {}: {}",
            status,
            body.trim()
        )))
    }
}

/// The `ses` provider
pub struct SesProvider {
    client: Arc<dyn SesClient>,
}

impl SesProvider {
    pub fn new() -> Self {
        Self::with_client(Arc::new(HttpSesClient::new()))
    }

    pub fn with_client(client: Arc<dyn SesClient>) -> Self {
        Self { client }
    }

    /// Map a mail to the SES request shape
    pub fn build_request(mail: &Mail) -> SendEmailRequest {
        let charset = mail.charset();
        let content = Content {
            data: mail.body.clone(),
            charset: charset.clone(),
        };

        let body = match mail.body_kind() {
            BodyKind::Html => Body {
                text: None,
                html: Some(content),
            },
            BodyKind::Text => Body {
                text: Some(content),
                html: None,
            },
        };

        SendEmailRequest {
            from_email_address: mail.from.clone(),
            destination: Destination {
                to_addresses: mail.dest_list(),
            },
            content: EmailContent {
                simple: SimpleMessage {
                    subject: Content {
                        data: mail.subject().to_string(),
                        charset,
                    },
                    body,
                },
            },
        }
    }
}

impl Default for SesProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SenderProvider for SesProvider {
    async fn send_mail(&self, mail: &Mail, config: &Config) -> Result<()> {
        if config.dry_mode {
            info!("Dry mode enabled, not sending mail from {}", mail.from);
            return Err(BridgeError::DryRun);
        }

        let settings = SesSettings::from_config(config)?;
        let request = Self::build_request(mail);

        debug!(
            "Sending mail from {} to {} recipients via SES ({})",
            mail.from,
            request.destination.to_addresses.len(),
            settings.region
        );
        self.client.send_email(&settings, &request).await
    }

    fn check_config(&self, config: &Config) -> Result<()> {
        if config.dry_mode {
            return Ok(());
        }
        SesSettings::from_config(config).map(|_| ())
    }

    fn name(&self) -> &str {
        "ses"
    }
}
