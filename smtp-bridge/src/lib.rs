//! smtp-bridge: SMTP to email-sending API bridge
//!
//! Accepts mail over SMTP, authenticates the sender with AUTH PLAIN, buffers
//! accepted messages in memory and relays them on a timer to an
//! email-sending provider (Amazon SES).
//!
//! # Pipeline
//!
//! ```text
//! connection → Session → MailQueue → Dispatcher → SenderProvider
//!                                         ↓ (on failure)
//!                                  fallback JSON file
//! ```
//!
//! Relaying is asynchronous: a client gets `250` as soon as the mail is
//! queued, and never learns whether the provider later accepted it. Mails the
//! provider refuses are written to the fallback directory for manual
//! recovery. The queue is not durable; mails still buffered at shutdown are
//! lost.
//!
//! # Example
//!
//! ```no_run
//! use smtp_bridge::{Bridge, Config, ProviderRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("/etc/smtpbridge/config.toml")?;
//!     let bridge = Bridge::bind(config, &ProviderRegistry::with_defaults()).await?;
//!
//!     let shutdown = CancellationToken::new();
//!     bridge.run(shutdown).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`mail`]: Accepted mail and header parsing
//! - [`auth`]: AUTH PLAIN credentials
//! - [`queue`]: Bounded in-memory mail queue
//! - [`smtp`]: SMTP receiving side
//! - [`provider`]: Outbound providers and their registry
//! - [`dispatch`]: Periodic dispatch and fallback persistence
//! - [`bridge`]: Lifecycle of the whole pipeline

pub mod auth;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod provider;
pub mod queue;
pub mod smtp;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Config;
pub use error::{BridgeError, Result};
pub use mail::Mail;
pub use provider::{ProviderRegistry, SenderProvider};
pub use queue::MailQueue;
