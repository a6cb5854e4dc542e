//! SMTP receiving side (RFC 5321 subset)
//!
//! - [`server`]: listener with graceful shutdown
//! - [`connection`]: per-connection protocol loop
//! - [`session`]: SMTP transaction state machine
//! - [`commands`]: SMTP command parsing

pub mod commands;
pub mod connection;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use connection::Connection;
pub use server::SmtpServer;
pub use session::{Session, SessionState};
