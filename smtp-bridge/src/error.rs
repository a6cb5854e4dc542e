use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Bad sequence of commands: {0}")]
    BadSequence(String),

    #[error("Unknown sender provider: {0}")]
    ProviderUnrecognized(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Dry mode suppressed the provider call.
    #[error("Dry mode enabled, mail not sent")]
    DryRun,

    #[error("Failed to persist mail: {0}")]
    Persistence(String),

    #[error("Mail queue is closed")]
    QueueClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// SMTP reply sent to the client when a session operation fails.
    pub fn smtp_reply(&self) -> String {
        match self {
            Self::NotAuthenticated => "530 5.7.0 Authentication required\r\n".to_string(),
            Self::AuthError(_) => "535 5.7.8 Authentication credentials invalid\r\n".to_string(),
            Self::BadSequence(reason) => format!("503 5.5.1 Bad sequence of commands: {}\r\n", reason),
            Self::QueueClosed => "421 4.3.2 Service shutting down\r\n".to_string(),
            other => format!("451 4.3.0 {}\r\n", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
