//! SMTP AUTH PLAIN support
//!
//! Credentials come straight from the configuration as `user:password`
//! strings and are compared in clear. There is no hashing and no rate
//! limiting; the bridge is meant to sit on a trusted network.

use crate::error::{BridgeError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, warn};

/// Configured AUTH PLAIN users
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    users: Vec<(String, String)>,
}

impl Credentials {
    /// Build from `user:password` entries, skipping malformed ones
    pub fn from_entries(entries: &[String]) -> Self {
        let users = entries
            .iter()
            .filter_map(|entry| {
                let parts: Vec<&str> = entry.split(':').collect();
                if parts.len() != 2 {
                    warn!("Ignoring malformed auth user entry");
                    return None;
                }
                Some((parts[0].to_string(), parts[1].to_string()))
            })
            .collect();

        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check a username/password pair against the configured users
    pub fn verify(&self, username: &str, password: &str) -> Result<()> {
        if self.users.is_empty() {
            return Err(BridgeError::AuthError(
                "no auth users configured".to_string(),
            ));
        }

        debug!("Authentication attempt for {}", username);
        if self
            .users
            .iter()
            .any(|(user, pass)| user == username && pass == password)
        {
            Ok(())
        } else {
            Err(BridgeError::AuthError(
                "invalid username or password".to_string(),
            ))
        }
    }

    /// Decode PLAIN authentication data
    ///
    /// Format: `authzid\0username\0password` (base64 encoded)
    pub fn decode_plain_auth(auth_data: &str) -> Result<(String, String)> {
        let decoded = BASE64
            .decode(auth_data.trim())
            .map_err(|e| BridgeError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

        let parts: Vec<&str> = std::str::from_utf8(&decoded)
            .map_err(|e| BridgeError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))?
            .split('\0')
            .collect();

        if parts.len() != 3 {
            return Err(BridgeError::SmtpProtocol(
                "Invalid PLAIN auth format".to_string(),
            ));
        }

        // parts[0] is the authorization identity, ignored
        Ok((parts[1].to_string(), parts[2].to_string()))
    }
}
