use crate::auth::Credentials;
use crate::error::{BridgeError, Result};
use crate::mail::Mail;
use crate::queue::MailQueue;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

/// Where a session stands in the SMTP transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// MAIL accepted, collecting recipients
    InTransaction,
}

/// SMTP transaction state machine, one per connection
///
/// The connection driver calls these operations as commands arrive. A mail
/// reaches the queue only through [`Session::data`], and only once per
/// envelope.
pub struct Session {
    credentials: Arc<Credentials>,
    queue: Arc<MailQueue>,
    is_authed: bool,
    auth_user: Option<String>,
    current: Option<Mail>,
}

impl Session {
    pub fn new(credentials: Arc<Credentials>, queue: Arc<MailQueue>, allow_anon: bool) -> Self {
        if allow_anon {
            debug!("Allowing anonymous SMTP");
        }

        Self {
            credentials,
            queue,
            is_authed: allow_anon,
            auth_user: None,
            current: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match (self.is_authed, &self.current) {
            (false, _) => SessionState::Unauthenticated,
            (true, None) => SessionState::Authenticated,
            (true, Some(_)) => SessionState::InTransaction,
        }
    }

    pub fn is_authed(&self) -> bool {
        self.is_authed
    }

    pub fn auth_user(&self) -> Option<&str> {
        self.auth_user.as_deref()
    }

    pub fn current(&self) -> Option<&Mail> {
        self.current.as_ref()
    }

    pub fn auth_plain(&mut self, username: &str, password: &str) -> Result<()> {
        info!("AUTH PLAIN for {}", username);
        match self.credentials.verify(username, password) {
            Ok(()) => {
                self.is_authed = true;
                self.auth_user = Some(username.to_string());
                info!("Authentication successful for {}", username);
                Ok(())
            }
            Err(e) => {
                warn!("Authentication failed for {}: {}", username, e);
                Err(e)
            }
        }
    }

    /// Start a new envelope, dropping any unfinished one
    pub fn mail(&mut self, from: &str) -> Result<()> {
        self.require_auth()?;
        info!("MAIL FROM: {}", from);
        self.current = Some(Mail::new(from));
        Ok(())
    }

    pub fn rcpt(&mut self, to: &str) -> Result<()> {
        self.require_auth()?;
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| BridgeError::BadSequence("need MAIL before RCPT".to_string()))?;

        info!("RCPT TO: {}", to);
        current.add_recipient(to);
        Ok(())
    }

    /// Read the message content and hand the finished mail to the queue
    pub async fn data<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.require_auth()?;
        match &self.current {
            None => {
                return Err(BridgeError::BadSequence(
                    "need MAIL before DATA".to_string(),
                ))
            }
            Some(mail) if !mail.is_valid() => {
                return Err(BridgeError::BadSequence(
                    "need RCPT before DATA".to_string(),
                ))
            }
            Some(_) => {}
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        info!("Data size: {} bytes", data.len());

        let mut mail = self.current.take().ok_or_else(|| {
            BridgeError::BadSequence("need MAIL before DATA".to_string())
        })?;
        mail.set_data(data);

        self.queue.enqueue(mail).await
    }

    pub fn reset(&mut self) {
        debug!("Reset");
        self.current = None;
    }

    pub fn logout(&mut self) {
        debug!("Logout");
    }

    fn require_auth(&self) -> Result<()> {
        if self.is_authed {
            Ok(())
        } else {
            warn!("Not authenticated");
            Err(BridgeError::NotAuthenticated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(allow_anon: bool) -> (Session, Arc<MailQueue>) {
        let credentials = Arc::new(Credentials::from_entries(&["user:pass".to_string()]));
        let queue = Arc::new(MailQueue::new(10));
        let session = Session::new(credentials, Arc::clone(&queue), allow_anon);
        (session, queue)
    }

    #[tokio::test]
    async fn test_unauthenticated_never_enqueues() {
        let (mut session, queue) = setup(false);
        assert_eq!(session.state(), SessionState::Unauthenticated);

        assert!(matches!(session.mail("a@x.com"), Err(BridgeError::NotAuthenticated)));
        assert!(matches!(session.rcpt("b@y.com"), Err(BridgeError::NotAuthenticated)));
        assert!(matches!(
            session.data(&b"Subject: x\r\n\r\nbody"[..]).await,
            Err(BridgeError::NotAuthenticated)
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_auth_then_transaction() {
        let (mut session, queue) = setup(false);

        assert!(session.auth_plain("user", "wrong").is_err());
        assert!(!session.is_authed());

        session.auth_plain("user", "pass").unwrap();
        assert_eq!(session.auth_user(), Some("user"));
        assert_eq!(session.state(), SessionState::Authenticated);

        session.mail("a@x.com").unwrap();
        assert_eq!(session.state(), SessionState::InTransaction);
        session.rcpt("b@y.com").unwrap();
        session.rcpt("c@y.com").unwrap();
        assert!(queue.is_empty());

        session.data(&b"Subject: test\r\n\r\nbody text"[..]).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(session.state(), SessionState::Authenticated);

        let mut drain = queue.drain().await;
        let mail = drain.next_mail().unwrap();
        assert_eq!(mail.from, "a@x.com");
        assert_eq!(mail.to, vec!["b@y.com", "c@y.com"]);
        assert_eq!(mail.subject(), "test");
        assert_eq!(mail.body, "body text");
    }

    #[tokio::test]
    async fn test_anonymous_is_authenticated() {
        let (mut session, queue) = setup(true);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.auth_user(), None);

        session.mail("a@x.com").unwrap();
        session.rcpt("b@y.com").unwrap();
        session.data(&b"\r\nhi"[..]).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_discards_envelope() {
        let (mut session, queue) = setup(true);
        session.mail("a@x.com").unwrap();
        session.rcpt("b@y.com").unwrap();
        session.reset();
        assert!(session.current().is_none());

        assert!(matches!(
            session.data(&b"Subject: x\r\n\r\nbody"[..]).await,
            Err(BridgeError::BadSequence(_))
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_one_mail_per_data() {
        let (mut session, queue) = setup(true);
        session.mail("a@x.com").unwrap();
        session.rcpt("b@y.com").unwrap();
        session.data(&b"\r\nfirst"[..]).await.unwrap();

        // The envelope was consumed by the first DATA
        assert!(session.data(&b"\r\nsecond"[..]).await.is_err());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_mail_replaces_previous_envelope() {
        let (mut session, queue) = setup(true);
        session.mail("old@x.com").unwrap();
        session.rcpt("old@y.com").unwrap();
        session.mail("new@x.com").unwrap();
        assert!(session.current().unwrap().to.is_empty());

        assert!(matches!(
            session.data(&b"\r\nbody"[..]).await,
            Err(BridgeError::BadSequence(_))
        ));
        session.rcpt("new@y.com").unwrap();
        session.data(&b"\r\nbody"[..]).await.unwrap();

        let mut drain = queue.drain().await;
        let mail = drain.next_mail().unwrap();
        assert_eq!(mail.from, "new@x.com");
        assert_eq!(mail.to, vec!["new@y.com"]);
    }

    #[tokio::test]
    async fn test_rcpt_without_mail() {
        let (mut session, _queue) = setup(true);
        assert!(matches!(session.rcpt("b@y.com"), Err(BridgeError::BadSequence(_))));
    }

    #[tokio::test]
    async fn test_data_on_closed_queue() {
        let (mut session, queue) = setup(true);
        queue.close();
        session.mail("a@x.com").unwrap();
        session.rcpt("b@y.com").unwrap();
        assert!(matches!(
            session.data(&b"\r\nbody"[..]).await,
            Err(BridgeError::QueueClosed)
        ));
    }
}
