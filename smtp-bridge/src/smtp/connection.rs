use crate::auth::Credentials;
use crate::error::{BridgeError, Result};
use crate::smtp::commands::SmtpCommand;
use crate::smtp::session::{Session, SessionState};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Maximum line length in SMTP protocol (RFC 5321)
const MAX_LINE_LENGTH: usize = 1000;

/// Timeout for reading a command line
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Timeout for reading DATA content
const DATA_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

/// Maximum number of errors before disconnecting
const MAX_ERRORS: usize = 10;

/// Outcome of reading the DATA section
enum DataOutcome {
    Complete(Vec<u8>),
    TooLarge,
}

/// Drives one SMTP connection and feeds the [`Session`] state machine
///
/// Framing, command parsing, the AUTH PLAIN exchange and DATA
/// dot-unstuffing live here; transaction rules live in the session.
pub struct Connection {
    session: Session,
    hostname: String,
    greeted: bool,
    error_count: usize,
    max_message_size: usize,
    max_recipients: usize,
}

impl Connection {
    pub fn new(
        session: Session,
        hostname: String,
        max_message_size: usize,
        max_recipients: usize,
    ) -> Self {
        Self {
            session,
            hostname,
            greeted: false,
            error_count: 0,
            max_message_size,
            max_recipients,
        }
    }

    /// Run the SMTP dialogue until QUIT, disconnect or too many errors
    pub async fn handle<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf_reader = BufReader::new(stream);
        buf_reader
            .write_all(format!("220 {} ESMTP Service Ready\r\n", self.hostname).as_bytes())
            .await?;

        let mut line = String::new();

        loop {
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors, disconnecting");
                buf_reader
                    .write_all(b"421 Too many errors, closing connection\r\n")
                    .await?;
                break;
            }

            line.clear();
            let n = match timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error reading line: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    buf_reader
                        .write_all(b"421 Timeout, closing connection\r\n")
                        .await?;
                    break;
                }
            };

            if n == 0 {
                debug!("Client disconnected");
                break;
            }

            if line.len() > MAX_LINE_LENGTH {
                error!("Line too long: {} bytes", line.len());
                buf_reader.write_all(b"500 Line too long\r\n").await?;
                self.error_count += 1;
                continue;
            }

            let line_trimmed = line.trim_end();
            debug!("Received: {}", line_trimmed);

            let cmd = match SmtpCommand::parse(line_trimmed) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("Command parse error: {}", e);
                    buf_reader
                        .write_all(b"501 Syntax error in parameters or arguments\r\n")
                        .await?;
                    self.error_count += 1;
                    continue;
                }
            };

            let response = match cmd {
                SmtpCommand::Auth(mechanism, initial) => {
                    self.handle_auth(&mechanism, initial, &mut buf_reader).await?
                }
                SmtpCommand::Data => self.handle_data(&mut buf_reader).await?,
                SmtpCommand::Quit => {
                    info!("QUIT command");
                    buf_reader
                        .write_all(format!("221 {} closing connection\r\n", self.hostname).as_bytes())
                        .await?;
                    break;
                }
                other => self.handle_command(other),
            };

            if response.starts_with('4') || response.starts_with('5') {
                self.error_count += 1;
            }
            buf_reader.write_all(response.as_bytes()).await?;
        }

        self.session.logout();
        Ok(())
    }

    fn handle_command(&mut self, cmd: SmtpCommand) -> String {
        match cmd {
            SmtpCommand::Helo(domain) => {
                info!("HELO from {}", domain);
                self.greeted = true;
                self.session.reset();
                format!("250 {} Hello {}\r\n", self.hostname, domain)
            }
            SmtpCommand::Ehlo(domain) => {
                info!("EHLO from {}", domain);
                self.greeted = true;
                self.session.reset();

                let mut response = format!("250-{} Hello {}\r\n", self.hostname, domain);
                response.push_str(&format!("250-SIZE {}\r\n", self.max_message_size));
                response.push_str("250-8BITMIME\r\n");
                response.push_str("250-AUTH PLAIN\r\n");
                response.push_str("250 HELP\r\n");
                response
            }
            SmtpCommand::MailFrom(from) => {
                if !self.greeted {
                    return "503 5.5.1 Send HELO/EHLO first\r\n".to_string();
                }
                if from.is_empty() {
                    warn!("Rejecting null reverse-path");
                    return "553 5.1.7 Null sender not accepted\r\n".to_string();
                }
                match self.session.mail(&from) {
                    Ok(()) => "250 2.1.0 OK\r\n".to_string(),
                    Err(e) => e.smtp_reply(),
                }
            }
            SmtpCommand::RcptTo(to) => {
                if to.is_empty() {
                    return "501 5.1.3 Empty recipient\r\n".to_string();
                }
                let count = self.session.current().map(|m| m.to.len()).unwrap_or(0);
                if count >= self.max_recipients {
                    warn!("Too many recipients: {}", count);
                    return format!(
                        "452 4.5.3 Too many recipients (max {})\r\n",
                        self.max_recipients
                    );
                }
                match self.session.rcpt(&to) {
                    Ok(()) => "250 2.1.5 OK\r\n".to_string(),
                    Err(e) => e.smtp_reply(),
                }
            }
            SmtpCommand::Rset => {
                info!("RSET command");
                self.session.reset();
                "250 2.0.0 OK\r\n".to_string()
            }
            SmtpCommand::Noop => "250 2.0.0 OK\r\n".to_string(),
            SmtpCommand::Unknown(cmd) => {
                warn!("Unknown command: {}", cmd);
                "502 5.5.2 Command not implemented\r\n".to_string()
            }
            // Handled in handle() since they need the stream
            SmtpCommand::Auth(..) | SmtpCommand::Data | SmtpCommand::Quit => {
                "503 5.5.1 Bad sequence of commands\r\n".to_string()
            }
        }
    }

    /// AUTH PLAIN, with or without an initial response
    async fn handle_auth<S>(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
        buf_reader: &mut BufReader<S>,
    ) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if mechanism != "PLAIN" {
            return Ok("504 5.5.4 Authentication mechanism not supported\r\n".to_string());
        }
        if self.session.auth_user().is_some() {
            return Ok("503 5.5.1 Already authenticated\r\n".to_string());
        }
        if self.session.state() == SessionState::InTransaction {
            return Ok("503 5.5.1 AUTH not allowed during a transaction\r\n".to_string());
        }

        let auth_data = match initial_response {
            Some(data) => data,
            None => {
                buf_reader.write_all(b"334 \r\n").await?;

                let mut line = String::new();
                timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line))
                    .await
                    .map_err(|_| BridgeError::SmtpProtocol("AUTH timeout".to_string()))??;
                line.trim().to_string()
            }
        };

        if auth_data == "*" {
            return Ok("501 5.0.0 Authentication cancelled\r\n".to_string());
        }

        let (username, password) = match Credentials::decode_plain_auth(&auth_data) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Malformed AUTH PLAIN data: {}", e);
                return Ok("501 5.5.2 Cannot decode AUTH PLAIN data\r\n".to_string());
            }
        };

        match self.session.auth_plain(&username, &password) {
            Ok(()) => Ok("235 2.7.0 Authentication successful\r\n".to_string()),
            Err(e) => Ok(e.smtp_reply()),
        }
    }

    async fn handle_data<S>(&mut self, buf_reader: &mut BufReader<S>) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.session.is_authed() {
            return Ok(BridgeError::NotAuthenticated.smtp_reply());
        }
        match self.session.current() {
            None => return Ok("503 5.5.1 Need MAIL command\r\n".to_string()),
            Some(mail) if mail.to.is_empty() => {
                return Ok("554 5.5.1 No valid recipients\r\n".to_string())
            }
            Some(_) => {}
        }

        info!("DATA command received");
        buf_reader
            .write_all(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
            .await?;

        let data = match self.receive_data(buf_reader).await? {
            DataOutcome::Complete(data) => data,
            DataOutcome::TooLarge => {
                self.session.reset();
                return Ok(format!(
                    "552 5.3.4 Message too large (max {} bytes)\r\n",
                    self.max_message_size
                ));
            }
        };

        match self.session.data(&data[..]).await {
            Ok(()) => {
                info!("Message accepted for delivery");
                Ok("250 2.0.0 OK: Message queued\r\n".to_string())
            }
            Err(e) => {
                error!("Failed to accept message: {}", e);
                Ok(e.smtp_reply())
            }
        }
    }

    /// Read lines until `<CRLF>.<CRLF>`, undoing dot-stuffing
    async fn receive_data<S>(&mut self, buf_reader: &mut BufReader<S>) -> Result<DataOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut data = Vec::new();
        let mut line = Vec::new();
        let mut too_large = false;
        // Set while the previous read stopped at the cap, before a newline
        let mut mid_line = false;
        let cap = self.max_message_size.saturating_add(3) as u64;

        loop {
            line.clear();

            let mut limited = (&mut *buf_reader).take(cap);
            let n = match timeout(DATA_TIMEOUT, limited.read_until(b'\n', &mut line)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error during DATA: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("DATA timeout");
                    return Err(BridgeError::SmtpProtocol("Timeout during DATA".to_string()));
                }
            };

            if n == 0 {
                return Err(BridgeError::SmtpProtocol(
                    "Connection closed during DATA".to_string(),
                ));
            }

            let line_start = !mid_line;
            mid_line = !line.ends_with(b"\n");

            if line_start && (line == b".\r\n" || line == b".\n") {
                debug!("End of DATA received, total size: {} bytes", data.len());
                break;
            }

            if too_large {
                continue;
            }

            let content = if line_start && line.starts_with(b".") {
                &line[1..]
            } else {
                &line[..]
            };

            if data.len() + content.len() > self.max_message_size {
                warn!(
                    "Message too large: more than {} bytes",
                    self.max_message_size
                );
                too_large = true;
                data = Vec::new();
                continue;
            }

            data.extend_from_slice(content);
        }

        if too_large {
            Ok(DataOutcome::TooLarge)
        } else {
            Ok(DataOutcome::Complete(data))
        }
    }
}
