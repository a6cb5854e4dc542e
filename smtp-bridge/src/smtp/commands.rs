use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// Mechanism and optional initial response
    Auth(String, Option<String>),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(BridgeError::SmtpProtocol("Empty command".to_string()));
        }

        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command.to_uppercase(), args.trim()),
            None => (line.to_uppercase(), ""),
        };

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(BridgeError::SmtpProtocol("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(BridgeError::SmtpProtocol("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "AUTH" => {
                let mut parts = args.split_whitespace();
                let mechanism = parts
                    .next()
                    .ok_or_else(|| BridgeError::SmtpProtocol("AUTH requires mechanism".to_string()))?
                    .to_uppercase();
                let initial = parts.next().map(str::to_string);
                Ok(SmtpCommand::Auth(mechanism, initial))
            }
            "MAIL" => Ok(SmtpCommand::MailFrom(Self::parse_path(args, "FROM:")?)),
            "RCPT" => Ok(SmtpCommand::RcptTo(Self::parse_path(args, "TO:")?)),
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    /// Parse `FROM:<addr> [params]` or `TO:<addr> [params]`
    ///
    /// ESMTP parameters such as `SIZE=` or `BODY=` are accepted and ignored.
    fn parse_path(args: &str, prefix: &str) -> Result<String> {
        let path = match args.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(prefix) => args[prefix.len()..].trim_start(),
            _ => {
                return Err(BridgeError::SmtpProtocol(format!(
                    "Invalid syntax, expected {}",
                    prefix
                )))
            }
        };
        let address = if let Some(rest) = path.strip_prefix('<') {
            let end = rest
                .find('>')
                .ok_or_else(|| BridgeError::SmtpProtocol("Unterminated address".to_string()))?;
            &rest[..end]
        } else {
            path.split_whitespace().next().unwrap_or("")
        };

        Ok(address.to_string())
    }
}
