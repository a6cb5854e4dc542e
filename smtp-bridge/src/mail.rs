//! Accepted mail and the views providers derive from it
//!
//! A [`Mail`] is built up by an SMTP session: the envelope first (MAIL, RCPT),
//! then the raw message content (DATA). The raw bytes stay the source of truth;
//! [`Mail::set_data`] derives the header map and the body text from them.
//!
//! Header parsing is deliberately simple. Duplicate header names collapse to
//! the last occurrence, which is enough to pick a subject and a charset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Charset reported when the message does not declare one
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// An accepted message with its envelope and parsed content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub mail_data: Vec<u8>,
}

/// How the body should be presented to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Text,
    Html,
}

impl Mail {
    /// Start a new envelope
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    pub fn add_recipient(&mut self, to: impl Into<String>) {
        self.to.push(to.into());
    }

    /// Store the raw content and derive headers and body from it
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.headers = parse_headers(&data);
        self.body = parse_body(&data);
        self.mail_data = data;
    }

    /// A mail can be queued once it has a sender and at least one recipient
    pub fn is_valid(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty()
    }

    /// Recipients in the order they were given
    pub fn dest_list(&self) -> Vec<String> {
        self.to.clone()
    }

    pub fn subject(&self) -> &str {
        self.headers.get("Subject").map(String::as_str).unwrap_or("")
    }

    /// `charset=` parameter of the Content-Type header, quotes stripped
    pub fn charset(&self) -> String {
        let content_type = match self.headers.get("Content-Type") {
            Some(value) if !value.is_empty() => value,
            _ => return DEFAULT_CHARSET.to_string(),
        };

        let lower = content_type.to_ascii_lowercase();
        let Some(start) = lower.find("charset=") else {
            return DEFAULT_CHARSET.to_string();
        };

        let charset = content_type[start + "charset=".len()..]
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .replace('"', "");

        if charset.is_empty() {
            DEFAULT_CHARSET.to_string()
        } else {
            charset
        }
    }

    pub fn body_kind(&self) -> BodyKind {
        match self.headers.get("Content-Type") {
            Some(value) if value.contains("text/html") => BodyKind::Html,
            _ => BodyKind::Text,
        }
    }
}

fn is_blank(line: &str) -> bool {
    line.is_empty() || line == "\r"
}

/// Extract the header block, up to the first blank line
pub fn parse_headers(data: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(data);
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut last_key: Option<String> = None;

    for line in text.split('\n') {
        if is_blank(line) {
            break;
        }

        // Folded continuation of the previous header
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(key) = &last_key {
                if let Some(value) = headers.get_mut(key) {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            }
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.to_string(), value.trim().to_string());
            last_key = Some(key.to_string());
        } else {
            last_key = None;
        }
    }

    headers
}

/// Everything after the first blank line, rejoined with `\n`
pub fn parse_body(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    let lines: Vec<&str> = text.split('\n').collect();

    match lines.iter().position(|line| is_blank(line)) {
        Some(index) => lines[index + 1..].join("\n"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_with(raw: &str) -> Mail {
        let mut mail = Mail::new("a@b");
        mail.add_recipient("c@d");
        mail.set_data(raw.as_bytes().to_vec());
        mail
    }

    #[test]
    fn test_subject_and_body() {
        let mail = mail_with("From: a@b\r\nSubject: hi\r\n\r\nhello");
        assert_eq!(mail.subject(), "hi");
        assert_eq!(mail.body, "hello");
        assert_eq!(mail.headers.get("From").map(String::as_str), Some("a@b"));
    }

    #[test]
    fn test_body_keeps_multiple_lines() {
        let mail = mail_with("Subject: x\r\n\r\nline one\r\nline two: not a header\r\n");
        assert_eq!(mail.body, "line one\r\nline two: not a header\r\n");
        assert!(!mail.headers.contains_key("line two"));
    }

    #[test]
    fn test_no_blank_line_means_no_body() {
        let mail = mail_with("Subject: only headers\r\n");
        assert_eq!(mail.subject(), "only headers");
        assert_eq!(mail.body, "");
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let mail = mail_with("Subject: first\r\nSubject: second\r\n\r\n");
        assert_eq!(mail.subject(), "second");
    }

    #[test]
    fn test_folded_header() {
        let mail = mail_with("Content-Type: text/plain;\r\n\tcharset=\"utf-8\"\r\n\r\nbody");
        assert_eq!(mail.charset(), "utf-8");
    }

    #[test]
    fn test_missing_subject() {
        let mail = mail_with("From: a@b\r\n\r\nhello");
        assert_eq!(mail.subject(), "");
    }

    #[test]
    fn test_charset_quoted() {
        let mail = mail_with("Content-Type: text/plain; charset=\"ISO-8859-1\"\r\n\r\nx");
        assert_eq!(mail.charset(), "ISO-8859-1");
    }

    #[test]
    fn test_charset_defaults() {
        assert_eq!(mail_with("Subject: x\r\n\r\nx").charset(), "UTF-8");
        assert_eq!(mail_with("Content-Type: text/plain\r\n\r\nx").charset(), "UTF-8");
        assert_eq!(mail_with("Content-Type: text/plain; charset=\r\n\r\nx").charset(), "UTF-8");
        assert_eq!(Mail::default().charset(), "UTF-8");
    }

    #[test]
    fn test_charset_followed_by_parameter() {
        let mail = mail_with("Content-Type: text/plain; charset=us-ascii; format=flowed\r\n\r\nx");
        assert_eq!(mail.charset(), "us-ascii");
    }

    #[test]
    fn test_body_kind() {
        assert_eq!(mail_with("Content-Type: text/html; charset=utf-8\r\n\r\n<p>x</p>").body_kind(), BodyKind::Html);
        assert_eq!(mail_with("Content-Type: text/plain\r\n\r\nx").body_kind(), BodyKind::Text);
        assert_eq!(mail_with("Subject: x\r\n\r\nx").body_kind(), BodyKind::Text);
    }

    #[test]
    fn test_validity() {
        let mut mail = Mail::default();
        mail.add_recipient("b@y.com");
        assert!(!mail.is_valid());

        let mut mail = Mail::new("a@x.com");
        assert!(!mail.is_valid());
        mail.add_recipient("b@y.com");
        assert!(mail.is_valid());
        assert_eq!(mail.dest_list(), vec!["b@y.com".to_string()]);
    }

    #[test]
    fn test_views_empty_before_data() {
        let mail = Mail::new("a@x.com");
        assert!(mail.headers.is_empty());
        assert!(mail.body.is_empty());
        assert!(mail.mail_data.is_empty());
    }
}
