//! Captured mail message

use std::collections::HashSet;
use std::fmt;
use std::time::SystemTime;

/// A single header line as it arrived, `name: value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A mail message captured by the server.
///
/// Headers are kept in arrival order, repeated names included. The body is
/// everything after the header block, lines joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    headers: Vec<Header>,
    body: String,
    /// Reverse-path from `MAIL FROM`
    sender: String,
    /// Forward-paths from each `RCPT TO`
    recipients: Vec<String>,
    received: SystemTime,
}

impl MailMessage {
    /// Create an empty message
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            body: String::new(),
            sender: String::new(),
            recipients: Vec::new(),
            received: SystemTime::now(),
        }
    }

    /// Append a header after all existing ones
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Distinct header names, in order of first occurrence
    pub fn header_names(&self) -> impl Iterator<Item = &str> + '_ {
        let mut seen = HashSet::new();
        self.headers
            .iter()
            .map(|header| header.name.as_str())
            .filter(move |name| seen.insert(*name))
    }

    /// Every value recorded under `name`, in the order the headers arrived
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|header| header.name == name)
            .map(|header| header.value.as_str())
            .collect()
    }

    pub fn first_header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name == name)
            .map(|header| header.value.as_str())
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Append text to the body as-is
    pub fn append_body(&mut self, text: &str) {
        self.body.push_str(text);
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Envelope sender. Empty for the null reverse-path `<>`.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Envelope recipients in the order they were given
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Check if this message was addressed to a specific envelope recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.recipients.iter().any(|addr| addr == recipient)
    }

    /// First `Subject` header, if any
    pub fn subject(&self) -> Option<&str> {
        self.first_header_value("Subject")
    }

    /// When the transaction carrying this message was opened
    pub fn received(&self) -> SystemTime {
        self.received
    }

    /// Check if the serialized message contains `text` in headers or body
    pub fn contains_text(&self, text: &str) -> bool {
        self.body.contains(text)
            || self
                .headers
                .iter()
                .any(|header| header.name.contains(text) || header.value.contains(text))
    }

    pub(crate) fn set_sender(&mut self, sender: String) {
        self.sender = sender;
    }

    pub(crate) fn add_recipient(&mut self, recipient: String) {
        self.recipients.push(recipient);
    }

    /// Extend the most recent header's value with a folded continuation line.
    /// Returns false when there is no header to extend.
    pub(crate) fn continue_last_header(&mut self, text: &str) -> bool {
        match self.headers.last_mut() {
            Some(header) => {
                header.value.push_str(text);
                true
            }
            None => false,
        }
    }
}

impl Default for MailMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MailMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.headers {
            writeln!(f, "{}: {}", header.name, header.value)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.body)
    }
}
