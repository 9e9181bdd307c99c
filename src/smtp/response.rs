//! SMTP reply lines

/// Maximum length of a reply line including CRLF
pub const REPLY_LINE_MAX_LENGTH: usize = 512;

/// A single-line SMTP reply, `<code> <message>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The reply code (e.g. 250, 354, 500)
    pub code: u16,
    /// The human-readable text
    pub message: String,
}

impl SmtpResponse {
    pub fn new(code: u16, message: &str) -> Self {
        Self {
            code,
            message: message.to_owned(),
        }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    /// 220, sent as soon as a client connects
    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, &format!("{hostname} Stubmail SMTP service ready"))
    }

    /// 250 reply to HELO and EHLO
    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(250, &format!("{hostname} Hello {client_domain}"))
    }

    /// 354, the go-ahead for message content
    pub fn data_start() -> Self {
        Self::new(354, "Start mail input; end with <CRLF>.<CRLF>")
    }

    pub fn quit() -> Self {
        Self::new(221, "Bye")
    }

    /// Format the reply for the wire.
    ///
    /// Replies that would exceed [`REPLY_LINE_MAX_LENGTH`] keep their code
    /// but lose their text.
    pub fn format(&self) -> String {
        let line = format!("{} {}\r\n", self.code, self.message);
        if line.len() > REPLY_LINE_MAX_LENGTH {
            format!("{} Response too long (truncated)\r\n", self.code)
        } else {
            line
        }
    }

    /// Check if this is a success reply (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is an error reply (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.code)
    }
}
