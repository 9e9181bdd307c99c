//! SMTP session: one client connection, from greeting to QUIT

use std::io::{self, BufRead, Write};

use tracing::{debug, trace};

use crate::smtp::commands::SmtpCommand;
use crate::smtp::error::SmtpError;
use crate::smtp::message::MailMessage;
use crate::smtp::response::SmtpResponse;
use crate::smtp::store::MailStore;

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Greeting sent, nothing received yet
    Connected,
    /// HELO/EHLO received, or a transaction just finished
    Greeted,
    /// MAIL FROM received - ready for RCPT commands
    Mail,
    /// At least one RCPT TO received - ready for DATA or more RCPT commands
    Rcpt,
    /// DATA accepted - collecting message content until `.`
    Data,
    /// QUIT received or the peer went away
    Closed,
}

/// Where the next DATA line goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataPhase {
    AwaitingHeaders { header_seen: bool },
    InBody { has_content: bool },
}

/// Scratch state for the mail transaction in progress
#[derive(Debug)]
struct Transaction {
    message: MailMessage,
    phase: DataPhase,
}

impl Transaction {
    fn new(sender: String) -> Self {
        let mut message = MailMessage::new();
        message.set_sender(sender);
        Self {
            message,
            phase: DataPhase::AwaitingHeaders { header_seen: false },
        }
    }

    fn accept_line(&mut self, line: &str) {
        match self.phase {
            DataPhase::AwaitingHeaders { header_seen } => {
                if line.is_empty() && header_seen {
                    self.phase = DataPhase::InBody { has_content: false };
                } else if header_seen && line.starts_with([' ', '\t']) {
                    self.message.continue_last_header(line);
                } else if let Some((name, value)) = parse_header(line) {
                    self.message.add_header(name, value);
                    self.phase = DataPhase::AwaitingHeaders { header_seen: true };
                } else {
                    self.append_body_line(line);
                }
            }
            DataPhase::InBody { .. } => self.append_body_line(line),
        }
    }

    fn append_body_line(&mut self, line: &str) {
        if let DataPhase::InBody { has_content: true } = self.phase {
            self.message.append_body("\n");
        }
        self.message.append_body(line);
        self.phase = DataPhase::InBody { has_content: true };
    }
}

/// Split `name: value`. The name must be non-empty and free of whitespace.
fn parse_header(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, value.trim()))
}

/// Strip the LF or CRLF a line was read with
fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Whether a read failed only because the peer stayed silent too long.
/// Platforms report an expired socket timeout as either kind.
fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Drives the SMTP dialogue for a single client connection, handing every
/// finished message to a [`MailStore`].
pub struct SmtpSession<'a> {
    hostname: &'a str,
    store: &'a dyn MailStore,
    state: SmtpState,
    client_domain: Option<String>,
    transaction: Option<Transaction>,
}

impl<'a> SmtpSession<'a> {
    pub fn new(hostname: &'a str, store: &'a dyn MailStore) -> Self {
        Self {
            hostname,
            store,
            state: SmtpState::Connected,
            client_domain: None,
            transaction: None,
        }
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    /// Domain given with the last HELO/EHLO
    pub fn client_domain(&self) -> Option<&str> {
        self.client_domain.as_deref()
    }

    /// The 220 reply that opens every session
    pub fn greeting(&self) -> SmtpResponse {
        SmtpResponse::greeting(self.hostname)
    }

    /// Run the session over a line stream until QUIT or end of input.
    ///
    /// Any transaction still open when the stream ends is discarded. A read
    /// timeout counts as the end of the stream. Any other read or write
    /// failure ends the session the same way and is returned.
    pub fn run<R: BufRead, W: Write>(&mut self, reader: R, writer: W) -> Result<(), SmtpError> {
        let result = self.converse(reader, writer);
        if self.transaction.take().is_some() {
            debug!(state = ?self.state, "discarding unfinished transaction");
        }
        self.state = SmtpState::Closed;
        result
    }

    fn converse<R: BufRead, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), SmtpError> {
        send(&mut writer, &self.greeting())?;

        let mut buffer = Vec::new();
        while self.state != SmtpState::Closed {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => {
                    debug!("connection closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) if is_timeout(&e) => {
                    debug!("read timed out, closing connection");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let line = String::from_utf8_lossy(strip_line_ending(&buffer));
            trace!(line = %line, "incoming");
            if let Some(response) = self.handle_line(&line) {
                send(&mut writer, &response)?;
            }
        }

        Ok(())
    }

    /// Feed one line, without its line ending, to the state machine.
    ///
    /// Returns the reply to send, if the line calls for one.
    pub fn handle_line(&mut self, line: &str) -> Option<SmtpResponse> {
        match self.state {
            SmtpState::Closed => None,
            SmtpState::Data => self.handle_data_line(line),
            _ => {
                if line.trim().is_empty() {
                    return None;
                }
                let response = line
                    .parse::<SmtpCommand>()
                    .and_then(|command| self.execute(command))
                    .unwrap_or_else(|e| {
                        debug!(error = %e, "rejected command");
                        e.to_response()
                    });
                Some(response)
            }
        }
    }

    fn handle_data_line(&mut self, line: &str) -> Option<SmtpResponse> {
        if line == "." {
            return Some(self.finish_transaction());
        }

        // Undo the sender's dot-stuffing
        let line = match line.strip_prefix('.') {
            Some(rest) if rest.starts_with('.') => rest,
            _ => line,
        };
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.accept_line(line);
        }
        None
    }

    fn finish_transaction(&mut self) -> SmtpResponse {
        let message = self
            .transaction
            .take()
            .map(|transaction| transaction.message)
            .unwrap_or_default();
        debug!(
            sender = message.sender(),
            recipients = message.recipients().len(),
            headers = message.headers().len(),
            "message received"
        );
        self.store.add(message);
        self.state = SmtpState::Greeted;
        SmtpResponse::ok()
    }

    fn execute(&mut self, command: SmtpCommand) -> Result<SmtpResponse, SmtpError> {
        trace!(verb = command.verb(), state = ?self.state, "command");
        match command {
            SmtpCommand::Helo(domain) | SmtpCommand::Ehlo(domain) => {
                let response = SmtpResponse::helo(self.hostname, &domain);
                self.client_domain = Some(domain);
                self.transaction = None;
                self.state = SmtpState::Greeted;
                Ok(response)
            }
            SmtpCommand::Mail(sender) => {
                self.require("MAIL", &[SmtpState::Connected, SmtpState::Greeted])?;
                self.transaction = Some(Transaction::new(sender));
                self.state = SmtpState::Mail;
                Ok(SmtpResponse::ok())
            }
            SmtpCommand::Rcpt(recipient) => {
                self.require("RCPT", &[SmtpState::Mail, SmtpState::Rcpt])?;
                if let Some(transaction) = self.transaction.as_mut() {
                    transaction.message.add_recipient(recipient);
                }
                self.state = SmtpState::Rcpt;
                Ok(SmtpResponse::ok())
            }
            SmtpCommand::Data => {
                self.require("DATA", &[SmtpState::Rcpt])?;
                self.state = SmtpState::Data;
                Ok(SmtpResponse::data_start())
            }
            SmtpCommand::Rset => {
                self.transaction = None;
                if self.state != SmtpState::Connected {
                    self.state = SmtpState::Greeted;
                }
                Ok(SmtpResponse::ok())
            }
            SmtpCommand::Noop => Ok(SmtpResponse::ok()),
            SmtpCommand::Quit => {
                self.state = SmtpState::Closed;
                Ok(SmtpResponse::quit())
            }
        }
    }

    fn require(&self, verb: &str, allowed: &[SmtpState]) -> Result<(), SmtpError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SmtpError::InvalidState(format!(
                "{verb} not allowed in state {:?}",
                self.state
            )))
        }
    }
}

fn send<W: Write>(writer: &mut W, response: &SmtpResponse) -> Result<(), SmtpError> {
    trace!(code = response.code, message = %response.message, "outgoing");
    writer.write_all(response.format().as_bytes())?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::store::RollingMailStore;
    use std::io::{BufReader, Cursor, Read};

    /// Yields nothing but the given error, like a socket whose peer went quiet
    struct FailingReader(io::ErrorKind);

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }
    }

    fn failing_after(script: &str, kind: io::ErrorKind) -> impl BufRead + '_ {
        BufReader::new(Cursor::new(script.as_bytes()).chain(FailingReader(kind)))
    }

    fn code(response: Option<SmtpResponse>) -> u16 {
        response.map(|response| response.code).unwrap_or_default()
    }

    /// Drive a session through HELO, MAIL, RCPT and DATA
    fn open_data<'a>(session: &mut SmtpSession<'a>) {
        assert_eq!(code(session.handle_line("HELO client.local")), 250);
        assert_eq!(code(session.handle_line("MAIL FROM:<sender@example.com>")), 250);
        assert_eq!(code(session.handle_line("RCPT TO:<recipient@example.com>")), 250);
        assert_eq!(code(session.handle_line("DATA")), 354);
    }

    fn run_script(store: &dyn MailStore, script: &str) -> String {
        let mut output = Vec::new();
        let mut session = SmtpSession::new("test.local", store);
        session.run(Cursor::new(script.as_bytes()), &mut output).unwrap();
        assert_eq!(session.state(), SmtpState::Closed);
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_new_session() {
        let store = RollingMailStore::default();
        let session = SmtpSession::new("test.local", &store);
        assert_eq!(session.state(), SmtpState::Connected);
        assert!(session.client_domain().is_none());
        assert_eq!(session.greeting().code, 220);
    }

    #[test]
    fn test_helo_records_domain() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);

        let response = session.handle_line("HELO client.local").unwrap();
        assert_eq!(response.message, "test.local Hello client.local");
        assert_eq!(session.state(), SmtpState::Greeted);
        assert_eq!(session.client_domain(), Some("client.local"));

        session.handle_line("EHLO other.local");
        assert_eq!(session.client_domain(), Some("other.local"));
    }

    #[test]
    fn test_mail_without_helo_is_allowed() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);

        assert_eq!(code(session.handle_line("MAIL FROM:<a@example.com>")), 250);
        assert_eq!(session.state(), SmtpState::Mail);
    }

    #[test]
    fn test_out_of_order_commands() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);

        assert_eq!(code(session.handle_line("RCPT TO:<b@example.com>")), 503);
        assert_eq!(code(session.handle_line("DATA")), 503);
        assert_eq!(session.state(), SmtpState::Connected);

        session.handle_line("MAIL FROM:<a@example.com>");
        assert_eq!(code(session.handle_line("MAIL FROM:<a@example.com>")), 503);
        assert_eq!(code(session.handle_line("DATA")), 503);
        assert_eq!(session.state(), SmtpState::Mail);
    }

    #[test]
    fn test_unknown_and_unimplemented_commands() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);

        assert_eq!(code(session.handle_line("INVALID")), 500);
        assert_eq!(code(session.handle_line("VRFY postmaster")), 502);
        assert_eq!(code(session.handle_line("HELO")), 501);
        assert!(session.handle_line("   ").is_none());
        assert_eq!(session.state(), SmtpState::Connected);
    }

    #[test]
    fn test_headers_and_body() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);

        for line in ["Subject: hi", "foo: bar1", "foo: bar2", "", "hello", "", "world"] {
            assert!(session.handle_line(line).is_none());
        }
        assert_eq!(code(session.handle_line(".")), 250);
        assert_eq!(session.state(), SmtpState::Greeted);

        let message = store.message(0).unwrap();
        assert_eq!(message.subject(), Some("hi"));
        assert_eq!(message.header_values("foo"), vec!["bar1", "bar2"]);
        assert_eq!(message.body(), "hello\n\nworld");
        assert_eq!(message.sender(), "sender@example.com");
        assert_eq!(message.recipients(), ["recipient@example.com"]);
    }

    #[test]
    fn test_non_header_line_starts_body() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);

        session.handle_line("just some text");
        session.handle_line("Not-A-Header: still body");
        session.handle_line(".");

        let message = store.message(0).unwrap();
        assert!(message.headers().is_empty());
        assert_eq!(message.body(), "just some text\nNot-A-Header: still body");
    }

    #[test]
    fn test_blank_line_before_headers_is_body() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);

        session.handle_line("");
        session.handle_line("hello");
        session.handle_line(".");

        let message = store.message(0).unwrap();
        assert!(message.headers().is_empty());
        assert_eq!(message.body(), "\nhello");
    }

    #[test]
    fn test_folded_header_is_unfolded() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);

        session.handle_line("Subject: a very");
        session.handle_line("\tlong subject");
        session.handle_line("");
        session.handle_line(".");

        let message = store.message(0).unwrap();
        assert_eq!(message.subject(), Some("a very\tlong subject"));
        assert_eq!(message.body(), "");
    }

    #[test]
    fn test_dot_unstuffing() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);

        session.handle_line("Subject: dots");
        session.handle_line("");
        session.handle_line("..");
        session.handle_line("..leading dot");
        session.handle_line(".single");
        session.handle_line(".");

        assert_eq!(store.message(0).unwrap().body(), ".\n.leading dot\n.single");
    }

    #[test]
    fn test_commands_inside_data_are_content() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);

        assert!(session.handle_line("QUIT").is_none());
        assert_eq!(session.state(), SmtpState::Data);
        session.handle_line(".");

        assert_eq!(store.message(0).unwrap().body(), "QUIT");
    }

    #[test]
    fn test_multiple_recipients_and_transactions() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        open_data(&mut session);
        session.handle_line("Subject: first");
        session.handle_line(".");

        session.handle_line("MAIL FROM:<second@example.com>");
        session.handle_line("RCPT TO:<one@example.com>");
        session.handle_line("RCPT TO:<two@example.com>");
        session.handle_line("DATA");
        session.handle_line("Subject: second");
        session.handle_line(".");

        assert_eq!(store.email_count(), 2);
        let second = store.message(1).unwrap();
        assert_eq!(second.subject(), Some("second"));
        assert_eq!(second.recipients(), ["one@example.com", "two@example.com"]);
    }

    #[test]
    fn test_rset_discards_transaction() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);

        assert_eq!(code(session.handle_line("RSET")), 250);
        assert_eq!(session.state(), SmtpState::Connected);

        session.handle_line("HELO client.local");
        session.handle_line("MAIL FROM:<a@example.com>");
        session.handle_line("RCPT TO:<b@example.com>");
        assert_eq!(code(session.handle_line("RSET")), 250);
        assert_eq!(session.state(), SmtpState::Greeted);
        assert_eq!(code(session.handle_line("DATA")), 503);
        assert_eq!(store.email_count(), 0);
    }

    #[test]
    fn test_quit() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);

        assert_eq!(code(session.handle_line("NOOP")), 250);
        assert_eq!(code(session.handle_line("quit")), 221);
        assert_eq!(session.state(), SmtpState::Closed);
        assert!(session.handle_line("HELO again").is_none());
    }

    #[test]
    fn test_run_complete_dialogue() {
        let store = RollingMailStore::default();
        let output = run_script(
            &store,
            "HELO a\r\nMAIL FROM:<x>\r\nRCPT TO:<y>\r\nDATA\r\nSubject: hi\r\n\r\nhello\r\n.\r\nQUIT\r\n",
        );

        let codes: Vec<&str> = output.lines().map(|line| &line[..3]).collect();
        assert_eq!(codes, vec!["220", "250", "250", "250", "354", "250", "221"]);
        assert!(output.ends_with("221 Bye\r\n"));

        assert_eq!(store.email_count(), 1);
        let message = store.message(0).unwrap();
        assert_eq!(message.first_header_value("Subject"), Some("hi"));
        assert_eq!(message.body(), "hello");
        assert_eq!(message.sender(), "x");
        assert_eq!(message.to_string(), "Subject: hi\n\nhello\n");
    }

    #[test]
    fn test_run_accepts_bare_lf() {
        let store = RollingMailStore::default();
        run_script(
            &store,
            "HELO a\nMAIL FROM:<x>\nRCPT TO:<y>\nDATA\nSubject: lf\n\nbody\n.\n",
        );
        assert_eq!(store.message(0).unwrap().subject(), Some("lf"));
    }

    #[test]
    fn test_run_ignores_input_after_quit() {
        let store = RollingMailStore::default();
        let output = run_script(&store, "QUIT\r\nHELO a\r\n");
        assert_eq!(output, "220 test.local Stubmail SMTP service ready\r\n221 Bye\r\n");
    }

    #[test]
    fn test_eof_discards_unfinished_message() {
        let store = RollingMailStore::default();
        run_script(
            &store,
            "HELO a\r\nMAIL FROM:<x>\r\nRCPT TO:<y>\r\nDATA\r\nSubject: lost\r\n",
        );
        assert_eq!(store.email_count(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let store = RollingMailStore::default();
        let mut output = Vec::new();
        let mut input = b"MAIL FROM:<x>\r\nRCPT TO:<y>\r\nDATA\r\n".to_vec();
        input.extend_from_slice(b"caf\xe9\r\n.\r\n");

        SmtpSession::new("test.local", &store)
            .run(Cursor::new(input), &mut output)
            .unwrap();

        assert_eq!(store.message(0).unwrap().body(), "caf\u{fffd}");
    }

    #[test]
    fn test_read_timeout_ends_session_quietly() {
        for kind in [io::ErrorKind::TimedOut, io::ErrorKind::WouldBlock] {
            let store = RollingMailStore::default();
            let mut output = Vec::new();
            let mut session = SmtpSession::new("test.local", &store);
            let script = "HELO a\r\nMAIL FROM:<x>\r\nRCPT TO:<y>\r\nDATA\r\nSubject: cut\r\n";
            let reader = failing_after(script, kind);

            assert!(session.run(reader, &mut output).is_ok());
            assert_eq!(session.state(), SmtpState::Closed);
            assert_eq!(store.email_count(), 0);
            let output = String::from_utf8(output).unwrap();
            assert!(output.ends_with("354 Start mail input; end with <CRLF>.<CRLF>\r\n"));
        }
    }

    #[test]
    fn test_read_failure_is_returned() {
        let store = RollingMailStore::default();
        let mut session = SmtpSession::new("test.local", &store);
        let reader = failing_after("HELO a\r\n", io::ErrorKind::ConnectionReset);

        let result = session.run(reader, Vec::new());
        assert!(matches!(
            result,
            Err(SmtpError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset
        ));
        assert_eq!(session.state(), SmtpState::Closed);
    }
}
