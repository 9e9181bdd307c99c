//! Parsing of SMTP command lines

use std::str::FromStr;

use crate::smtp::error::SmtpError;

/// Verbs that are valid SMTP but which the server never implements
const NOT_IMPLEMENTED: &[&str] = &[
    "VRFY", "EXPN", "HELP", "TURN", "SEND", "SOML", "SAML", "STARTTLS", "AUTH",
];

/// A command line received outside of DATA mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// `MAIL FROM:<path>`; the path may be empty (null reverse-path)
    Mail(String),
    /// `RCPT TO:<path>`
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
}

impl SmtpCommand {
    /// The verb, as used in log lines and state errors
    pub fn verb(&self) -> &'static str {
        match self {
            SmtpCommand::Helo(_) => "HELO",
            SmtpCommand::Ehlo(_) => "EHLO",
            SmtpCommand::Mail(_) => "MAIL",
            SmtpCommand::Rcpt(_) => "RCPT",
            SmtpCommand::Data => "DATA",
            SmtpCommand::Rset => "RSET",
            SmtpCommand::Noop => "NOOP",
            SmtpCommand::Quit => "QUIT",
        }
    }
}

impl FromStr for SmtpCommand {
    type Err = SmtpError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, argument) = match line.split_once(char::is_whitespace) {
            Some((verb, argument)) => (verb, argument.trim()),
            None => (line, ""),
        };
        let verb = verb.to_ascii_uppercase();

        match verb.as_str() {
            "HELO" => Ok(SmtpCommand::Helo(domain_argument("HELO", argument)?)),
            "EHLO" => Ok(SmtpCommand::Ehlo(domain_argument("EHLO", argument)?)),
            "MAIL" => {
                let path = strip_keyword(argument, "FROM:").ok_or_else(|| {
                    SmtpError::InvalidSyntax("MAIL command must be 'MAIL FROM:<address>'".into())
                })?;
                Ok(SmtpCommand::Mail(parse_path(path)))
            }
            "RCPT" => {
                let path = strip_keyword(argument, "TO:").ok_or_else(|| {
                    SmtpError::InvalidSyntax("RCPT command must be 'RCPT TO:<address>'".into())
                })?;
                let path = parse_path(path);
                if path.is_empty() {
                    return Err(SmtpError::InvalidSyntax("TO address cannot be empty".into()));
                }
                Ok(SmtpCommand::Rcpt(path))
            }
            // Arguments to the remaining verbs are ignored
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "NOOP" => Ok(SmtpCommand::Noop),
            "QUIT" => Ok(SmtpCommand::Quit),
            _ if NOT_IMPLEMENTED.contains(&verb.as_str()) => {
                Err(SmtpError::NotImplemented(verb.to_string()))
            }
            _ => Err(SmtpError::InvalidCommand),
        }
    }
}

fn domain_argument(verb: &str, argument: &str) -> Result<String, SmtpError> {
    argument
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| SmtpError::InvalidSyntax(format!("{verb} requires domain argument")))
}

/// Strip a case-insensitive keyword such as `FROM:` from the front of `argument`
fn strip_keyword<'a>(argument: &'a str, keyword: &str) -> Option<&'a str> {
    let head = argument.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| argument[keyword.len()..].trim_start())
}

/// Extract the address from a path such as `<user@example.com> SIZE=100`.
///
/// Brackets are optional; anything after the path is dropped.
fn parse_path(path: &str) -> String {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix('<') {
        match rest.find('>') {
            Some(end) => rest[..end].trim().to_string(),
            None => rest.trim().to_string(),
        }
    } else {
        path.split_whitespace().next().unwrap_or_default().to_string()
    }
}
