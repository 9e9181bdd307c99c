//! Error types for the SMTP server and mail store

use thiserror::Error;

use crate::smtp::response::SmtpResponse;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Command not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid state for command: {0}")]
    InvalidState(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),
}

impl SmtpError {
    pub fn to_response_code(&self) -> u16 {
        match self {
            SmtpError::Io(_) => 421,
            SmtpError::InvalidCommand => 500,
            SmtpError::NotImplemented(_) => 502,
            SmtpError::InvalidState(_) => 503,
            SmtpError::InvalidSyntax(_) => 501,
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::InvalidCommand => "Syntax error, command unrecognized".to_string(),
            SmtpError::NotImplemented(verb) => format!("{verb} command not implemented"),
            SmtpError::InvalidState(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
        }
    }

    /// The reply sent to the client when this error ends a command
    pub fn to_response(&self) -> SmtpResponse {
        SmtpResponse::new(self.to_response_code(), &self.to_response_message())
    }
}

/// Errors returned by mail store accessors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Message index {index} out of range (store holds {len})")]
    OutOfRange { index: usize, len: usize },
}
