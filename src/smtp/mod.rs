//! SMTP server implementation

pub mod commands;
pub mod config;
pub mod error;
pub mod message;
pub mod response;
pub mod server;
pub mod session;
pub mod store;

pub use commands::SmtpCommand;
pub use config::ServerConfig;
pub use error::{SmtpError, StoreError};
pub use message::{Header, MailMessage};
pub use response::SmtpResponse;
pub use server::{ServerHandle, SmtpServer};
pub use session::{SmtpSession, SmtpState};
pub use store::{MailStore, RollingMailStore, UnboundedMailStore};
