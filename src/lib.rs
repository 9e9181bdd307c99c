//! # Stubmail
//!
//! Stubmail is a dummy SMTP server for tests.
//!
//! It accepts mail from the code under test, delivers nothing, and keeps
//! every message it receives in memory so a test can assert on headers and
//! body.
//!
//! ## Quick Start
//!
//! ```rust
//! use stubmail::{ServerConfig, SmtpServer};
//!
//! // Port 0 picks a free port
//! let config = ServerConfig::default().with_addr("127.0.0.1:0");
//! let server = SmtpServer::new(config).start().unwrap();
//! println!("listening on {}", server.local_addr());
//!
//! // Application sends email to server.local_addr()
//! // ...
//!
//! // Wait up to 100ms for one message, then inspect it
//! if server.anticipate_message_count(1, 100) {
//!     let message = server.message(0).unwrap();
//!     println!("Received email from: {}", message.sender());
//!     println!("Subject: {:?}", message.first_header_value("Subject"));
//! }
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the message headers and body
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! Unknown or out-of-order commands get an error reply and the session
//! carries on.
//!
//! ## Message store
//!
//! Finished messages go to a [`MailStore`]. The default
//! [`RollingMailStore`] keeps the most recent 100 (see
//! [`ServerConfig::capacity`]) while [`MailStore::email_count`] keeps
//! counting every message ever received. Use
//! [`SmtpServer::with_store`] to supply another store, such as
//! [`UnboundedMailStore`].
//!
//! ## Notes
//!
//! - Runs in-memory only. Nothing is relayed or persisted.
//! - SMTP extensions (authentication, TLS, pipelining...) are not supported.
//! - Sessions run one at a time unless [`ServerConfig::threaded`] is set.

pub mod logging;
mod smtp;

pub use smtp::{
    Header, MailMessage, MailStore, RollingMailStore, ServerConfig, ServerHandle, SmtpCommand,
    SmtpError, SmtpResponse, SmtpServer, SmtpSession, SmtpState, StoreError, UnboundedMailStore,
};
