//! Server configuration

use std::time::Duration;

use crate::smtp::store::DEFAULT_CAPACITY;

pub const DEFAULT_ADDR: &str = "127.0.0.1:2525";
pub const DEFAULT_HOSTNAME: &str = "stubmail.local";
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for an [`SmtpServer`](crate::SmtpServer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind, `host:port`
    pub addr: String,
    /// Name announced in the greeting and HELO replies
    pub hostname: String,
    /// Run each session on its own thread instead of one at a time
    pub threaded: bool,
    /// Drop connections idle for longer than this. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Messages kept by the default rolling store
    pub capacity: usize,
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            threaded: false,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            capacity: DEFAULT_CAPACITY,
        }
    }
}
