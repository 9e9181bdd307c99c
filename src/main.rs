use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stubmail::{MailMessage, ServerConfig, SmtpServer};
use tracing::{error, info};

/// How often new messages are picked up for logging
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

fn main() {
    stubmail::logging::init();

    let mut config = ServerConfig::default();
    let mut positional = Vec::new();
    for arg in env::args().skip(1) {
        if arg == "--threaded" {
            config = config.threaded(true);
        } else {
            positional.push(arg);
        }
    }
    let mut positional = positional.into_iter();
    if let Some(addr) = positional.next() {
        config = config.with_addr(addr);
    }
    if let Some(hostname) = positional.next() {
        config = config.with_hostname(hostname);
    }

    info!(addr = %config.addr, hostname = %config.hostname, "starting stubmail");

    let server = match SmtpServer::new(config).start() {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    let mut last_reported: Option<Arc<MailMessage>> = None;
    while !server.is_stopped() {
        thread::sleep(REPORT_INTERVAL);

        let retained = server.messages();
        for message in unreported(&retained, last_reported.as_ref()) {
            info!(
                from = message.sender(),
                to = ?message.recipients(),
                subject = message.subject().unwrap_or_default(),
                "received email"
            );
        }
        if let Some(newest) = retained.last() {
            last_reported = Some(Arc::clone(newest));
        }
    }
}

/// The messages in `retained` that arrived after `last`.
///
/// When `last` has been evicted in the meantime every retained message is
/// newer than it. Messages evicted before they were seen are never reported.
fn unreported<'a>(
    retained: &'a [Arc<MailMessage>],
    last: Option<&Arc<MailMessage>>,
) -> &'a [Arc<MailMessage>] {
    let seen = last.and_then(|last| {
        retained
            .iter()
            .rposition(|message| Arc::ptr_eq(message, last))
    });
    match seen {
        Some(position) => &retained[position + 1..],
        None => retained,
    }
}
