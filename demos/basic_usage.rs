//! Basic usage example for the Stubmail SMTP server
//!
//! Starts a server on a free port, sends it two messages over a plain TCP
//! connection and prints what was captured.

use std::error::Error;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};

use stubmail::{ServerConfig, SmtpServer};

fn main() {
    println!("Stubmail Basic Usage Example");
    println!("============================");

    let config = ServerConfig::default()
        .with_addr("127.0.0.1:0")
        .with_hostname("example.local");
    let server = match SmtpServer::new(config).start() {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Server error: {e}");
            return;
        }
    };
    let addr = server.local_addr();
    println!("Server started on {addr}");

    println!("\nSending test email...");
    let first = [
        "From: sender@example.com",
        "To: recipient@example.com",
        "Subject: Test Email from Stubmail",
        "",
        "This is a test email sent to demonstrate",
        "the Stubmail SMTP server functionality.",
        "",
        "Best regards,",
        "Stubmail Example",
    ];
    if let Err(e) = send_email(addr, &["recipient@example.com"], &first, true) {
        eprintln!("Failed to send email: {e}");
        return;
    }

    println!("\nWaiting for email...");
    if !server.anticipate_message_count(1, 1000) {
        eprintln!("Timeout: No email received within 1 second");
        return;
    }
    match server.message(0) {
        Ok(email) => {
            println!("Email received:");
            println!("  From: {}", email.sender());
            println!("  To: {:?}", email.recipients());
            println!("  Subject: {}", email.subject().unwrap_or_default());
            println!("  Received: {:?}", email.received());
            println!("  Data:");
            for line in email.to_string().lines() {
                println!("    {line}");
            }
        }
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    }

    println!("\nSending second test email...");
    let second = [
        "From: sender@example.com",
        "To: recipient@example.com, another@example.com",
        "Subject: Second Test Email",
        "",
        "This is the second test email with multiple recipients.",
    ];
    let recipients = ["recipient@example.com", "another@example.com"];
    if let Err(e) = send_email(addr, &recipients, &second, false) {
        eprintln!("Failed to send second email: {e}");
        return;
    }
    server.anticipate_message_count(2, 1000);

    let emails = server.messages();
    println!("Collected {} email(s) total", server.email_count());

    let for_recipient = emails
        .iter()
        .filter(|email| email.has_recipient("another@example.com"))
        .count();
    println!("Emails for another@example.com: {for_recipient}");

    let mentioning = emails
        .iter()
        .filter(|email| email.contains_text("multiple recipients"))
        .count();
    println!("Emails mentioning \"multiple recipients\": {mentioning}");
}

/// Deliver one message in its own session, echoing replies when `verbose`
fn send_email(
    addr: SocketAddr,
    recipients: &[&str],
    content: &[&str],
    verbose: bool,
) -> Result<(), Box<dyn Error>> {
    let mut stream = TcpStream::connect(addr)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let reply = |reader: &mut BufReader<TcpStream>| -> Result<(), Box<dyn Error>> {
        let mut response = String::new();
        reader.read_line(&mut response)?;
        if verbose {
            print!("S: {response}");
        }
        Ok(())
    };

    reply(&mut reader)?;
    write!(stream, "HELO client.example.com\r\n")?;
    reply(&mut reader)?;
    write!(stream, "MAIL FROM:<sender@example.com>\r\n")?;
    reply(&mut reader)?;
    for recipient in recipients {
        write!(stream, "RCPT TO:<{recipient}>\r\n")?;
        reply(&mut reader)?;
    }
    write!(stream, "DATA\r\n")?;
    reply(&mut reader)?;

    for line in content {
        write!(stream, "{line}\r\n")?;
    }
    // End of data marker
    write!(stream, ".\r\n")?;
    reply(&mut reader)?;

    write!(stream, "QUIT\r\n")?;
    reply(&mut reader)?;
    Ok(())
}
