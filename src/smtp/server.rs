//! SMTP server: accepts connections and runs a session for each

use crate::smtp::config::ServerConfig;
use crate::smtp::error::{SmtpError, StoreError};
use crate::smtp::message::MailMessage;
use crate::smtp::session::SmtpSession;
use crate::smtp::store::{MailStore, RollingMailStore};

use std::collections::HashMap;
use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

/// How often the accept loop checks for a stop request
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Where the accept loop takes new clients from
trait Incoming {
    fn next_client(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Incoming for TcpListener {
    fn next_client(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept()
    }
}

/// Stop flag plus the sockets of every session in progress
#[derive(Default)]
struct Connections {
    stopped: AtomicBool,
    open: Mutex<HashMap<SocketAddr, TcpStream>>,
}

impl Connections {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, TcpStream>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a session's socket. One accepted after [`Connections::close_all`]
    /// is shut down straight away.
    fn register(&self, peer: SocketAddr, stream: &TcpStream) -> io::Result<()> {
        let mut open = self.lock();
        if self.is_stopped() {
            let _ = stream.shutdown(Shutdown::Both);
        } else {
            open.insert(peer, stream.try_clone()?);
        }
        Ok(())
    }

    fn forget(&self, peer: &SocketAddr) {
        self.lock().remove(peer);
    }

    /// Raise the stop flag and shut down every open session socket, which
    /// its session then reads as the end of input
    fn close_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for (peer, stream) in self.lock().drain() {
            debug!(%peer, "closing connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// SMTP server that captures every message into a shared [`MailStore`]
#[derive(Clone)]
pub struct SmtpServer {
    config: ServerConfig,
    store: Arc<dyn MailStore>,
}

impl SmtpServer {
    /// Create a server backed by a rolling store of `config.capacity` messages
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(RollingMailStore::new(config.capacity));
        Self::with_store(config, store)
    }

    /// Create a server that puts messages into `store`
    pub fn with_store(config: ServerConfig, store: Arc<dyn MailStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// Bind the configured address and start accepting in the background
    pub fn start(&self) -> Result<ServerHandle, SmtpError> {
        let listener = TcpListener::bind(&self.config.addr)?;
        self.start_with_listener(listener)
    }

    /// Start accepting on an existing listener in the background
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<ServerHandle, SmtpError> {
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        info!(%local_addr, threaded = self.config.threaded, "SMTP server listening");

        let connections = Arc::new(Connections::default());
        let server = self.clone();
        let accept_connections = Arc::clone(&connections);
        let acceptor = thread::Builder::new()
            .name("stubmail-accept".to_string())
            .spawn(move || {
                server.accept_loop(listener, &accept_connections);
                accept_connections.stopped.store(true, Ordering::SeqCst);
                info!(%local_addr, "SMTP server stopped");
            })?;

        Ok(ServerHandle {
            local_addr,
            store: Arc::clone(&self.store),
            connections,
            acceptor: Some(acceptor),
        })
    }

    fn accept_loop(&self, listener: impl Incoming, connections: &Arc<Connections>) {
        while !connections.is_stopped() {
            match listener.next_client() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    if self.config.threaded {
                        let server = self.clone();
                        let connections = Arc::clone(connections);
                        let spawned = thread::Builder::new()
                            .name(format!("stubmail-{peer}"))
                            .spawn(move || server.serve_client(stream, peer, &connections));
                        if let Err(e) = spawned {
                            warn!(%peer, error = %e, "failed to spawn session thread");
                        }
                    } else {
                        self.serve_client(stream, peer, connections);
                    }
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        warn!(error = %e, "error accepting connection");
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    }

    fn serve_client(&self, stream: TcpStream, peer: SocketAddr, connections: &Connections) {
        let result = self.handle_client(stream, peer, connections);
        connections.forget(&peer);
        match result {
            Ok(()) => debug!(%peer, "session finished"),
            Err(e) => warn!(%peer, error = %e, "session ended with error"),
        }
    }

    /// Run one session to completion on `stream`
    fn handle_client(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        connections: &Connections,
    ) -> Result<(), SmtpError> {
        // Some platforms hand out accepted sockets in the listener's mode
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.config.read_timeout)?;
        connections.register(peer, &stream)?;
        let reader = BufReader::new(stream.try_clone()?);

        let mut session = SmtpSession::new(&self.config.hostname, self.store.as_ref());
        session.run(reader, &stream)
    }
}

/// A running server. Dropping the handle stops it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    store: Arc<dyn MailStore>,
    connections: Arc<Connections>,
    acceptor: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    pub fn messages(&self) -> Vec<Arc<MailMessage>> {
        self.store.messages()
    }

    pub fn message(&self, index: usize) -> Result<Arc<MailMessage>, StoreError> {
        self.store.message(index)
    }

    pub fn email_count(&self) -> usize {
        self.store.email_count()
    }

    /// Wait up to `ticks` milliseconds for `count` messages to have arrived
    pub fn anticipate_message_count(&self, count: usize, ticks: usize) -> bool {
        self.store.wait_for_count(count, ticks)
    }

    pub fn is_stopped(&self) -> bool {
        self.connections.is_stopped()
    }

    /// Stop accepting connections, close every open client connection and
    /// wait for the accept loop to exit.
    ///
    /// A transaction cut off this way is discarded, as if the client had
    /// disconnected. Returns promptly even while clients are connected.
    pub fn stop(&mut self) {
        self.connections.close_all();
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("accept loop panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
