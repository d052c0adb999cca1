//! Broker runtime
//!
//! Owns the shared stores (sessions, subscriptions, live-connection table),
//! binds the TCP and TLS listeners, spawns one task per accepted connection
//! and runs the session-expiry sweeper.

mod connection;
pub mod tls;
mod writer;

pub use connection::{Connection, ConnectionError};
pub use tls::TlsSettings;
pub use writer::{OutboundWriter, SendError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::metrics::Metrics;
use crate::session::{SessionStore, EXPIRY_NEVER};
use crate::topic::SubscriptionStore;

/// Broker configuration, resolved from file and CLI by the entry point
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Plain TCP listen addresses
    pub listeners: Vec<SocketAddr>,
    /// TLS listen addresses (require `tls` to be set)
    pub tls_listeners: Vec<SocketAddr>,
    /// TLS material
    pub tls: Option<TlsSettings>,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum accepted packet size in bytes
    pub max_packet_size: usize,
    /// Cap on the client keep-alive in seconds; larger requests are overridden
    pub max_keep_alive: u16,
    /// Receive maximum advertised to clients
    pub receive_maximum: u16,
    /// Cap on the session expiry interval in seconds
    pub session_expiry_cap: u32,
    /// How often the expiry sweeper runs
    pub session_expiry_check_interval: Duration,
    /// Maximum broker-to-client in-flight QoS 1 messages per session
    pub max_inflight: u16,
    /// Maximum queued QoS 1 messages per session
    pub max_queued_messages: usize,
    /// Maximum subscriptions per session
    pub max_subscriptions: usize,
    /// Per-connection write buffer cap in bytes; crossing it sheds the
    /// connection with reason 0x93
    pub max_write_buffer: usize,
    /// How long a connection may take to complete the CONNECT handshake
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listeners: vec!["0.0.0.0:1883".parse().expect("valid default address")],
            tls_listeners: Vec::new(),
            tls: None,
            max_connections: 100_000,
            max_packet_size: 1024 * 1024,
            max_keep_alive: 600,
            receive_maximum: 65535,
            session_expiry_cap: EXPIRY_NEVER,
            session_expiry_check_interval: Duration::from_secs(30),
            max_inflight: 32,
            max_queued_messages: 1024,
            max_subscriptions: 1024,
            max_write_buffer: 4 * 1024 * 1024,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// The MQTT broker
pub struct Broker {
    config: BrokerConfig,
    sessions: Arc<SessionStore>,
    subscriptions: Arc<SubscriptionStore>,
    /// client id -> outbound writer of the live connection
    connections: Arc<DashMap<Arc<str>, Arc<OutboundWriter>>>,
    shutdown: broadcast::Sender<()>,
    metrics: Arc<Metrics>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_metrics(config, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(config: BrokerConfig, metrics: Arc<Metrics>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            sessions: Arc::new(SessionStore::new()),
            subscriptions: Arc::new(SubscriptionStore::new()),
            connections: Arc::new(DashMap::new()),
            shutdown,
            metrics,
        }
    }

    /// Bind all listeners and serve until shutdown
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let tls_acceptor = match (&self.config.tls, self.config.tls_listeners.is_empty()) {
            (Some(settings), false) => Some(
                tls::build_acceptor(settings)
                    .map_err(|e| std::io::Error::other(e.to_string()))?,
            ),
            (None, false) => {
                return Err(std::io::Error::other(
                    "tls listeners configured without tls material",
                ))
            }
            _ => None,
        };

        for addr in &self.config.listeners {
            let listener = TcpListener::bind(addr).await?;
            info!("MQTT/TCP listening on {}", addr);
            self.spawn_accept_loop(listener, None);
        }

        for addr in &self.config.tls_listeners {
            let listener = TcpListener::bind(addr).await?;
            info!("MQTT/TLS listening on {}", addr);
            self.spawn_accept_loop(listener, tls_acceptor.clone());
        }

        self.spawn_expiry_sweeper();

        // Serve until shutdown is signalled
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            match shutdown_rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
        info!("broker shutting down");
        Ok(())
    }

    /// Accept connections on one listener until shutdown
    fn spawn_accept_loop(
        &self,
        listener: TcpListener,
        tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    ) {
        let broker = self.shared();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                debug!("accepted connection from {}", addr);
                                broker.spawn_connection(stream, addr, tls_acceptor.clone());
                            }
                            Err(e) => {
                                error!("accept failed: {}", e);
                            }
                        }
                    }
                    result = shutdown_rx.recv() => {
                        if !matches!(result, Err(broadcast::error::RecvError::Lagged(_))) {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn shared(&self) -> SharedBroker {
        SharedBroker {
            sessions: self.sessions.clone(),
            subscriptions: self.subscriptions.clone(),
            connections: self.connections.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Periodically destroy expired sessions and their index entries
    fn spawn_expiry_sweeper(&self) {
        let sessions = self.sessions.clone();
        let subscriptions = self.subscriptions.clone();
        let metrics = self.metrics.clone();
        let interval = self.config.session_expiry_check_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = sessions.cleanup_expired();
                        for client_id in &expired {
                            subscriptions.unsubscribe_all(client_id);
                            debug!("session {} expired", client_id);
                        }
                        if !expired.is_empty() {
                            metrics.sessions_expired_total.inc_by(expired.len() as u64);
                            metrics.sessions_current.set(sessions.len() as i64);
                        }
                    }
                    result = shutdown_rx.recv() => {
                        if !matches!(result, Err(broadcast::error::RecvError::Lagged(_))) {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Signal every task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// The cloneable subset of broker state handed to accept loops
#[derive(Clone)]
struct SharedBroker {
    sessions: Arc<SessionStore>,
    subscriptions: Arc<SubscriptionStore>,
    connections: Arc<DashMap<Arc<str>, Arc<OutboundWriter>>>,
    config: BrokerConfig,
    metrics: Arc<Metrics>,
    shutdown: broadcast::Sender<()>,
}

impl SharedBroker {
    /// Spawn the task driving one accepted socket
    fn spawn_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    ) {
        let shared = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            match tls_acceptor {
                Some(acceptor) => {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            debug!("TLS handshake failed for {}: {}", addr, e);
                            return;
                        }
                    };
                    shared.drive(tls_stream, addr, &mut shutdown_rx).await;
                }
                None => {
                    shared.drive(stream, addr, &mut shutdown_rx).await;
                }
            }
        });
    }

    /// Run the connection until it finishes or the broker shuts down
    async fn drive<S>(
        self,
        stream: S,
        addr: SocketAddr,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let mut conn = Connection::new(
            stream,
            addr,
            self.sessions,
            self.subscriptions,
            self.connections,
            self.config,
            self.metrics,
        );

        let conn_fut = conn.run();
        tokio::pin!(conn_fut);

        loop {
            tokio::select! {
                biased;

                result = &mut conn_fut => {
                    match result {
                        Ok(()) | Err(ConnectionError::Closed) => {
                            debug!("connection {} finished", addr);
                        }
                        Err(e) => {
                            debug!("connection {} ended: {}", addr, e);
                        }
                    }
                    return;
                }
                result = shutdown_rx.recv() => {
                    if !matches!(result, Err(broadcast::error::RecvError::Lagged(_))) {
                        debug!("connection {} stopping for shutdown", addr);
                        return;
                    }
                }
            }
        }
    }
}
