use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::dispatcher::{self, Inbound};
use crate::error::TowerError;
use crate::metrics::counters;
use crate::registry::Registry;
use radio_common::crypto::{KeyPair, LazyKeyPair};
use radio_common::handshake::Greeting;
use radio_common::{Message, Payload, PriorityQueue, RadioConfig, RadioDelegate, RadioId};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for the tower.
pub struct ServerState {
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Radio options read once from the delegate.
    pub radio: RadioConfig,
    /// The tower's own radio id.
    pub id: RadioId,
    /// Registered planes.
    pub registry: Registry,
    /// Global inbound queue feeding the dispatcher.
    pub inbound: Arc<PriorityQueue<Inbound>>,
    /// Tower key pair, generated on the first ciphered handshake.
    pub keys: LazyKeyPair,
    /// Owner of this tower: position source and message sink.
    pub delegate: Arc<dyn RadioDelegate>,
    /// Accepted sockets whose task has not finished.
    pub active_connections: AtomicUsize,
    drained: Notify,
    next_serial: AtomicU64,
}

impl ServerState {
    /// Build tower state around `delegate`, deferring key generation.
    #[must_use]
    pub fn new(config: ServerConfig, delegate: Arc<dyn RadioDelegate>) -> Self {
        let radio = delegate.config();
        Self::build(config, delegate, radio, LazyKeyPair::new(radio.key_length))
    }

    /// Build tower state with an existing key pair.
    #[must_use]
    pub fn with_keys(config: ServerConfig, delegate: Arc<dyn RadioDelegate>, keys: KeyPair) -> Self {
        let radio = delegate.config();
        Self::build(config, delegate, radio, LazyKeyPair::ready(keys))
    }

    fn build(
        config: ServerConfig,
        delegate: Arc<dyn RadioDelegate>,
        radio: RadioConfig,
        keys: LazyKeyPair,
    ) -> Self {
        let id = RadioId::random(&config.prefix);
        Self {
            inbound: Arc::new(PriorityQueue::new(config.inbound_capacity)),
            config,
            radio,
            id,
            registry: Registry::new(),
            keys,
            delegate,
            active_connections: AtomicUsize::new(0),
            drained: Notify::new(),
            next_serial: AtomicU64::new(1),
        }
    }

    /// What the tower announces in its HELLO reply.
    #[must_use]
    pub fn greeting(&self) -> Greeting {
        Greeting {
            id: self.id,
            position: self.delegate.location(),
            config: self.radio,
        }
    }

    /// A message from the tower at its current position.
    #[must_use]
    pub fn message(&self, payload: Payload) -> Message {
        Message::new(self.id, self.delegate.location(), payload)
    }

    pub(crate) fn next_serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue `message` for one registered plane without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TowerError::UnknownPeer`] if `to` is not registered,
    /// [`TowerError::Frame`] if the message does not fit that plane's
    /// framing and [`TowerError::Queue`] if its outbound queue is full or
    /// closed.
    pub fn send_to(&self, to: RadioId, message: Message) -> Result<(), TowerError> {
        let handle = self.registry.get(&to).ok_or(TowerError::UnknownPeer(to))?;
        handle.check_frame(&message).map_err(|e| {
            counters::messages_dropped_total("too_large");
            TowerError::from(e)
        })?;
        handle.outbound.try_push(message).map_err(|e| {
            counters::messages_dropped_total("outbound_full");
            TowerError::from(e)
        })
    }

    /// Queue a copy of `message` for every registered plane. Returns how
    /// many planes accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut queued = 0;
        for handle in self.registry.handles() {
            if let Err(e) = handle.check_frame(message) {
                counters::messages_dropped_total("too_large");
                debug!(peer = %handle.id, "broadcast skipped: {}", e);
                continue;
            }
            match handle.outbound.try_push(message.clone()) {
                Ok(()) => queued += 1,
                Err(e) => {
                    counters::messages_dropped_total("outbound_full");
                    debug!(peer = %handle.id, "broadcast skipped: {}", e);
                }
            }
        }
        queued
    }

    /// Ids of every registered plane.
    #[must_use]
    pub fn peers(&self) -> Vec<RadioId> {
        self.registry.ids()
    }

    async fn wait_drained(&self) -> bool {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();
            if self.active_connections.load(Ordering::Acquire) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

/// Decrements the connection count when a connection task ends.
struct ConnectionSlot {
    state: Arc<ServerState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
        self.state.drained.notify_waiters();
    }
}

/// Run the tower accept loop until the process exits.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), TowerError> {
    run_with_shutdown(listener, state, CancellationToken::new()).await
}

/// Run the tower accept loop until `shutdown` is cancelled.
///
/// Every connection gets a child of `shutdown`, so cancelling it stops
/// accepting, tears down live connections and, once they are gone, stops
/// the dispatcher after it drains the inbound queue.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> Result<(), TowerError> {
    let local_addr = listener.local_addr()?;
    info!(id = %state.id, "tower listening on {}", local_addr);

    let dispatcher = tokio::spawn(dispatcher::run(
        Arc::clone(&state.inbound),
        Arc::clone(&state.delegate),
    ));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if state.active_connections.load(Ordering::Acquire) >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        state.active_connections.fetch_add(1, Ordering::AcqRel);
                        let slot = ConnectionSlot { state: Arc::clone(&state) };
                        let state = Arc::clone(&state);
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            let _slot = slot;
                            if let Err(e) = handle_connection(stream, addr, state, cancel).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            () = shutdown.cancelled() => {
                info!(
                    "shutdown signal received, draining {} connections",
                    state.active_connections.load(Ordering::Acquire)
                );
                break;
            }
        }
    }

    if !state.wait_drained().await {
        warn!(
            "drain timeout reached with {} connections still active",
            state.active_connections.load(Ordering::Acquire)
        );
    }

    state.inbound.close();
    if let Err(e) = dispatcher.await {
        error!("dispatcher task failed: {}", e);
    }

    info!("tower shut down gracefully");
    Ok(())
}
