use futures_util::{SinkExt, StreamExt};
use radio_common::crypto::LazyKeyPair;
use radio_common::frame;
use radio_common::handshake::{self, Greeting, HandshakeError, Session};
use radio_common::{
    ConnectionState, FrameError, Lifecycle, Message, Payload, PriorityQueue, QueueError,
    RadioCodec, RadioDelegate, RadioId,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reader = FramedRead<OwnedReadHalf, RadioCodec>;
type Writer = FramedWrite<OwnedWriteHalf, RadioCodec>;

/// Errors surfaced by the plane's radio link.
#[derive(Debug, Error)]
pub enum RadioError {
    /// Could not reach the tower.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The handshake with the tower failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// Frame encoding or decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// The outbound queue refused the message.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Connection options that do not come from the delegate.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Tower public key for ciphered legacy links.
    pub legacy_key_file: Option<PathBuf>,
    /// Capacity of the outbound and inbound queues.
    pub queue_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            legacy_key_file: None,
            queue_capacity: 256,
        }
    }
}

/// A plane's single link to a tower.
///
/// Owns three tasks: a writer draining the outbound priority queue, a
/// reader decoding frames, and a dispatcher delivering inbound messages to
/// the delegate in priority order.
pub struct RadioClient {
    id: RadioId,
    session: Session,
    delegate: Arc<dyn RadioDelegate>,
    outbound: Arc<PriorityQueue<Message>>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for RadioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioClient")
            .field("id", &self.id)
            .field("peer", &self.session.peer)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl RadioClient {
    /// Connect to a tower and run the initiator handshake.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError`] if the tower is unreachable or the handshake
    /// fails. Nothing is left running in that case.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        id: RadioId,
        delegate: Arc<dyn RadioDelegate>,
        keys: &LazyKeyPair,
        options: ClientOptions,
    ) -> Result<Self, RadioError> {
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        let mut reader = FramedRead::new(r, RadioCodec::legacy());
        let mut writer = FramedWrite::new(w, RadioCodec::legacy());

        let greeting = Greeting {
            id,
            position: delegate.location(),
            config: delegate.config(),
        };
        let mut lifecycle = Lifecycle::new();
        state_tx.send_replace(ConnectionState::Handshaking);
        let session = match handshake::initiate(
            &mut reader,
            &mut writer,
            &greeting,
            keys,
            options.legacy_key_file.as_deref(),
            &mut lifecycle,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                lifecycle.close();
                state_tx.send_replace(lifecycle.state());
                return Err(e.into());
            }
        };
        state_tx.send_replace(lifecycle.state());
        info!(%id, tower = %session.peer, sealed = session.sealed, "linked to tower");

        let cancel = CancellationToken::new();
        let outbound = Arc::new(PriorityQueue::new(options.queue_capacity));
        let inbound = Arc::new(PriorityQueue::new(options.queue_capacity));
        let state_tx = Arc::new(state_tx);

        let writer = tokio::spawn(write_loop(
            writer,
            Arc::clone(&outbound),
            cancel.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&inbound),
            Arc::clone(&outbound),
            cancel.clone(),
            Arc::clone(&state_tx),
        ));
        let dispatcher = tokio::spawn(dispatch_loop(
            inbound,
            Arc::clone(&delegate),
            session.peer,
        ));

        Ok(Self {
            id,
            session,
            delegate,
            outbound,
            state,
            cancel,
            writer,
            reader,
            dispatcher,
        })
    }

    /// This plane's radio id.
    #[must_use]
    pub const fn id(&self) -> RadioId {
        self.id
    }

    /// What the handshake settled on.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// A message from this plane at the delegate's current position.
    #[must_use]
    pub fn message(&self, payload: Payload) -> Message {
        Message::new(self.id, self.delegate.location(), payload)
    }

    /// Queue a message for the tower without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::Frame`] if the message does not fit the
    /// negotiated framing and [`RadioError::Queue`] if the queue is full or
    /// the link closed.
    pub fn send(&self, message: Message) -> Result<(), RadioError> {
        self.check_frame(&message)?;
        Ok(self.outbound.try_push(message)?)
    }

    /// Queue a message for the tower, waiting for room.
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::Frame`] if the message does not fit the
    /// negotiated framing and [`RadioError::Queue`] if the link closed.
    pub async fn send_wait(&self, message: Message) -> Result<(), RadioError> {
        self.check_frame(&message)?;
        Ok(self.outbound.push(message).await?)
    }

    fn check_frame(&self, message: &Message) -> Result<(), FrameError> {
        let extended = self.session.negotiated.extended;
        frame::framed_body_len(message, extended, self.session.sealed).map(drop)
    }

    /// Resolves once the link is closed, by either side.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Sender lives in the reader task; losing it also means closed.
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Flush queued messages and close the link.
    pub async fn close(self) {
        self.outbound.close();
        if let Err(e) = self.writer.await {
            warn!("writer task failed: {}", e);
        }
        self.cancel.cancel();
        if let Err(e) = self.reader.await {
            warn!("reader task failed: {}", e);
        }
        if let Err(e) = self.dispatcher.await {
            warn!("dispatcher task failed: {}", e);
        }
        debug!(id = %self.id, "radio closed");
    }
}

async fn write_loop(
    mut writer: Writer,
    outbound: Arc<PriorityQueue<Message>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.pop() => match next {
                Some(message) => message,
                None => break,
            },
        };
        match writer.send(message).await {
            Ok(()) => {}
            Err(FrameError::TooLarge(len)) => {
                warn!(len, "dropping outbound message that does not fit a frame");
            }
            Err(e) => {
                debug!("write failed: {}", e);
                break;
            }
        }
    }
    outbound.close();
    cancel.cancel();
}

async fn read_loop(
    mut reader: Reader,
    inbound: Arc<PriorityQueue<Message>>,
    outbound: Arc<PriorityQueue<Message>>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = reader.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("tower link failed: {}", e);
                break;
            }
            None => {
                info!("tower closed the link");
                break;
            }
        };
        if message.kind().is_handshake() {
            debug!(kind = %message.kind(), "ignoring handshake frame on an active link");
            continue;
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            res = inbound.push(message) => if res.is_err() { break },
        }
    }
    cancel.cancel();
    outbound.close();
    inbound.close();
    state.send_replace(ConnectionState::Closed);
}

async fn dispatch_loop(
    inbound: Arc<PriorityQueue<Message>>,
    delegate: Arc<dyn RadioDelegate>,
    tower: RadioId,
) {
    while let Some(message) = inbound.pop().await {
        delegate.on_message(tower, message);
    }
}
