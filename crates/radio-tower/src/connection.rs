use crate::dispatcher::Inbound;
use crate::error::TowerError;
use crate::metrics::{counters, gauges, histograms};
use crate::registry::PeerHandle;
use crate::server::ServerState;
use futures_util::{SinkExt, StreamExt};
use radio_common::handshake::{self, Session};
use radio_common::{FrameError, Lifecycle, Message, PriorityQueue, RadioCodec, RadioId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reader = FramedRead<OwnedReadHalf, RadioCodec>;
type Writer = FramedWrite<OwnedWriteHalf, RadioCodec>;

/// Undoes a registration when the connection ends, however it ends.
struct PeerGuard {
    state: Arc<ServerState>,
    id: RadioId,
    serial: u64,
    outbound: Arc<PriorityQueue<Message>>,
    cancel: CancellationToken,
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.outbound.close();
        if self.state.registry.remove_if(&self.id, self.serial) {
            gauges::peers_registered(self.state.registry.len());
        }
        gauges::dec_connections_active();
        debug!(peer = %self.id, serial = self.serial, "peer unregistered");
    }
}

/// Run the responder handshake under the configured timeout.
async fn perform_handshake(
    reader: &mut Reader,
    writer: &mut Writer,
    state: &ServerState,
    lifecycle: &mut Lifecycle,
) -> Result<Session, TowerError> {
    let greeting = state.greeting();
    let started = Instant::now();

    match timeout(
        state.config.handshake_timeout(),
        handshake::respond(reader, writer, &greeting, &state.keys, lifecycle),
    )
    .await
    {
        Ok(Ok(session)) => {
            counters::handshakes_total("ok");
            histograms::handshake_seconds(started.elapsed().as_secs_f64());
            Ok(session)
        }
        Ok(Err(e)) => {
            counters::handshakes_total("failed");
            Err(e.into())
        }
        Err(_) => {
            counters::handshakes_total("timeout");
            Err(TowerError::HandshakeTimeout)
        }
    }
}

/// Drain the outbound queue onto the socket until cancelled or the queue
/// closes.
async fn write_loop(
    mut writer: Writer,
    outbound: Arc<PriorityQueue<Message>>,
    cancel: CancellationToken,
) -> Result<(), TowerError> {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.pop() => match next {
                Some(message) => message,
                None => break,
            },
        };
        let kind = message.kind();
        match writer.send(message).await {
            Ok(()) => counters::messages_sent_total(kind.name()),
            Err(FrameError::TooLarge(len)) => {
                counters::messages_dropped_total("too_large");
                warn!(%kind, len, "dropping outbound message that does not fit a frame");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Decode frames and feed them to the global inbound queue.
async fn read_loop(
    reader: &mut Reader,
    state: &ServerState,
    peer: RadioId,
    cancel: &CancellationToken,
) -> Result<(), TowerError> {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            next = reader.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        };

        let kind = message.kind();
        counters::messages_received_total(kind.name());
        if kind.is_handshake() {
            counters::messages_dropped_total("handshake");
            debug!(%peer, %kind, "ignoring handshake frame on an active link");
            continue;
        }

        let inbound = Inbound::Message {
            from: peer,
            message,
        };
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            res = state.inbound.push(inbound) => {
                if res.is_err() {
                    debug!(%peer, "inbound queue closed");
                    return Ok(());
                }
            }
        }
    }
}

/// Own one accepted socket: handshake, register, relay, tear down.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<(), TowerError> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, RadioCodec::legacy());
    let mut writer = FramedWrite::new(write_half, RadioCodec::legacy());
    let mut lifecycle = Lifecycle::new();

    let session = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        res = perform_handshake(&mut reader, &mut writer, &state, &mut lifecycle) => match res {
            Ok(session) => session,
            Err(e) => {
                lifecycle.close();
                return Err(e);
            }
        },
    };
    let peer = session.peer;

    let serial = state.next_serial();
    let outbound = Arc::new(PriorityQueue::new(state.config.outbound_capacity));
    let handle = PeerHandle {
        id: peer,
        ciphered: session.negotiated.ciphered,
        extended: session.negotiated.extended,
        sealed: session.sealed,
        serial,
        outbound: Arc::clone(&outbound),
        cancel: cancel.clone(),
    };
    if state.registry.register(handle).is_err() {
        counters::registrations_total("conflict");
        warn!(%peer, %peer_addr, "radio id already registered, closing new connection");
        lifecycle.close();
        return Err(TowerError::RegistrationConflict(peer));
    }
    counters::registrations_total("ok");
    gauges::inc_connections_active();
    gauges::peers_registered(state.registry.len());
    info!(%peer, %peer_addr, serial, sealed = session.sealed, "peer registered");

    let _guard = PeerGuard {
        state: Arc::clone(&state),
        id: peer,
        serial,
        outbound: Arc::clone(&outbound),
        cancel: cancel.clone(),
    };

    let writer_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let result = write_loop(writer, outbound, cancel.clone()).await;
            cancel.cancel();
            result
        }
    });

    let result = read_loop(&mut reader, &state, peer, &cancel).await;
    cancel.cancel();
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(%peer, "writer stopped: {}", e),
        Err(e) => warn!(%peer, "writer task failed: {}", e),
    }
    if state
        .inbound
        .push(Inbound::Disconnected { from: peer })
        .await
        .is_err()
    {
        debug!(%peer, "inbound queue closed before disconnect notice");
    }
    lifecycle.close();
    info!(%peer, state = %lifecycle.state(), "connection closed");
    result
}
