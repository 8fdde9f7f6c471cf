#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use radio_common::crypto::LazyKeyPair;
use radio_common::handshake::{self, Greeting, Session};
use radio_common::{
    Coordinates, Lifecycle, Message, RadioCodec, RadioConfig, RadioDelegate, RadioId,
};
use radio_tower::config::ServerConfig;
use radio_tower::server::ServerState;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

pub const TEST_KEY_BITS: usize = 512;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 1000,
        handshake_timeout: 5,
        inbound_capacity: 1024,
        outbound_capacity: 64,
        prefix: "TWR".to_string(),
    }
}

pub fn radio(ciphered: bool, legacy: bool) -> RadioConfig {
    RadioConfig {
        ciphered,
        legacy,
        key_length: TEST_KEY_BITS,
    }
}

/// Tower delegate that records every delivered message.
pub struct RecordingDelegate {
    radio: RadioConfig,
    seen: Mutex<Vec<(RadioId, Message)>>,
    arrived: Notify,
}

impl RecordingDelegate {
    pub fn new(radio: RadioConfig) -> Arc<Self> {
        Arc::new(Self {
            radio,
            seen: Mutex::new(Vec::new()),
            arrived: Notify::new(),
        })
    }

    pub fn seen(&self) -> Vec<(RadioId, Message)> {
        self.seen.lock().unwrap().clone()
    }

    /// Wait until at least `n` messages were delivered.
    pub async fn wait_for(&self, n: usize) -> Vec<(RadioId, Message)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.arrived.notified();
                let seen = self.seen();
                if seen.len() >= n {
                    return seen;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for deliveries")
    }
}

impl RadioDelegate for RecordingDelegate {
    fn location(&self) -> Coordinates {
        Coordinates::new(0, 0, 0)
    }

    fn config(&self) -> RadioConfig {
        self.radio
    }

    fn on_message(&self, from: RadioId, message: Message) {
        self.seen.lock().unwrap().push((from, message));
        self.arrived.notify_waiters();
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub delegate: Arc<RecordingDelegate>,
    pub shutdown: CancellationToken,
}

pub async fn start_server(radio: RadioConfig) -> TestServer {
    start_server_with(radio, |_| {}).await
}

pub async fn start_server_with(
    radio: RadioConfig,
    tweak: impl FnOnce(&mut ServerConfig),
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);

    let delegate = RecordingDelegate::new(radio);
    let state = Arc::new(ServerState::new(config, delegate.clone()));
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        async move {
            radio_tower::run_with_shutdown(listener, state, shutdown)
                .await
                .unwrap();
        }
    });

    TestServer {
        addr,
        state,
        delegate,
        shutdown,
    }
}

/// Wait until the registry holds exactly `n` planes.
pub async fn wait_for_peers(state: &ServerState, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.registry.len() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {n} peers, has {}", state.registry.len()));
}

/// A plane speaking the protocol directly over a socket.
pub struct TestPlane {
    pub id: RadioId,
    pub position: Coordinates,
    pub reader: FramedRead<OwnedReadHalf, RadioCodec>,
    pub writer: FramedWrite<OwnedWriteHalf, RadioCodec>,
    pub session: Session,
}

impl TestPlane {
    pub async fn connect(addr: SocketAddr, seq: u32, radio: RadioConfig) -> Self {
        Self::try_connect(addr, seq, radio).await.unwrap()
    }

    pub async fn try_connect(
        addr: SocketAddr,
        seq: u32,
        radio: RadioConfig,
    ) -> Result<Self, handshake::HandshakeError> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        let mut reader = FramedRead::new(r, RadioCodec::legacy());
        let mut writer = FramedWrite::new(w, RadioCodec::legacy());

        let id = RadioId::new("PLN", seq);
        let position = Coordinates::new(10, 20, 3000);
        let greeting = Greeting {
            id,
            position,
            config: radio,
        };
        let keys = LazyKeyPair::new(radio.key_length);
        let mut lifecycle = Lifecycle::new();
        let session =
            handshake::initiate(&mut reader, &mut writer, &greeting, &keys, None, &mut lifecycle)
                .await?;

        Ok(Self {
            id,
            position,
            reader,
            writer,
            session,
        })
    }

    pub async fn send(&mut self, message: Message) {
        self.writer.send(message).await.unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.reader.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap()
    }

    /// Whether the tower closes the connection within a second.
    pub async fn is_closed_by_peer(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(1), self.reader.next()).await,
            Ok(None | Some(Err(_)))
        )
    }
}
