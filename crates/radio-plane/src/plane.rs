use crate::radio::{RadioClient, RadioError};
use radio_common::{Coordinates, Message, Payload, RadioConfig, RadioDelegate, RadioId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Plane delegate: reports its position and obeys CHOKE/UNCHOKE from the
/// tower.
#[derive(Debug)]
pub struct Plane {
    radio: RadioConfig,
    position: Mutex<Coordinates>,
    choked: AtomicBool,
    unchoked: Notify,
}

impl Plane {
    /// A plane starting at `position`.
    #[must_use]
    pub fn new(position: Coordinates, radio: RadioConfig) -> Self {
        Self {
            radio,
            position: Mutex::new(position),
            choked: AtomicBool::new(false),
            unchoked: Notify::new(),
        }
    }

    /// Move the plane.
    pub fn set_position(&self, position: Coordinates) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }

    /// Whether the tower asked this plane to stay quiet.
    #[must_use]
    pub fn is_choked(&self) -> bool {
        self.choked.load(Ordering::Acquire)
    }

    async fn wait_unchoked(&self) {
        loop {
            let notified = self.unchoked.notified();
            if !self.is_choked() {
                return;
            }
            notified.await;
        }
    }
}

impl RadioDelegate for Plane {
    fn location(&self) -> Coordinates {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> RadioConfig {
        self.radio
    }

    fn on_message(&self, from: RadioId, message: Message) {
        match message.payload {
            Payload::Choke => {
                info!(tower = %from, "choked, holding periodic traffic");
                self.choked.store(true, Ordering::Release);
            }
            Payload::Unchoke => {
                info!(tower = %from, "unchoked");
                self.choked.store(false, Ordering::Release);
                self.unchoked.notify_waiters();
            }
            Payload::Mayday { reason } => {
                warn!(from = %from, %reason, "MAYDAY relayed by tower");
            }
            Payload::Data(bytes) => {
                info!(tower = %from, len = bytes.len(), "data received");
            }
            ref other => {
                debug!(tower = %from, kind = %other.kind(), "message received");
            }
        }
    }
}

/// Declare an emergency.
///
/// # Errors
///
/// Returns [`RadioError::Queue`] if the link is closed.
pub async fn mayday(client: &RadioClient, reason: &str) -> Result<(), RadioError> {
    warn!(%reason, "declaring MAYDAY");
    client
        .send_wait(client.message(Payload::Mayday {
            reason: reason.to_string(),
        }))
        .await
}

/// Send a KEEPALIVE every `interval` until `shutdown` fires or the link
/// drops, pausing while choked. Signs off with BYE on shutdown.
///
/// # Errors
///
/// Returns [`RadioError::Queue`] if the link closes while a frame waits.
pub async fn fly(
    client: &RadioClient,
    plane: &Plane,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), RadioError> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = client.closed() => {
                info!("link closed, landing the radio");
                return Ok(());
            }
            _ = ticker.tick() => {
                if plane.is_choked() {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = client.closed() => return Ok(()),
                        () = plane.wait_unchoked() => ticker.reset(),
                    }
                    continue;
                }
                client.send_wait(client.message(Payload::Keepalive)).await?;
            }
        }
    }

    client.send_wait(client.message(Payload::Bye)).await?;
    info!("signed off with BYE");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_common::MessageType;

    fn plane() -> Plane {
        Plane::new(Coordinates::new(1, 2, 3), RadioConfig::default())
    }

    #[test]
    fn location_follows_set_position() {
        let p = plane();
        assert_eq!(p.location(), Coordinates::new(1, 2, 3));
        p.set_position(Coordinates::new(4, 5, 6));
        assert_eq!(p.location(), Coordinates::new(4, 5, 6));
    }

    #[test]
    fn choke_and_unchoke_toggle_traffic() {
        let p = plane();
        let tower = RadioId::new("TWR", 1);
        let at = Coordinates::default();

        p.on_message(tower, Message::bare(tower, at, MessageType::Choke).unwrap());
        assert!(p.is_choked());
        p.on_message(tower, Message::bare(tower, at, MessageType::Unchoke).unwrap());
        assert!(!p.is_choked());
    }

    #[tokio::test]
    async fn unchoke_wakes_a_waiting_plane() {
        let p = std::sync::Arc::new(plane());
        let tower = RadioId::new("TWR", 1);
        let at = Coordinates::default();
        p.on_message(tower, Message::bare(tower, at, MessageType::Choke).unwrap());

        let waiter = {
            let p = std::sync::Arc::clone(&p);
            tokio::spawn(async move { p.wait_unchoked().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        p.on_message(tower, Message::bare(tower, at, MessageType::Unchoke).unwrap());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
