use dashmap::DashMap;
use radio_common::{Coordinates, Message, Payload, RadioConfig, RadioDelegate, RadioId};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Something a front end watching the tower cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TowerEvent {
    /// A plane reported a new position.
    PlaneMoved {
        /// Plane id.
        id: RadioId,
        /// Reported position.
        position: Coordinates,
    },
    /// A plane said BYE or its link dropped.
    PlaneLeft {
        /// Plane id.
        id: RadioId,
    },
    /// A plane declared an emergency.
    Mayday {
        /// Plane id.
        id: RadioId,
        /// Position when the MAYDAY was sent.
        position: Coordinates,
        /// Free-text reason.
        reason: String,
    },
}

/// Control tower delegate: keeps the last known position of every connected
/// plane it hears from and publishes [`TowerEvent`]s. A plane is forgotten on
/// BYE or when its link closes.
#[derive(Debug)]
pub struct Tower {
    position: Coordinates,
    radio: RadioConfig,
    planes: DashMap<RadioId, Coordinates>,
    events: broadcast::Sender<TowerEvent>,
}

impl Tower {
    /// A tower at `position` using `radio` for every connection.
    #[must_use]
    pub fn new(position: Coordinates, radio: RadioConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            position,
            radio,
            planes: DashMap::new(),
            events,
        }
    }

    /// Subscribe to tower events. Slow subscribers miss old events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TowerEvent> {
        self.events.subscribe()
    }

    /// Last reported position of a plane.
    #[must_use]
    pub fn plane_position(&self, id: &RadioId) -> Option<Coordinates> {
        self.planes.get(id).map(|entry| *entry.value())
    }

    /// Number of planes with a known position.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.planes.len()
    }

    fn publish(&self, event: TowerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl RadioDelegate for Tower {
    fn location(&self) -> Coordinates {
        self.position
    }

    fn config(&self) -> RadioConfig {
        self.radio
    }

    fn on_message(&self, from: RadioId, message: Message) {
        let position = message.position;
        match message.payload {
            Payload::Bye => {
                self.planes.remove(&from);
                info!(plane = %from, "plane signed off");
                self.publish(TowerEvent::PlaneLeft { id: from });
                return;
            }
            Payload::Mayday { reason } => {
                warn!(plane = %from, x = position.x, y = position.y, z = position.z, %reason, "MAYDAY");
                self.publish(TowerEvent::Mayday {
                    id: from,
                    position,
                    reason,
                });
            }
            Payload::LandingRequest => {
                info!(plane = %from, "landing requested");
            }
            ref other => {
                debug!(plane = %from, kind = %other.kind(), "message received");
            }
        }

        let moved = self.planes.insert(from, position) != Some(position);
        if moved {
            self.publish(TowerEvent::PlaneMoved { id: from, position });
        }
    }

    fn on_disconnect(&self, peer: RadioId) {
        if self.planes.remove(&peer).is_some() {
            info!(plane = %peer, "lost contact with plane");
            self.publish(TowerEvent::PlaneLeft { id: peer });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower() -> Tower {
        Tower::new(Coordinates::new(0, 0, 0), RadioConfig::default())
    }

    fn plane() -> RadioId {
        RadioId::new("PLN", 7)
    }

    #[test]
    fn keepalive_updates_position_once() {
        let tower = tower();
        let mut events = tower.subscribe();
        let at = Coordinates::new(3, 4, 500);
        let keepalive = Message::bare(plane(), at, radio_common::MessageType::Keepalive).unwrap();

        tower.on_message(plane(), keepalive.clone());
        tower.on_message(plane(), keepalive);

        assert_eq!(tower.plane_position(&plane()), Some(at));
        assert_eq!(
            events.try_recv().unwrap(),
            TowerEvent::PlaneMoved {
                id: plane(),
                position: at
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn mayday_is_published_with_reason() {
        let tower = tower();
        let mut events = tower.subscribe();
        let at = Coordinates::new(-1, 2, 100);

        tower.on_message(plane(), Message::mayday(plane(), at, "low fuel"));

        assert_eq!(
            events.try_recv().unwrap(),
            TowerEvent::Mayday {
                id: plane(),
                position: at,
                reason: "low fuel".to_string()
            }
        );
        assert_eq!(tower.plane_position(&plane()), Some(at));
    }

    #[test]
    fn bye_forgets_the_plane() {
        let tower = tower();
        let at = Coordinates::new(1, 1, 1);
        tower.on_message(plane(), Message::data(plane(), at, b"x".to_vec()));
        assert_eq!(tower.tracked(), 1);

        let mut events = tower.subscribe();
        let bye = Message::bare(plane(), at, radio_common::MessageType::Bye).unwrap();
        tower.on_message(plane(), bye);

        assert_eq!(tower.tracked(), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            TowerEvent::PlaneLeft { id: plane() }
        );
    }

    #[test]
    fn dropped_link_forgets_the_plane_once() {
        let tower = tower();
        let at = Coordinates::new(2, 2, 2);
        tower.on_message(plane(), Message::data(plane(), at, b"x".to_vec()));

        let mut events = tower.subscribe();
        tower.on_disconnect(plane());
        tower.on_disconnect(plane());

        assert_eq!(tower.tracked(), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            TowerEvent::PlaneLeft { id: plane() }
        );
        assert!(events.try_recv().is_err());
    }
}
