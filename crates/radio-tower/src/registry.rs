use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use radio_common::frame;
use radio_common::{FrameError, Message, PriorityQueue, RadioId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handle held in the registry, used to reach a connected plane.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    /// Radio id the plane announced in its HELLO.
    pub id: RadioId,
    /// Whether the link negotiated ciphering.
    pub ciphered: bool,
    /// Whether the link runs the extended protocol.
    pub extended: bool,
    /// Whether extended bodies are sealed with the session key.
    pub sealed: bool,
    /// Connection serial, distinguishes reconnects under the same id.
    pub serial: u64,
    /// Frames waiting for this connection's writer task.
    pub outbound: Arc<PriorityQueue<Message>>,
    /// Cancels both halves of the connection.
    pub cancel: CancellationToken,
}

impl PeerHandle {
    /// Check that `message` can be framed on this plane's link.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the body exceeds the frame limit
    /// under this link's framing.
    pub fn check_frame(&self, message: &Message) -> Result<(), FrameError> {
        frame::framed_body_len(message, self.extended, self.sealed).map(drop)
    }
}

/// Concurrent radio id → connection table.
///
/// First registration wins: a second live connection announcing the same
/// id is refused and the original keeps the slot.
#[derive(Debug, Default)]
pub struct Registry {
    peers: DashMap<RadioId, PeerHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. Hands it back if the id is already taken.
    pub fn register(&self, handle: PeerHandle) -> Result<(), PeerHandle> {
        match self.peers.entry(handle.id) {
            Entry::Occupied(_) => Err(handle),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove entry only if it belongs to the given connection serial.
    pub fn remove_if(&self, id: &RadioId, serial: u64) -> bool {
        self.peers
            .remove_if(id, |_k, v| v.serial == serial)
            .is_some()
    }

    /// Look up a handle by radio id.
    #[must_use]
    pub fn get(&self, id: &RadioId) -> Option<PeerHandle> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    /// Ids of every registered peer, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<RadioId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of every registered handle.
    #[must_use]
    pub fn handles(&self) -> Vec<PeerHandle> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle(seq: u32, serial: u64) -> PeerHandle {
        PeerHandle {
            id: RadioId::new("PLN", seq),
            ciphered: false,
            extended: true,
            sealed: false,
            serial,
            outbound: Arc::new(PriorityQueue::new(4)),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_register_and_get_returns_handle() {
        let registry = Registry::new();
        let handle = make_handle(1, 1);
        let id = handle.id;

        registry.register(handle).unwrap();

        let retrieved = registry.get(&id).unwrap();
        assert_eq!(retrieved.id, id);
        assert_eq!(retrieved.serial, 1);
    }

    #[test]
    fn test_get_on_missing_id_returns_none() {
        let registry = Registry::new();
        assert!(registry.get(&RadioId::new("PLN", 9)).is_none());
    }

    #[test]
    fn test_duplicate_id_is_refused_and_original_kept() {
        let registry = Registry::new();
        registry.register(make_handle(1, 1)).unwrap();

        let rejected = registry.register(make_handle(1, 2)).unwrap_err();
        assert_eq!(rejected.serial, 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&rejected.id).unwrap().serial, 1);
    }

    #[test]
    fn test_remove_if_with_matching_serial_removes_entry() {
        let registry = Registry::new();
        let handle = make_handle(1, 7);
        let id = handle.id;
        registry.register(handle).unwrap();

        assert!(registry.remove_if(&id, 7));
        assert!(registry.is_empty());
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn test_remove_if_with_stale_serial_keeps_entry() {
        let registry = Registry::new();
        let handle = make_handle(1, 7);
        let id = handle.id;
        registry.register(handle).unwrap();

        assert!(!registry.remove_if(&id, 6));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_and_handles() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        for seq in 1..=3 {
            registry.register(make_handle(seq, u64::from(seq))).unwrap();
        }

        let mut ids = registry.ids();
        ids.sort_by_key(|id| *id.as_bytes());
        assert_eq!(
            ids,
            vec![
                RadioId::new("PLN", 1),
                RadioId::new("PLN", 2),
                RadioId::new("PLN", 3)
            ]
        );
        assert_eq!(registry.handles().len(), 3);
    }
}
