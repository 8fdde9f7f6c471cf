//! The seam between the radio engine and the peer that owns it.

use crate::message::Message;
use crate::types::{Coordinates, RadioConfig, RadioId};

/// Implemented by whatever owns a radio (a plane or a tower).
///
/// The engine reads [`config`](Self::config) once when it is built and asks
/// for [`location`](Self::location) whenever it stamps an outgoing frame.
/// Inbound traffic arrives through [`on_message`](Self::on_message) from a
/// single dispatcher task, in priority order.
pub trait RadioDelegate: Send + Sync + 'static {
    /// Current position snapshot.
    fn location(&self) -> Coordinates;

    /// Radio options for every connection this peer owns.
    fn config(&self) -> RadioConfig;

    /// Delivery callback for one inbound message. Must not block.
    fn on_message(&self, from: RadioId, message: Message);

    /// Called once a registered link to `peer` is gone, after every message
    /// it delivered. Must not block.
    fn on_disconnect(&self, peer: RadioId) {
        let _ = peer;
    }
}
