//! Connection lifecycle states and the guard that enforces their order.

use std::fmt;
use thiserror::Error;

/// Lifecycle of one radio connection.
///
/// `Connecting → Handshaking → Active → (Upgrading → Active)? → Closed`.
/// The upgrading detour happens at most once and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket is being opened or was just accepted.
    Connecting,
    /// HELLO exchange in progress.
    Handshaking,
    /// Normal traffic flows.
    Active,
    /// Codec swap or cipher installation in progress.
    Upgrading,
    /// Socket closed; no transition leaves this state.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Upgrading => "upgrading",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A transition the lifecycle does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal connection transition {from} -> {to}")]
pub struct IllegalTransition {
    /// State before the attempted transition.
    pub from: ConnectionState,
    /// Requested state.
    pub to: ConnectionState,
}

/// Tracks a connection's state and rejects out-of-order transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    upgraded: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Starts in [`ConnectionState::Connecting`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            upgraded: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the one allowed upgrade has already happened.
    #[must_use]
    pub const fn upgraded(&self) -> bool {
        self.upgraded
    }

    /// Moves to `to` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] for any move the lifecycle forbids,
    /// including a second upgrade and anything out of `Closed`.
    pub fn advance(&mut self, to: ConnectionState) -> Result<(), IllegalTransition> {
        use ConnectionState::{Active, Closed, Connecting, Handshaking, Upgrading};

        let legal = match (self.state, to) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Connecting, Handshaking) | (Handshaking | Upgrading, Active) => true,
            (Handshaking | Active, Upgrading) => !self.upgraded,
            _ => false,
        };
        if !legal {
            return Err(IllegalTransition {
                from: self.state,
                to,
            });
        }
        if to == Upgrading {
            self.upgraded = true;
        }
        self.state = to;
        Ok(())
    }

    /// Moves to `Closed`. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn normal_path_without_upgrade() {
        let mut lc = Lifecycle::new();
        lc.advance(Handshaking).unwrap();
        lc.advance(Active).unwrap();
        lc.advance(Closed).unwrap();
        assert_eq!(lc.state(), Closed);
        assert!(!lc.upgraded());
    }

    #[test]
    fn upgrade_happens_at_most_once() {
        let mut lc = Lifecycle::new();
        lc.advance(Handshaking).unwrap();
        lc.advance(Upgrading).unwrap();
        lc.advance(Active).unwrap();
        assert!(lc.upgraded());
        assert_eq!(
            lc.advance(Upgrading),
            Err(IllegalTransition {
                from: Active,
                to: Upgrading
            })
        );
    }

    #[test]
    fn closed_is_terminal() {
        let mut lc = Lifecycle::new();
        lc.close();
        for to in [Connecting, Handshaking, Active, Upgrading, Closed] {
            assert!(lc.advance(to).is_err());
        }
        lc.close();
        assert_eq!(lc.state(), Closed);
    }

    #[test]
    fn cannot_skip_handshake() {
        let mut lc = Lifecycle::new();
        assert!(lc.advance(Active).is_err());
        assert!(lc.advance(Upgrading).is_err());
        assert_eq!(lc.state(), Connecting);
    }

    #[test]
    fn any_live_state_can_close() {
        for path in [&[][..], &[Handshaking][..], &[Handshaking, Upgrading][..]] {
            let mut lc = Lifecycle::new();
            for s in path {
                lc.advance(*s).unwrap();
            }
            assert!(lc.advance(Closed).is_ok());
        }
    }
}
