//! # Link state machine
//!
//! Pure connection lifecycle of a single outgoing UDP channel. The state machine knows nothing
//! about sockets, it only decides what the owner should do in response to each event.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Connection state of a link plus the watchdog tick count spent in that state.
#[derive(Debug, Clone)]
pub struct Link {
    state: LinkState,
    ticks_in_state: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Request to open the link
    Connect,

    /// The remote replied to the handshake
    HandshakeAck,

    /// The handshake (or an established link) timed out
    Timeout,

    /// Explicit request to close the link
    Disconnect,

    /// A non-fatal I/O error occurred on the link
    IoError,
}

/// What the owner of the link must do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    SendHandshake,
    BeginTraffic,
    Close,
    LogError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl Link {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            ticks_in_state: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    /// Apply an event to the link, returning the action the owner must take.
    pub fn handle(&mut self, event: LinkEvent) -> LinkAction {
        use LinkAction as A;
        use LinkEvent as E;
        use LinkState as S;

        let (next, action) = match (self.state, event) {
            (S::Disconnected, E::Connect) => (S::Connecting, A::SendHandshake),
            (S::Connecting, E::HandshakeAck) => (S::Ready, A::BeginTraffic),
            (S::Connecting, E::Timeout) => (S::Disconnected, A::Close),
            (S::Ready, E::Timeout) => (S::Disconnected, A::Close),
            (S::Connecting, E::Disconnect) | (S::Ready, E::Disconnect) => {
                (S::Disconnected, A::Close)
            }

            // I/O errors are only ever logged, the link keeps its state
            (s, E::IoError) => (s, A::LogError),

            (s, _) => (s, A::None),
        };

        if next != self.state {
            self.state = next;
            self.ticks_in_state = 0;
        }

        action
    }

    /// Advance the watchdog by one tick and return the event it raises, if any.
    ///
    /// A disconnected link always asks to reconnect, a connecting link times out once it has
    /// spent `handshake_timeout_ticks` ticks without an acknowledgement.
    pub fn watchdog(&mut self, handshake_timeout_ticks: u32) -> Option<LinkEvent> {
        self.ticks_in_state = self.ticks_in_state.saturating_add(1);

        match self.state {
            LinkState::Disconnected => Some(LinkEvent::Connect),
            LinkState::Connecting if self.ticks_in_state >= handshake_timeout_ticks => {
                Some(LinkEvent::Timeout)
            }
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
