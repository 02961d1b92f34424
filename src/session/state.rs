//! Lifecycle states for a per-peer session. Mirrors the coarse states a
//! link adapter walks through: handshake, steady-state traffic, a forced
//! rekey window, a paused link, and final teardown.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Handshaking,
    Active,
    Rekeying,
    Suspended,
    Terminated,
}

impl SessionState {
    pub fn can_send(self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn can_receive(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Rekeying)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated)
    }

    pub fn is_handshaking(self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Handshaking)
    }
}
