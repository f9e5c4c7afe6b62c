//! Table-driven protocol state machine.
//!
//! The server side of a station conversation moves through these states:
//!
//! ```text
//!  Idle ──ReceiveHelo──▶ AwaitingHelo ──SendAck──▶ AwaitingCommand ──ReceiveFini──▶ Finished
//!                                                   │   ▲      ▲
//!                                      ReceiveSize  │   │      │ SendAck / SendNak
//!                                      ReceiveData  ▼   │      │
//!                                         AwaitingSize / AwaitingData
//! ```
//!
//! `AwaitingCommand` also accepts `SendNak` as a self-loop. Any pair not in
//! [`transition`] is rejected: the state is left as is and no handler runs.

use std::fmt;

use crate::error::{IngestError, Result};

/// Server-side protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Connection accepted, nothing received yet.
    Idle,
    /// HELO received, authentication pending.
    AwaitingHelo,
    /// Authenticated and waiting for SIZE, DATA or FINI.
    AwaitingCommand,
    /// SIZE received, reply pending.
    AwaitingSize,
    /// DATA received, reply pending.
    AwaitingData,
    /// Terminal state.
    Finished,
}

impl ServerState {
    pub const ALL: [ServerState; 6] = [
        ServerState::Idle,
        ServerState::AwaitingHelo,
        ServerState::AwaitingCommand,
        ServerState::AwaitingSize,
        ServerState::AwaitingData,
        ServerState::Finished,
    ];

    pub fn is_terminal(self) -> bool {
        self == ServerState::Finished
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Idle => "Idle",
            ServerState::AwaitingHelo => "AwaitingHelo",
            ServerState::AwaitingCommand => "AwaitingCommand",
            ServerState::AwaitingSize => "AwaitingSize",
            ServerState::AwaitingData => "AwaitingData",
            ServerState::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Actions raised while interpreting inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolAction {
    ReceiveHelo,
    SendAck,
    SendNak,
    ReceiveSize,
    ReceiveData,
    ReceiveFini,
}

impl ProtocolAction {
    pub const ALL: [ProtocolAction; 6] = [
        ProtocolAction::ReceiveHelo,
        ProtocolAction::SendAck,
        ProtocolAction::SendNak,
        ProtocolAction::ReceiveSize,
        ProtocolAction::ReceiveData,
        ProtocolAction::ReceiveFini,
    ];
}

impl fmt::Display for ProtocolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolAction::ReceiveHelo => "ReceiveHelo",
            ProtocolAction::SendAck => "SendAck",
            ProtocolAction::SendNak => "SendNak",
            ProtocolAction::ReceiveSize => "ReceiveSize",
            ProtocolAction::ReceiveData => "ReceiveData",
            ProtocolAction::ReceiveFini => "ReceiveFini",
        };
        f.write_str(name)
    }
}

/// Look up the successor of `state` under `action`.
///
/// Returns `None` for every pair the protocol does not allow.
pub const fn transition(state: ServerState, action: ProtocolAction) -> Option<ServerState> {
    use ProtocolAction::*;
    use ServerState::*;

    match (state, action) {
        (Idle, ReceiveHelo) => Some(AwaitingHelo),
        (AwaitingHelo, SendAck) => Some(AwaitingCommand),
        (AwaitingCommand, ReceiveSize) => Some(AwaitingSize),
        (AwaitingCommand, ReceiveData) => Some(AwaitingData),
        (AwaitingCommand, ReceiveFini) => Some(Finished),
        (AwaitingCommand, SendNak) => Some(AwaitingCommand),
        (AwaitingSize, SendAck) | (AwaitingSize, SendNak) => Some(AwaitingCommand),
        (AwaitingData, SendAck) | (AwaitingData, SendNak) => Some(AwaitingCommand),
        _ => None,
    }
}

/// Side effects bound to each action.
///
/// The receive hooks are observational and default to no-ops; the reply and
/// termination hooks must be supplied by the owner.
pub trait ProtocolHandler {
    fn on_receive_helo(&mut self) {}

    fn on_send_ack(&mut self);

    fn on_send_nak(&mut self);

    fn on_receive_size(&mut self) {}

    fn on_receive_data(&mut self) {}

    fn on_receive_fini(&mut self);
}

/// Finite state machine with a fixed handler table.
#[derive(Debug)]
pub struct ProtocolStateMachine<H> {
    state: ServerState,
    handler: H,
}

impl<H: ProtocolHandler> ProtocolStateMachine<H> {
    /// Create a machine in [`ServerState::Idle`].
    pub fn new(handler: H) -> Self {
        Self {
            state: ServerState::Idle,
            handler,
        }
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Apply `action` to the current state.
    ///
    /// On a legal transition the handler runs first, then the new state is
    /// committed and returned.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidTransition`] if the pair is not in the
    /// table. The rejection is logged and the state is unchanged.
    pub fn handle_action(&mut self, action: ProtocolAction) -> Result<ServerState> {
        let Some(next) = transition(self.state, action) else {
            tracing::warn!("Invalid action \"{}\" in state \"{}\"", action, self.state);
            return Err(IngestError::InvalidTransition {
                state: self.state,
                action,
            });
        };

        self.perform(action);
        tracing::trace!("Transitioned from \"{}\" to \"{}\"", self.state, next);
        self.state = next;
        Ok(next)
    }

    fn perform(&mut self, action: ProtocolAction) {
        match action {
            ProtocolAction::ReceiveHelo => self.handler.on_receive_helo(),
            ProtocolAction::SendAck => self.handler.on_send_ack(),
            ProtocolAction::SendNak => self.handler.on_send_nak(),
            ProtocolAction::ReceiveSize => self.handler.on_receive_size(),
            ProtocolAction::ReceiveData => self.handler.on_receive_data(),
            ProtocolAction::ReceiveFini => self.handler.on_receive_fini(),
        }
    }

    #[cfg(test)]
    fn force_state(&mut self, state: ServerState) {
        self.state = state;
    }
}
