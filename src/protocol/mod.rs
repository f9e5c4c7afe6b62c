//! Protocol module - state machine, framing, and frame types.
//!
//! This module implements the station talk protocol:
//! - Table-driven server state machine
//! - Frame buffer for splitting the TCP stream into lines
//! - Command and reply frames

mod frame;
mod frame_buffer;
mod state_machine;

pub use frame::{Command, Frame, Reply};
pub use frame_buffer::{max_frame_len_for, FrameBuffer, DEFAULT_MAX_FRAME_LEN, FRAME_DELIMITER};
pub use state_machine::{
    transition, ProtocolAction, ProtocolHandler, ProtocolStateMachine, ServerState,
};
