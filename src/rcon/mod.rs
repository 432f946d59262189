//! Remote console (RCON) client.
//!
//! - [`packet`]: little-endian packet codec
//! - [`client`]: an authenticated, serialized session over TCP
//! - [`sessions`]: one session per instance

pub mod client;
pub mod packet;
pub mod sessions;

pub use client::{DEFAULT_TIMEOUT, RconClient, SessionState, check_auth_response};
pub use packet::{Packet, PacketType};
pub use sessions::SessionRegistry;

use std::time::Duration;

/// Console protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    #[error("RCON request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed RCON packet: {0}")]
    Malformed(String),

    #[error("No response matched request {expected}")]
    UnmatchedResponse { expected: i32 },

    #[error("RCON authentication failed")]
    AuthenticationFailed,

    #[error("RCON session is not authenticated")]
    NotAuthenticated,

    #[error("Command of {len} bytes exceeds the {max} byte limit")]
    CommandTooLong { len: usize, max: usize },

    #[error("RCON I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RconError>;
