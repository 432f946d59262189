//! RCON wire format.
//!
//! ```text
//! i32 LE length | i32 LE request id | i32 LE type | body | 0x00 0x00
//! ```
//!
//! `length` counts everything after itself, so an empty body gives 10.

use crate::rcon::{RconError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of id, type and the two terminators.
pub const HEADER_LEN: usize = 10;

/// Largest body a server sends in one packet.
pub const MAX_BODY_LEN: usize = 4096;

/// Largest accepted value of the length field.
pub const MAX_PACKET_LEN: usize = MAX_BODY_LEN + HEADER_LEN;

/// Packet type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Login request (3)
    Auth,
    /// Command request (2). Servers also answer logins with this type.
    ExecCommand,
    /// Command output (0)
    Response,
    Other(i32),
}

impl PacketType {
    pub fn as_i32(self) -> i32 {
        match self {
            PacketType::Auth => 3,
            PacketType::ExecCommand => 2,
            PacketType::Response => 0,
            PacketType::Other(value) => value,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            3 => PacketType::Auth,
            2 => PacketType::ExecCommand,
            0 => PacketType::Response,
            other => PacketType::Other(other),
        }
    }
}

/// One RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: PacketType,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, kind: PacketType, body: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    pub fn auth(id: i32, password: &str) -> Self {
        Self::new(id, PacketType::Auth, password)
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self::new(id, PacketType::ExecCommand, command)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Bytes {
        let body = self.body.as_bytes();
        let mut buf = BytesMut::with_capacity(4 + HEADER_LEN + body.len());
        buf.put_i32_le((HEADER_LEN + body.len()) as i32);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.kind.as_i32());
        buf.put_slice(body);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.freeze()
    }

    /// Take one complete packet off the front of `buf`.
    ///
    /// Returns `Ok(None)` while more bytes are needed. Bodies are decoded
    /// lossily as UTF-8.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let length = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if length < HEADER_LEN as i32 || length as usize > MAX_PACKET_LEN {
            return Err(RconError::Malformed(format!(
                "invalid packet length {}",
                length
            )));
        }

        let length = length as usize;
        if buf.len() < 4 + length {
            return Ok(None);
        }

        let mut frame = buf.split_to(4 + length);
        frame.advance(4);
        let id = frame.get_i32_le();
        let kind = PacketType::from_i32(frame.get_i32_le());

        let body_len = length - HEADER_LEN;
        if frame[body_len] != 0 || frame[body_len + 1] != 0 {
            return Err(RconError::Malformed(
                "packet is missing its null terminators".to_string(),
            ));
        }

        let body = String::from_utf8_lossy(&frame[..body_len]).into_owned();
        Ok(Some(Packet { id, kind, body }))
    }
}
