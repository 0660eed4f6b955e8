// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame-level wire codec.
//!
//! Every datagram is a concatenation of one or more frames. Each frame is
//! an 8-byte header followed by `payload_len` payload bytes:
//!
//! ```text
//!  0          1          2          3          4                             8
//!  +----------+----------+----------+----------+---------------------------+
//!  |  0xCA    | version  |  flags   | command  |    payload length (u32)   |
//!  +----------+----------+----------+----------+---------------------------+
//!  |                        payload (payload_len bytes)                    |
//! ```
//!
//! The payload-length field is written in the sender's native byte order;
//! the receiver derives the order of the whole message from bit 7 of the
//! flags byte (set = big-endian). A wrong magic byte invalidates the entire
//! datagram, not just the frame.

pub mod buffer;

use crate::config::{PV_FLAG_BIG_ENDIAN, PV_MAGIC, PV_MESSAGE_HEADER_SIZE, PV_VERSION};
use buffer::{BufferError, ByteOrder, WireBuffer};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Result type for frame decode/handler operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors that invalidate a frame (and, on the receive path, the datagram).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// First byte of the frame was not the protocol magic.
    BadMagic { found: u8 },
    /// Fewer than 8 bytes remained where a header was expected.
    HeaderTruncated { remaining: usize },
    /// The declared payload length overruns the datagram.
    PayloadOverrun { payload_size: u32, remaining: usize },
    /// A handler read past the end of its payload.
    Underflow(BufferError),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::BadMagic { found } => {
                write!(f, "not a valid frame (magic {:#04x})", found)
            }
            FrameError::HeaderTruncated { remaining } => {
                write!(f, "truncated frame header ({} bytes remaining)", remaining)
            }
            FrameError::PayloadOverrun {
                payload_size,
                remaining,
            } => write!(
                f,
                "payload length {} overruns datagram ({} bytes remaining)",
                payload_size, remaining
            ),
            FrameError::Underflow(err) => write!(f, "payload underflow: {}", err),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<BufferError> for FrameError {
    fn from(err: BufferError) -> Self {
        FrameError::Underflow(err)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub command: u8,
    pub payload_size: u32,
}

impl FrameHeader {
    /// Header for an outgoing frame in the host's byte order.
    pub fn outgoing(command: u8, payload_size: u32) -> Self {
        let flags = match ByteOrder::native() {
            ByteOrder::BigEndian => PV_FLAG_BIG_ENDIAN,
            ByteOrder::LittleEndian => 0,
        };
        FrameHeader {
            version: PV_VERSION,
            flags,
            command,
            payload_size,
        }
    }

    /// Whether the flags byte declares a big-endian message.
    pub fn is_big_endian(&self) -> bool {
        self.flags & PV_FLAG_BIG_ENDIAN != 0
    }

    /// Byte order declared by the flags byte.
    pub fn byte_order(&self) -> ByteOrder {
        if self.is_big_endian() {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Write the 8-byte header at the buffer's cursor.
    ///
    /// The payload-length field follows the buffer's current byte order;
    /// callers sending on the wire keep the buffer in native order so the
    /// flags byte and the field agree.
    pub fn encode(&self, buffer: &mut WireBuffer) {
        buffer.put_u8(PV_MAGIC);
        buffer.put_u8(self.version);
        buffer.put_u8(self.flags);
        buffer.put_u8(self.command);
        buffer.put_u32(self.payload_size);
    }

    /// Parse a header at the buffer's cursor and advance past it.
    ///
    /// Switches the buffer's byte order to the one the flags byte declares,
    /// then verifies the declared payload fits inside the buffer's limit.
    pub fn decode(buffer: &mut WireBuffer) -> FrameResult<Self> {
        if buffer.remaining() < PV_MESSAGE_HEADER_SIZE {
            return Err(FrameError::HeaderTruncated {
                remaining: buffer.remaining(),
            });
        }

        let magic = buffer.get_u8()?;
        let version = buffer.get_u8()?;
        if magic != PV_MAGIC {
            return Err(FrameError::BadMagic { found: magic });
        }

        let flags = buffer.get_u8()?;
        if flags & PV_FLAG_BIG_ENDIAN != 0 {
            buffer.set_byte_order(ByteOrder::BigEndian);
        } else {
            buffer.set_byte_order(ByteOrder::LittleEndian);
        }

        let command = buffer.get_u8()?;
        let payload_size = buffer.get_u32()?;

        if payload_size as usize > buffer.remaining() {
            return Err(FrameError::PayloadOverrun {
                payload_size,
                remaining: buffer.remaining(),
            });
        }

        Ok(FrameHeader {
            version,
            flags,
            command,
            payload_size,
        })
    }
}

/// Write an address as its canonical 16-byte IPv6 form (IPv4 addresses are
/// v4-mapped, `::ffff:a.b.c.d`).
pub fn encode_ipv6_address(buffer: &mut WireBuffer, address: &SocketAddr) {
    let v6 = match address.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    buffer.put_bytes(&v6.octets());
}

/// Read a 16-byte IPv6 address, collapsing v4-mapped forms back to IPv4.
pub fn decode_ipv6_address(buffer: &mut WireBuffer) -> Result<IpAddr, BufferError> {
    let mut octets = [0u8; 16];
    buffer.get_bytes(&mut octets)?;
    let v6 = Ipv6Addr::from(octets);
    match v6.to_ipv4_mapped() {
        Some(v4) => Ok(IpAddr::V4(v4)),
        None => Ok(IpAddr::V6(v6)),
    }
}
