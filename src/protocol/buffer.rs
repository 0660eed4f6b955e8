// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Position/limit wire buffer with switchable byte order.
//!
//! Datagrams carry their own endianness (flags bit 7 of each frame header),
//! so the receive path flips the buffer's byte order per message. Reads are
//! bounds-checked; writes grow the backing storage on demand.

/// Byte order applied to multi-byte reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Byte order of the host.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }
}

/// Error raised by bounds-checked buffer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Fewer bytes remain than the read requires.
    Underflow {
        /// Read position at the time of the failure.
        offset: usize,
        /// Bytes the read needed.
        needed: usize,
    },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Underflow { offset, needed } => {
                write!(f, "buffer underflow at offset {} (needed {} bytes)", offset, needed)
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// Generate byte-order-aware read methods for primitive types.
///
/// Each generated method checks bounds (returning [`BufferError::Underflow`]
/// on overrun), decodes with the buffer's current byte order, and advances
/// the position.
macro_rules! impl_get {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> Result<$type, BufferError> {
            if self.position + $size > self.limit {
                return Err(BufferError::Underflow {
                    offset: self.position,
                    needed: $size,
                });
            }
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(&self.data[self.position..self.position + $size]);
            self.position += $size;
            Ok(match self.order {
                ByteOrder::LittleEndian => <$type>::from_le_bytes(bytes),
                ByteOrder::BigEndian => <$type>::from_be_bytes(bytes),
            })
        }
    };
}

/// Generate byte-order-aware write methods for primitive types.
///
/// Writes grow the backing storage when needed and advance the position.
macro_rules! impl_put {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self, value: $type) {
            let bytes = match self.order {
                ByteOrder::LittleEndian => value.to_le_bytes(),
                ByteOrder::BigEndian => value.to_be_bytes(),
            };
            self.put_bytes(&bytes);
        }
    };
}

/// Growable byte buffer with ByteBuffer-style position/limit semantics.
///
/// Write mode: `clear()`, `put_*` up to `position`, then `flip()` to expose
/// `[0, position)` for reading or sending. Read mode: `get_*` consume
/// `[position, limit)`.
pub struct WireBuffer {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    order: ByteOrder,
}

impl WireBuffer {
    /// Create a buffer with `capacity` zeroed bytes, in write mode.
    pub fn with_capacity(capacity: usize) -> Self {
        WireBuffer {
            data: vec![0u8; capacity],
            position: 0,
            limit: capacity,
            order: ByteOrder::native(),
        }
    }

    // ===== Cursor management =====

    /// Reset to write mode: position 0, limit = capacity.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.data.len();
    }

    /// Switch to read mode: limit = position, position 0.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor. Clamped to the current limit.
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.limit);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.position)
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Switch the interpretation of multi-byte values. The receive path
    /// calls this per message, from the frame header's flags byte.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Full backing storage, for `recv_from` to fill.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Readable window `[position, limit)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Grow the backing storage so at least `additional` more bytes can be
    /// written without reallocation.
    pub fn ensure_capacity(&mut self, additional: usize) {
        let needed = self.position + additional;
        if needed > self.data.len() {
            self.data.resize(needed, 0);
            self.limit = self.data.len();
        }
    }

    // ===== Writes (grow on demand) =====

    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    impl_put!(put_u16, u16, 2);
    impl_put!(put_u32, u32, 4);
    impl_put!(put_u64, u64, 8);
    impl_put!(put_i16, i16, 2);
    impl_put!(put_i32, i32, 4);
    impl_put!(put_i64, i64, 8);

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
    }

    /// Absolute u32 write at `offset`, honoring the byte order. The cursor
    /// does not move. Used to back-patch a frame's payload length.
    pub fn put_u32_at(&mut self, offset: usize, value: u32) {
        let bytes = match self.order {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        let end = offset + 4;
        if end > self.data.len() {
            self.data.resize(end, 0);
            self.limit = self.data.len();
        }
        self.data[offset..end].copy_from_slice(&bytes);
    }

    // ===== Reads (bounds-checked) =====

    pub fn get_u8(&mut self) -> Result<u8, BufferError> {
        if self.position >= self.limit {
            return Err(BufferError::Underflow {
                offset: self.position,
                needed: 1,
            });
        }
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    impl_get!(get_u16, u16, 2);
    impl_get!(get_u32, u32, 4);
    impl_get!(get_u64, u64, 8);
    impl_get!(get_i16, i16, 2);
    impl_get!(get_i32, i32, 4);
    impl_get!(get_i64, i64, 8);

    pub fn get_bytes(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        if self.position + out.len() > self.limit {
            return Err(BufferError::Underflow {
                offset: self.position,
                needed: out.len(),
            });
        }
        out.copy_from_slice(&self.data[self.position..self.position + out.len()]);
        self.position += out.len();
        Ok(())
    }
}

impl std::fmt::Debug for WireBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.data.len())
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip_little_endian() {
        let mut buf = WireBuffer::with_capacity(64);
        buf.set_byte_order(ByteOrder::LittleEndian);
        buf.put_u16(0xABCD);
        buf.put_u32(0xDEADBEEF);
        buf.put_i64(-42);
        buf.flip();

        assert_eq!(buf.get_u16().unwrap(), 0xABCD);
        assert_eq!(buf.get_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(buf.get_i64().unwrap(), -42);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_put_get_round_trip_big_endian() {
        let mut buf = WireBuffer::with_capacity(64);
        buf.set_byte_order(ByteOrder::BigEndian);
        buf.put_u32(0x01020304);
        buf.flip();
        buf.set_byte_order(ByteOrder::BigEndian);

        // Raw layout is network order
        assert_eq!(buf.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf.get_u32().unwrap(), 0x01020304);
    }

    #[test]
    fn test_read_underflow() {
        let mut buf = WireBuffer::with_capacity(2);
        buf.put_u8(1);
        buf.flip();

        assert!(buf.get_u32().is_err(), "4-byte read from 1-byte window must fail");
        // Failed read does not advance the cursor
        assert_eq!(buf.get_u8().unwrap(), 1);
    }

    #[test]
    fn test_flip_exposes_written_window() {
        let mut buf = WireBuffer::with_capacity(16);
        buf.put_u8(0xAA);
        buf.put_u8(0xBB);
        buf.flip();

        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 2);
        assert_eq!(buf.as_slice(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_put_u32_at_back_patch() {
        let mut buf = WireBuffer::with_capacity(16);
        buf.put_u32(0); // placeholder
        buf.put_bytes(&[1, 2, 3]);
        let payload = buf.position() - 4;
        buf.put_u32_at(0, payload as u32);
        buf.flip();

        assert_eq!(buf.get_u32().unwrap(), 3);
    }

    #[test]
    fn test_writes_grow_storage() {
        let mut buf = WireBuffer::with_capacity(2);
        buf.put_u64(u64::MAX);
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.position(), 8);
    }
}
