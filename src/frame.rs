// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Transfer chunk encoding: `[len:1][payload:len][checksum:1]`.
//!
//! The checksum is the payload byte sum truncated to 8 bits.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::MAX_CHUNK;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("chunk payload must be 1..=64 bytes, got {len}")]
    InvalidLength { len: usize },
}

/// One validated (or freshly built) chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    payload: Bytes,
    checksum: u8,
}

/// Outcome of checking a received chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(Chunk),
    ChecksumMismatch { received: u8, computed: u8 },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }
}

impl Chunk {
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Length byte as sent on the wire.
    pub fn length_byte(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Complete wire form, ready for a single write.
    pub fn to_wire(&self) -> Bytes {
        let mut wire = BytesMut::with_capacity(self.payload.len() + 2);
        wire.put_u8(self.length_byte());
        wire.put_slice(&self.payload);
        wire.put_u8(self.checksum);
        wire.freeze()
    }
}

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a chunk around `payload`.
pub fn encode(payload: &[u8]) -> Result<Chunk, FrameError> {
    if payload.is_empty() || payload.len() > MAX_CHUNK {
        return Err(FrameError::InvalidLength { len: payload.len() });
    }
    Ok(Chunk {
        payload: Bytes::copy_from_slice(payload),
        checksum: checksum(payload),
    })
}

/// Check a received chunk. A mismatch is reported, not raised; the caller
/// chooses the protocol response.
///
/// `payload` is expected to hold exactly `length` bytes, which is how the
/// receive path reads it.
pub fn decode(length: u8, payload: Bytes, received: u8) -> Validation {
    debug_assert_eq!(length as usize, payload.len());
    let computed = checksum(&payload);
    if computed == received {
        Validation::Valid(Chunk { payload, checksum: computed })
    } else {
        Validation::ChecksumMismatch { received, computed }
    }
}
