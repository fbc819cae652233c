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

//! Pull: fetch a file from the remote, verifying and acknowledging each chunk.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::frame::{self, Validation};
use crate::protocol::*;
use crate::serial::{Link, text};
use crate::session::Progress;

/// Initial allocation cap; the announced length is only trusted as data arrives
const MAX_PREALLOC: usize = 64 * 1024;

// ============================================================================
// States
// ============================================================================

pub struct SendCommand;
pub struct ReadLength;
pub struct ReceiveChunk;
pub struct ExpectEot;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    link: &'a mut Link,
    name: String,
    total: usize,
    buffer: BytesMut,
    progress: &'a mut dyn FnMut(Progress),
}

// ============================================================================
// Trait
// ============================================================================

pub enum ReceiverStep<'a> {
    Next(Box<dyn ReceiverState<'a> + 'a>),
    Complete(Bytes),
}

pub trait ReceiverState<'a> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S: 'a> ReceiverFsm<'a, S> {
    fn transition<T: 'a>(self) -> ReceiverStep<'a>
    where
        ReceiverFsm<'a, T>: ReceiverState<'a>,
    {
        ReceiverStep::Next(Box::new(ReceiverFsm::<T> {
            state: PhantomData,
            link: self.link,
            name: self.name,
            total: self.total,
            buffer: self.buffer,
            progress: self.progress,
        }))
    }

    fn stay(self) -> ReceiverStep<'a>
    where
        Self: ReceiverState<'a>,
    {
        ReceiverStep::Next(Box::new(self))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, SendCommand> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let fsm = *self;
        let command = Command::Pull { name: fsm.name.clone() };
        fsm.link.write(&command.to_line())?;
        debug!("Sent: {:?}", command.to_string());
        Ok(fsm.transition::<ReadLength>())
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReadLength> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        let line = fsm.link.read_line()?;

        if line.first() == Some(&ERROR_PREFIX) {
            let message = text(&line[1..]);
            warn!("Remote rejected pull of {}: {}", fsm.name, message);
            return Err(TransferError::RemoteRejected { message });
        }

        let reply = text(&line);
        fsm.total = reply
            .trim()
            .parse()
            .map_err(|_| TransferError::protocol(format!("invalid length reply {:?}", reply)))?;
        debug!("Received: length {}", fsm.total);

        fsm.buffer = BytesMut::with_capacity(fsm.total.min(MAX_PREALLOC));
        Ok(fsm.transition::<ReceiveChunk>())
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReceiveChunk> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let mut fsm = *self;
        let offset = fsm.buffer.len();
        if offset >= fsm.total {
            return Ok(fsm.transition::<ExpectEot>());
        }

        let length = fsm.link.read_byte()?;
        let remaining = fsm.total - offset;
        if length == 0 || length as usize > MAX_CHUNK {
            return Err(TransferError::protocol(format!(
                "invalid chunk length {} at offset {}",
                length, offset
            )));
        }
        if length as usize > remaining {
            return Err(TransferError::protocol(format!(
                "chunk of {} bytes at offset {} overruns announced length {}",
                length, offset, fsm.total
            )));
        }

        let payload = fsm.link.read_exact(length as usize)?;
        let checksum = fsm.link.read_byte()?;

        match frame::decode(length, payload, checksum) {
            Validation::Valid(chunk) => {
                fsm.link.write(&[ACK])?;
                debug!("Received: chunk at {} ({} bytes), sent ACK", offset, length);
                fsm.buffer.extend_from_slice(chunk.payload());
                (fsm.progress)(Progress {
                    transferred: fsm.buffer.len() as u64,
                    total: fsm.total as u64,
                });
                Ok(fsm.stay())
            }
            Validation::ChecksumMismatch { received, computed } => {
                fsm.link.write(&[NACK])?;
                warn!(
                    "Checksum mismatch at {}: received 0x{:02X}, computed 0x{:02X}",
                    offset, received, computed
                );
                Err(TransferError::ChecksumMismatch { offset: offset as u64, received, computed })
            }
        }
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ExpectEot> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>> {
        let fsm = *self;
        let byte = fsm.link.read_byte()?;
        if byte != EOT {
            return Err(TransferError::protocol(format!("expected EOT, got 0x{:02X}", byte)));
        }
        debug!("Received: EOT");
        Ok(ReceiverStep::Complete(fsm.buffer.freeze()))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> ReceiverFsm<'a, SendCommand> {
    pub fn new(
        link: &'a mut Link,
        name: impl Into<String>,
        progress: &'a mut dyn FnMut(Progress),
    ) -> Box<dyn ReceiverState<'a> + 'a> {
        Box::new(ReceiverFsm {
            state: PhantomData::<SendCommand>,
            link,
            name: name.into(),
            total: 0,
            buffer: BytesMut::new(),
            progress,
        })
    }
}

/// Drive a receiver until EOT, returning the complete contents.
pub fn run_receiver<'a>(mut fsm: Box<dyn ReceiverState<'a> + 'a>) -> Result<Bytes> {
    loop {
        match fsm.step()? {
            ReceiverStep::Next(next) => fsm = next,
            ReceiverStep::Complete(data) => return Ok(data),
        }
    }
}

/// Pull `name` from the remote over an open link.
pub fn pull(link: &mut Link, name: &str, progress: &mut dyn FnMut(Progress)) -> Result<Bytes> {
    run_receiver(ReceiverFsm::new(link, name, progress))
}

// ============================================================================
// Tests
// ============================================================================
