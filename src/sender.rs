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

//! Push: send a file to the remote, one acknowledged chunk at a time.

use std::marker::PhantomData;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::frame;
use crate::protocol::*;
use crate::serial::{Link, Reply};
use crate::session::Progress;

// ============================================================================
// States
// ============================================================================

pub struct SendCommand;
pub struct SendChunk;
pub struct SendEot;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    link: &'a mut Link,
    name: String,
    data: Bytes,
    offset: usize,
    progress: &'a mut dyn FnMut(Progress),
}

// ============================================================================
// Trait
// ============================================================================

pub enum SenderStep<'a> {
    Next(Box<dyn SenderState<'a> + 'a>),
    Complete,
}

pub trait SenderState<'a> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<'a, S: 'a> SenderFsm<'a, S> {
    fn transition<T: 'a>(self) -> SenderStep<'a>
    where
        SenderFsm<'a, T>: SenderState<'a>,
    {
        SenderStep::Next(Box::new(SenderFsm::<T> {
            state: PhantomData,
            link: self.link,
            name: self.name,
            data: self.data,
            offset: self.offset,
            progress: self.progress,
        }))
    }

    fn stay(self) -> SenderStep<'a>
    where
        Self: SenderState<'a>,
    {
        SenderStep::Next(Box::new(self))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, SendCommand> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let fsm = *self;
        let command = Command::Push { name: fsm.name.clone(), size: fsm.data.len() as u64 };
        fsm.link.write(&command.to_line())?;
        debug!("Sent: {:?}", command.to_string());

        match fsm.link.await_ack()? {
            Reply::Ack => Ok(fsm.transition::<SendChunk>()),
            Reply::Nack(message) => {
                warn!("Remote rejected push of {}: {}", fsm.name, message);
                Err(TransferError::RemoteRejected { message })
            }
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendChunk> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let mut fsm = *self;
        if fsm.offset >= fsm.data.len() {
            return Ok(fsm.transition::<SendEot>());
        }

        let end = (fsm.offset + MAX_CHUNK).min(fsm.data.len());
        let chunk = frame::encode(&fsm.data[fsm.offset..end])?;
        fsm.link.write(&chunk.to_wire())?;
        debug!(
            "Sent: chunk at {} ({} bytes, checksum 0x{:02X})",
            fsm.offset,
            chunk.length_byte(),
            chunk.checksum()
        );

        match fsm.link.await_ack()? {
            Reply::Ack => {
                fsm.offset = end;
                (fsm.progress)(Progress {
                    transferred: fsm.offset as u64,
                    total: fsm.data.len() as u64,
                });
                Ok(fsm.stay())
            }
            Reply::Nack(message) => {
                warn!("Remote rejected chunk at {}: {}", fsm.offset, message);
                Err(TransferError::ChunkRejected { offset: fsm.offset as u64, message })
            }
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendEot> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>> {
        let fsm = *self;
        fsm.link.write(&[EOT])?;
        debug!("Sent: EOT");

        match fsm.link.await_ack()? {
            Reply::Ack => Ok(SenderStep::Complete),
            Reply::Nack(message) => {
                warn!("Remote rejected end of {}: {}", fsm.name, message);
                Err(TransferError::RemoteRejected { message })
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> SenderFsm<'a, SendCommand> {
    pub fn new(
        link: &'a mut Link,
        name: impl Into<String>,
        data: Bytes,
        progress: &'a mut dyn FnMut(Progress),
    ) -> Box<dyn SenderState<'a> + 'a> {
        Box::new(SenderFsm {
            state: PhantomData::<SendCommand>,
            link,
            name: name.into(),
            data,
            offset: 0,
            progress,
        })
    }
}

/// Drive a sender until the final ACK or the first failure.
pub fn run_sender<'a>(mut fsm: Box<dyn SenderState<'a> + 'a>) -> Result<()> {
    loop {
        match fsm.step()? {
            SenderStep::Next(next) => fsm = next,
            SenderStep::Complete => return Ok(()),
        }
    }
}

/// Push `data` to the remote as `name` over an open link.
pub fn push(
    link: &mut Link,
    name: &str,
    data: Bytes,
    progress: &mut dyn FnMut(Progress),
) -> Result<()> {
    run_sender(SenderFsm::new(link, name, data, progress))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock_link;

    fn wire(payload: &[u8]) -> Vec<u8> {
        frame::encode(payload).unwrap().to_wire().to_vec()
    }

    fn content(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_push_200_bytes_in_four_chunks() {
        let data = content(200);

        let mut expected_writes = b"push FILE.BIN 200\n".to_vec();
        for range in [0..64, 64..128, 128..192, 192..200] {
            expected_writes.extend_from_slice(&wire(&data[range]));
        }
        expected_writes.push(EOT);

        // Command ACK, four chunk ACKs, EOT ACK
        let (mut link, _) = mock_link(vec![vec![ACK; 6]], expected_writes);

        let mut seen = Vec::new();
        push(&mut link, "FILE.BIN", data, &mut |p: Progress| seen.push(p.transferred)).unwrap();

        assert_eq!(seen, vec![64, 128, 192, 200]);
    }

    #[test]
    fn test_push_acks_arriving_one_by_one() {
        let data = content(10);

        let mut expected_writes = b"push a 10\n".to_vec();
        expected_writes.extend_from_slice(&wire(&data));
        expected_writes.push(EOT);

        let (mut link, _) = mock_link(vec![vec![ACK], vec![ACK], vec![ACK]], expected_writes);

        push(&mut link, "a", data, &mut |_| {}).unwrap();
    }

    #[test]
    fn test_push_empty_file() {
        let mut expected_writes = b"push empty 0\n".to_vec();
        expected_writes.push(EOT);

        let (mut link, _) = mock_link(vec![vec![ACK, ACK]], expected_writes);

        push(&mut link, "empty", Bytes::new(), &mut |_| {}).unwrap();
    }

    #[test]
    fn test_push_command_rejected() {
        let mut reply = vec![NACK];
        reply.extend_from_slice(b"f_open\n");

        let (mut link, _) = mock_link(vec![reply], b"push x 3\n".to_vec());

        match push(&mut link, "x", Bytes::from_static(b"abc"), &mut |_| {}) {
            Err(TransferError::RemoteRejected { message }) => assert_eq!(message, "f_open"),
            other => panic!("expected RemoteRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_push_chunk_rejected_without_resend() {
        let data = content(100);

        let mut expected_writes = b"push x 100\n".to_vec();
        expected_writes.extend_from_slice(&wire(&data[..64]));
        expected_writes.extend_from_slice(&wire(&data[64..]));

        let mut replies = vec![ACK, ACK, b'!'];
        replies.extend_from_slice(b"checksum:12!=13\n");
        let (mut link, _) = mock_link(vec![replies], expected_writes);

        match push(&mut link, "x", data, &mut |_| {}) {
            Err(TransferError::ChunkRejected { offset, message }) => {
                assert_eq!(offset, 64);
                assert_eq!(message, "checksum:12!=13");
            }
            other => panic!("expected ChunkRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_push_eot_rejected() {
        let mut expected_writes = b"push x 1\n".to_vec();
        expected_writes.extend_from_slice(&wire(b"z"));
        expected_writes.push(EOT);

        let mut replies = vec![ACK, ACK, NACK];
        replies.extend_from_slice(b"expected eot\n");
        let (mut link, _) = mock_link(vec![replies], expected_writes);

        assert!(matches!(
            push(&mut link, "x", Bytes::from_static(b"z"), &mut |_| {}),
            Err(TransferError::RemoteRejected { .. })
        ));
    }

    #[test]
    fn test_push_remote_goes_silent() {
        let (mut link, _) = mock_link(vec![], b"push x 1\n".to_vec());

        assert!(matches!(
            push(&mut link, "x", Bytes::from_static(b"z"), &mut |_| {}),
            Err(TransferError::Stream(_))
        ));
    }
}
