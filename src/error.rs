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

use std::path::PathBuf;

use crate::frame::FrameError;
use crate::stream::StreamError;

/// Every way a session can fail. All of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The remote refused the command line.
    #[error("remote rejected command: {message}")]
    RemoteRejected { message: String },

    /// The remote refused a data chunk.
    #[error("remote rejected chunk at offset {offset}: {message}")]
    ChunkRejected { offset: u64, message: String },

    /// A received chunk failed its checksum.
    #[error("checksum mismatch at offset {offset}: received 0x{received:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { offset: u64, received: u8, computed: u8 },

    /// Malformed length, bad chunk size, missing EOT and the like.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Opening, writing to or closing the channel failed.
    #[error("channel error: {0}")]
    Channel(#[from] std::io::Error),

    /// The channel stopped delivering bytes.
    #[error("channel error: {0}")]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A remote name that cannot be sent as a single command argument.
    #[error("invalid remote name {name:?}")]
    InvalidName { name: String },

    /// Reading or writing a local file failed.
    #[error("{}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        TransferError::Protocol(message.into())
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::File { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
