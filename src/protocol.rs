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

//! Wire constants and command lines

use std::fmt;

/// Acknowledge - command accepted, chunk verified, or EOT accepted
pub const ACK: u8 = 0x06;

/// Negative acknowledge - followed by an error message line when sent by the remote
pub const NACK: u8 = 0x00;

/// End of transmission - terminates the chunk stream
pub const EOT: u8 = 0x04;

/// Line delimiter for command lines, error messages and the pull length reply
pub const LF: u8 = b'\n';

/// Prefix of an error reply to `pull`
pub const ERROR_PREFIX: u8 = b'!';

/// Largest payload carried by a single chunk
pub const MAX_CHUNK: usize = 64;

/// Longest command line the remote buffers, delimiter excluded
pub const MAX_LINE: usize = 128;

/// Whether `name` can travel as a single command argument.
///
/// Arguments are split on whitespace and the line ends at the first newline,
/// so neither may appear in a name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// A command line, sent once at the start of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Push { name: String, size: u64 },
    Pull { name: String },
    Reset,
}

impl Command {
    /// Encoded form including the trailing newline.
    pub fn to_line(&self) -> Vec<u8> {
        format!("{}\n", self).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Push { name, size } => write!(f, "push {} {}", name, size),
            Command::Pull { name } => write!(f, "pull {}", name),
            Command::Reset => write!(f, "reset"),
        }
    }
}
