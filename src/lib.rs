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

//! File transfer and soft reset over a raw serial link.
//!
//! The link has no framing of its own, so incoming bytes are buffered by a
//! [`stream::StreamReader`] and the protocol reads them back in exact units.
//! Files move in checksummed chunks of up to 64 bytes, each acknowledged
//! before the next is sent.

pub mod error;
pub mod frame;
pub mod protocol;
pub mod receiver;
pub mod responder;
pub mod sender;
pub mod serial;
pub mod session;
pub mod stream;

pub use error::{Result, TransferError};
pub use serial::{Link, LinkOptions, SerialConfig};
pub use session::{
    Progress, receive_file, receive_file_with, reset_remote, reset_remote_with, send_file,
    send_file_with,
};
