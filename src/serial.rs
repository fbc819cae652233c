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

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort as SerialPortTrait, StopBits};
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::protocol::ACK;
use crate::stream::{self, StreamFeeder, StreamReader};

/// How long the receive thread blocks in a single read before checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK_SIZE: usize = 256;

// ============================================================================
// Channel Trait
// ============================================================================

/// Write side of a duplex byte transport. Incoming bytes are delivered
/// separately, through the [`StreamFeeder`] the channel was opened with.
pub trait Channel: Send {
    /// Write all of `buf`, returning once the transport has taken it.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Release the transport. Must tolerate being called more than once.
    fn close(&mut self) -> io::Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Physical port parameters, resolved by the caller.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        SerialConfig {
            port: port.into(),
            baud,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// Upper bound on any single read. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Serial port channel. A background thread pumps received bytes into the link's reader.
pub struct SerialChannel {
    port: Box<dyn SerialPortTrait>,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl SerialChannel {
    pub fn open(config: &SerialConfig, feeder: StreamFeeder) -> io::Result<Self> {
        let port = serialport::new(&config.port, config.baud)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .timeout(POLL_INTERVAL)
            .open()?;

        // Anything already sitting in the buffers predates this session
        port.clear(ClearBuffer::All)?;

        let rx = port.try_clone()?;
        let running = Arc::new(AtomicBool::new(true));
        let pump = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("serial-rx".into())
                .spawn(move || pump(rx, feeder, running))?
        };

        Ok(SerialChannel { port, running, pump: Some(pump) })
    }
}

impl Channel for SerialChannel {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                return Err(io::Error::other("serial receive thread panicked"));
            }
        }
        Ok(())
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Move bytes from `rx` into `feeder` until shut down or the source fails.
fn pump<R: Read>(mut rx: R, feeder: StreamFeeder, running: Arc<AtomicBool>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    while running.load(Ordering::Acquire) {
        match rx.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => feeder.push(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!("serial receive failed: {}", e);
                break;
            }
        }
    }
    feeder.close();
}

// ============================================================================
// Link
// ============================================================================

/// Answer to a command or chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack(String),
}

/// An open channel plus the reader buffering everything it receives.
pub struct Link {
    channel: Box<dyn Channel>,
    reader: StreamReader,
}

impl Link {
    pub fn new(channel: Box<dyn Channel>, reader: StreamReader) -> Self {
        Link { channel, reader }
    }

    /// Open a serial port and wire its receive thread to a fresh reader.
    pub fn open(config: &SerialConfig, options: &LinkOptions) -> Result<Self> {
        let (feeder, mut reader) = stream::stream();
        reader.set_timeout(options.read_timeout);
        let channel = SerialChannel::open(config, feeder)?;
        debug!("Opened {} at {} baud", config.port, config.baud);
        Ok(Link::new(Box::new(channel), reader))
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.channel.write_all(bytes)?;
        Ok(())
    }

    pub fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        Ok(self.reader.read_exact(n)?)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.reader.read_exact(1)?[0])
    }

    pub fn read_line(&mut self) -> Result<Bytes> {
        Ok(self.reader.read_line()?)
    }

    /// Read a line of at most `max` bytes, discarding longer ones.
    pub fn read_line_limited(&mut self, max: usize) -> Result<Bytes> {
        Ok(self.reader.read_line_limited(max)?)
    }

    /// Read one reply byte. Anything but ACK is a NACK followed by a message line.
    pub fn await_ack(&mut self) -> Result<Reply> {
        let byte = self.read_byte()?;
        if byte == ACK {
            debug!("Received: ACK");
            return Ok(Reply::Ack);
        }
        let message = text(&self.read_line()?);
        debug!("Received: NACK 0x{:02X} {:?}", byte, message);
        Ok(Reply::Nack(message))
    }

    pub fn close(mut self) -> Result<()> {
        let leftover = self.reader.available();
        if leftover > 0 {
            debug!("Discarding {} unread bytes", leftover);
        }
        self.channel.close().map_err(TransferError::Channel)
    }
}

/// Decode a received line for display.
pub(crate) fn text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end_matches('\r').to_string()
}

// ============================================================================
// Mock Channels for Testing
// ============================================================================

#[cfg(test)]
pub use self::testing::*;


// ============================================================================
// Tests
// ============================================================================
