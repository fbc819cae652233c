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

//! The remote end of the link: answers `push`, `pull` and `reset` command
//! lines against a directory, the way the machine's firmware does.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};
use crate::frame::{self, Validation};
use crate::protocol::*;
use crate::serial::{Link, text};
use crate::stream::StreamError;

const MAX_ARGS: usize = 4;

/// Temp file that incoming pushes are written to before being renamed into place
const RECEIVE_TEMP: &str = "receive.tmp";

/// A command that could not be carried out; reported to the host as text.
struct Refusal(String);

impl Refusal {
    fn new(message: impl Into<String>) -> Self {
        Refusal(message.into())
    }
}

/// Either the link failed (ends serving) or the remote refused (ends the command).
enum Outcome {
    Refused(Refusal),
    Failed(TransferError),
}

impl From<TransferError> for Outcome {
    fn from(err: TransferError) -> Self {
        Outcome::Failed(err)
    }
}

impl From<Refusal> for Outcome {
    fn from(refusal: Refusal) -> Self {
        Outcome::Refused(refusal)
    }
}

type Handled = std::result::Result<(), Outcome>;

pub struct Responder {
    root: PathBuf,
    on_reset: Option<Box<dyn FnMut() + Send>>,
    resets: u32,
}

impl Responder {
    /// Serve files out of, and store pushed files into, `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Responder { root: root.into(), on_reset: None, resets: 0 }
    }

    /// Run `hook` whenever a reset command arrives.
    pub fn on_reset(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_reset = Some(Box::new(hook));
        self
    }

    /// Number of reset commands received so far.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Answer command lines until the link closes.
    pub fn serve(&mut self, link: &mut Link) -> Result<()> {
        let result = loop {
            let line = match link.read_line_limited(MAX_LINE) {
                Ok(line) => line,
                Err(TransferError::Stream(StreamError::LineTooLong { .. })) => {
                    warn!("Discarded a command line over {} bytes", MAX_LINE);
                    if let Err(e) = refuse(link, "Line too long") {
                        break Err(e);
                    }
                    continue;
                }
                Err(e) => break Err(e),
            };
            if let Err(e) = self.handle_line(link, &text(&line)) {
                break Err(e);
            }
        };

        match result {
            Err(TransferError::Stream(StreamError::Closed { .. })) => {
                debug!("Link closed, responder stopping");
                Ok(())
            }
            other => other,
        }
    }

    fn handle_line(&mut self, link: &mut Link, line: &str) -> Result<()> {
        let args: Vec<&str> = line.split([' ', '\t']).filter(|s| !s.is_empty()).collect();
        debug!("Command: {:?}", args);

        let outcome = match args.as_slice() {
            [] => link.write(&[ACK]).map_err(Outcome::from),
            _ if args.len() > MAX_ARGS => Err(Refusal::new("too many args").into()),
            ["push", name, size] => self.push(link, name, size),
            ["pull", name] => return self.pull(link, name),
            ["reset"] => {
                self.reset();
                Ok(())
            }
            _ => Err(Refusal::new("unknown command").into()),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(Outcome::Refused(Refusal(message))) => {
                warn!("Refused {:?}: {}", line, message);
                refuse(link, &message)
            }
            Err(Outcome::Failed(err)) => Err(err),
        }
    }

    fn reset(&mut self) {
        info!("Reset requested");
        self.resets += 1;
        if let Some(hook) = self.on_reset.as_mut() {
            hook();
        }
    }

    fn push(&mut self, link: &mut Link, name: &str, size: &str) -> Handled {
        let target = self.resolve(name)?;
        let size: usize = size.parse().map_err(|_| Refusal::new("bad size"))?;
        link.write(&[ACK])?;

        let mut buffer = BytesMut::with_capacity(size.min(64 * 1024));
        while buffer.len() < size {
            let length = link.read_byte()?;
            if length == 0 || length as usize > MAX_CHUNK {
                return Err(Refusal::new(format!("bad chunk length {}", length)).into());
            }
            let payload = link.read_exact(length as usize)?;
            let sent = link.read_byte()?;

            match frame::decode(length, payload, sent) {
                Validation::Valid(chunk) => buffer.extend_from_slice(chunk.payload()),
                Validation::ChecksumMismatch { received, computed } => {
                    return Err(Refusal::new(format!("checksum:{:02x}!={:02x}", received, computed)).into());
                }
            }
            if buffer.len() > size {
                return Err(Refusal::new("length mismatch").into());
            }
            link.write(&[ACK])?;
        }

        if link.read_byte()? != EOT {
            return Err(Refusal::new("expected eot").into());
        }

        self.store(&target, &buffer)?;
        info!("Stored {} ({} bytes)", target.display(), buffer.len());
        link.write(&[ACK])?;
        Ok(())
    }

    fn store(&self, target: &Path, data: &[u8]) -> std::result::Result<(), Refusal> {
        let temp = self.root.join(RECEIVE_TEMP);
        std::fs::write(&temp, data).map_err(|e| Refusal::new(format!("write: {}", e)))?;
        std::fs::rename(&temp, target).map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            Refusal::new(format!("rename {}: {}", target.display(), e))
        })
    }

    // Errors here are reported as a `!` line in place of the length.
    fn pull(&mut self, link: &mut Link, name: &str) -> Result<()> {
        let data = match self.resolve(name).and_then(|path| {
            std::fs::read(&path).map_err(|e| Refusal::new(format!("{}: {}", name, e)))
        }) {
            Ok(data) => data,
            Err(Refusal(message)) => {
                warn!("Refused pull of {}: {}", name, message);
                return link.write(format!("!{}\n", message).as_bytes());
            }
        };

        link.write(format!("{}\n", data.len()).as_bytes())?;
        for piece in data.chunks(MAX_CHUNK) {
            link.write(&frame::encode(piece)?.to_wire())?;
            let reply = link.read_byte()?;
            if reply != ACK {
                warn!("Host refused chunk of {} (0x{:02X}), abandoning", name, reply);
                return Ok(());
            }
        }
        link.write(&[EOT])?;
        info!("Sent {} ({} bytes)", name, data.len());
        Ok(())
    }

    fn resolve(&self, name: &str) -> std::result::Result<PathBuf, Refusal> {
        let plain = !name.is_empty()
            && name != RECEIVE_TEMP
            && !name.contains(['/', '\\'])
            && name != "."
            && name != "..";
        if plain {
            Ok(self.root.join(name))
        } else {
            Err(Refusal::new("invalid name"))
        }
    }
}

/// NACK followed by the reason on its own line.
fn refuse(link: &mut Link, message: &str) -> Result<()> {
    let mut reply = vec![NACK];
    reply.extend_from_slice(message.as_bytes());
    reply.push(LF);
    link.write(&reply)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock_link;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wire(payload: &[u8]) -> Vec<u8> {
        frame::encode(payload).unwrap().to_wire().to_vec()
    }

    fn nack(message: &str) -> Vec<u8> {
        let mut reply = vec![NACK];
        reply.extend_from_slice(message.as_bytes());
        reply.push(LF);
        reply
    }

    fn serve(root: &Path, host_bytes: Vec<u8>, expected_writes: Vec<u8>) -> Responder {
        let (mut link, _) = mock_link(vec![host_bytes], expected_writes);
        let mut responder = Responder::new(root);
        responder.serve(&mut link).unwrap();
        responder
    }

    #[test]
    fn test_push_stores_file() {
        let dir = tempfile::tempdir().unwrap();

        let mut host = b"push NOTES.TXT 70\r\n".to_vec();
        host.extend_from_slice(&wire(&[b'a'; 64]));
        host.extend_from_slice(&wire(&[b'b'; 6]));
        host.push(EOT);

        serve(dir.path(), host, vec![ACK; 4]);

        let mut expected = vec![b'a'; 64];
        expected.extend_from_slice(&[b'b'; 6]);
        assert_eq!(std::fs::read(dir.path().join("NOTES.TXT")).unwrap(), expected);
        assert!(!dir.path().join(RECEIVE_TEMP).exists());
    }

    #[test]
    fn test_push_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();

        let mut chunk = wire(b"hi");
        let last = chunk.len() - 1;
        chunk[last] = 0;
        let mut host = b"push X 2\n".to_vec();
        host.extend_from_slice(&chunk);

        let mut writes = vec![ACK];
        writes.extend_from_slice(&nack(&format!("checksum:00!={:02x}", b'h' + b'i')));
        serve(dir.path(), host, writes);

        assert!(!dir.path().join("X").exists());
    }

    #[test]
    fn test_push_missing_eot() {
        let dir = tempfile::tempdir().unwrap();

        let mut host = b"push X 1\n".to_vec();
        host.extend_from_slice(&wire(b"z"));
        host.push(b'?');

        let mut writes = vec![ACK, ACK];
        writes.extend_from_slice(&nack("expected eot"));
        serve(dir.path(), host, writes);

        assert!(!dir.path().join("X").exists());
    }

    #[test]
    fn test_pull_sends_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("R.BIN"), [7u8; 65]).unwrap();

        let mut host = b"pull R.BIN\n".to_vec();
        host.extend_from_slice(&[ACK, ACK]);

        let mut writes = b"65\n".to_vec();
        writes.extend_from_slice(&wire(&[7; 64]));
        writes.extend_from_slice(&wire(&[7]));
        writes.push(EOT);
        serve(dir.path(), host, writes);
    }

    #[test]
    fn test_pull_abandoned_on_nack() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("R.BIN"), [1u8; 100]).unwrap();

        let mut host = b"pull R.BIN\n".to_vec();
        host.push(NACK);
        host.extend_from_slice(b"reset\n");

        let mut writes = b"100\n".to_vec();
        writes.extend_from_slice(&wire(&[1; 64]));
        let responder = serve(dir.path(), host, writes);

        // Back to reading commands after giving up
        assert_eq!(responder.resets(), 1);
    }

    #[test]
    fn test_pull_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = std::fs::read(dir.path().join("GONE")).unwrap_err();

        let writes = format!("!GONE: {}\n", err).into_bytes();
        serve(dir.path(), b"pull GONE\n".to_vec(), writes);
    }

    #[test]
    fn test_invalid_names_refused() {
        let dir = tempfile::tempdir().unwrap();

        let mut writes = b"!invalid name\n".to_vec();
        writes.extend_from_slice(&nack("invalid name"));
        serve(dir.path(), b"pull ../secret\npush a/b 1\n".to_vec(), writes);
    }

    #[test]
    fn test_command_parsing() {
        let dir = tempfile::tempdir().unwrap();

        // Blank lines are acknowledged
        let mut writes = vec![ACK, ACK];
        writes.extend_from_slice(&nack("unknown command"));
        writes.extend_from_slice(&nack("too many args"));
        writes.extend_from_slice(&nack("bad size"));
        serve(dir.path(), b"\n  \t \nformat\na b c d e\npush X lots\n".to_vec(), writes);
    }

    #[test]
    fn test_long_line_refused_and_skipped() {
        let dir = tempfile::tempdir().unwrap();

        let mut host = vec![b'x'; 200];
        host.extend_from_slice(b"\n\n");

        let mut writes = nack("Line too long");
        writes.push(ACK);
        serve(dir.path(), host, writes);
    }

    #[test]
    fn test_line_at_limit_is_parsed() {
        let dir = tempfile::tempdir().unwrap();

        let name = "N".repeat(MAX_LINE - "pull ".len());
        let host = format!("pull {}\n", name).into_bytes();
        assert_eq!(host.len(), MAX_LINE + 1);

        let err = std::fs::read(dir.path().join(&name)).unwrap_err();
        let writes = format!("!{}: {}\n", name, err).into_bytes();
        serve(dir.path(), host, writes);
    }

    #[test]
    fn test_reset_hook_no_reply() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let (mut link, _) = mock_link(vec![b"reset\nreset\n".to_vec()], Vec::new());
        let hook_count = Arc::clone(&count);
        let mut responder = Responder::new(dir.path())
            .on_reset(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            });
        responder.serve(&mut link).unwrap();

        assert_eq!(responder.resets(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
