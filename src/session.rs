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

//! One command per session: open the link, run push, pull or reset, close it.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, TransferError};
use crate::protocol::{Command, is_valid_name};
use crate::receiver;
use crate::sender;
use crate::serial::{Link, LinkOptions, SerialConfig};

/// Bytes moved so far, reported once per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub transferred: u64,
    pub total: u64,
}

/// Run `f` on `link`, then close it whether `f` succeeded or not.
///
/// An error from `f` wins over an error from closing.
pub fn scoped<T>(mut link: Link, f: impl FnOnce(&mut Link) -> Result<T>) -> Result<T> {
    let result = f(&mut link);
    let closed = link.close();
    match (result, closed) {
        (Err(e), _) => Err(e),
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
    }
}

/// Send the soft reset command. No reply is expected.
pub fn reset(link: &mut Link) -> Result<()> {
    link.write(&Command::Reset.to_line())?;
    debug!("Sent: \"reset\"");
    Ok(())
}

/// Send `local` to the remote as `remote_name`.
pub fn send_file(
    config: &SerialConfig,
    options: &LinkOptions,
    local: &Path,
    remote_name: &str,
    progress: &mut dyn FnMut(Progress),
) -> Result<u64> {
    send_file_with(|| Link::open(config, options), local, remote_name, progress)
}

/// [`send_file`] over whatever link `open` produces.
///
/// The name is checked and the file read before `open` is called.
pub fn send_file_with(
    open: impl FnOnce() -> Result<Link>,
    local: &Path,
    remote_name: &str,
    progress: &mut dyn FnMut(Progress),
) -> Result<u64> {
    check_name(remote_name)?;
    let data = Bytes::from(std::fs::read(local).map_err(|e| TransferError::file(local, e))?);
    let size = data.len() as u64;
    info!("Sending {} as {} ({} bytes)", local.display(), remote_name, size);

    scoped(open()?, |link| sender::push(link, remote_name, data, progress))?;
    Ok(size)
}

/// Fetch `remote_name` from the remote into `local`.
///
/// `local` is only written once the whole file has arrived and EOT was seen.
pub fn receive_file(
    config: &SerialConfig,
    options: &LinkOptions,
    remote_name: &str,
    local: &Path,
    progress: &mut dyn FnMut(Progress),
) -> Result<u64> {
    receive_file_with(|| Link::open(config, options), remote_name, local, progress)
}

/// [`receive_file`] over whatever link `open` produces.
pub fn receive_file_with(
    open: impl FnOnce() -> Result<Link>,
    remote_name: &str,
    local: &Path,
    progress: &mut dyn FnMut(Progress),
) -> Result<u64> {
    check_name(remote_name)?;
    info!("Receiving {} into {}", remote_name, local.display());

    let data = scoped(open()?, |link| receiver::pull(link, remote_name, progress))?;
    persist(local, &data)?;
    Ok(data.len() as u64)
}

/// Soft reset the remote.
pub fn reset_remote(config: &SerialConfig, options: &LinkOptions) -> Result<()> {
    info!("Resetting remote on {}", config.port);
    reset_remote_with(|| Link::open(config, options))
}

/// [`reset_remote`] over whatever link `open` produces.
pub fn reset_remote_with(open: impl FnOnce() -> Result<Link>) -> Result<()> {
    scoped(open()?, reset)
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(TransferError::InvalidName { name: name.to_string() })
    }
}

fn persist(local: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(local, data).map_err(|e| TransferError::file(local, e))?;
    info!("Wrote {} ({} bytes)", local.display(), data.len());
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use crate::responder::Responder;
    use crate::serial::{Tamper, memory_pair, memory_pair_with, mock_link};
    use std::sync::atomic::Ordering;
    use std::thread;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 256) as u8).collect()
    }

    /// Corrupt one payload byte of the `nth` chunk-sized write.
    fn corrupt_chunk(nth: usize) -> Tamper {
        let mut seen = 0;
        Box::new(move |bytes: &mut Vec<u8>| {
            if bytes.len() > 2 && bytes[0] as usize == bytes.len() - 2 {
                if seen == nth {
                    bytes[1] ^= 0x80;
                }
                seen += 1;
            }
        })
    }

    #[test]
    fn test_reset_writes_line_and_expects_nothing() {
        let (link, closed) = mock_link(vec![], b"reset\n".to_vec());

        scoped(link, reset).unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_scoped_closes_on_failure() {
        let mut reply = vec![NACK];
        reply.extend_from_slice(b"busy\n");
        let (link, closed) = mock_link(vec![reply], b"push x 1\n".to_vec());

        let result = scoped(link, |link| {
            sender::push(link, "x", Bytes::from_static(b"z"), &mut |_| {})
        });

        assert!(matches!(result, Err(TransferError::RemoteRejected { .. })));
        assert!(closed.load(Ordering::SeqCst));
    }

    fn spawn_responder(device: Link, root: &Path) -> thread::JoinHandle<Result<Responder>> {
        let root = root.to_path_buf();
        thread::spawn(move || {
            let mut device = device;
            let mut responder = Responder::new(root);
            responder.serve(&mut device).map(|()| responder)
        })
    }

    #[test]
    fn test_end_to_end_push() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.cmd");
        let data = content(200);
        std::fs::write(&local, &data).unwrap();

        let (host, device) = memory_pair();
        let remote = spawn_responder(device, dir.path());

        let mut chunks = 0;
        let size = send_file_with(move || Ok(host), &local, "GAME.CMD", &mut |_| chunks += 1)
            .unwrap();

        remote.join().unwrap().unwrap();
        assert_eq!(size, 200);
        assert_eq!(chunks, 4);
        assert_eq!(std::fs::read(dir.path().join("GAME.CMD")).unwrap(), data);
    }

    #[test]
    fn test_end_to_end_pull() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.rom");
        let data = content(200);
        std::fs::write(dir.path().join("BOOT.ROM"), &data).unwrap();

        let (host, device) = memory_pair();
        let remote = spawn_responder(device, dir.path());

        let mut progress = Vec::new();
        let size = receive_file_with(move || Ok(host), "BOOT.ROM", &local, &mut |p: Progress| {
            progress.push(p)
        })
        .unwrap();

        remote.join().unwrap().unwrap();
        assert_eq!(size, 200);
        assert_eq!(std::fs::read(&local).unwrap(), data);
        assert_eq!(progress.len(), 4);
        assert_eq!(progress[3], Progress { transferred: 200, total: 200 });
    }

    #[test]
    fn test_end_to_end_pull_corrupted_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.bin");
        std::fs::write(dir.path().join("BOOT.ROM"), content(200)).unwrap();

        let (host, device) = memory_pair_with(None, Some(corrupt_chunk(2)));
        let remote = spawn_responder(device, dir.path());

        let result = receive_file_with(move || Ok(host), "BOOT.ROM", &local, &mut |_| {});

        remote.join().unwrap().unwrap();
        match result {
            Err(TransferError::ChecksumMismatch { offset, .. }) => assert_eq!(offset, 128),
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
        assert!(!local.exists());
    }

    #[test]
    fn test_end_to_end_push_corrupted_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.cmd");
        std::fs::write(&local, content(200)).unwrap();

        let (host, device) = memory_pair_with(Some(corrupt_chunk(1)), None);
        let remote = spawn_responder(device, dir.path());

        let result = send_file_with(move || Ok(host), &local, "GAME.CMD", &mut |_| {});

        remote.join().unwrap().unwrap();
        match result {
            Err(TransferError::ChunkRejected { offset, message }) => {
                assert_eq!(offset, 64);
                assert!(message.starts_with("checksum:"), "{}", message);
            }
            other => panic!("expected ChunkRejected, got {:?}", other),
        }
        assert!(!dir.path().join("GAME.CMD").exists());
    }

    #[test]
    fn test_end_to_end_reset() {
        let dir = tempfile::tempdir().unwrap();
        let (host, device) = memory_pair();
        let remote = spawn_responder(device, dir.path());

        reset_remote_with(move || Ok(host)).unwrap();

        assert_eq!(remote.join().unwrap().unwrap().resets(), 1);
    }

    #[test]
    fn test_missing_local_file_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");

        let mut opened = false;
        let result = send_file_with(
            || {
                opened = true;
                Err(TransferError::protocol("unreachable"))
            },
            &missing,
            "X",
            &mut |_| {},
        );

        assert!(matches!(result, Err(TransferError::File { .. })));
        assert!(!opened);
    }

    #[test]
    fn test_invalid_names_rejected_before_opening() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.bin");
        std::fs::write(&local, b"z").unwrap();

        for name in ["", "a\nreset", "two words"] {
            let mut opened = false;
            let mut open = || -> Result<Link> {
                opened = true;
                Err(TransferError::protocol("unreachable"))
            };

            let pushed = send_file_with(&mut open, &local, name, &mut |_| {});
            assert!(matches!(pushed, Err(TransferError::InvalidName { .. })), "{:?}", name);

            let pulled = receive_file_with(&mut open, name, &local, &mut |_| {});
            assert!(matches!(pulled, Err(TransferError::InvalidName { .. })), "{:?}", name);

            assert!(!opened, "{:?}", name);
        }
        assert_eq!(std::fs::read(&local).unwrap(), b"z");
    }
}
