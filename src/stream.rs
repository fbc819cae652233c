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

//! Buffering between a push-based byte source and pull-based protocol reads.
//!
//! Bytes arrive in bursts of arbitrary size through a [`StreamFeeder`]. The
//! matching [`StreamReader`] hands them back out in exactly the units the
//! protocol asks for, blocking until enough have arrived. Bursts are kept in
//! arrival order; a partially consumed burst stays at the head of the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::protocol::LF;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The source ended before the pending read could be satisfied.
    #[error("byte source closed while waiting for {wanted}")]
    Closed { wanted: Wanted },

    /// The opt-in read timeout elapsed.
    #[error("no data within {after:?}")]
    TimedOut { after: Duration },

    /// A bounded line read saw more than `max` bytes without a delimiter.
    /// The offending line has been discarded.
    #[error("line longer than {max} bytes")]
    LineTooLong { max: usize },
}

/// What a read was waiting for when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wanted {
    Bytes(usize),
    Line,
}

impl std::fmt::Display for Wanted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wanted::Bytes(n) => write!(f, "{} bytes", n),
            Wanted::Line => write!(f, "end of line"),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    state: Mutex<State>,
    arrived: Condvar,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Bytes>,
    buffered: usize,
    closed: bool,
}

impl Shared {
    // The queue is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected feeder/reader pair.
pub fn stream() -> (StreamFeeder, StreamReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        arrived: Condvar::new(),
    });
    (
        StreamFeeder { shared: Arc::clone(&shared) },
        StreamReader { shared, timeout: None },
    )
}

// ============================================================================
// Feeder
// ============================================================================

/// Producer side, handed to whatever delivers bytes (a receive thread, a peer channel).
#[derive(Clone)]
pub struct StreamFeeder {
    shared: Arc<Shared>,
}

impl StreamFeeder {
    /// Queue one arrival burst and wake the reader if it is waiting.
    pub fn push(&self, burst: Bytes) {
        if burst.is_empty() {
            return;
        }
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.buffered += burst.len();
        state.queue.push_back(burst);
        drop(state);
        self.shared.arrived.notify_one();
    }

    /// Mark the source as ended. Already queued bytes remain readable.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.arrived.notify_one();
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Consumer side. Reads take `&mut self`, so at most one read is ever pending.
pub struct StreamReader {
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl StreamReader {
    /// Limit how long a single read may wait. `None` waits forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Number of bytes queued and not yet consumed.
    pub fn available(&self) -> usize {
        self.shared.lock().buffered
    }

    /// Block until `n` bytes are queued, then consume and return exactly `n`.
    pub fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        let mut state = self.wait_until(Wanted::Bytes(n), |state| {
            (state.buffered >= n).then_some(n)
        })?;
        Ok(take(&mut state, n))
    }

    /// Block until a `\n` is queued, then return everything before it.
    ///
    /// The delimiter is consumed; bytes after it stay queued.
    pub fn read_line(&mut self) -> Result<Bytes> {
        let mut state = self.wait_until(Wanted::Line, find_delimiter)?;
        let pos = find_delimiter(&state).unwrap_or_default();
        let line = take(&mut state, pos);
        take(&mut state, 1);
        Ok(line)
    }

    /// Like [`read_line`](Self::read_line), but never buffers more than `max`
    /// bytes of a line.
    ///
    /// A longer line is consumed through its delimiter as it arrives and
    /// reported as [`StreamError::LineTooLong`]; the next read starts on the
    /// following line.
    pub fn read_line_limited(&mut self, max: usize) -> Result<Bytes> {
        {
            let mut state = self.wait_until(Wanted::Line, |state| {
                find_delimiter(state).or((state.buffered > max).then_some(max))
            })?;
            if let Some(pos) = find_delimiter(&state).filter(|&pos| pos <= max) {
                let line = take(&mut state, pos);
                take(&mut state, 1);
                return Ok(line);
            }
        }
        self.discard_line()?;
        Err(StreamError::LineTooLong { max })
    }

    /// Drop everything up to and including the next `\n`.
    fn discard_line(&mut self) -> Result<()> {
        loop {
            let mut state =
                self.wait_until(Wanted::Line, |state| (state.buffered > 0).then_some(0))?;
            match find_delimiter(&state) {
                Some(pos) => {
                    take(&mut state, pos + 1);
                    return Ok(());
                }
                None => {
                    let all = state.buffered;
                    take(&mut state, all);
                }
            }
        }
    }

    fn wait_until<F>(&self, wanted: Wanted, ready: F) -> Result<MutexGuard<'_, State>>
    where
        F: Fn(&State) -> Option<usize>,
    {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();
        loop {
            if ready(&*state).is_some() {
                return Ok(state);
            }
            if state.closed {
                return Err(StreamError::Closed { wanted });
            }
            state = match deadline {
                None => self
                    .shared
                    .arrived
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(StreamError::TimedOut {
                            after: self.timeout.unwrap_or_default(),
                        });
                    }
                    self.shared
                        .arrived
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Offset of the first delimiter across all queued bursts.
fn find_delimiter(state: &State) -> Option<usize> {
    let mut offset = 0;
    for burst in &state.queue {
        if let Some(pos) = burst.iter().position(|&b| b == LF) {
            return Some(offset + pos);
        }
        offset += burst.len();
    }
    None
}

/// Remove `n` bytes from the head of the queue. Caller guarantees they are there.
fn take(state: &mut State, n: usize) -> Bytes {
    state.buffered -= n;

    // Common case: the head burst alone covers the read
    if let Some(head) = state.queue.front_mut() {
        if head.len() >= n {
            let out = head.split_to(n);
            if head.is_empty() {
                state.queue.pop_front();
            }
            return out;
        }
    }

    let mut out = BytesMut::with_capacity(n);
    while out.len() < n {
        let Some(mut head) = state.queue.pop_front() else {
            break;
        };
        let wanted = n - out.len();
        if head.len() > wanted {
            out.extend_from_slice(&head.split_to(wanted));
            state.queue.push_front(head);
        } else {
            out.extend_from_slice(&head);
        }
    }
    out.freeze()
}

// ============================================================================
// Tests
// ============================================================================
