//! Diff stream with timestamp alignment.
//!
//! Consumers compare modification times at one-second granularity, so a diff
//! exported and consumed within the same second could look unchanged. An
//! aligned stream does not finish closing until the wall clock has passed the
//! second boundary following the start of the export.

use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tracing::trace;

/// Upper bound on sleep iterations while waiting for a boundary.
const MAX_WAIT_ATTEMPTS: usize = 4;

/// Longest single sleep.
const MAX_WAIT_STEP: Duration = Duration::from_secs(1);

/// First whole-second boundary strictly after the second containing `t0`.
pub fn second_boundary_after(t0: DateTime<Utc>) -> DateTime<Utc> {
    let floor = t0.duration_trunc(TimeDelta::seconds(1)).unwrap_or(t0);
    floor + TimeDelta::seconds(1)
}

/// Block until the wall clock reaches `deadline`.
pub fn wait_until(deadline: DateTime<Utc>) {
    for _ in 0..MAX_WAIT_ATTEMPTS {
        let remaining = match (deadline - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => return,
        };
        trace!(remaining_ms = remaining.as_millis() as u64, "Waiting for second boundary");
        thread::sleep(remaining.min(MAX_WAIT_STEP));
    }
}

/// Readable diff archive handed back to the caller.
pub struct DiffStream {
    inner: Box<dyn Read + Send>,
    release_at: Option<DateTime<Utc>>,
}

impl DiffStream {
    /// A stream that closes immediately.
    pub fn passthrough(inner: Box<dyn Read + Send>) -> Self {
        Self { inner, release_at: None }
    }

    /// A stream whose close waits past the second boundary after `started`.
    pub fn aligned(inner: Box<dyn Read + Send>, started: DateTime<Utc>) -> Self {
        Self { inner, release_at: Some(second_boundary_after(started)) }
    }

    /// Instant before which closing will not return, if aligned.
    pub fn release_at(&self) -> Option<DateTime<Utc>> {
        self.release_at
    }

    pub fn is_aligned(&self) -> bool {
        self.release_at.is_some()
    }

    /// Close the stream, waiting out the alignment delay if any.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(deadline) = self.release_at.take() {
            wait_until(deadline);
        }
    }
}

impl Read for DiffStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for DiffStream {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for DiffStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffStream").field("release_at", &self.release_at).finish_non_exhaustive()
    }
}
