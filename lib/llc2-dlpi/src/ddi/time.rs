// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments and delays.

use std::thread;
pub use std::time::Duration;
pub use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;
/// The conversion from nanoseconds to milliseconds.
pub const NANOS_TO_MILLIS: u64 = NANOS / MILLIS;

/// A point in time relative to when the engine was created.
///
/// Trace records carry these rather than wall clock time so that two
/// snapshots taken from the same engine can be compared directly.
#[derive(Clone, Copy, Debug)]
pub struct Moment {
    epoch: Instant,
}

impl Moment {
    pub fn now() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Milliseconds elapsed since this moment.
    pub fn delta_as_millis(&self) -> u64 {
        let nanos = self.epoch.elapsed().as_nanos() as u64;
        nanos / NANOS_TO_MILLIS
    }
}

/// Block the calling thread for `ms` milliseconds, in the manner of
/// delay(9F).
pub fn delay(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}
