// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! An in-memory ring of recent engine events.
//!
//! This is the post-mortem companion to the USDT probes: a bounded
//! record of what the engine did last, which can be captured from a
//! live system or a failed test without a tracer attached.

use crate::config::MAX_TRACE_CAPACITY;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Moment;
use core::fmt;
use core::fmt::Display;

/// What kind of event a trace record describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraceEvent {
    /// A primitive was dispatched: `(state, primitive)`.
    Dispatch,
    /// A request went to the lower layer: `(sid, result)`.
    Lower,
    /// An upcall arrived: `(sid, arg)`.
    Upcall,
    /// A close step: `(step, state)`.
    Close,
    /// An event was dropped as stale or inconsistent.
    Drop,
    /// An allocation or queue limit was hit.
    NoResource,
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Dispatch => "DISPATCH",
            Self::Lower => "LOWER",
            Self::Upcall => "UPCALL",
            Self::Close => "CLOSE",
            Self::Drop => "DROP",
            Self::NoResource => "NORES",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TraceRec {
    /// Milliseconds since the engine was created.
    pub ms: u64,
    pub line: u32,
    pub event: TraceEvent,
    /// The minor number of the link involved, or 0.
    pub minor: u32,
    pub p1: u32,
    pub p2: u32,
}

struct Ring {
    recs: heapless::Deque<TraceRec, MAX_TRACE_CAPACITY>,
    capacity: usize,
    capturing: bool,
}

pub struct Trace {
    epoch: Moment,
    ring: KMutex<Ring>,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        let ring = Ring {
            recs: heapless::Deque::new(),
            capacity: capacity.min(MAX_TRACE_CAPACITY),
            capturing: capacity > 0,
        };
        Self { epoch: Moment::now(), ring: KMutex::new(ring) }
    }

    pub fn record(
        &self,
        line: u32,
        event: TraceEvent,
        minor: u32,
        p1: u32,
        p2: u32,
    ) {
        let mut ring = self.ring.lock();
        if !ring.capturing || ring.capacity == 0 {
            return;
        }

        while ring.recs.len() >= ring.capacity {
            ring.recs.pop_front();
        }

        let rec = TraceRec {
            ms: self.epoch.delta_as_millis(),
            line,
            event,
            minor,
            p1,
            p2,
        };
        let _ = ring.recs.push_back(rec);
    }

    /// Resume recording.
    pub fn start(&self) {
        self.ring.lock().capturing = true;
    }

    /// Stop recording, keeping what has been captured.
    pub fn stop(&self) {
        self.ring.lock().capturing = false;
    }

    pub fn clear(&self) {
        self.ring.lock().recs.clear();
    }

    /// The captured records, oldest first.
    pub fn snapshot(&self) -> Vec<TraceRec> {
        self.ring.lock().recs.iter().copied().collect()
    }
}

/// Record a trace event at the caller's line.
macro_rules! trace_ev {
    ($trace:expr, $ev:expr, $minor:expr) => {
        $trace.record(line!(), $ev, $minor, 0, 0)
    };
    ($trace:expr, $ev:expr, $minor:expr, $p1:expr) => {
        $trace.record(line!(), $ev, $minor, $p1 as u32, 0)
    };
    ($trace:expr, $ev:expr, $minor:expr, $p1:expr, $p2:expr) => {
        $trace.record(line!(), $ev, $minor, $p1 as u32, $p2 as u32)
    };
}

pub(crate) use trace_ev;
