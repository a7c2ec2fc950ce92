// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine tunables.

use crate::ddi::time::Duration;
use llc2_api::MAX_MULTICAST;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The number of adapters the engine will accept by default.
pub const DEFAULT_MAX_PPA: u32 = 16;

/// The size of the link pool by default.
pub const DEFAULT_MAX_LINKS: u32 = 256;

/// How many times close retries a rejected disconnect or unbind.
pub const DEFAULT_CLOSE_RETRIES: u32 = 10;

/// The delay between close retries.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 50;

/// How many connect indications may wait on a listener with no free
/// slot before further ones are refused.
pub const DEFAULT_MAX_PENDING_CONIND: u32 = 64;

/// The number of trace records kept by default.
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

/// The hard upper bound on the trace ring.
pub const MAX_TRACE_CAPACITY: usize = 1024;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DlpiConfig {
    /// Adapters are numbered `0..max_ppa`.
    pub max_ppa: u32,
    /// The number of link records in the pool. Minor 0 is reserved
    /// for the control stream, so at most `max_links - 1` streams may
    /// be open at once.
    pub max_links: u32,
    /// Per-link multicast table size.
    pub max_multicast: usize,
    pub close_retries: u32,
    pub retry_delay_ms: u64,
    /// Bound on how long close waits for a confirmation from the lower
    /// layer. When absent close waits until confirmed or interrupted.
    pub close_wait_timeout_ms: Option<u64>,
    /// Connect indications a full listener may hold undelivered.
    pub max_pending_conind: u32,
    pub trace_capacity: usize,
}

impl Default for DlpiConfig {
    fn default() -> Self {
        Self {
            max_ppa: DEFAULT_MAX_PPA,
            max_links: DEFAULT_MAX_LINKS,
            max_multicast: MAX_MULTICAST,
            close_retries: DEFAULT_CLOSE_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            close_wait_timeout_ms: None,
            max_pending_conind: DEFAULT_MAX_PENDING_CONIND,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be in [{min}, {max}], got {val}")]
    OutOfRange { field: &'static str, val: u64, min: u64, max: u64 },
}

fn check(
    field: &'static str,
    val: u64,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    if val < min || val > max {
        return Err(ConfigError::OutOfRange { field, val, min, max });
    }
    Ok(())
}

impl DlpiConfig {
    /// Parse a TOML document. Fields left out take their default.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check("max_ppa", u64::from(self.max_ppa), 1, u64::from(u16::MAX))?;
        check(
            "max_links",
            u64::from(self.max_links),
            2,
            u64::from(u16::MAX),
        )?;
        check("max_multicast", self.max_multicast as u64, 0, MAX_MULTICAST as u64)?;
        check("retry_delay_ms", self.retry_delay_ms, 0, 60_000)?;
        check(
            "max_pending_conind",
            u64::from(self.max_pending_conind),
            0,
            u64::from(u16::MAX),
        )?;
        check(
            "trace_capacity",
            self.trace_capacity as u64,
            0,
            MAX_TRACE_CAPACITY as u64,
        )?;
        Ok(())
    }

    pub fn close_wait_timeout(&self) -> Option<Duration> {
        self.close_wait_timeout_ms.map(Duration::from_millis)
    }
}
