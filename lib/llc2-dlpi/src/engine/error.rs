// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine errors.
//!
//! DLPI protocol errors are not Rust errors: they are answered with a
//! `DL_ERROR_ACK` on the link that made the request. The types here
//! describe failures of the engine's own API and of the lower layer.

use super::link::LinkId;
use llc2_api::errno;
use thiserror::Error;

/// A failure of an engine entry point.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum DlpiError {
    #[error("no free link records")]
    NoFreeLink,

    #[error("no such link: {0}")]
    BadLink(LinkId),

    #[error("link {0} is not open")]
    NotOpen(LinkId),

    #[error("ppa {0} is out of range")]
    BadPpa(u32),

    #[error("an adapter is already registered at ppa {0}")]
    AdapterExists(u32),

    #[error("no adapter registered at ppa {0}")]
    NoAdapter(u32),

    #[error("adapter {0} still has links attached")]
    AdapterBusy(u32),

    #[error("link {0} is already closing")]
    Closing(LinkId),
}

impl DlpiError {
    /// The unix errno an open(9E) or close(9E) style caller would
    /// report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoFreeLink => errno::EAGAIN,
            Self::BadLink(_) | Self::NotOpen(_) => errno::ENXIO,
            Self::BadPpa(_) | Self::NoAdapter(_) => errno::ENXIO,
            Self::AdapterExists(_) | Self::AdapterBusy(_) => errno::EINVAL,
            Self::Closing(_) => errno::EINVAL,
        }
    }
}

/// A synchronous rejection from the LLC2 lower layer.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum LowerError {
    #[error("no resources")]
    NoResources,

    #[error("bad address")]
    BadAddr,

    #[error("failed with errno {0}")]
    Failed(i32),
}

impl LowerError {
    pub fn unix_errno(&self) -> i32 {
        match self {
            Self::NoResources => errno::ENOSR,
            Self::BadAddr => errno::EINVAL,
            Self::Failed(e) => *e,
        }
    }
}
