// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the LLC2 DLPI engine and its consumers: the
//! DLPI vocabulary, link-layer addresses, typed primitives, and the
//! wire codec used at the stream boundary.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod addr;
pub mod dlpi;
pub mod dump;
pub mod msg;
pub mod wire;

pub use addr::*;
pub use dlpi::*;
pub use dump::*;
pub use msg::*;

/// The overall version of the API. Anytime a type in this crate that
/// crosses the stream boundary changes, this number should increment.
pub const API_VERSION: u64 = 3;
