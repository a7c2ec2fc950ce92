// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The LLC2 DLPI provider engine.
//!
//! This crate implements the DLPI side of an LLC2 stack: the per-link
//! DLPI state machine, the bookkeeping for listeners and outstanding
//! connect indications, multicast screening, and the open/close and
//! adapter lifecycle. The LLC2 link layer itself is a collaborator
//! reached through [`engine::Llc2Lower`].

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]
#![cfg_attr(
    all(feature = "usdt", target_os = "macos", not(usdt_stable_asm_sym)),
    feature(asm_sym)
)]

#[macro_use]
extern crate cfg_if;

pub use llc2_api as api;

pub mod config;
pub mod ddi;
pub mod engine;
pub mod print;
pub mod provider;

pub use config::DlpiConfig;
pub use engine::Dlpi;

// ================================================================
// DTrace USDT Provider
//
// Allowing us to use USDT to trace the engine's probes when running
// in std/test.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod llc2_provider {
    fn dlpi__state(minor: u32, state: &str, prim: &str) {}
    fn dlpi__transition(minor: u32, from: &str, to: &str) {}
    // XXX USDT (at least on mac/ARM) only allows up to 6 args, and
    // arg5 always comes back NULL, so keep these short.
    //
    // https://github.com/oxidecomputer/usdt/issues/62
    fn dlpi__upcall(ppa: u32, name: &str, sid: u32) {}
    fn dlpi__close(minor: u32, step: &str, state: &str) {}
}
