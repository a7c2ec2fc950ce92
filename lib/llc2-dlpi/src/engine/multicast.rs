// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-link multicast screening.
//!
//! An adapter delivers frames for its own address, broadcast, and
//! whatever group addresses any stream above it enabled. A link which
//! never enabled a multicast address takes every group frame; once it
//! has enabled one, group frames are screened against its own table.

use llc2_api::MAX_MULTICAST;
use llc2_api::MacAddr;
use llc2_api::MacType;

/// How a destination MAC address relates to a link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrClass {
    /// Addressed to the adapter itself.
    Unicast,
    /// A broadcast, multicast or group address the link accepts.
    Group,
    /// Not for this link.
    Reject,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum McastError {
    /// The table is full.
    TooMany,
    /// The address was not enabled.
    NotEnabled,
}

/// A fixed-size, unordered table of enabled multicast addresses.
#[derive(Clone, Debug)]
pub struct McastTable {
    entries: heapless::Vec<MacAddr, MAX_MULTICAST>,
    limit: usize,
}

impl McastTable {
    pub fn new(limit: usize) -> Self {
        Self { entries: heapless::Vec::new(), limit: limit.min(MAX_MULTICAST) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, addr: &MacAddr) -> bool {
        self.entries.contains(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacAddr> {
        self.entries.iter()
    }

    /// Enable `addr`. Enabling an address twice is a no-op.
    pub fn insert(&mut self, addr: MacAddr) -> Result<(), McastError> {
        if self.contains(&addr) {
            return Ok(());
        }

        if self.entries.len() >= self.limit {
            return Err(McastError::TooMany);
        }

        self.entries.push(addr).map_err(|_| McastError::TooMany)
    }

    pub fn remove(&mut self, addr: &MacAddr) -> Result<(), McastError> {
        let idx = self
            .entries
            .iter()
            .position(|a| a == addr)
            .ok_or(McastError::NotEnabled)?;
        self.entries.swap_remove(idx);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Classify a destination address for a link whose adapter has
    /// burned-in address `bia` and medium `mac_type`.
    pub fn classify(
        &self,
        bia: &MacAddr,
        mac_type: MacType,
        addr: &MacAddr,
    ) -> AddrClass {
        if addr == bia {
            return AddrClass::Unicast;
        }

        // No per-stream screening.
        if self.entries.is_empty() {
            return AddrClass::Group;
        }

        if addr.is_broadcast() {
            return AddrClass::Group;
        }

        let b = addr.bytes();
        if mac_type == MacType::Tpr && b[0] & 0x80 != 0 {
            // Token Ring broadcast, e.g. C0:00:FF:FF:FF:FF.
            if b[0] & 0xC0 != 0 && b[2..] == [0xFF; 4] {
                return AddrClass::Group;
            }

            // Token Ring group address, e.g. C0:00:B2:00:00:00.
            if b[2] & 0x80 != 0 {
                return AddrClass::Group;
            }
        }

        // Token Ring functional addresses only compare the last four
        // bytes.
        let hit = self.entries.iter().any(|e| {
            if mac_type == MacType::Tpr {
                e.bytes()[2..] == b[2..]
            } else {
                e == addr
            }
        });

        if hit { AddrClass::Group } else { AddrClass::Reject }
    }
}
