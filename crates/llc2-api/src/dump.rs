// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Diagnostic snapshots of the provider's links.

use super::addr::DlsapAddr;
use super::addr::MacAddr;
use super::addr::SnapId;
use super::dlpi::DlState;
use super::dlpi::ServiceMode;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// A snapshot of a single open link.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LinkDump {
    pub minor: u32,
    pub ppa: Option<u32>,
    pub state: DlState,
    pub sap: u16,
    pub service_mode: ServiceMode,
    pub sid: u32,
    /// The remote end of the session, once a connect has been made.
    pub remote: DlsapAddr,
    pub max_conind: u32,
    pub conind: u32,
    /// Connect indications delivered upstream and not yet resolved.
    pub outstanding: Vec<(u32, DlsapAddr)>,
    /// Connect indications waiting for a free slot.
    pub pending: u32,
    /// Disconnect indications held while a disconnect is in flight.
    pub held_disconnects: u32,
    pub multicast: Vec<MacAddr>,
    pub snap: Option<SnapId>,
    pub flow_controlled: bool,
    pub read_queued: u32,
    pub write_queued: u32,
}

/// The response to a link dump request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpLinksResp {
    pub links: Vec<LinkDump>,
}

impl DumpLinksResp {
    /// Serialize for transport across a control stream.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
