// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Adapters (MACs) registered by the lower layer.

use super::link::LinkId;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::LockTier;
use core::fmt;
use llc2_api::DEFAULT_MAX_SDU;
use llc2_api::DEFAULT_MIN_SDU;
use llc2_api::MacAddr;
use llc2_api::MacType;
use llc2_api::ServiceMode;
use serde::Deserialize;
use serde::Serialize;

/// The fixed properties of an adapter, supplied when the lower layer
/// registers it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MacConfig {
    pub mac_type: MacType,
    /// The factory (burned-in) address.
    pub bia: MacAddr,
    pub service_modes: ServiceMode,
    pub max_sdu: u32,
    pub min_sdu: u32,
}

impl MacConfig {
    pub fn ethernet(bia: MacAddr) -> Self {
        Self {
            mac_type: MacType::Csmacd,
            bia,
            service_modes: ServiceMode::CODLS | ServiceMode::CLDLS,
            max_sdu: DEFAULT_MAX_SDU,
            min_sdu: DEFAULT_MIN_SDU,
        }
    }
}

/// The mutable part of an adapter.
#[derive(Debug)]
pub struct MacState {
    /// Installed adapters are usable only once initialized.
    pub initialized: bool,
    /// The current address, which `DL_SET_PHYS_ADDR_REQ` may change.
    pub addr: MacAddr,
    /// The link bound as this adapter's connection management stream.
    pub conn_mgmt: Option<LinkId>,
}

pub struct Adapter {
    pub ppa: u32,
    pub cfg: MacConfig,
    pub(crate) state: KMutex<MacState>,
}

impl Adapter {
    pub(crate) fn new(ppa: u32, cfg: MacConfig) -> Self {
        let state = MacState {
            initialized: false,
            addr: cfg.bia,
            conn_mgmt: None,
        };
        Self { ppa, cfg, state: KMutex::with_tier(state, LockTier::Mac) }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// The adapter's current address.
    pub fn addr(&self) -> MacAddr {
        self.state.lock().addr
    }

    pub fn supports(&self, mode: ServiceMode) -> bool {
        self.cfg.service_modes.contains(mode)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("ppa", &self.ppa)
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}
