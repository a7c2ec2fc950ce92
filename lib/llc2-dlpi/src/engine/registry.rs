// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The link registry: a fixed arena of link records plus the lists
//! that say where each record lives.
//!
//! A record is on exactly one of three lists. The free list holds
//! closed records, the master list holds open but unattached records,
//! and each adapter's chain holds the records attached to it. Moving
//! a record between lists takes the global lock, then the adapter's
//! lock, then the link's own lock.

use super::adapter::Adapter;
use super::adapter::MacConfig;
use super::error::DlpiError;
use super::link::LinkId;
use super::link::LinkSlot;
use super::link::LinkStatus;
use crate::config::DlpiConfig;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KRwLock;
use crate::ddi::sync::LockTier;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// The links attached to one adapter, guarded by the adapter lock.
#[derive(Debug, Default)]
pub struct PpaLists {
    pub chain: Vec<LinkId>,
    /// Links bound with `max_conind > 0`.
    pub listen: VecDeque<LinkId>,
}

pub struct PpaSlot {
    pub lists: KMutex<PpaLists>,
    pub mac: KRwLock<Option<Arc<Adapter>>>,
}

/// The lists guarded by the global link lock.
#[derive(Debug, Default)]
pub struct Global {
    /// Closed records, least recently used first.
    pub free: VecDeque<LinkId>,
    /// Open, unattached records.
    pub master: Vec<LinkId>,
}

pub struct LinkRegistry {
    pub global: KMutex<Global>,
    pub ppas: Vec<PpaSlot>,
    pub links: Vec<LinkSlot>,
    /// Minor number to link. Minor 0 is the control stream and is
    /// never handed out.
    minors: KMutex<Vec<Option<LinkId>>>,
    adapters: AtomicU32,
}

impl LinkRegistry {
    pub fn new(cfg: &DlpiConfig) -> Self {
        let nlinks = cfg.max_links.saturating_sub(1);
        let links: Vec<LinkSlot> =
            (0..nlinks).map(|_| LinkSlot::new(cfg.max_multicast)).collect();
        let free = (0..nlinks).map(LinkId).collect();

        let ppas = (0..cfg.max_ppa)
            .map(|_| PpaSlot {
                lists: KMutex::with_tier(PpaLists::default(), LockTier::Ppa),
                mac: KRwLock::new(None),
            })
            .collect();

        Self {
            global: KMutex::with_tier(
                Global { free, master: Vec::new() },
                LockTier::Global,
            ),
            ppas,
            links,
            minors: KMutex::new(vec![None; cfg.max_links as usize]),
            adapters: AtomicU32::new(0),
        }
    }

    pub fn slot(&self, id: LinkId) -> Result<&LinkSlot, DlpiError> {
        self.links.get(id.index()).ok_or(DlpiError::BadLink(id))
    }

    pub fn ppa(&self, ppa: u32) -> Option<&PpaSlot> {
        self.ppas.get(ppa as usize)
    }

    pub fn adapter(&self, ppa: u32) -> Option<Arc<Adapter>> {
        self.ppa(ppa)?.mac.read().clone()
    }

    pub fn adapter_count(&self) -> u32 {
        self.adapters.load(Ordering::Relaxed)
    }

    pub fn by_minor(&self, minor: u32) -> Option<LinkId> {
        self.minors.lock().get(minor as usize).copied().flatten()
    }

    /// Take a record off the free list and put it on the master list
    /// as a freshly opened, unattached stream.
    pub fn alloc(&self) -> Result<(LinkId, u32), DlpiError> {
        let mut global = self.global.lock();
        let id = global.free.front().copied().ok_or(DlpiError::NoFreeLink)?;

        let minor = {
            let mut minors = self.minors.lock();
            let minor = minors
                .iter()
                .skip(1)
                .position(Option::is_none)
                .map(|i| i + 1)
                .ok_or(DlpiError::NoFreeLink)?;
            minors[minor] = Some(id);
            minor as u32
        };

        global.free.pop_front();
        global.master.push(id);

        let mut lnk = self.slot(id)?.link.lock();
        lnk.reset();
        lnk.mac = None;
        lnk.minor = minor;
        lnk.status = LinkStatus::Okay;
        Ok((id, minor))
    }

    /// Give back a minor number. The record itself is returned to the
    /// free list by close.
    pub fn free_minor(&self, minor: u32) {
        if let Some(m) = self.minors.lock().get_mut(minor as usize) {
            *m = None;
        }
    }

    pub fn register_adapter(
        &self,
        ppa: u32,
        cfg: MacConfig,
    ) -> Result<Arc<Adapter>, DlpiError> {
        let slot = self.ppa(ppa).ok_or(DlpiError::BadPpa(ppa))?;
        let mut mac = slot.mac.write();
        if mac.is_some() {
            return Err(DlpiError::AdapterExists(ppa));
        }
        let adapter = Arc::new(Adapter::new(ppa, cfg));
        *mac = Some(Arc::clone(&adapter));
        self.adapters.fetch_add(1, Ordering::Relaxed);
        Ok(adapter)
    }

    pub fn unregister_adapter(&self, ppa: u32) -> Result<(), DlpiError> {
        let slot = self.ppa(ppa).ok_or(DlpiError::BadPpa(ppa))?;
        let lists = slot.lists.lock();
        if !lists.chain.is_empty() {
            return Err(DlpiError::AdapterBusy(ppa));
        }
        let mut mac = slot.mac.write();
        if mac.take().is_none() {
            return Err(DlpiError::NoAdapter(ppa));
        }
        self.adapters.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }
}
