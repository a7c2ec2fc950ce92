// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The LLC2 DLPI engine.
//!
//! The engine sits between the DLS users above it, one per open
//! stream, and the LLC2 link layer below it. Users send primitives
//! down through [`Dlpi::put`] and friends; each is routed by the
//! link's current DLPI state to a handler which answers, transitions,
//! or forwards it to the [`Llc2Lower`]. The lower layer reports back
//! asynchronously through the upcalls in [`upcall`].
//!
//! # Locking
//!
//! There are three tiers of locks, always taken in this order: the
//! global link lock (free and master lists), a per-adapter lock (the
//! adapter's chain and listen queue), and a per-link lock. No thread
//! ever holds two link locks. Whenever a handler needs a lock of a
//! lower tier than one it holds, it drops what it holds, takes the
//! locks in order, and re-validates the link's state before acting.
//! No engine lock is held across a call into the lower layer.

pub mod adapter;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod indq;
pub mod lifecycle;
pub mod link;
pub mod lower;
pub mod multicast;
pub mod registry;
pub mod trace;
pub mod upcall;
pub mod user;

pub use adapter::MacConfig;
pub use data::DataInd;
pub use data::FlowStatus;
pub use error::DlpiError;
pub use error::LowerError;
pub use link::CloseOutcome;
pub use link::LinkId;
pub use lower::Llc2Lower;
pub use user::DlsUser;

use crate::config::ConfigError;
use crate::config::DlpiConfig;
use crate::ddi::sync::KMutexGuard;
use crate::provider::LogLevel;
use crate::provider::Providers;
use link::Link;
use link::LinkGuard;
use link::LinkSlot;
use link::LinkStatus;
use llc2_api::DlErrno;
use llc2_api::DlPrim;
use llc2_api::DlState;
use llc2_api::DumpLinksResp;
use llc2_api::LinkDump;
use llc2_api::UpMsg;
use registry::LinkRegistry;
use registry::PpaLists;
use std::sync::Arc;
use trace::Trace;

/// The DLPI provider engine.
pub struct Dlpi {
    cfg: DlpiConfig,
    pub(crate) reg: LinkRegistry,
    pub(crate) lower: Arc<dyn Llc2Lower>,
    providers: Providers,
    trace: Trace,
}

impl Dlpi {
    pub fn new(
        cfg: DlpiConfig,
        lower: Arc<dyn Llc2Lower>,
        providers: Providers,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let reg = LinkRegistry::new(&cfg);
        let trace = Trace::new(cfg.trace_capacity);
        Ok(Self { cfg, reg, lower, providers, trace })
    }

    pub fn config(&self) -> &DlpiConfig {
        &self.cfg
    }

    /// The engine's trace ring.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Register the adapter the lower layer knows as `ppa`. The
    /// adapter starts out installed but not initialized.
    pub fn register_adapter(
        &self,
        ppa: u32,
        cfg: MacConfig,
    ) -> Result<(), DlpiError> {
        self.reg.register_adapter(ppa, cfg)?;
        self.log(LogLevel::Note, &format!("adapter {ppa} registered"));
        Ok(())
    }

    /// Remove an adapter. Every link must have detached first.
    pub fn unregister_adapter(&self, ppa: u32) -> Result<(), DlpiError> {
        self.reg.unregister_adapter(ppa)
    }

    pub fn set_adapter_initialized(
        &self,
        ppa: u32,
        initialized: bool,
    ) -> Result<(), DlpiError> {
        if ppa >= self.cfg.max_ppa {
            return Err(DlpiError::BadPpa(ppa));
        }
        let mac = self.reg.adapter(ppa).ok_or(DlpiError::NoAdapter(ppa))?;
        mac.state.lock().initialized = initialized;
        Ok(())
    }

    /// Open a new stream, returning its link.
    pub fn open(&self, user: Arc<dyn DlsUser>) -> Result<LinkId, DlpiError> {
        let (id, _minor) = self.reg.alloc()?;
        self.slot(id).link.lock().user = Some(user);
        Ok(id)
    }

    /// The minor number of an open link, which doubles as its token.
    pub fn minor(&self, id: LinkId) -> Result<u32, DlpiError> {
        Ok(self.lock_open(id)?.minor)
    }

    pub fn state(&self, id: LinkId) -> Result<DlState, DlpiError> {
        Ok(self.lock_open(id)?.state)
    }

    pub fn dump_link(&self, id: LinkId) -> Result<LinkDump, DlpiError> {
        Ok(self.lock_open(id)?.dump())
    }

    /// Snapshot every open link.
    pub fn dump_links(&self) -> DumpLinksResp {
        let links = self
            .reg
            .links
            .iter()
            .filter_map(|slot| {
                let lnk = slot.link.lock();
                (lnk.status != LinkStatus::Closed).then(|| lnk.dump())
            })
            .collect();
        DumpLinksResp { links }
    }

    /// The adapter's chain and listen queue, in search order.
    #[cfg(any(feature = "test-help", test))]
    pub fn queues(&self, ppa: u32) -> Option<(Vec<LinkId>, Vec<LinkId>)> {
        let lists = self.lists(ppa)?;
        Some((lists.chain.clone(), lists.listen.iter().copied().collect()))
    }

    // ================================================================
    // Internal helpers shared by the handlers, upcalls and lifecycle.
    // ================================================================

    /// The slot for a link id known to be valid.
    pub(crate) fn slot(&self, id: LinkId) -> &LinkSlot {
        &self.reg.links[id.index()]
    }

    /// Lock a link whose id came from our own lists.
    pub(crate) fn relock(&self, id: LinkId) -> LinkGuard<'_> {
        self.slot(id).link.lock()
    }

    /// Lock a link named by a caller, which must be open.
    pub(crate) fn lock_open(
        &self,
        id: LinkId,
    ) -> Result<LinkGuard<'_>, DlpiError> {
        let g = self.reg.slot(id)?.link.lock();
        if g.status == LinkStatus::Closed {
            return Err(DlpiError::NotOpen(id));
        }
        Ok(g)
    }

    pub(crate) fn lists(
        &self,
        ppa: u32,
    ) -> Option<KMutexGuard<'_, PpaLists>> {
        self.reg.ppa(ppa).map(|slot| slot.lists.lock())
    }

    /// Does any link on the adapter, other than `me`, satisfy `pred`?
    ///
    /// The caller holds the adapter lock and no link lock; each other
    /// link is locked in turn.
    pub(crate) fn any_other(
        &self,
        lists: &PpaLists,
        me: LinkId,
        mut pred: impl FnMut(&Link) -> bool,
    ) -> bool {
        lists.chain.iter().filter(|l| **l != me).any(|l| {
            let g = self.relock(*l);
            pred(&g)
        })
    }

    /// Find the first link in `ids` satisfying `pred`, returning it
    /// locked. The caller holds the adapter lock and no link lock.
    pub(crate) fn find_link<'a, 'b>(
        &'a self,
        ids: impl IntoIterator<Item = &'b LinkId>,
        mut pred: impl FnMut(&Link) -> bool,
    ) -> Option<(LinkId, LinkGuard<'a>)> {
        for id in ids {
            let g = self.relock(*id);
            if pred(&g) {
                return Some((*id, g));
            }
        }
        None
    }

    /// Wake a thread sleeping in close on this link.
    pub(crate) fn wake(&self, id: LinkId) {
        self.slot(id).cv.notify_all();
    }

    pub(crate) fn log(&self, level: LogLevel, msg: &str) {
        self.providers.log.log(level, msg);
    }

    pub(crate) fn ok_ack(g: &Link, prim: DlPrim) {
        g.send(UpMsg::ok_ack(prim));
    }

    pub(crate) fn error_ack(
        g: &Link,
        prim: DlPrim,
        errno: DlErrno,
        unix_errno: i32,
    ) {
        g.send(UpMsg::error_ack(prim, errno, unix_errno));
    }
}
