// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The link record: one per open DLPI stream.

use super::adapter::Adapter;
use super::multicast::McastTable;
use super::user::DlsUser;
use crate::ddi::sync::KCondvar;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::sync::LockTier;
use core::fmt;
use core::fmt::Display;
use llc2_api::DlState;
use llc2_api::DlsapAddr;
use llc2_api::ETHER_ADDR_SIZE;
use llc2_api::IEEE_ADDR_SIZE;
use llc2_api::LinkDump;
use llc2_api::ServiceMode;
use llc2_api::SnapId;
use llc2_api::UpMsg;
use std::collections::VecDeque;
use std::sync::Arc;

/// A handle to a link record. Handles are stable for the life of the
/// engine; a record is reused after its stream closes.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub struct LinkId(pub(crate) u32);

impl LinkId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "lnk{}", self.0)
    }
}

/// Where a link is in its open/close lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkStatus {
    Okay,
    Closed,
    CloseInProgress,
}

/// How a blocking step of close ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseOutcome {
    Confirmed,
    Failed,
    Interrupted,
}

/// The close handshake between a closing thread and the upcall which
/// completes the request it is waiting on.
#[derive(Clone, Copy, Debug, Default)]
pub struct CloseWait {
    /// Close has started on this link.
    pub pending: bool,
    pub outcome: Option<CloseOutcome>,
    pub interrupted: bool,
}

impl CloseWait {
    /// Record the result of a confirmation a closing thread waits for.
    pub fn complete(&mut self, outcome: CloseOutcome) {
        self.outcome = Some(outcome);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BindInfo {
    /// An LLC SAP, or an Ethernet type when `enet` is set.
    pub sap: u16,
    pub service_mode: ServiceMode,
    pub enet: bool,
    pub addr_len: usize,
    pub conn_mgmt: bool,
    pub max_conind: u32,
    /// Free connect indication slots.
    pub conind: u32,
    pub xidtest_flg: u32,
    pub max_sdu: u32,
    pub min_sdu: u32,
    pub snap: Option<SnapId>,
    /// The local DLSAP: adapter address plus SAP.
    pub addr: DlsapAddr,
}

impl Default for BindInfo {
    fn default() -> Self {
        Self {
            sap: 0,
            service_mode: ServiceMode::empty(),
            enet: false,
            addr_len: ETHER_ADDR_SIZE,
            conn_mgmt: false,
            max_conind: 0,
            conind: 0,
            xidtest_flg: 0,
            max_sdu: 0,
            min_sdu: 0,
            snap: None,
            addr: DlsapAddr::default(),
        }
    }
}

impl BindInfo {
    pub fn is_listener(&self) -> bool {
        self.max_conind > 0
    }

    pub fn is_codls(&self) -> bool {
        self.service_mode.contains(ServiceMode::CODLS)
    }

    pub fn is_cldls(&self) -> bool {
        self.service_mode.contains(ServiceMode::CLDLS)
    }

    /// The DLPI address length for a binding of this kind.
    pub fn addr_len_for(enet: bool) -> usize {
        if enet { ETHER_ADDR_SIZE } else { IEEE_ADDR_SIZE }
    }
}

/// A connect indication not yet delivered upstream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PendingInd {
    pub sid: u32,
    pub called: DlsapAddr,
    pub calling: DlsapAddr,
}

/// A connect indication delivered upstream and not yet answered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutInd {
    pub sid: u32,
    pub remote: DlsapAddr,
}

pub struct Link {
    pub minor: u32,
    pub state: DlState,
    /// The state close started from.
    pub orig_state: DlState,
    pub status: LinkStatus,
    pub wait: CloseWait,
    pub mac: Option<Arc<Adapter>>,
    pub user: Option<Arc<dyn DlsUser>>,
    pub bind: BindInfo,
    /// The remote DLSAP of this link's session.
    pub dsap: DlsapAddr,
    pub sid: u32,
    /// Set when the pending provider reset was started by our side of
    /// the session.
    pub local_reset: bool,
    pub pending: VecDeque<PendingInd>,
    pub out_ind: Vec<OutInd>,
    /// Disconnect indications held back while a listener's own
    /// disconnect request is in flight.
    pub dis_ind: VecDeque<UpMsg>,
    pub mcast: McastTable,
    /// Data waiting for the user to accept it.
    pub rq: VecDeque<UpMsg>,
    /// Data waiting for the lower layer to accept it.
    pub wq: VecDeque<Vec<u8>>,
    /// Set while we have told the lower layer we are busy.
    pub rnr: bool,
}

impl Link {
    pub fn new(max_multicast: usize) -> Self {
        Self {
            minor: 0,
            state: DlState::Unattached,
            orig_state: DlState::Unattached,
            status: LinkStatus::Closed,
            wait: CloseWait::default(),
            mac: None,
            user: None,
            bind: BindInfo::default(),
            dsap: DlsapAddr::default(),
            sid: 0,
            local_reset: false,
            pending: VecDeque::new(),
            out_ind: Vec::new(),
            dis_ind: VecDeque::new(),
            mcast: McastTable::new(max_multicast),
            rq: VecDeque::new(),
            wq: VecDeque::new(),
            rnr: false,
        }
    }

    /// Return every per-stream field to its freshly opened value. The
    /// adapter and status are left for the caller.
    pub fn reset(&mut self) {
        self.state = DlState::Unattached;
        self.orig_state = DlState::Unattached;
        self.wait = CloseWait::default();
        self.bind = BindInfo::default();
        self.dsap = DlsapAddr::default();
        self.sid = 0;
        self.local_reset = false;
        self.pending.clear();
        self.out_ind.clear();
        self.dis_ind.clear();
        self.mcast.clear();
        self.rq.clear();
        self.wq.clear();
        self.rnr = false;
    }

    pub fn ppa(&self) -> Option<u32> {
        self.mac.as_ref().map(|m| m.ppa)
    }

    /// Is this link attached to the adapter at `ppa`?
    pub fn on_ppa(&self, ppa: u32) -> bool {
        self.ppa() == Some(ppa)
    }

    pub fn is_open(&self) -> bool {
        self.status == LinkStatus::Okay
    }

    /// Is some thread closing this link?
    pub fn is_closing(&self) -> bool {
        self.wait.pending
    }

    /// Is this link bound to an LLC SAP or Ethernet type?
    pub fn is_bound(&self) -> bool {
        !matches!(
            self.state,
            DlState::Unattached
                | DlState::Unbound
                | DlState::AttachPending
                | DlState::DetachPending
        )
    }

    pub fn set_state(&mut self, new: DlState) {
        let old = self.state;
        self.state = new;

        if old != new {
            cfg_if! {
                if #[cfg(feature = "usdt")] {
                    let (from, to) = (old.to_string(), new.to_string());
                    crate::llc2_provider::dlpi__transition!(
                        || (self.minor, from.as_str(), to.as_str())
                    );
                } else {
                    let (_, _) = (old, new);
                }
            }
        }
    }

    /// Send a message to this link's user, if it still has one.
    pub fn send(&self, msg: UpMsg) {
        if let Some(user) = &self.user {
            user.put(msg);
        }
    }

    pub fn can_put(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.can_put())
    }

    pub fn dump(&self) -> LinkDump {
        LinkDump {
            minor: self.minor,
            ppa: self.ppa(),
            state: self.state,
            sap: self.bind.sap,
            service_mode: self.bind.service_mode,
            sid: self.sid,
            remote: self.dsap,
            max_conind: self.bind.max_conind,
            conind: self.bind.conind,
            outstanding: self
                .out_ind
                .iter()
                .map(|o| (o.sid, o.remote))
                .collect(),
            pending: self.pending.len() as u32,
            held_disconnects: self.dis_ind.len() as u32,
            multicast: self.mcast.iter().copied().collect(),
            snap: self.bind.snap,
            flow_controlled: self.rnr,
            read_queued: self.rq.len() as u32,
            write_queued: self.wq.len() as u32,
        }
    }
}

pub type LinkGuard<'a> = KMutexGuard<'a, Link>;

/// A link record plus the condvar close sleeps on.
pub struct LinkSlot {
    pub link: KMutex<Link>,
    pub cv: KCondvar,
}

impl LinkSlot {
    pub fn new(max_multicast: usize) -> Self {
        Self {
            link: KMutex::with_tier(Link::new(max_multicast), LockTier::Link),
            cv: KCondvar::new(),
        }
    }
}
