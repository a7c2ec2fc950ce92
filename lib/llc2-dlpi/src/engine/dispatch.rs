// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Downstream primitive dispatch.
//!
//! Every primitive a DLS user sends is routed through
//! [`STATE_TABLE`] by the link's current state. A state handler
//! either answers the primitive itself, hands it to one of the
//! request helpers below, or refuses it with `DL_OUTSTATE`.
//!
//! Handlers take ownership of the link guard. Those that need the
//! adapter lock, or that call the lower layer, drop the guard, take
//! what they need in lock order, and re-validate the link state once
//! they hold it again.

use super::CloseOutcome;
use super::Dlpi;
use super::error::DlpiError;
use super::error::LowerError;
use super::link::BindInfo;
use super::link::Link;
use super::link::LinkGuard;
use super::link::LinkId;
use super::multicast::McastError;
use super::trace::TraceEvent;
use super::trace::trace_ev;
use crate::provider::LogLevel;
use llc2_api::BindReq;
use llc2_api::DEFAULT_MAX_SDU;
use llc2_api::DEFAULT_MIN_SDU;
use llc2_api::DL_CURR_PHYS_ADDR;
use llc2_api::DL_FACT_PHYS_ADDR;
use llc2_api::DL_STYLE2;
use llc2_api::DL_VERSION_2;
use llc2_api::DlErrno;
use llc2_api::DlPrim;
use llc2_api::DlReq;
use llc2_api::DlState;
use llc2_api::DlsapAddr;
use llc2_api::ETHER_ADDR_SIZE;
use llc2_api::FlushFlags;
use llc2_api::IEEE_ADDR_SIZE;
use llc2_api::InfoAck;
use llc2_api::MacAddr;
use llc2_api::MacType;
use llc2_api::SNAP_SAP;
use llc2_api::ServiceMode;
use llc2_api::SnapId;
use llc2_api::UpMsg;
use llc2_api::errno::ENOSR;
use llc2_api::errno::EPROTO;
use llc2_api::wire;

/// A per-state primitive handler.
type Handler = for<'a> fn(&'a Dlpi, LinkId, LinkGuard<'a>, DlReq);

/// The handler for each state, indexed by the state's raw value.
const STATE_TABLE: [Handler; DlState::COUNT] = [
    Dlpi::st_unbound,   // DL_UNBOUND
    Dlpi::st_outstate,  // DL_BIND_PENDING
    Dlpi::st_outstate,  // DL_UNBIND_PENDING
    Dlpi::st_idle,      // DL_IDLE
    Dlpi::st_unattached, // DL_UNATTACHED
    Dlpi::st_outstate,  // DL_ATTACH_PENDING
    Dlpi::st_outstate,  // DL_DETACH_PENDING
    Dlpi::st_outstate,  // DL_UDQOS_PENDING
    Dlpi::st_outcon,    // DL_OUTCON_PENDING
    Dlpi::st_incon,     // DL_INCON_PENDING
    Dlpi::st_outstate,  // DL_CONN_RES_PENDING
    Dlpi::st_dataxfer,  // DL_DATAXFER
    Dlpi::st_user_reset, // DL_USER_RESET_PENDING
    Dlpi::st_prov_reset, // DL_PROV_RESET_PENDING
    Dlpi::st_outstate,  // DL_RESET_RES_PENDING
    Dlpi::st_outstate,  // DL_DISCON8_PENDING
    Dlpi::st_outstate,  // DL_DISCON9_PENDING
    Dlpi::st_outstate,  // DL_DISCON11_PENDING
    Dlpi::st_outstate,  // DL_DISCON12_PENDING
    Dlpi::st_outstate,  // DL_DISCON13_PENDING
    Dlpi::st_outstate,  // DL_SUBS_BIND_PND
    Dlpi::st_outstate,  // DL_SUBS_UNBIND_PND
];

fn outstate(g: &Link, prim: DlPrim) {
    Dlpi::error_ack(g, prim, DlErrno::Outstate, 0);
}

fn not_supported(g: &Link, prim: DlPrim) {
    Dlpi::error_ack(g, prim, DlErrno::NotSupported, 0);
}

/// Build the `DL_INFO_ACK` describing a link as it stands.
pub(crate) fn info_ack(g: &Link) -> InfoAck {
    let mut ack = InfoAck {
        max_sdu: DEFAULT_MAX_SDU,
        min_sdu: DEFAULT_MIN_SDU,
        addr_length: IEEE_ADDR_SIZE as u32,
        mac_type: MacType::Csmacd,
        current_state: g.state,
        sap_length: 0,
        service_mode: ServiceMode::CODLS | ServiceMode::CLDLS,
        provider_style: DL_STYLE2,
        version: DL_VERSION_2,
        addr: None,
        brdcst_addr: None,
    };

    if let Some(mac) = &g.mac {
        ack.mac_type = mac.cfg.mac_type;
        ack.brdcst_addr = Some(MacAddr::BROADCAST);
        if g.state == DlState::Unbound {
            ack.service_mode = mac.cfg.service_modes;
            ack.max_sdu = mac.cfg.max_sdu;
            ack.min_sdu = mac.cfg.min_sdu;
        }
    }

    if g.state == DlState::Idle || g.state >= DlState::UdqosPending {
        ack.addr = Some(g.bind.addr);
        ack.sap_length = if g.bind.enet { -2 } else { -1 };
        ack.addr_length = g.bind.addr_len as u32;
        ack.service_mode = g.bind.service_mode;
        ack.max_sdu = g.bind.max_sdu;
        ack.min_sdu = g.bind.min_sdu;
    }

    ack
}

impl Dlpi {
    /// Process a primitive sent down `id` by its user.
    pub fn put(&self, id: LinkId, req: DlReq) -> Result<(), DlpiError> {
        let g = self.lock_open(id)?;
        let prim = req.prim();

        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let (state_s, prim_s) = (g.state.to_string(), prim.to_string());
                crate::llc2_provider::dlpi__state!(
                    || (g.minor, state_s.as_str(), prim_s.as_str())
                );
            }
        }
        trace_ev!(
            self.trace(),
            TraceEvent::Dispatch,
            g.minor,
            g.state.raw(),
            prim.raw()
        );

        if let DlReq::Info = req {
            g.send(UpMsg::InfoAck(info_ack(&g)));
            return Ok(());
        }

        // Nothing but INFO makes sense until the lower layer has
        // registered an adapter.
        if self.reg.adapter_count() == 0 {
            Self::error_ack(&g, prim, DlErrno::BadPpa, 0);
            return Ok(());
        }

        let handler = STATE_TABLE[g.state.raw() as usize];
        handler(self, id, g, req);
        Ok(())
    }

    /// Process a `M_PROTO`/`M_PCPROTO` message in its wire form.
    pub fn put_proto(
        &self,
        id: LinkId,
        ctl: &[u8],
        data: &[u8],
    ) -> Result<(), DlpiError> {
        match wire::decode_req(ctl, data) {
            Ok(req) => self.put(id, req),
            Err(e) => {
                let g = self.lock_open(id)?;
                trace_ev!(self.trace(), TraceEvent::Drop, g.minor, ctl.len());
                g.send(e.reply());
                Ok(())
            }
        }
    }

    /// Process a downstream `M_FLUSH`.
    pub fn put_flush(
        &self,
        id: LinkId,
        flags: FlushFlags,
    ) -> Result<(), DlpiError> {
        let mut g = self.lock_open(id)?;
        if flags.contains(FlushFlags::FLUSHW) {
            g.wq.clear();
        }
        if flags.contains(FlushFlags::FLUSHR) {
            g.rq.clear();
            g.send(UpMsg::Flush(FlushFlags::FLUSHR));
        }
        Ok(())
    }

    // ================================================================
    // State handlers
    // ================================================================

    fn st_outstate<'a>(&'a self, _id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        outstate(&g, req.prim());
    }

    fn st_unattached<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::Attach { ppa } => self.attach_req(id, g, ppa),
            DlReq::Token => Self::token_req(&g),
            DlReq::Unitdata { dest, .. } => g.send(UpMsg::UderrorInd {
                dest,
                errno: DlErrno::Outstate,
                unix_errno: 0,
            }),
            other @ (DlReq::PromiscOn { .. } | DlReq::PromiscOff { .. }) => {
                not_supported(&g, other.prim())
            }
            other => outstate(&g, other.prim()),
        }
    }

    fn st_unbound<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        let initialized = g.mac.as_ref().is_some_and(|m| m.is_initialized());
        if !initialized
            && !matches!(
                req,
                DlReq::PhysAddr { .. }
                    | DlReq::SetPhysAddr { .. }
                    | DlReq::Detach
            )
        {
            Self::error_ack(&g, req.prim(), DlErrno::NotInit, 0);
            return;
        }

        match req {
            DlReq::Bind(bind) => self.bind_req(id, g, bind),
            DlReq::Detach => self.detach_req(id, g),
            DlReq::EnabMulti { addr } => self.enabmulti_req(id, g, addr),
            DlReq::DisabMulti { addr } => self.disabmulti_req(id, g, addr),
            DlReq::SetPhysAddr { addr } => self.set_phys_addr_req(id, g, addr),
            DlReq::PhysAddr { addr_type } => Self::phys_addr_req(&g, addr_type),
            DlReq::GetStatistics => self.get_statistics_req(id, g),
            DlReq::Token => Self::token_req(&g),
            other @ (DlReq::PromiscOn { .. } | DlReq::PromiscOff { .. }) => {
                not_supported(&g, other.prim())
            }
            other => outstate(&g, other.prim()),
        }
    }

    fn st_idle<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::Unitdata { dest, data } => self.unitdata_req(g, dest, data),
            DlReq::Test { response, poll_final, dest, data } => {
                self.test_req(g, response, poll_final, dest, data)
            }
            DlReq::Xid { response, poll_final, dest, data } => {
                self.xid_req(g, response, poll_final, dest, data)
            }
            DlReq::Connect { dest } => self.connect_req(id, g, dest),
            DlReq::SubsBind { snap } => Self::subs_bind_req(g, snap),
            DlReq::Unbind => {
                let (g, res) = self.unbind_req(id, g);
                if res.is_err() {
                    Self::error_ack(&g, DlPrim::UnbindReq, DlErrno::Syserr, ENOSR);
                }
            }
            DlReq::EnabMulti { addr } => self.enabmulti_req(id, g, addr),
            DlReq::DisabMulti { addr } => self.disabmulti_req(id, g, addr),
            DlReq::PhysAddr { addr_type } => Self::phys_addr_req(&g, addr_type),
            DlReq::GetStatistics => self.get_statistics_req(id, g),
            DlReq::SetPhysAddr { addr } => self.set_phys_addr_req(id, g, addr),
            DlReq::Token => Self::token_req(&g),
            other @ (DlReq::PromiscOn { .. } | DlReq::PromiscOff { .. }) => {
                not_supported(&g, other.prim())
            }
            other => outstate(&g, other.prim()),
        }
    }

    fn st_outcon<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::Disconnect { .. } => self.disconnect_handler(id, g, 0),
            other => outstate(&g, other.prim()),
        }
    }

    fn st_incon<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::Disconnect { correlation, .. } => {
                if !g.knows_ind(correlation) {
                    Self::error_ack(
                        &g,
                        DlPrim::DisconnectReq,
                        DlErrno::BadCorr,
                        0,
                    );
                    return;
                }
                self.disconnect_handler(id, g, correlation)
            }
            DlReq::ConnectRes { correlation, token } => {
                if token == 0 {
                    self.accept_on_listener(id, g, correlation)
                } else {
                    self.accept_on_responder(id, g, correlation, token)
                }
            }
            other => outstate(&g, other.prim()),
        }
    }

    fn st_dataxfer<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::PhysAddr { addr_type } => Self::phys_addr_req(&g, addr_type),
            DlReq::GetStatistics => self.get_statistics_req(id, g),
            DlReq::EnabMulti { addr } => self.enabmulti_req(id, g, addr),
            DlReq::DisabMulti { addr } => self.disabmulti_req(id, g, addr),
            DlReq::Token => Self::token_req(&g),
            DlReq::Disconnect { .. } => self.disconnect_handler(id, g, 0),
            DlReq::Reset => self.reset_req(id, g),
            DlReq::Test { response, poll_final, dest, data } => {
                self.test_req(g, response, poll_final, dest, data)
            }
            DlReq::Xid { response, poll_final, dest, data } => {
                self.xid_req(g, response, poll_final, dest, data)
            }
            other @ (DlReq::PromiscOn { .. } | DlReq::PromiscOff { .. }) => {
                not_supported(&g, other.prim())
            }
            other => outstate(&g, other.prim()),
        }
    }

    fn st_user_reset<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::Disconnect { .. } => self.disconnect_handler(id, g, 0),
            other => outstate(&g, other.prim()),
        }
    }

    fn st_prov_reset<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: DlReq) {
        match req {
            DlReq::Disconnect { .. } => self.disconnect_handler(id, g, 0),
            DlReq::ResetRes => self.reset_res_req(id, g),
            other => outstate(&g, other.prim()),
        }
    }

    // ================================================================
    // Attach and detach
    // ================================================================

    fn attach_req<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, ppa: u32) {
        let prim = DlPrim::AttachReq;
        let slot = match self.reg.ppa(ppa) {
            Some(slot) if ppa < self.config().max_ppa => slot,
            _ => {
                Self::error_ack(&g, prim, DlErrno::BadPpa, 0);
                return;
            }
        };
        drop(g);

        let mut global = self.reg.global.lock();
        let mut lists = slot.lists.lock();
        let mut g = self.relock(id);

        if g.state != DlState::Unattached {
            outstate(&g, prim);
            return;
        }

        let Some(mac) = slot.mac.read().clone() else {
            Self::error_ack(&g, prim, DlErrno::BadPpa, 0);
            return;
        };

        global.master.retain(|l| *l != id);
        lists.chain.push(id);
        g.mac = Some(mac);
        g.set_state(DlState::Unbound);
        Self::ok_ack(&g, prim);
    }

    fn detach_req<'a>(&'a self, id: LinkId, g: LinkGuard<'a>) {
        let prim = DlPrim::DetachReq;
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let Some(slot) = self.reg.ppa(ppa) else {
            outstate(&g, prim);
            return;
        };
        drop(g);

        let mut global = self.reg.global.lock();
        let mut lists = slot.lists.lock();
        let mut g = self.relock(id);

        if g.state != DlState::Unbound || !g.on_ppa(ppa) {
            outstate(&g, prim);
            return;
        }

        lists.chain.retain(|l| *l != id);
        lists.remove_listener(id);
        global.master.push(id);
        g.mac = None;
        g.mcast.clear();
        g.bind.addr_len = ETHER_ADDR_SIZE;
        g.set_state(DlState::Unattached);
        Self::ok_ack(&g, prim);
    }

    // ================================================================
    // Bind and unbind
    // ================================================================

    /// Give up the adapter's connection management slot if this link
    /// holds it.
    pub(crate) fn release_conn_mgmt(id: LinkId, g: &Link) {
        if let Some(mac) = &g.mac {
            let mut ms = mac.state.lock();
            if ms.conn_mgmt == Some(id) {
                ms.conn_mgmt = None;
            }
        }
    }

    fn bind_req<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, req: BindReq) {
        let prim = DlPrim::BindReq;
        let Some(mac) = g.mac.clone() else {
            outstate(&g, prim);
            return;
        };
        let mode = req.service_mode;

        if mode != ServiceMode::CODLS && mode != ServiceMode::CLDLS {
            Self::error_ack(&g, prim, DlErrno::Unsupported, 0);
            return;
        }

        if req.sap == 0 || !mac.supports(mode) {
            Self::error_ack(&g, prim, DlErrno::Unsupported, 0);
            return;
        }

        if req.conn_mgmt && mac.state.lock().conn_mgmt.is_some() {
            Self::error_ack(&g, prim, DlErrno::Bound, 0);
            return;
        }

        let ppa = mac.ppa;
        let sap = req.sap;
        let enet = req.is_ether();
        let listener = mode == ServiceMode::CODLS && req.max_conind > 0;
        drop(g);

        let Some(lists) = self.lists(ppa) else {
            outstate(&self.relock(id), prim);
            return;
        };

        let conflict = self.any_other(&lists, id, |o| {
            if !o.is_bound() || o.bind.sap != sap {
                return false;
            }

            let codls = listener && o.bind.is_codls() && o.bind.is_listener();
            let cldls = mode == ServiceMode::CLDLS
                && o.bind.is_cldls()
                && sap != SNAP_SAP;
            codls || cldls
        });

        let mut g = self.relock(id);
        if g.state != DlState::Unbound || !g.on_ppa(ppa) {
            outstate(&g, prim);
            return;
        }

        if conflict {
            Self::error_ack(&g, prim, DlErrno::Bound, 0);
            return;
        }

        if req.conn_mgmt {
            let mut ms = mac.state.lock();
            if ms.conn_mgmt.is_some() {
                drop(ms);
                Self::error_ack(&g, prim, DlErrno::Bound, 0);
                return;
            }
            ms.conn_mgmt = Some(id);
        }

        let max_conind =
            if mode == ServiceMode::CODLS { req.max_conind } else { 0 };
        g.bind = BindInfo {
            sap,
            service_mode: mode,
            enet,
            addr_len: BindInfo::addr_len_for(enet),
            conn_mgmt: req.conn_mgmt,
            max_conind,
            conind: max_conind,
            xidtest_flg: req.xidtest_flg,
            max_sdu: mac.cfg.max_sdu,
            min_sdu: mac.cfg.min_sdu,
            snap: None,
            addr: DlsapAddr::new(mac.addr(), sap),
        };
        g.set_state(DlState::BindPending);
        drop(g);
        drop(lists);

        let res = self.lower.bind(ppa, id, sap, mode);
        if let Err(e) = res {
            let mut g = self.relock(id);
            trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sap, e.unix_errno());
            if g.state != DlState::BindPending {
                return;
            }

            g.set_state(DlState::Unbound);
            Self::release_conn_mgmt(id, &g);
            match e {
                LowerError::BadAddr => {
                    Self::error_ack(&g, prim, DlErrno::BadAddr, 0)
                }
                _ => Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR),
            }
        }
    }

    /// Unbind a link, handing back the guard and whether the lower
    /// layer accepted the request.
    ///
    /// When another stream shares the link's LLC SAP the lower layer
    /// keeps its binding and the unbind completes here. Otherwise the
    /// link waits in `DL_UNBIND_PENDING` for [`Dlpi::unbind_con`].
    pub(crate) fn unbind_req<'a>(
        &'a self,
        id: LinkId,
        g: LinkGuard<'a>,
    ) -> (LinkGuard<'a>, Result<(), LowerError>) {
        Self::release_conn_mgmt(id, &g);
        let Some(ppa) = g.ppa() else {
            return (g, Ok(()));
        };
        let sap = g.bind.sap;
        let enet = g.bind.enet;
        drop(g);

        let Some(mut lists) = self.lists(ppa) else {
            return (self.relock(id), Ok(()));
        };
        let shared = !enet
            && self.any_other(&lists, id, |o| {
                o.user.is_some()
                    && o.is_bound()
                    && !o.bind.enet
                    && o.bind.sap == sap
            });

        let mut g = self.relock(id);
        if !g.is_bound() || !g.on_ppa(ppa) {
            drop(lists);
            if g.is_closing() {
                g.wait.complete(CloseOutcome::Confirmed);
            } else {
                outstate(&g, DlPrim::UnbindReq);
            }
            return (g, Ok(()));
        }

        if shared {
            lists.remove_listener(id);
            drop(lists);
            g.bind.sap = 0;
            g.set_state(DlState::Unbound);
            if g.is_closing() {
                g.wait.complete(CloseOutcome::Confirmed);
            } else {
                Self::ok_ack(&g, DlPrim::UnbindReq);
            }
            return (g, Ok(()));
        }
        drop(lists);

        let prev = g.state;
        g.set_state(DlState::UnbindPending);
        drop(g);

        let res = self.lower.unbind(ppa, sap);
        let mut g = self.relock(id);
        if let Err(e) = res {
            trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sap, e.unix_errno());
            if g.state == DlState::UnbindPending {
                g.set_state(prev);
            }
        }
        (g, res)
    }

    fn subs_bind_req(mut g: LinkGuard<'_>, snap: SnapId) {
        if g.bind.sap != SNAP_SAP {
            outstate(&g, DlPrim::SubsBindReq);
            return;
        }
        g.bind.snap = Some(snap);
        g.send(UpMsg::SubsBindAck { snap });
    }

    // ================================================================
    // Connectionless requests
    // ================================================================

    fn unitdata_req(&self, g: LinkGuard<'_>, dest: Vec<u8>, data: Vec<u8>) {
        let prim = DlPrim::UnitdataReq;
        if !g.bind.is_cldls() {
            Self::error_ack(&g, prim, DlErrno::Unsupported, 0);
            return;
        }

        let len = data.len() as u32;
        if len > g.bind.max_sdu || len < g.bind.min_sdu {
            Self::error_ack(&g, prim, DlErrno::BadData, 0);
            return;
        }

        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let Some(rem) = DlsapAddr::from_bytes(&dest) else {
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        };
        let loc = g.bind.addr;
        let snap =
            if g.bind.sap == SNAP_SAP { Some(g.bind.snap.unwrap_or_default()) } else { None };
        let minor = g.minor;
        drop(g);

        // UI frames may be dropped below us; there is nothing to tell
        // the user either way.
        if let Err(e) = self.lower.unitdata(ppa, &rem, &loc, snap, &data) {
            trace_ev!(self.trace(), TraceEvent::Lower, minor, rem.sap, e.unix_errno());
        }
    }

    fn test_req(
        &self,
        g: LinkGuard<'_>,
        response: bool,
        poll_final: bool,
        dest: Vec<u8>,
        data: Vec<u8>,
    ) {
        let prim = if response { DlPrim::TestRes } else { DlPrim::TestReq };
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let Some(rem) = DlsapAddr::from_bytes(&dest) else {
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        };
        let loc = g.bind.addr;
        let minor = g.minor;
        drop(g);

        let res = self.lower.test(ppa, &rem, &loc, response, poll_final, &data);
        if let Err(e) = res {
            trace_ev!(self.trace(), TraceEvent::Lower, minor, rem.sap, e.unix_errno());
        }
    }

    fn xid_req(
        &self,
        g: LinkGuard<'_>,
        response: bool,
        poll_final: bool,
        dest: Vec<u8>,
        data: Vec<u8>,
    ) {
        let prim = if response { DlPrim::XidRes } else { DlPrim::XidReq };
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let Some(rem) = DlsapAddr::from_bytes(&dest) else {
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        };
        if data.len() as u32 > g.bind.max_sdu {
            Self::error_ack(&g, prim, DlErrno::BadData, 0);
            return;
        }
        let loc = g.bind.addr;
        let minor = g.minor;
        drop(g);

        let res = self.lower.xid(ppa, &rem, &loc, response, poll_final, &data);
        if let Err(e) = res {
            trace_ev!(self.trace(), TraceEvent::Lower, minor, rem.sap, e.unix_errno());
        }
    }

    // ================================================================
    // Connection establishment
    // ================================================================

    fn connect_req<'a>(&'a self, id: LinkId, mut g: LinkGuard<'a>, dest: Vec<u8>) {
        let prim = DlPrim::ConnectReq;
        let Some(mac) = g.mac.clone() else {
            outstate(&g, prim);
            return;
        };

        if !g.bind.is_codls() || !mac.supports(ServiceMode::CODLS) {
            Self::error_ack(&g, prim, DlErrno::Unsupported, 0);
            return;
        }

        let Some(dsap) = DlsapAddr::from_bytes(&dest) else {
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        };

        let ppa = mac.ppa;
        let sap = g.bind.sap;
        drop(g);

        // Only one session between a local SAP and a remote node and
        // SAP. The adapter lock is held from the check until this link
        // has left IDLE, so two connects cannot both pass it.
        let lists = self.lists(ppa);
        let dup = match &lists {
            Some(lists) => self.any_other(lists, id, |o| {
                o.state.has_session() && o.dsap == dsap && o.bind.sap == sap
            }),
            None => false,
        };

        let mut g = self.relock(id);
        if lists.is_none() || g.state != DlState::Idle || !g.on_ppa(ppa) {
            drop(lists);
            outstate(&g, prim);
            return;
        }

        if dup {
            drop(lists);
            self.log(
                LogLevel::Warn,
                &format!("Attempting to connect twice to {dsap} from {id}"),
            );
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        }

        g.dsap = dsap;
        g.set_state(DlState::OutconPending);
        g.sid = 0;
        drop(lists);
        drop(g);

        let res = self.lower.connect(ppa, id, &dsap, sap);
        let mut g = self.relock(id);
        match res {
            Ok(sid) => {
                // The confirmation may already have arrived.
                if g.state == DlState::OutconPending && g.sid == 0 {
                    g.sid = sid;
                }
            }

            Err(e) => {
                trace_ev!(self.trace(), TraceEvent::Lower, g.minor, 0, e.unix_errno());
                if g.state == DlState::OutconPending {
                    g.set_state(DlState::Idle);
                    Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR);
                }
            }
        }
    }

    /// `DL_CONNECT_RES` with no token: accept the session on the
    /// listening stream itself.
    fn accept_on_listener<'a>(
        &'a self,
        id: LinkId,
        mut g: LinkGuard<'a>,
        corr: u32,
    ) {
        let prim = DlPrim::ConnectRes;
        let conn_mgmt = g
            .mac
            .as_ref()
            .is_some_and(|m| m.state.lock().conn_mgmt == Some(id));
        if g.bind.enet || !g.bind.is_codls() || conn_mgmt {
            outstate(&g, prim);
            return;
        }

        if g.bind.max_conind.saturating_sub(g.bind.conind) > 1 {
            Self::error_ack(&g, prim, DlErrno::Pending, 0);
            return;
        }

        let Some(ind) = g.find_out_ind(corr).copied() else {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, corr);
            Self::error_ack(&g, prim, DlErrno::BadCorr, 0);
            return;
        };
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };

        // Set up as if the lower layer will accept; the confirmation
        // may arrive before it returns.
        g.dsap = ind.remote;
        g.sid = corr;
        g.set_state(DlState::ConnResPending);
        let src = g.bind.addr;
        drop(g);

        let res = self.lower.connect_res(ppa, id, &src, &ind.remote, corr);
        if let Err(e) = res {
            let mut g = self.relock(id);
            trace_ev!(self.trace(), TraceEvent::Lower, g.minor, corr, e.unix_errno());
            if g.state == DlState::ConnResPending {
                g.set_state(DlState::Idle);
                g.sid = 0;
                Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR);
            }
        }
    }

    /// `DL_CONNECT_RES` naming a responder stream by token.
    fn accept_on_responder<'a>(
        &'a self,
        id: LinkId,
        g: LinkGuard<'a>,
        corr: u32,
        token: u32,
    ) {
        let prim = DlPrim::ConnectRes;
        let resp = match self.reg.by_minor(token) {
            Some(resp) if resp != id => resp,
            _ => {
                Self::error_ack(&g, prim, DlErrno::BadToken, 0);
                return;
            }
        };

        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let sap = g.bind.sap;
        let src = g.bind.addr;
        let ind = g.find_out_ind(corr).copied();
        drop(g);

        let mut r = self.relock(resp);
        let eligible = r.is_open()
            && r.on_ppa(ppa)
            && !r.bind.enet
            && r.bind.sap == sap
            && r.bind.is_codls()
            && r.bind.max_conind == 0
            && !r.bind.conn_mgmt
            && r.state == DlState::Idle;
        if !eligible {
            drop(r);
            outstate(&self.relock(id), prim);
            return;
        }

        let Some(ind) = ind else {
            drop(r);
            let g = self.relock(id);
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, corr);
            Self::error_ack(&g, prim, DlErrno::BadCorr, 0);
            return;
        };

        r.dsap = ind.remote;
        r.sid = corr;
        r.set_state(DlState::ConnResPending);
        drop(r);

        let res = self.lower.connect_res(ppa, resp, &src, &ind.remote, corr);
        if let Err(e) = res {
            {
                let mut r = self.relock(resp);
                trace_ev!(self.trace(), TraceEvent::Lower, r.minor, corr, e.unix_errno());
                if r.state == DlState::ConnResPending {
                    r.set_state(DlState::Idle);
                    r.sid = 0;
                }
            }
            let g = self.relock(id);
            Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR);
        }
    }

    // ================================================================
    // Disconnect and reset
    // ================================================================

    /// Ask the lower layer to tear down a session, moving the link to
    /// the matching `DISCONx_PENDING` state. `corr` names one of a
    /// listener's connect indications; zero means the link's own
    /// session.
    ///
    /// On rejection the link is returned to the state it was in.
    pub(crate) fn disconnect_req<'a>(
        &'a self,
        id: LinkId,
        mut g: LinkGuard<'a>,
        corr: u32,
    ) -> (LinkGuard<'a>, Result<(), LowerError>) {
        let prev = g.state;
        let next = match prev {
            DlState::OutconPending => DlState::Discon8Pending,
            DlState::InconPending => DlState::Discon9Pending,
            DlState::DataXfer => DlState::Discon11Pending,
            DlState::UserResetPending => DlState::Discon12Pending,
            DlState::ProvResetPending => DlState::Discon13Pending,
            _ => {
                trace_ev!(self.trace(), TraceEvent::Drop, g.minor, prev.raw());
                return (g, Err(LowerError::Failed(EPROTO)));
            }
        };
        let Some(ppa) = g.ppa() else {
            return (g, Err(LowerError::Failed(EPROTO)));
        };

        let sid = if corr != 0 { corr } else { g.sid };
        g.set_state(next);
        drop(g);

        let res = self.lower.disconnect(ppa, sid);
        let mut g = self.relock(id);
        if let Err(e) = res {
            trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sid, e.unix_errno());
            if g.state == next {
                g.set_state(prev);
            }
        }
        (g, res)
    }

    fn disconnect_handler<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, corr: u32) {
        let (g, res) = self.disconnect_req(id, g, corr);
        if res.is_err() {
            Self::error_ack(&g, DlPrim::DisconnectReq, DlErrno::Syserr, ENOSR);
        }
    }

    fn reset_req<'a>(&'a self, id: LinkId, mut g: LinkGuard<'a>) {
        let prim = DlPrim::ResetReq;
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let sid = g.sid;
        g.set_state(DlState::UserResetPending);
        drop(g);

        if let Err(e) = self.lower.reset_req(ppa, sid) {
            let mut g = self.relock(id);
            trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sid, e.unix_errno());
            if g.state == DlState::UserResetPending {
                g.set_state(DlState::DataXfer);
                Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR);
            }
        }
    }

    fn reset_res_req<'a>(&'a self, id: LinkId, mut g: LinkGuard<'a>) {
        let prim = DlPrim::ResetRes;
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        let sid = g.sid;

        if g.local_reset {
            // The reset started on our side of the session: answering
            // it is a new reset request, completed right away.
            drop(g);
            let res = self.lower.reset_req(ppa, sid);
            let mut g = self.relock(id);
            if g.state != DlState::ProvResetPending {
                return;
            }

            match res {
                Ok(()) => {
                    g.local_reset = false;
                    g.set_state(DlState::DataXfer);
                    Self::ok_ack(&g, prim);
                    drop(g);
                    self.write_service(id);
                }

                Err(e) => {
                    trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sid, e.unix_errno());
                    Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR);
                }
            }
            return;
        }

        g.set_state(DlState::ResetResPending);
        drop(g);

        if let Err(e) = self.lower.reset_res(ppa, sid) {
            let mut g = self.relock(id);
            trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sid, e.unix_errno());
            if g.state == DlState::ResetResPending {
                g.set_state(DlState::ProvResetPending);
                Self::error_ack(&g, prim, DlErrno::Syserr, ENOSR);
            }
        }
    }

    // ================================================================
    // Adapter management
    // ================================================================

    fn token_req(g: &Link) {
        g.send(UpMsg::TokenAck { token: g.minor });
    }

    fn phys_addr_req(g: &Link, addr_type: u32) {
        let prim = DlPrim::PhysAddrReq;
        let Some(mac) = &g.mac else {
            outstate(g, prim);
            return;
        };

        let addr = match addr_type {
            DL_FACT_PHYS_ADDR => mac.cfg.bia,
            DL_CURR_PHYS_ADDR => mac.addr(),
            _ => {
                not_supported(g, prim);
                return;
            }
        };
        g.send(UpMsg::PhysAddrAck { addr });
    }

    fn set_phys_addr_req<'a>(&'a self, id: LinkId, g: LinkGuard<'a>, addr: Vec<u8>) {
        let prim = DlPrim::SetPhysAddrReq;
        let addr = match MacAddr::from_slice(&addr) {
            Some(a) if a.bytes()[0] & 0x01 == 0 => a,
            _ => {
                Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
                return;
            }
        };
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        drop(g);

        // The address can't change under a bound stream.
        let others = match self.lists(ppa) {
            Some(lists) => self.any_other(&lists, id, |o| o.is_bound()),
            None => false,
        };
        let g = self.relock(id);
        if others || g.is_bound() {
            Self::error_ack(&g, prim, DlErrno::Busy, 0);
            return;
        }
        drop(g);

        if let Err(e) = self.lower.set_phys_addr(ppa, id, &addr) {
            let g = self.relock(id);
            Self::error_ack(&g, prim, DlErrno::Syserr, e.unix_errno());
        }
    }

    fn get_statistics_req<'a>(&'a self, id: LinkId, g: LinkGuard<'a>) {
        let prim = DlPrim::GetStatisticsReq;
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };
        drop(g);

        if let Err(e) = self.lower.get_statistics(ppa, id) {
            let g = self.relock(id);
            Self::error_ack(&g, prim, DlErrno::Syserr, e.unix_errno());
        }
    }

    fn enabmulti_req<'a>(&'a self, id: LinkId, mut g: LinkGuard<'a>, addr: Vec<u8>) {
        let prim = DlPrim::EnabmultiReq;
        let Some(addr) = MacAddr::from_slice(&addr) else {
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        };
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };

        if g.mcast.contains(&addr) {
            Self::ok_ack(&g, prim);
            return;
        }

        if let Err(McastError::TooMany) = g.mcast.insert(addr) {
            Self::error_ack(&g, prim, DlErrno::TooMany, 0);
            return;
        }
        drop(g);

        // The adapter acknowledges through multicast_ack.
        if let Err(e) = self.lower.multicast(ppa, id, &addr, true) {
            let mut g = self.relock(id);
            let _ = g.mcast.remove(&addr);
            Self::error_ack(&g, prim, DlErrno::Syserr, e.unix_errno());
        }
    }

    fn disabmulti_req<'a>(&'a self, id: LinkId, mut g: LinkGuard<'a>, addr: Vec<u8>) {
        let prim = DlPrim::DisabmultiReq;
        let Some(addr) = MacAddr::from_slice(&addr) else {
            Self::error_ack(&g, prim, DlErrno::BadAddr, 0);
            return;
        };
        let Some(ppa) = g.ppa() else {
            outstate(&g, prim);
            return;
        };

        if g.mcast.remove(&addr).is_err() {
            Self::error_ack(&g, prim, DlErrno::NotEnab, 0);
            return;
        }
        drop(g);

        if let Err(e) = self.lower.multicast(ppa, id, &addr, false) {
            let mut g = self.relock(id);
            let _ = g.mcast.insert(addr);
            Self::error_ack(&g, prim, DlErrno::Syserr, e.unix_errno());
        }
    }
}
