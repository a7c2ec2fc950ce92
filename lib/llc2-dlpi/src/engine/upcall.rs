// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Upcalls: the entry points the LLC2 layer uses to report
//! confirmations, indications and inbound frames.
//!
//! Every upcall is called with no engine lock held. An upcall which
//! names no link finds it by searching the adapter's chain (or listen
//! queue) under the adapter lock; an event which matches no link in a
//! state that expects it is dropped and traced.

use super::CloseOutcome;
use super::Dlpi;
use super::link::Link;
use super::link::LinkGuard;
use super::link::LinkId;
use super::link::PendingInd;
use super::multicast::AddrClass;
use super::trace::TraceEvent;
use super::trace::trace_ev;
use crate::provider::LogLevel;
use llc2_api::DlErrno;
use llc2_api::DlPrim;
use llc2_api::DlState;
use llc2_api::DlsapAddr;
use llc2_api::FlushFlags;
use llc2_api::MacAddr;
use llc2_api::Originator;
use llc2_api::SNAP_HDR_SIZE;
use llc2_api::SNAP_SAP;
use llc2_api::SnapId;
use llc2_api::UpMsg;
use llc2_api::sap_id;

/// Deliver the next undelivered connect indication on a listener with
/// a free slot.
pub(crate) fn deliver_pending(lsn: &mut Link) {
    if lsn.bind.conind == 0 {
        return;
    }

    if let Some(PendingInd { sid, called, calling }) = lsn.pending.pop_front()
    {
        lsn.set_state(DlState::InconPending);
        lsn.bind.conind -= 1;
        lsn.add_out_ind(sid, calling);
        lsn.send(UpMsg::ConnectInd { correlation: sid, called, calling });
    }
}

/// Send up disconnect indications held while the listener's own
/// disconnect request was outstanding.
fn release_held(lsn: &mut Link) {
    while let Some(msg) = lsn.dis_ind.pop_front() {
        lsn.send(msg);
    }
}

/// Retire an outstanding indication, returning its slot.
fn retire_out_ind(lsn: &mut Link, sid: u32) -> bool {
    if lsn.del_out_ind(sid).is_none() {
        return false;
    }

    lsn.bind.conind += 1;
    if lsn.bind.conind == lsn.bind.max_conind
        && lsn.state == DlState::InconPending
    {
        lsn.set_state(DlState::Idle);
    }
    true
}

/// Does a link with the given binding want a frame for `dest`?
fn frame_matches(lnk: &Link, dest: &DlsapAddr, snap: Option<SnapId>) -> bool {
    if lnk.bind.enet || lnk.bind.sap != dest.sap {
        return false;
    }

    if let Some(snap) = snap {
        if lnk.bind.snap.unwrap_or_default() != snap {
            return false;
        }
    }

    classify(lnk, &dest.mac) != AddrClass::Reject
}

/// Screening is against the burned-in address, whatever address the
/// adapter has been given since.
fn classify(lnk: &Link, addr: &MacAddr) -> AddrClass {
    match &lnk.mac {
        Some(mac) => lnk.mcast.classify(&mac.cfg.bia, mac.cfg.mac_type, addr),
        None => AddrClass::Reject,
    }
}

/// Split the SNAP header off an LLC frame sent to the SNAP SAP.
fn strip_snap<'a>(
    dest: &DlsapAddr,
    frame: &'a [u8],
) -> Option<(Option<SnapId>, &'a [u8])> {
    if dest.is_ether() || dest.sap != SNAP_SAP {
        return Some((None, frame));
    }

    let snap = SnapId::parse(frame)?;
    Some((Some(snap), &frame[SNAP_HDR_SIZE..]))
}

impl Dlpi {
    fn upcall_probe(&self, ppa: u32, name: &str, sid: u32) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                crate::llc2_provider::dlpi__upcall!(|| (ppa, name, sid));
            } else {
                let _ = name;
            }
        }
        trace_ev!(self.trace(), TraceEvent::Upcall, 0, ppa, sid);
    }

    // ================================================================
    // Bind and unbind confirmation
    // ================================================================

    /// The lower layer has bound, or failed to bind, `sap`.
    pub fn bind_con(&self, ppa: u32, sap: u16, status: Result<(), DlErrno>) {
        self.upcall_probe(ppa, "bind_con", u32::from(sap));
        let Some(mut lists) = self.lists(ppa) else {
            return;
        };

        let found = self.find_link(&lists.chain, |l| {
            l.user.is_some()
                && l.state == DlState::BindPending
                && l.bind.sap == sap
        });
        let Some((id, mut g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, sap);
            return;
        };

        if g.is_closing() {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sap);
            return;
        }

        match status {
            Ok(()) => {
                g.set_state(DlState::Idle);
                if g.bind.is_listener() {
                    g.sid = 0;
                    lists.add_listener(id);
                }
                drop(lists);
                g.send(UpMsg::BindAck {
                    sap,
                    addr: g.bind.addr,
                    max_conind: g.bind.max_conind,
                    xidtest_flg: g.bind.xidtest_flg,
                });
            }

            Err(errno) => {
                drop(lists);
                g.set_state(DlState::Unbound);
                Self::release_conn_mgmt(id, &g);
                Self::error_ack(&g, DlPrim::BindReq, errno, 0);
            }
        }
    }

    /// The lower layer has released `sap`.
    pub fn unbind_con(&self, ppa: u32, sap: u16) {
        self.upcall_probe(ppa, "unbind_con", u32::from(sap));
        let Some(mut lists) = self.lists(ppa) else {
            return;
        };

        let found = self.find_link(&lists.chain, |l| {
            l.user.is_some()
                && l.state == DlState::UnbindPending
                && l.bind.sap == sap
        });
        let Some((id, mut g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, sap);
            return;
        };

        lists.remove_listener(id);
        drop(lists);

        g.bind.sap = 0;
        g.set_state(DlState::Unbound);
        if g.is_closing() {
            g.wait.complete(CloseOutcome::Confirmed);
            drop(g);
            self.wake(id);
        } else {
            Self::ok_ack(&g, DlPrim::UnbindReq);
        }
    }

    // ================================================================
    // Connection establishment
    // ================================================================

    /// A remote station wants session `sid` with local SAP `sap`.
    pub fn connect_ind(
        &self,
        ppa: u32,
        sap: u16,
        calling: DlsapAddr,
        sid: u32,
    ) {
        self.upcall_probe(ppa, "connect_ind", sid);
        let Some(lists) = self.lists(ppa) else {
            return;
        };

        let found = self.find_link(&lists.listen, |l| {
            l.user.is_some()
                && !l.is_closing()
                && l.bind.is_listener()
                && !l.bind.enet
                && l.bind.sap == sap
                && matches!(l.state, DlState::Idle | DlState::InconPending)
        });
        drop(lists);

        let Some((_, mut g)) = found else {
            self.log(
                LogLevel::Warn,
                &format!(
                    "no listener on sap 0x{sap:02X} for session 0x{sid:04X} \
                     from {calling}"
                ),
            );
            if let Err(e) = self.lower.disconnect(ppa, sid) {
                trace_ev!(self.trace(), TraceEvent::Lower, 0, sid, e.unix_errno());
            }
            return;
        };

        if g.knows_ind(sid) {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
            return;
        }

        let max_pending = self.config().max_pending_conind as usize;
        if g.bind.conind == 0 && g.pending.len() >= max_pending {
            let minor = g.minor;
            drop(g);
            self.log(
                LogLevel::Warn,
                &format!(
                    "listener minor {minor} has {max_pending} indications \
                     waiting, refusing session 0x{sid:04X} from {calling}"
                ),
            );
            if let Err(e) = self.lower.disconnect(ppa, sid) {
                trace_ev!(self.trace(), TraceEvent::Lower, minor, sid, e.unix_errno());
            }
            return;
        }

        g.set_state(DlState::InconPending);
        g.sid = sap_id(sid);
        let called = g.bind.addr;

        if g.bind.conind == 0 {
            g.pending.push_back(PendingInd { sid, called, calling });
            return;
        }

        g.bind.conind -= 1;
        g.add_out_ind(sid, calling);
        g.send(UpMsg::ConnectInd { correlation: sid, called, calling });
    }

    /// The lower layer has finished a connect request, or a connect
    /// response, on `link`. A nonzero `rc` is the unix errno of the
    /// failure.
    pub fn connect_con(&self, ppa: u32, link: LinkId, sid: u32, rc: i32) {
        self.upcall_probe(ppa, "connect_con", sid);
        let Ok(slot) = self.reg.slot(link) else {
            return;
        };

        let mut g = slot.link.lock();
        if !g.on_ppa(ppa) || g.user.is_none() {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
            return;
        }

        match g.state {
            DlState::OutconPending => {
                if rc == 0 {
                    g.sid = sid;
                    g.set_state(DlState::DataXfer);
                    g.send(UpMsg::ConnectCon { responder: g.dsap });
                } else {
                    g.sid = 0;
                    g.set_state(DlState::Idle);
                    Self::error_ack(&g, DlPrim::ConnectReq, DlErrno::Syserr, rc);
                }
            }

            DlState::ConnResPending => {
                drop(g);
                self.conn_res_con(ppa, link, sid, rc);
            }

            _ => {
                trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid, g.state.raw());
            }
        }
    }

    /// Complete a connect response: first the accepting link, then the
    /// listener the indication came in on.
    fn conn_res_con(&self, ppa: u32, acc: LinkId, sid: u32, rc: i32) {
        let lsn = match self.lists(ppa) {
            Some(lists) => lists
                .listen
                .iter()
                .copied()
                .find(|l| self.relock(*l).knows_ind(sid)),
            None => None,
        };

        let mut g = self.relock(acc);
        if g.state != DlState::ConnResPending {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
            return;
        }

        if rc == 0 {
            g.sid = sid;
            g.set_state(DlState::DataXfer);
        } else {
            g.sid = 0;
            g.set_state(DlState::Idle);
            Self::error_ack(&g, DlPrim::ConnectRes, DlErrno::Syserr, rc);
        }

        let Some(lsn) = lsn else {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid, rc);
            return;
        };

        if lsn != acc {
            drop(g);
            g = self.relock(lsn);
        }

        if g.is_closing() {
            // Close owns the listener's queues now.
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
            return;
        }

        if !retire_out_ind(&mut g, sid) {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
        }

        if rc == 0 {
            Self::ok_ack(&g, DlPrim::ConnectRes);
        }

        if matches!(g.state, DlState::InconPending | DlState::Idle) {
            release_held(&mut g);
            deliver_pending(&mut g);
        }
    }

    // ================================================================
    // Disconnect
    // ================================================================

    /// The session `sid` has gone away, or a pending connect
    /// indication for it was withdrawn.
    pub fn disconnect_ind(&self, ppa: u32, sid: u32, reason: u32) {
        self.upcall_probe(ppa, "disconnect_ind", sid);
        let Some(lists) = self.lists(ppa) else {
            return;
        };

        let found = self.find_link(&lists.listen, |l| {
            l.knows_ind(sid)
                && matches!(
                    l.state,
                    DlState::InconPending | DlState::Discon9Pending
                )
        });

        if let Some((lsn, mut g)) = found {
            drop(lists);
            self.listener_disconnect_ind(&mut g, sid, reason);
            drop(g);
            self.wake(lsn);

            // A responder may be mid-accept on this session.
            self.abandon_accept(ppa, sid);
            return;
        }

        let found = self.find_link(&lists.chain, |l| {
            l.sid == sid
                && (l.state.is_discon_pending()
                    || matches!(
                        l.state,
                        DlState::DataXfer
                            | DlState::OutconPending
                            | DlState::ConnResPending
                            | DlState::ProvResetPending
                            | DlState::UserResetPending
                    ))
        });
        drop(lists);

        let Some((id, mut g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, sid, reason);
            return;
        };

        // Both sides disconnected at once; the confirmation of ours
        // will never come.
        if g.state.is_discon_pending() {
            drop(g);
            self.disconnect_con(ppa, sid, 0);
            return;
        }

        if matches!(
            g.state,
            DlState::DataXfer
                | DlState::ProvResetPending
                | DlState::UserResetPending
        ) {
            g.rq.clear();
            g.send(UpMsg::Flush(FlushFlags::FLUSHRW));
        }

        let ind = UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason,
            correlation: 0,
        };

        if g.state == DlState::ConnResPending {
            // The remote refused the session we were accepting; the
            // user needs the OK for its response before the
            // disconnect.
            g.sid = 0;
            g.set_state(DlState::Idle);
            // Accepting on the listening stream itself.
            retire_out_ind(&mut g, sid);
            Self::ok_ack(&g, DlPrim::ConnectRes);
            g.send(ind);
            deliver_pending(&mut g);
        } else {
            g.sid = 0;
            g.set_state(DlState::Idle);
            g.send(ind);
        }

        g.wait.complete(CloseOutcome::Confirmed);
        drop(g);
        self.wake(id);
    }

    fn listener_disconnect_ind(
        &self,
        g: &mut Link,
        sid: u32,
        reason: u32,
    ) {
        if g.is_closing() {
            // Close owns the listener's queues now.
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
        } else if g.del_pending_ind(sid) {
            // Never delivered, so the user never hears of it.
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
        } else {
            retire_out_ind(g, sid);
            let ind = UpMsg::DisconnectInd {
                originator: Originator::Provider,
                reason,
                correlation: sid,
            };

            if matches!(g.state, DlState::InconPending | DlState::Idle) {
                g.send(ind);
                deliver_pending(g);
            } else {
                // Hold it until our own disconnect request completes.
                g.dis_ind.push_back(ind);
            }
        }

        g.wait.complete(CloseOutcome::Confirmed);
    }

    /// Return a responder stuck in `DL_CONN_RES_PENDING` on a session
    /// which has been withdrawn from its listener.
    fn abandon_accept(&self, ppa: u32, sid: u32) {
        let Some(lists) = self.lists(ppa) else {
            return;
        };
        let found = self.find_link(&lists.chain, |l| {
            l.sid == sid && l.state == DlState::ConnResPending
        });
        drop(lists);

        if let Some((_, mut g)) = found {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
            g.sid = 0;
            g.set_state(DlState::Idle);
        }
    }

    /// The lower layer has finished a disconnect request. A nonzero
    /// `rc` is the unix errno of the failure.
    pub fn disconnect_con(&self, ppa: u32, sid: u32, rc: i32) {
        self.upcall_probe(ppa, "disconnect_con", sid);
        let Some(lists) = self.lists(ppa) else {
            return;
        };

        let found = self.find_link(&lists.listen, |l| {
            l.state == DlState::Discon9Pending
                && (l.knows_ind(sid) || l.sid == sap_id(sid))
        });

        if let Some((lsn, mut g)) = found {
            drop(lists);
            self.listener_disconnect_con(&mut g, sid, rc);
            drop(g);
            self.wake(lsn);
            return;
        }

        let found = self.find_link(&lists.chain, |l| {
            l.sid == sid && l.state.is_discon_pending()
        });
        drop(lists);

        let Some((id, mut g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, sid, rc);
            return;
        };

        let closing = g.is_closing();
        if rc == 0 {
            if !closing {
                if matches!(
                    g.state,
                    DlState::Discon11Pending
                        | DlState::Discon12Pending
                        | DlState::Discon13Pending
                ) {
                    g.rq.clear();
                    g.send(UpMsg::Flush(FlushFlags::FLUSHRW));
                }
                Self::ok_ack(&g, DlPrim::DisconnectReq);
            }
            g.sid = 0;
            g.set_state(DlState::Idle);
            g.wait.complete(CloseOutcome::Confirmed);
        } else {
            let back = match g.state {
                DlState::Discon8Pending => DlState::OutconPending,
                DlState::Discon9Pending => DlState::InconPending,
                DlState::Discon11Pending => DlState::DataXfer,
                DlState::Discon12Pending => DlState::UserResetPending,
                _ => DlState::ProvResetPending,
            };
            g.set_state(back);
            if closing {
                g.wait.complete(CloseOutcome::Failed);
            } else {
                Self::error_ack(&g, DlPrim::DisconnectReq, DlErrno::Syserr, rc);
            }
        }

        drop(g);
        self.wake(id);
    }

    fn listener_disconnect_con(&self, g: &mut Link, sid: u32, rc: i32) {
        let closing = g.is_closing();

        if rc != 0 {
            g.set_state(DlState::InconPending);
            if closing {
                g.wait.complete(CloseOutcome::Failed);
            } else {
                Self::error_ack(g, DlPrim::DisconnectReq, DlErrno::Syserr, rc);
            }
            return;
        }

        if closing {
            g.wait.complete(CloseOutcome::Confirmed);
            return;
        }

        if !retire_out_ind(g, sid) && !g.del_pending_ind(sid) {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
        }

        if g.bind.conind == g.bind.max_conind {
            g.set_state(DlState::Idle);
        } else {
            g.set_state(DlState::InconPending);
        }

        Self::ok_ack(g, DlPrim::DisconnectReq);
        release_held(g);
        deliver_pending(g);
        g.wait.complete(CloseOutcome::Confirmed);
    }

    // ================================================================
    // Reset
    // ================================================================

    /// The session `sid` is being reset by the remote or by the
    /// lower layer.
    pub fn reset_ind(
        &self,
        ppa: u32,
        sid: u32,
        originator: Originator,
        reason: u32,
    ) {
        self.upcall_probe(ppa, "reset_ind", sid);
        let Some(lists) = self.lists(ppa) else {
            return;
        };
        let found = self.find_link(&lists.chain, |l| {
            l.sid == sid && l.state == DlState::DataXfer
        });
        drop(lists);

        let Some((_, mut g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, sid, reason);
            return;
        };

        g.set_state(DlState::ProvResetPending);
        g.rq.clear();
        g.local_reset = originator == Originator::User;
        g.send(UpMsg::Flush(FlushFlags::FLUSHRW));
        g.send(UpMsg::ResetInd { originator, reason });
    }

    /// The lower layer has finished a reset request or response.
    pub fn reset_con(&self, ppa: u32, sid: u32, rc: i32) {
        self.upcall_probe(ppa, "reset_con", sid);
        let Some(lists) = self.lists(ppa) else {
            return;
        };
        let found = self.find_link(&lists.chain, |l| {
            l.sid == sid
                && matches!(
                    l.state,
                    DlState::UserResetPending | DlState::ResetResPending
                )
        });
        drop(lists);

        let Some((id, mut g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, sid, rc);
            return;
        };

        let resumed = match (g.state, rc) {
            (DlState::UserResetPending, 0) => {
                g.set_state(DlState::DataXfer);
                g.rq.clear();
                g.send(UpMsg::ResetCon);
                g.send(UpMsg::Flush(FlushFlags::FLUSHRW));
                true
            }

            (DlState::UserResetPending, _) => {
                g.set_state(DlState::DataXfer);
                Self::error_ack(&g, DlPrim::ResetReq, DlErrno::Syserr, rc);
                true
            }

            (_, 0) => {
                g.local_reset = false;
                g.set_state(DlState::DataXfer);
                Self::ok_ack(&g, DlPrim::ResetRes);
                true
            }

            (_, _) => {
                g.set_state(DlState::ProvResetPending);
                Self::error_ack(&g, DlPrim::ResetRes, DlErrno::Syserr, rc);
                false
            }
        };
        drop(g);

        if resumed {
            self.write_service(id);
        }
    }

    // ================================================================
    // Inbound connectionless frames
    // ================================================================

    /// A UI frame (or an Ethernet frame when `dest` names an Ethernet
    /// type) has arrived for `dest`.
    pub fn unitdata_ind(
        &self,
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        frame: &[u8],
    ) {
        self.upcall_probe(ppa, "unitdata_ind", u32::from(dest.sap));
        let Some((snap, data)) = strip_snap(&dest, frame) else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, dest.sap, frame.len());
            return;
        };

        let Some(lists) = self.lists(ppa) else {
            return;
        };
        let enet = dest.is_ether();
        let found = self.find_link(&lists.chain, |l| {
            if l.state != DlState::Idle {
                return false;
            }

            if enet {
                l.bind.enet && l.bind.sap == dest.sap
            } else {
                l.bind.is_cldls() && frame_matches(l, &dest, snap)
            }
        });
        drop(lists);

        let Some((_, g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, dest.sap);
            return;
        };

        if !g.can_put() {
            trace_ev!(self.trace(), TraceEvent::NoResource, g.minor, dest.sap);
            return;
        }

        let group = classify(&g, &dest.mac) != AddrClass::Unicast;
        g.send(UpMsg::UnitdataInd { dest, src, group, data: data.to_vec() });
    }

    /// An XID command (`response` clear) or response has arrived.
    pub fn xid_ind(
        &self,
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        frame: &[u8],
        response: bool,
        poll_final: bool,
    ) {
        self.upcall_probe(ppa, "xid_ind", u32::from(dest.sap));
        let found = self.find_xidtest_link(ppa, &dest, frame);
        let Some((g, data)) = found else {
            return;
        };

        g.send(UpMsg::Xid { confirm: response, poll_final, dest, src, data });
    }

    /// A TEST command (`response` clear) or response has arrived.
    pub fn test_ind(
        &self,
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        frame: &[u8],
        response: bool,
        poll_final: bool,
    ) {
        self.upcall_probe(ppa, "test_ind", u32::from(dest.sap));
        let found = self.find_xidtest_link(ppa, &dest, frame);
        let Some((g, data)) = found else {
            return;
        };

        g.send(UpMsg::Test { confirm: response, poll_final, dest, src, data });
    }

    /// A TEST response the lower layer generated on our behalf; only
    /// idle links see it.
    pub fn test_response_ind(
        &self,
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        frame: &[u8],
    ) {
        self.upcall_probe(ppa, "test_response_ind", u32::from(dest.sap));
        let Some((snap, data)) = strip_snap(&dest, frame) else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, dest.sap, frame.len());
            return;
        };

        let Some(lists) = self.lists(ppa) else {
            return;
        };
        let found = self.find_link(&lists.chain, |l| {
            l.state == DlState::Idle && frame_matches(l, &dest, snap)
        });
        drop(lists);

        let Some((_, g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, dest.sap);
            return;
        };

        if !g.can_put() {
            trace_ev!(self.trace(), TraceEvent::NoResource, g.minor, dest.sap);
            return;
        }

        g.send(UpMsg::Test {
            confirm: false,
            poll_final: false,
            dest,
            src,
            data: data.to_vec(),
        });
    }

    /// Find the link an XID or TEST frame is for, returning it locked
    /// along with the frame's payload.
    fn find_xidtest_link<'a>(
        &'a self,
        ppa: u32,
        dest: &DlsapAddr,
        frame: &[u8],
    ) -> Option<(LinkGuard<'a>, Vec<u8>)> {
        let Some((snap, data)) = strip_snap(dest, frame) else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, dest.sap, frame.len());
            return None;
        };

        let lists = self.lists(ppa)?;
        let found = self.find_link(&lists.chain, |l| {
            matches!(l.state, DlState::Idle | DlState::DataXfer)
                && frame_matches(l, dest, snap)
        });
        drop(lists);

        let Some((_, g)) = found else {
            trace_ev!(self.trace(), TraceEvent::Drop, 0, dest.sap);
            return None;
        };

        if !g.can_put() {
            trace_ev!(self.trace(), TraceEvent::NoResource, g.minor, dest.sap);
            return None;
        }

        Some((g, data.to_vec()))
    }

    // ================================================================
    // Adapter management acknowledgements
    // ================================================================

    /// The adapter has answered an enable or disable multicast request
    /// made on `link`.
    pub fn multicast_ack(
        &self,
        ppa: u32,
        link: LinkId,
        addr: MacAddr,
        enable: bool,
        status: Result<(), DlErrno>,
    ) {
        self.upcall_probe(ppa, "multicast_ack", u32::from(enable));
        let Ok(mut g) = self.lock_open(link) else {
            return;
        };
        if !g.on_ppa(ppa) {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, ppa);
            return;
        }

        let prim =
            if enable { DlPrim::EnabmultiReq } else { DlPrim::DisabmultiReq };
        match status {
            Ok(()) => Self::ok_ack(&g, prim),
            Err(errno) => {
                if enable {
                    let _ = g.mcast.remove(&addr);
                }
                Self::error_ack(&g, prim, errno, 0);
            }
        }
    }

    /// The adapter has answered a `DL_SET_PHYS_ADDR_REQ` made on
    /// `link`.
    pub fn set_phys_addr_ack(
        &self,
        ppa: u32,
        link: LinkId,
        addr: MacAddr,
        status: Result<(), DlErrno>,
    ) {
        self.upcall_probe(ppa, "set_phys_addr_ack", 0);
        let Ok(g) = self.lock_open(link) else {
            return;
        };
        let Some(mac) = g.mac.clone().filter(|m| m.ppa == ppa) else {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, ppa);
            return;
        };

        match status {
            Ok(()) => {
                mac.state.lock().addr = addr;
                Self::ok_ack(&g, DlPrim::SetPhysAddrReq);
            }
            Err(errno) => {
                Self::error_ack(&g, DlPrim::SetPhysAddrReq, errno, 0)
            }
        }
    }

    /// The adapter has answered a `DL_GET_STATISTICS_REQ` made on
    /// `link`.
    pub fn get_statistics_ack(&self, ppa: u32, link: LinkId, stats: Vec<u8>) {
        self.upcall_probe(ppa, "get_statistics_ack", stats.len() as u32);
        let Ok(g) = self.lock_open(link) else {
            return;
        };
        if !g.on_ppa(ppa) {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, ppa);
            return;
        }
        g.send(UpMsg::StatisticsAck { stats });
    }
}
