// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Stream close and adapter lifecycle events.
//!
//! Close is the one engine operation that blocks. It unwinds a link
//! step by step: any session is disconnected, any outstanding connect
//! indications are refused, the SAP is unbound, and the record goes
//! back to the free list. Each step that needs the lower layer to
//! confirm sleeps on the link's condvar until an upcall records an
//! outcome, the wait is interrupted, or the configured timeout passes.
//! Whatever the outcome, the request is not repeated. A step the lower
//! layer rejects outright is retried a bounded number of times; after
//! that close carries on regardless.

use super::CloseOutcome;
use super::Dlpi;
use super::error::DlpiError;
use super::error::LowerError;
use super::link::Link;
use super::link::LinkGuard;
use super::link::LinkId;
use super::link::LinkStatus;
use super::trace::TraceEvent;
use super::trace::trace_ev;
use crate::ddi::time::delay;
use crate::provider::LogLevel;
use core::fmt;
use core::fmt::Display;
use llc2_api::DiscReason;
use llc2_api::DlState;
use llc2_api::IEEE_ADDR_SIZE;
use llc2_api::MAX_LLC_SAP;
use llc2_api::SNAP_SAP;
use llc2_api::UpMsg;
use llc2_api::errno::EPROTO;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CloseStep {
    Start,
    Session,
    Listener,
    Unbind,
    Done,
}

impl Display for CloseStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Session => "session",
            Self::Listener => "listener",
            Self::Unbind => "unbind",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// What an adapter event does to the links bound on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Quiesce {
    /// The adapter is shutting down gracefully.
    Shutdown,
    /// The physical link went down.
    LinkDown,
}

impl Dlpi {
    fn close_probe(&self, g: &Link, step: CloseStep) {
        cfg_if! {
            if #[cfg(feature = "usdt")] {
                let (step_s, state_s) = (step.to_string(), g.state.to_string());
                crate::llc2_provider::dlpi__close!(
                    || (g.minor, step_s.as_str(), state_s.as_str())
                );
            }
        }
        trace_ev!(
            self.trace(),
            TraceEvent::Close,
            g.minor,
            step as u32,
            g.state.raw()
        );
    }

    /// Close the stream `id`, blocking until the link has been unwound
    /// and returned to the free list. No message is sent to the
    /// link's user once this returns.
    pub fn close(&self, id: LinkId) -> Result<(), DlpiError> {
        let mut g = self.lock_open(id)?;
        if g.is_closing() {
            return Err(DlpiError::Closing(id));
        }

        g.wait.pending = true;
        g.wait.interrupted = false;
        g.wait.outcome = None;
        g.status = LinkStatus::CloseInProgress;
        g.orig_state = g.state;
        self.close_probe(&g, CloseStep::Start);

        let g = self.close_session(id, g);
        let g = self.close_listener(id, g);
        let g = self.close_unbind(id, g);
        self.close_teardown(id, g);
        Ok(())
    }

    /// Disconnect an established or establishing session.
    fn close_session<'a>(&'a self, id: LinkId, g: LinkGuard<'a>) -> LinkGuard<'a> {
        self.close_probe(&g, CloseStep::Session);
        self.close_retry(
            id,
            g,
            CloseStep::Session,
            DlState::Discon11Pending,
            |l| {
                matches!(
                    l.state,
                    DlState::DataXfer
                        | DlState::OutconPending
                        | DlState::UserResetPending
                        | DlState::ProvResetPending
                )
            },
            |g| self.disconnect_req(id, g, 0),
        )
    }

    /// Refuse every connect indication a listener still holds, then
    /// take it off the listen queue.
    fn close_listener<'a>(
        &'a self,
        id: LinkId,
        mut g: LinkGuard<'a>,
    ) -> LinkGuard<'a> {
        self.close_probe(&g, CloseStep::Listener);
        g.dis_ind.clear();

        let sids: Vec<u32> = g
            .out_ind
            .iter()
            .map(|o| o.sid)
            .chain(g.pending.iter().map(|p| p.sid))
            .collect();

        for sid in sids {
            if g.state == DlState::Unattached {
                break;
            }

            g = self.close_retry(
                id,
                g,
                CloseStep::Listener,
                DlState::Discon9Pending,
                |l| l.knows_ind(sid),
                |mut g| {
                    if g.state != DlState::InconPending {
                        g.set_state(DlState::InconPending);
                    }
                    self.disconnect_req(id, g, sid)
                },
            );

            let _ = g.del_out_ind(sid);
            g.del_pending_ind(sid);
        }

        let Some(ppa) = g.ppa() else {
            return g;
        };
        drop(g);

        if let Some(mut lists) = self.lists(ppa) {
            lists.remove_listener(id);
        }
        self.relock(id)
    }

    fn close_unbind<'a>(&'a self, id: LinkId, g: LinkGuard<'a>) -> LinkGuard<'a> {
        self.close_probe(&g, CloseStep::Unbind);
        if matches!(g.orig_state, DlState::Unattached | DlState::Unbound) {
            return g;
        }

        self.close_retry(
            id,
            g,
            CloseStep::Unbind,
            DlState::UnbindPending,
            Link::is_bound,
            |g| self.unbind_req(id, g),
        )
    }

    fn close_teardown(&self, id: LinkId, mut g: LinkGuard<'_>) {
        self.close_probe(&g, CloseStep::Done);
        g.user = None;
        Self::release_conn_mgmt(id, &g);
        let ppa = g.ppa();
        let minor = g.minor;
        g.reset();
        // Still closing until the record is back on the free list.
        g.wait.pending = true;
        drop(g);

        let mut global = self.reg.global.lock();
        let lists = ppa.and_then(|p| self.lists(p));
        let mut g = self.relock(id);

        if let Some(mut lists) = lists {
            lists.chain.retain(|l| *l != id);
            lists.remove_listener(id);
        }
        global.master.retain(|l| *l != id);

        g.mac = None;
        g.wait.pending = false;
        g.status = LinkStatus::Closed;
        self.reg.free_minor(minor);
        global.free.push_back(id);
    }

    /// Run `op` while `want` holds, then wait for the accepted request
    /// to be confirmed. A rejected request parks the link in `fake`
    /// for the retry delay so that nothing else acts on it meanwhile.
    fn close_retry<'a>(
        &'a self,
        id: LinkId,
        mut g: LinkGuard<'a>,
        step: CloseStep,
        fake: DlState,
        mut want: impl FnMut(&Link) -> bool,
        mut op: impl FnMut(
            LinkGuard<'a>,
        ) -> (LinkGuard<'a>, Result<(), LowerError>),
    ) -> LinkGuard<'a> {
        let mut tries = 0;

        while want(&g) {
            if tries == self.config().close_retries {
                self.log(
                    LogLevel::Warn,
                    &format!(
                        "close of {id}: {step} not confirmed after {tries} tries"
                    ),
                );
                break;
            }
            tries += 1;

            g.wait.outcome = None;
            let (ng, res) = op(g);
            g = ng;

            // An accepted request is never sent again, however its
            // wait ends.
            if res.is_ok() {
                g = self.close_wait(id, g);
                if g.wait.outcome == Some(CloseOutcome::Failed) {
                    self.log(
                        LogLevel::Warn,
                        &format!("close of {id}: {step} failed, carrying on"),
                    );
                }
                break;
            }

            let prev = g.state;
            g.set_state(fake);
            drop(g);
            delay(self.config().retry_delay_ms);
            g = self.relock(id);
            if g.state == fake {
                g.set_state(prev);
            }
        }

        g
    }

    /// Sleep until the lower layer confirms the request close made.
    fn close_wait<'a>(&'a self, id: LinkId, mut g: LinkGuard<'a>) -> LinkGuard<'a> {
        let cv = &self.slot(id).cv;
        let timeout = self.config().close_wait_timeout();
        while g.wait.outcome.is_none() {
            if g.wait.interrupted {
                g.wait.outcome = Some(CloseOutcome::Interrupted);
                break;
            }

            match timeout {
                Some(t) => {
                    let (ng, timed_out) = cv.wait_timeout(g, t);
                    g = ng;
                    if timed_out && g.wait.outcome.is_none() {
                        g.wait.outcome = Some(CloseOutcome::Interrupted);
                    }
                }

                None => g = cv.wait(g),
            }
        }

        if g.wait.outcome == Some(CloseOutcome::Interrupted) {
            trace_ev!(self.trace(), TraceEvent::Close, g.minor, 0, g.state.raw());
        }
        g
    }

    /// Interrupt a close blocked on `id`, as a signal would. The close
    /// carries on without the confirmation it was waiting for.
    pub fn interrupt(&self, id: LinkId) -> Result<(), DlpiError> {
        let mut g = self.lock_open(id)?;
        g.wait.interrupted = true;
        drop(g);
        self.wake(id);
        Ok(())
    }

    // ================================================================
    // Adapter events
    // ================================================================

    /// The adapter at `ppa` is shutting down. With `abort_all` every
    /// link is torn off the adapter and its stream errored; otherwise
    /// sessions are disconnected and low SAP bindings released.
    pub fn shutdown(&self, ppa: u32, abort_all: bool) {
        let Some(mac) = self.reg.adapter(ppa) else {
            return;
        };
        if !mac.is_initialized() {
            return;
        }

        self.log(
            LogLevel::Note,
            &format!(
                "adapter {ppa} {}",
                if abort_all { "aborted" } else { "shutting down" }
            ),
        );

        if abort_all {
            self.abort_links(ppa);
        } else {
            self.quiesce(ppa, Quiesce::Shutdown);
        }
    }

    /// The physical link under `ppa` has gone down.
    pub fn linkdown(&self, ppa: u32) {
        self.log(LogLevel::Warn, &format!("adapter {ppa} link down"));
        self.quiesce(ppa, Quiesce::LinkDown);
    }

    /// The physical link under `ppa` is back: rebind every SNAP stream
    /// that lost its binding.
    pub fn linkup(&self, ppa: u32) {
        self.log(LogLevel::Note, &format!("adapter {ppa} link up"));
        let chain = match self.lists(ppa) {
            Some(lists) => lists.chain.clone(),
            None => return,
        };

        for id in chain {
            let mut g = self.relock(id);
            if g.user.is_none()
                || g.is_closing()
                || !g.on_ppa(ppa)
                || g.state != DlState::Unbound
                || g.bind.sap != SNAP_SAP
            {
                continue;
            }

            let (sap, mode) = (g.bind.sap, g.bind.service_mode);
            g.set_state(DlState::BindPending);
            drop(g);

            let res = self.lower.bind(ppa, id, sap, mode);
            let mut g = self.relock(id);
            match res {
                Ok(()) => g.send(UpMsg::Start),
                Err(e) => {
                    trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sap, e.unix_errno());
                    if g.state == DlState::BindPending {
                        g.set_state(DlState::Unbound);
                        g.send(UpMsg::Error(EPROTO));
                    }
                }
            }
        }
    }

    /// Fail the confirmation a closing link waits for, reporting
    /// whether the link is closing. The outcome is recorded even when
    /// close has yet to sleep, since its request may already be with
    /// the lower layer.
    fn fail_close(&self, id: LinkId, g: &mut Link) -> bool {
        if !g.is_closing() {
            return false;
        }
        g.wait.complete(CloseOutcome::Failed);
        self.wake(id);
        true
    }

    /// Detach every link from the adapter and error its stream.
    fn abort_links(&self, ppa: u32) {
        let mut global = self.reg.global.lock();
        let Some(mut lists) = self.lists(ppa) else {
            return;
        };

        let chain = std::mem::take(&mut lists.chain);
        lists.listen.clear();

        for id in chain {
            let mut g = self.relock(id);
            self.fail_close(id, &mut g);
            Self::release_conn_mgmt(id, &g);

            let wait = g.wait;
            g.reset();
            g.wait = wait;
            g.mac = None;
            g.set_state(DlState::Unattached);
            g.send(UpMsg::Error(EPROTO));
            global.master.push(id);
        }
    }

    /// Tear sessions down and release low SAP bindings.
    fn quiesce(&self, ppa: u32, how: Quiesce) {
        let chain = match self.lists(ppa) {
            Some(lists) => lists.chain.clone(),
            None => return,
        };
        let reason = DiscReason::DiscTransientCondition.raw();

        for id in chain {
            let mut g = self.relock(id);
            if !g.on_ppa(ppa) || g.user.is_none() {
                continue;
            }
            if self.fail_close(id, &mut g) {
                continue;
            }

            // A listener's sessions are the indications it holds. The
            // undelivered ones go first so that none is delivered only
            // to be withdrawn.
            let mut sids: Vec<u32> = g
                .pending
                .iter()
                .map(|p| p.sid)
                .chain(g.out_ind.iter().map(|o| o.sid))
                .collect();
            if g.state.has_session()
                && !matches!(
                    g.state,
                    DlState::InconPending | DlState::Discon9Pending
                )
                && g.sid != 0
            {
                sids.push(g.sid);
            }
            drop(g);

            for sid in sids {
                self.disconnect_ind(ppa, sid, reason);
            }

            // A link the disconnects left idle is released below too.
            let Some(mut lists) = self.lists(ppa) else {
                return;
            };
            let mut g = self.relock(id);
            if !g.on_ppa(ppa) || g.user.is_none() || g.is_closing() {
                continue;
            }

            if g.state == DlState::Idle
                && g.bind.addr_len == IEEE_ADDR_SIZE
                && g.bind.sap < MAX_LLC_SAP
            {
                lists.remove_listener(id);
                Self::release_conn_mgmt(id, &g);
                g.set_state(DlState::Unbound);

                let snap = g.bind.sap == SNAP_SAP;
                g.send(if how == Quiesce::LinkDown && snap {
                    UpMsg::Stop
                } else {
                    UpMsg::Hangup
                });
            }
        }
    }
}
