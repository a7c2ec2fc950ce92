// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The connection-mode data path and its flow control.
//!
//! Downstream, I-frames the lower layer cannot take are kept on the
//! link's write queue until [`Dlpi::backenable`]. Upstream, frames the
//! user cannot take are kept on the read queue and the link is marked
//! busy (receiver not ready) until [`Dlpi::read_service`] drains it,
//! at which point the lower layer is told to clear local busy.

use super::Dlpi;
use super::error::DlpiError;
use super::link::LinkGuard;
use super::link::LinkId;
use super::trace::TraceEvent;
use super::trace::trace_ev;
use llc2_api::DlState;
use llc2_api::UpMsg;
use llc2_api::errno::EPROTO;

/// What became of an inbound I-frame.
#[derive(Debug, Eq, PartialEq)]
pub enum DataInd {
    /// Sent up to the user.
    Delivered,
    /// Held on the link's read queue; the link is now busy.
    Queued,
    /// The link is not in a state to take data; the frame is handed
    /// back.
    Rejected(Vec<u8>),
}

/// The answer to the lower layer's "can I send this session more?"
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowStatus {
    Okay,
    Busy,
    /// The link is gone or no longer transferring data.
    State,
}

/// Did the lower layer take the frame?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Sent {
    Done,
    Busy,
}

impl Dlpi {
    /// Process a downstream `M_DATA` frame.
    pub fn put_data(&self, id: LinkId, frame: Vec<u8>) -> Result<(), DlpiError> {
        let mut g = self.lock_open(id)?;

        // Keep frames in order behind anything already queued.
        if !g.wq.is_empty() {
            g.wq.push_back(frame);
            return Ok(());
        }

        let _ = self.data(id, g, frame, false);
        Ok(())
    }

    fn data<'a>(
        &'a self,
        id: LinkId,
        g: LinkGuard<'a>,
        frame: Vec<u8>,
        in_service: bool,
    ) -> Sent {
        match g.state {
            DlState::DataXfer => {}

            // The session is going away or being reset; the user will
            // be told about it separately.
            DlState::Idle | DlState::ProvResetPending => {
                trace_ev!(self.trace(), TraceEvent::Drop, g.minor, frame.len());
                return Sent::Done;
            }

            _ => {
                g.send(UpMsg::Error(EPROTO));
                return Sent::Done;
            }
        }

        let len = frame.len() as u32;
        if len < g.bind.min_sdu || len > g.bind.max_sdu {
            g.send(UpMsg::Error(EPROTO));
            return Sent::Done;
        }

        let (Some(ppa), sid) = (g.ppa(), g.sid) else {
            return Sent::Done;
        };
        drop(g);

        let Err(e) = self.lower.data(ppa, sid, &frame) else {
            return Sent::Done;
        };

        let mut g = self.relock(id);
        trace_ev!(self.trace(), TraceEvent::Lower, g.minor, sid, e.unix_errno());
        if g.state != DlState::DataXfer || g.sid != sid {
            return Sent::Done;
        }

        if in_service {
            g.wq.push_front(frame);
        } else {
            g.wq.push_back(frame);
        }
        Sent::Busy
    }

    /// Push queued downstream frames at the lower layer until it
    /// pushes back.
    pub fn write_service(&self, id: LinkId) {
        loop {
            let mut g = self.relock(id);
            if g.state != DlState::DataXfer {
                return;
            }

            let Some(frame) = g.wq.pop_front() else {
                return;
            };

            if self.data(id, g, frame, true) == Sent::Busy {
                return;
            }
        }
    }

    /// The lower layer can take data again on adapter `ppa`.
    pub fn backenable(&self, ppa: u32) {
        let chain = match self.lists(ppa) {
            Some(lists) => lists.chain.clone(),
            None => return,
        };

        for id in chain {
            self.write_service(id);
        }
    }

    /// The lower layer can take data again on `link`'s session.
    pub fn xon(&self, ppa: u32, link: LinkId) {
        let on_ppa = match self.lock_open(link) {
            Ok(g) => g.on_ppa(ppa),
            Err(_) => false,
        };
        if on_ppa {
            self.write_service(link);
        }
    }

    /// An I-frame has arrived on session `sid` of `link`.
    pub fn data_ind(
        &self,
        ppa: u32,
        link: LinkId,
        sid: u32,
        frame: Vec<u8>,
    ) -> DataInd {
        let Ok(mut g) = self.lock_open(link) else {
            return DataInd::Rejected(frame);
        };

        if !g.on_ppa(ppa)
            || g.state != DlState::DataXfer
            || g.sid != sid
            || g.user.is_none()
        {
            trace_ev!(self.trace(), TraceEvent::Drop, g.minor, sid);
            return DataInd::Rejected(frame);
        }

        if !g.rnr && g.can_put() {
            g.send(UpMsg::Data(frame));
            return DataInd::Delivered;
        }

        g.rq.push_back(UpMsg::Data(frame));
        g.rnr = true;
        DataInd::Queued
    }

    /// May the lower layer deliver more data on session `sid`?
    pub fn can_put(&self, ppa: u32, link: LinkId, sid: u32) -> FlowStatus {
        let Ok(mut g) = self.lock_open(link) else {
            return FlowStatus::State;
        };

        if !g.on_ppa(ppa) || g.state != DlState::DataXfer || g.sid != sid {
            return FlowStatus::State;
        }

        if g.rnr || !g.can_put() {
            g.rnr = true;
            return FlowStatus::Busy;
        }

        FlowStatus::Okay
    }

    /// The user can take data again: drain the read queue and, once it
    /// is empty, let the lower layer resume.
    pub fn read_service(&self, id: LinkId) -> Result<(), DlpiError> {
        let mut g = self.lock_open(id)?;

        while g.can_put() {
            let Some(msg) = g.rq.pop_front() else {
                break;
            };
            g.send(msg);
        }

        if !g.rq.is_empty() || !g.rnr {
            return Ok(());
        }

        g.rnr = false;
        let (Some(ppa), sid) = (g.ppa(), g.sid) else {
            return Ok(());
        };
        let minor = g.minor;
        let xfer = g.state == DlState::DataXfer;
        drop(g);

        if xfer {
            if let Err(e) = self.lower.xon(ppa, sid) {
                trace_ev!(self.trace(), TraceEvent::Lower, minor, sid, e.unix_errno());
            }
        }
        Ok(())
    }

    /// Discard everything queued in either direction on every attached
    /// link, as after a power failure.
    pub fn flush_all(&self) {
        for slot in self.reg.links.iter() {
            let mut g = slot.link.lock();
            if g.mac.is_some() {
                g.rq.clear();
                g.wq.clear();
            }
        }
    }
}
