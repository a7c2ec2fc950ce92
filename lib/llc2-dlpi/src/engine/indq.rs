// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Outstanding connect indications and adapter listen queues.

use super::link::Link;
use super::link::LinkId;
use super::link::OutInd;
use super::registry::PpaLists;
use llc2_api::DlsapAddr;

impl Link {
    /// Record a connect indication delivered upstream. A session id
    /// already outstanding is not added twice.
    pub fn add_out_ind(&mut self, sid: u32, remote: DlsapAddr) {
        if self.find_out_ind(sid).is_none() {
            self.out_ind.push(OutInd { sid, remote });
        }
    }

    pub fn find_out_ind(&self, sid: u32) -> Option<&OutInd> {
        self.out_ind.iter().find(|o| o.sid == sid)
    }

    /// Remove the outstanding indication for `sid`, returning it.
    pub fn del_out_ind(&mut self, sid: u32) -> Option<OutInd> {
        let idx = self.out_ind.iter().position(|o| o.sid == sid)?;
        Some(self.out_ind.remove(idx))
    }

    /// Remove `sid` from the undelivered connect indications.
    pub fn del_pending_ind(&mut self, sid: u32) -> bool {
        match self.pending.iter().position(|p| p.sid == sid) {
            Some(idx) => {
                self.pending.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Does this listener know of session `sid`, delivered or not?
    pub fn knows_ind(&self, sid: u32) -> bool {
        self.find_out_ind(sid).is_some()
            || self.pending.iter().any(|p| p.sid == sid)
    }
}

impl PpaLists {
    /// Add a listener at the head of the listen queue.
    pub fn add_listener(&mut self, id: LinkId) {
        if !self.listen.contains(&id) {
            self.listen.push_front(id);
        }
    }

    /// Remove a listener; absence is not an error.
    pub fn remove_listener(&mut self, id: LinkId) {
        self.listen.retain(|l| *l != id);
    }

    pub fn is_listening(&self, id: LinkId) -> bool {
        self.listen.contains(&id)
    }
}
