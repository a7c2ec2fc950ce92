// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The LLC2 link-layer engine below the DLPI provider.

use super::error::LowerError;
use super::link::LinkId;
use llc2_api::DlsapAddr;
use llc2_api::MacAddr;
use llc2_api::ServiceMode;
use llc2_api::SnapId;

/// The requests the DLPI engine makes of the LLC2 layer.
///
/// Every method is called with no engine lock held and may call the
/// engine's upcalls before returning. A request which returns `Ok`
/// and has a confirmation (bind, unbind, connect, connect response,
/// disconnect, reset request and response, and the adapter management
/// requests) completes later through the matching upcall on
/// [`crate::engine::Dlpi`].
pub trait Llc2Lower: Send + Sync {
    fn bind(
        &self,
        ppa: u32,
        link: LinkId,
        sap: u16,
        mode: ServiceMode,
    ) -> Result<(), LowerError>;

    fn unbind(&self, ppa: u32, sap: u16) -> Result<(), LowerError>;

    fn unitdata(
        &self,
        ppa: u32,
        dest: &DlsapAddr,
        src: &DlsapAddr,
        snap: Option<SnapId>,
        data: &[u8],
    ) -> Result<(), LowerError>;

    fn test(
        &self,
        ppa: u32,
        dest: &DlsapAddr,
        src: &DlsapAddr,
        response: bool,
        poll_final: bool,
        data: &[u8],
    ) -> Result<(), LowerError>;

    fn xid(
        &self,
        ppa: u32,
        dest: &DlsapAddr,
        src: &DlsapAddr,
        response: bool,
        poll_final: bool,
        data: &[u8],
    ) -> Result<(), LowerError>;

    /// Send an I-frame on an established session.
    fn data(&self, ppa: u32, sid: u32, frame: &[u8])
    -> Result<(), LowerError>;

    /// Open a session from `src_sap` to `dest`, returning the session
    /// id the lower layer assigned to it.
    fn connect(
        &self,
        ppa: u32,
        link: LinkId,
        dest: &DlsapAddr,
        src_sap: u16,
    ) -> Result<u32, LowerError>;

    /// Accept the incoming session `sid` on `link`.
    fn connect_res(
        &self,
        ppa: u32,
        link: LinkId,
        src: &DlsapAddr,
        dest: &DlsapAddr,
        sid: u32,
    ) -> Result<(), LowerError>;

    fn disconnect(&self, ppa: u32, sid: u32) -> Result<(), LowerError>;

    fn reset_req(&self, ppa: u32, sid: u32) -> Result<(), LowerError>;

    fn reset_res(&self, ppa: u32, sid: u32) -> Result<(), LowerError>;

    /// Clear the local busy condition on a session.
    fn xon(&self, ppa: u32, sid: u32) -> Result<(), LowerError>;

    fn multicast(
        &self,
        ppa: u32,
        link: LinkId,
        addr: &MacAddr,
        enable: bool,
    ) -> Result<(), LowerError>;

    fn set_phys_addr(
        &self,
        ppa: u32,
        link: LinkId,
        addr: &MacAddr,
    ) -> Result<(), LowerError>;

    fn get_statistics(&self, ppa: u32, link: LinkId)
    -> Result<(), LowerError>;
}
