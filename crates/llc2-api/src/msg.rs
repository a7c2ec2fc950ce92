// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Typed DLPI messages.
//!
//! A [`DlReq`] is a primitive sent down a stream by its DLS user; an
//! [`UpMsg`] is anything the provider sends back up, whether a DLPI
//! primitive or one of the STREAMS control messages.

use super::addr::DlsapAddr;
use super::addr::MacAddr;
use super::addr::SnapId;
use super::dlpi::DlErrno;
use super::dlpi::DlPrim;
use super::dlpi::DlState;
use super::dlpi::FlushFlags;
use super::dlpi::MacType;
use super::dlpi::Originator;
use super::dlpi::ServiceMode;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// The contents of a `DL_BIND_REQ`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BindReq {
    /// An LLC SAP, or an Ethernet type when larger than `0xFF`.
    pub sap: u16,
    pub max_conind: u32,
    pub service_mode: ServiceMode,
    pub conn_mgmt: bool,
    pub xidtest_flg: u32,
}

impl BindReq {
    pub fn is_ether(&self) -> bool {
        self.sap > super::dlpi::MAX_LLC_SAP
    }
}

/// A primitive sent downstream by a DLS user.
///
/// Addresses arrive as the raw bytes the user supplied; they are only
/// interpreted once the link's binding says which form to expect.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DlReq {
    Info,
    Attach { ppa: u32 },
    Detach,
    Bind(BindReq),
    Unbind,
    SubsBind { snap: SnapId },
    Unitdata { dest: Vec<u8>, data: Vec<u8> },
    Test { response: bool, poll_final: bool, dest: Vec<u8>, data: Vec<u8> },
    Xid { response: bool, poll_final: bool, dest: Vec<u8>, data: Vec<u8> },
    Connect { dest: Vec<u8> },
    ConnectRes { correlation: u32, token: u32 },
    Token,
    Disconnect { reason: u32, correlation: u32 },
    Reset,
    ResetRes,
    EnabMulti { addr: Vec<u8> },
    DisabMulti { addr: Vec<u8> },
    PhysAddr { addr_type: u32 },
    SetPhysAddr { addr: Vec<u8> },
    GetStatistics,
    PromiscOn { level: u32 },
    PromiscOff { level: u32 },
    /// A well-formed primitive this provider has no handler for in any
    /// state, such as `DL_UDQOS_REQ` or an acknowledgement sent the
    /// wrong way.
    Unsupported(DlPrim),
}

impl DlReq {
    /// The DLPI primitive this request carries. This is the value
    /// echoed back in an OK or error acknowledgement.
    pub fn prim(&self) -> DlPrim {
        match self {
            Self::Info => DlPrim::InfoReq,
            Self::Attach { .. } => DlPrim::AttachReq,
            Self::Detach => DlPrim::DetachReq,
            Self::Bind(_) => DlPrim::BindReq,
            Self::Unbind => DlPrim::UnbindReq,
            Self::SubsBind { .. } => DlPrim::SubsBindReq,
            Self::Unitdata { .. } => DlPrim::UnitdataReq,
            Self::Test { response: false, .. } => DlPrim::TestReq,
            Self::Test { response: true, .. } => DlPrim::TestRes,
            Self::Xid { response: false, .. } => DlPrim::XidReq,
            Self::Xid { response: true, .. } => DlPrim::XidRes,
            Self::Connect { .. } => DlPrim::ConnectReq,
            Self::ConnectRes { .. } => DlPrim::ConnectRes,
            Self::Token => DlPrim::TokenReq,
            Self::Disconnect { .. } => DlPrim::DisconnectReq,
            Self::Reset => DlPrim::ResetReq,
            Self::ResetRes => DlPrim::ResetRes,
            Self::EnabMulti { .. } => DlPrim::EnabmultiReq,
            Self::DisabMulti { .. } => DlPrim::DisabmultiReq,
            Self::PhysAddr { .. } => DlPrim::PhysAddrReq,
            Self::SetPhysAddr { .. } => DlPrim::SetPhysAddrReq,
            Self::GetStatistics => DlPrim::GetStatisticsReq,
            Self::PromiscOn { .. } => DlPrim::PromisconReq,
            Self::PromiscOff { .. } => DlPrim::PromiscoffReq,
            Self::Unsupported(prim) => *prim,
        }
    }
}

/// The contents of a `DL_INFO_ACK`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InfoAck {
    pub max_sdu: u32,
    pub min_sdu: u32,
    pub addr_length: u32,
    pub mac_type: MacType,
    pub current_state: DlState,
    /// Negative when the SAP follows the physical address.
    pub sap_length: i32,
    pub service_mode: ServiceMode,
    pub provider_style: u32,
    pub version: u32,
    pub addr: Option<DlsapAddr>,
    pub brdcst_addr: Option<MacAddr>,
}

/// A message sent upstream to a DLS user.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum UpMsg {
    OkAck {
        prim: DlPrim,
    },
    ErrorAck {
        prim: DlPrim,
        errno: DlErrno,
        unix_errno: i32,
    },
    InfoAck(InfoAck),
    BindAck {
        sap: u16,
        addr: DlsapAddr,
        max_conind: u32,
        xidtest_flg: u32,
    },
    SubsBindAck {
        snap: SnapId,
    },
    TokenAck {
        token: u32,
    },
    PhysAddrAck {
        addr: MacAddr,
    },
    StatisticsAck {
        stats: Vec<u8>,
    },
    ConnectInd {
        correlation: u32,
        called: DlsapAddr,
        calling: DlsapAddr,
    },
    ConnectCon {
        responder: DlsapAddr,
    },
    DisconnectInd {
        originator: Originator,
        reason: u32,
        correlation: u32,
    },
    ResetInd {
        originator: Originator,
        reason: u32,
    },
    ResetCon,
    UnitdataInd {
        dest: DlsapAddr,
        src: DlsapAddr,
        group: bool,
        data: Vec<u8>,
    },
    UderrorInd {
        dest: Vec<u8>,
        errno: DlErrno,
        unix_errno: i32,
    },
    /// `DL_XID_IND`, or `DL_XID_CON` when `confirm` is set.
    Xid {
        confirm: bool,
        poll_final: bool,
        dest: DlsapAddr,
        src: DlsapAddr,
        data: Vec<u8>,
    },
    /// `DL_TEST_IND`, or `DL_TEST_CON` when `confirm` is set.
    Test {
        confirm: bool,
        poll_final: bool,
        dest: DlsapAddr,
        src: DlsapAddr,
        data: Vec<u8>,
    },
    /// An `M_DATA` frame.
    Data(Vec<u8>),
    Flush(FlushFlags),
    /// An `M_ERROR` carrying a unix errno.
    Error(i32),
    Hangup,
    Stop,
    Start,
}

impl UpMsg {
    pub fn ok_ack(prim: DlPrim) -> Self {
        Self::OkAck { prim }
    }

    pub fn error_ack(prim: DlPrim, errno: DlErrno, unix_errno: i32) -> Self {
        Self::ErrorAck { prim, errno, unix_errno }
    }

    /// The DLPI primitive this message carries, if it is a DLPI message
    /// at all.
    pub fn prim(&self) -> Option<DlPrim> {
        let prim = match self {
            Self::OkAck { .. } => DlPrim::OkAck,
            Self::ErrorAck { .. } => DlPrim::ErrorAck,
            Self::InfoAck(_) => DlPrim::InfoAck,
            Self::BindAck { .. } => DlPrim::BindAck,
            Self::SubsBindAck { .. } => DlPrim::SubsBindAck,
            Self::TokenAck { .. } => DlPrim::TokenAck,
            Self::PhysAddrAck { .. } => DlPrim::PhysAddrAck,
            Self::StatisticsAck { .. } => DlPrim::GetStatisticsAck,
            Self::ConnectInd { .. } => DlPrim::ConnectInd,
            Self::ConnectCon { .. } => DlPrim::ConnectCon,
            Self::DisconnectInd { .. } => DlPrim::DisconnectInd,
            Self::ResetInd { .. } => DlPrim::ResetInd,
            Self::ResetCon => DlPrim::ResetCon,
            Self::UnitdataInd { .. } => DlPrim::UnitdataInd,
            Self::UderrorInd { .. } => DlPrim::UderrorInd,
            Self::Xid { confirm: false, .. } => DlPrim::XidInd,
            Self::Xid { confirm: true, .. } => DlPrim::XidCon,
            Self::Test { confirm: false, .. } => DlPrim::TestInd,
            Self::Test { confirm: true, .. } => DlPrim::TestCon,
            Self::Data(_)
            | Self::Flush(_)
            | Self::Error(_)
            | Self::Hangup
            | Self::Stop
            | Self::Start => return None,
        };

        Some(prim)
    }

    /// Is this a high priority message, i.e. one which bypasses flow
    /// control on its way upstream?
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            Self::OkAck { .. }
                | Self::ErrorAck { .. }
                | Self::InfoAck(_)
                | Self::TokenAck { .. }
                | Self::PhysAddrAck { .. }
                | Self::Flush(_)
                | Self::Error(_)
                | Self::Hangup
        )
    }
}
