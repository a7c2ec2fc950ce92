// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The DLPI vocabulary: primitives, states, error codes and the
//! assorted constants which travel inside DLPI messages.

use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Generate a `u32`-backed DLPI code enum along with its raw
/// conversions and its `DL_` style display name.
macro_rules! dl_codes {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $val:expr => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Deserialize,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            Serialize,
        )]
        #[repr(u32)]
        pub enum $name {
            $($variant = $val,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $(x if x == $val => Some($name::$variant),)+
                    _ => None,
                }
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self as u32
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let s = match self {
                    $($name::$variant => $text,)+
                };
                write!(f, "{s}")
            }
        }
    };
}

dl_codes! {
    /// A DLPI primitive, as carried in the first word of an M_PROTO or
    /// M_PCPROTO message.
    pub enum DlPrim {
        InfoReq = 0x00 => "DL_INFO_REQ",
        BindReq = 0x01 => "DL_BIND_REQ",
        UnbindReq = 0x02 => "DL_UNBIND_REQ",
        InfoAck = 0x03 => "DL_INFO_ACK",
        BindAck = 0x04 => "DL_BIND_ACK",
        ErrorAck = 0x05 => "DL_ERROR_ACK",
        OkAck = 0x06 => "DL_OK_ACK",
        UnitdataReq = 0x07 => "DL_UNITDATA_REQ",
        UnitdataInd = 0x08 => "DL_UNITDATA_IND",
        UderrorInd = 0x09 => "DL_UDERROR_IND",
        UdqosReq = 0x0a => "DL_UDQOS_REQ",
        AttachReq = 0x0b => "DL_ATTACH_REQ",
        DetachReq = 0x0c => "DL_DETACH_REQ",
        ConnectReq = 0x0d => "DL_CONNECT_REQ",
        ConnectInd = 0x0e => "DL_CONNECT_IND",
        ConnectRes = 0x0f => "DL_CONNECT_RES",
        ConnectCon = 0x10 => "DL_CONNECT_CON",
        TokenReq = 0x11 => "DL_TOKEN_REQ",
        TokenAck = 0x12 => "DL_TOKEN_ACK",
        DisconnectReq = 0x13 => "DL_DISCONNECT_REQ",
        DisconnectInd = 0x14 => "DL_DISCONNECT_IND",
        SubsUnbindReq = 0x15 => "DL_SUBS_UNBIND_REQ",
        ResetReq = 0x17 => "DL_RESET_REQ",
        ResetInd = 0x18 => "DL_RESET_IND",
        ResetRes = 0x19 => "DL_RESET_RES",
        ResetCon = 0x1a => "DL_RESET_CON",
        SubsBindReq = 0x1b => "DL_SUBS_BIND_REQ",
        SubsBindAck = 0x1c => "DL_SUBS_BIND_ACK",
        EnabmultiReq = 0x1d => "DL_ENABMULTI_REQ",
        DisabmultiReq = 0x1e => "DL_DISABMULTI_REQ",
        PromisconReq = 0x1f => "DL_PROMISCON_REQ",
        PromiscoffReq = 0x20 => "DL_PROMISCOFF_REQ",
        DataAckReq = 0x21 => "DL_DATA_ACK_REQ",
        DataAckInd = 0x22 => "DL_DATA_ACK_IND",
        DataAckStatusInd = 0x23 => "DL_DATA_ACK_STATUS_IND",
        ReplyReq = 0x24 => "DL_REPLY_REQ",
        ReplyInd = 0x25 => "DL_REPLY_IND",
        ReplyStatusInd = 0x26 => "DL_REPLY_STATUS_IND",
        ReplyUpdateReq = 0x27 => "DL_REPLY_UPDATE_REQ",
        ReplyUpdateStatusInd = 0x28 => "DL_REPLY_UPDATE_STATUS_IND",
        XidReq = 0x29 => "DL_XID_REQ",
        XidInd = 0x2a => "DL_XID_IND",
        XidRes = 0x2b => "DL_XID_RES",
        XidCon = 0x2c => "DL_XID_CON",
        TestReq = 0x2d => "DL_TEST_REQ",
        TestInd = 0x2e => "DL_TEST_IND",
        TestRes = 0x2f => "DL_TEST_RES",
        TestCon = 0x30 => "DL_TEST_CON",
        PhysAddrReq = 0x31 => "DL_PHYS_ADDR_REQ",
        PhysAddrAck = 0x32 => "DL_PHYS_ADDR_ACK",
        SetPhysAddrReq = 0x33 => "DL_SET_PHYS_ADDR_REQ",
        GetStatisticsReq = 0x34 => "DL_GET_STATISTICS_REQ",
        GetStatisticsAck = 0x35 => "DL_GET_STATISTICS_ACK",
    }
}

dl_codes! {
    /// The DLPI state of a link.
    ///
    /// The numeric values index the per-state handler table and match
    /// the values reported in `DL_INFO_ACK`.
    pub enum DlState {
        Unbound = 0 => "DL_UNBOUND",
        BindPending = 1 => "DL_BIND_PENDING",
        UnbindPending = 2 => "DL_UNBIND_PENDING",
        Idle = 3 => "DL_IDLE",
        Unattached = 4 => "DL_UNATTACHED",
        AttachPending = 5 => "DL_ATTACH_PENDING",
        DetachPending = 6 => "DL_DETACH_PENDING",
        UdqosPending = 7 => "DL_UDQOS_PENDING",
        OutconPending = 8 => "DL_OUTCON_PENDING",
        InconPending = 9 => "DL_INCON_PENDING",
        ConnResPending = 10 => "DL_CONN_RES_PENDING",
        DataXfer = 11 => "DL_DATAXFER",
        UserResetPending = 12 => "DL_USER_RESET_PENDING",
        ProvResetPending = 13 => "DL_PROV_RESET_PENDING",
        ResetResPending = 14 => "DL_RESET_RES_PENDING",
        Discon8Pending = 15 => "DL_DISCON8_PENDING",
        Discon9Pending = 16 => "DL_DISCON9_PENDING",
        Discon11Pending = 17 => "DL_DISCON11_PENDING",
        Discon12Pending = 18 => "DL_DISCON12_PENDING",
        Discon13Pending = 19 => "DL_DISCON13_PENDING",
        SubsBindPending = 20 => "DL_SUBS_BIND_PND",
        SubsUnbindPending = 21 => "DL_SUBS_UNBIND_PND",
    }
}

impl DlState {
    /// The number of states, i.e. the size of a state-indexed table.
    pub const COUNT: usize = 22;

    /// Is this one of the `DISCONx_PENDING` states?
    pub fn is_discon_pending(self) -> bool {
        matches!(
            self,
            Self::Discon8Pending
                | Self::Discon9Pending
                | Self::Discon11Pending
                | Self::Discon12Pending
                | Self::Discon13Pending
        )
    }

    /// Is this a state in which a connection exists, or is being
    /// established or torn down, with the lower layer?
    ///
    /// This relies on the numeric ordering of the states: everything
    /// from `OUTCON_PENDING` up involves a session.
    pub fn has_session(self) -> bool {
        self >= Self::OutconPending
            && self != Self::SubsBindPending
            && self != Self::SubsUnbindPending
    }
}

dl_codes! {
    /// The `dl_errno` value of a `DL_ERROR_ACK` or `DL_UDERROR_IND`.
    pub enum DlErrno {
        BadSap = 0x00 => "DL_BADSAP",
        BadAddr = 0x01 => "DL_BADADDR",
        Access = 0x02 => "DL_ACCESS",
        Outstate = 0x03 => "DL_OUTSTATE",
        Syserr = 0x04 => "DL_SYSERR",
        BadCorr = 0x05 => "DL_BADCORR",
        BadData = 0x06 => "DL_BADDATA",
        Unsupported = 0x07 => "DL_UNSUPPORTED",
        BadPpa = 0x08 => "DL_BADPPA",
        BadPrim = 0x09 => "DL_BADPRIM",
        BadQosParam = 0x0a => "DL_BADQOSPARAM",
        BadQosType = 0x0b => "DL_BADQOSTYPE",
        BadToken = 0x0c => "DL_BADTOKEN",
        Bound = 0x0d => "DL_BOUND",
        InitFailed = 0x0e => "DL_INITFAILED",
        NoAddr = 0x0f => "DL_NOADDR",
        NotInit = 0x10 => "DL_NOTINIT",
        Undeliverable = 0x11 => "DL_UNDELIVERABLE",
        NotSupported = 0x12 => "DL_NOTSUPPORTED",
        TooMany = 0x13 => "DL_TOOMANY",
        NotEnab = 0x14 => "DL_NOTENAB",
        Busy = 0x15 => "DL_BUSY",
        NoAuto = 0x16 => "DL_NOAUTO",
        NoXidAuto = 0x17 => "DL_NOXIDAUTO",
        NoTestAuto = 0x18 => "DL_NOTESTAUTO",
        XidAuto = 0x19 => "DL_XIDAUTO",
        TestAuto = 0x1a => "DL_TESTAUTO",
        Pending = 0x1b => "DL_PENDING",
    }
}

dl_codes! {
    /// The media type of an adapter, as reported in `DL_INFO_ACK`.
    pub enum MacType {
        Csmacd = 0x00 => "DL_CSMACD",
        Tpb = 0x01 => "DL_TPB",
        Tpr = 0x02 => "DL_TPR",
        Metro = 0x03 => "DL_METRO",
        Ether = 0x04 => "DL_ETHER",
        Fddi = 0x08 => "DL_FDDI",
    }
}

dl_codes! {
    /// Who initiated a disconnect or reset.
    pub enum Originator {
        Provider = 0x0700 => "DL_PROVIDER",
        User = 0x0701 => "DL_USER",
    }
}

dl_codes! {
    /// The reason carried in a `DL_DISCONNECT_IND` or
    /// `DL_DISCONNECT_REQ`.
    pub enum DiscReason {
        ConrejDestUnknown = 0x0800 => "DL_CONREJ_DEST_UNKNOWN",
        ConrejDestUnreachPermanent = 0x0801 => "DL_CONREJ_DEST_UNREACH_PERMANENT",
        ConrejDestUnreachTransient = 0x0802 => "DL_CONREJ_DEST_UNREACH_TRANSIENT",
        ConrejQosUnavailPermanent = 0x0803 => "DL_CONREJ_QOS_UNAVAIL_PERMANENT",
        ConrejQosUnavailTransient = 0x0804 => "DL_CONREJ_QOS_UNAVAIL_TRANSIENT",
        ConrejPermanentCond = 0x0805 => "DL_CONREJ_PERMANENT_COND",
        ConrejTransientCond = 0x0806 => "DL_CONREJ_TRANSIENT_COND",
        DiscAbnormalCondition = 0x0807 => "DL_DISC_ABNORMAL_CONDITION",
        DiscNormalCondition = 0x0808 => "DL_DISC_NORMAL_CONDITION",
        DiscPermanentCondition = 0x0809 => "DL_DISC_PERMANENT_CONDITION",
        DiscTransientCondition = 0x080a => "DL_DISC_TRANSIENT_CONDITION",
        DiscUnspecified = 0x080b => "DL_DISC_UNSPECIFIED",
    }
}

dl_codes! {
    /// The reason carried in a `DL_RESET_IND`.
    pub enum ResetReason {
        Flow = 0x0900 => "DL_RESET_FLOW_CONTROL",
        LinkError = 0x0901 => "DL_RESET_LINK_ERROR",
        Resync = 0x0902 => "DL_RESET_RESYNCH",
    }
}

bitflags! {
    /// The DLPI service modes a link can bind with or an adapter can
    /// offer.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
    )]
    pub struct ServiceMode: u32 {
        /// Connection-oriented data link service.
        const CODLS = 0x01;
        /// Connectionless data link service.
        const CLDLS = 0x02;
        /// Acknowledged connectionless data link service.
        const ACLDLS = 0x04;
    }
}

bitflags! {
    /// The `M_FLUSH` flag byte.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
    )]
    pub struct FlushFlags: u8 {
        const FLUSHR = 0x01;
        const FLUSHW = 0x02;
        const FLUSHRW = Self::FLUSHR.bits() | Self::FLUSHW.bits();
    }
}

/// The SAP value reserved for SNAP encapsulation.
pub const SNAP_SAP: u16 = 0xAA;

/// The highest SAP value which still selects an IEEE 802.2 binding.
/// Anything larger is an Ethernet type.
pub const MAX_LLC_SAP: u16 = 0xFF;

/// The portion of a session id which identifies the local SAP.
pub const CON_SAP_MASK: u32 = 0xFF00;

/// The size of an IEEE 802.2 DLSAP address: a MAC plus a one byte SAP.
pub const IEEE_ADDR_SIZE: usize = 7;

/// The size of an Ethernet DLSAP address: a MAC plus a two byte type.
pub const ETHER_ADDR_SIZE: usize = 8;

/// The DLSAP address size assigned on attach to a Token Ring adapter.
pub const TOKEN_ADDR_SIZE: usize = 8;

/// The size of a MAC address.
pub const MAC_ADDR_SIZE: usize = 6;

/// The size of a SNAP header: OUI plus protocol id.
pub const SNAP_HDR_SIZE: usize = 5;

/// Style 2 provider: the PPA is selected with `DL_ATTACH_REQ`.
pub const DL_STYLE2: u32 = 0x0501;

pub const DL_VERSION_2: u32 = 2;

/// The poll/final bit in TEST and XID primitives.
pub const DL_POLL_FINAL: u32 = 0x01;

/// `DL_PHYS_ADDR_REQ` address type: the factory address.
pub const DL_FACT_PHYS_ADDR: u32 = 0x01;

/// `DL_PHYS_ADDR_REQ` address type: the current address.
pub const DL_CURR_PHYS_ADDR: u32 = 0x02;

/// The largest number of multicast addresses a link can enable.
pub const MAX_MULTICAST: usize = 16;

pub const DEFAULT_MAX_SDU: u32 = 1500;
pub const DEFAULT_MIN_SDU: u32 = 1;

/// Unix errno values used in `DL_ERROR_ACK`, `M_ERROR` and open
/// failures.
pub mod errno {
    pub const EINTR: i32 = 4;
    pub const ENXIO: i32 = 6;
    pub const EAGAIN: i32 = 11;
    pub const EINVAL: i32 = 22;
    pub const ENOSR: i32 = 63;
    pub const EPROTO: i32 = 71;
}

/// The SAP-identifying portion of a session id. A listener is keyed by
/// this value so that every session arriving on its SAP finds it.
#[inline]
pub const fn sap_id(sid: u32) -> u32 {
    sid & CON_SAP_MASK
}
