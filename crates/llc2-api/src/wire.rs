// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The DLPI wire codec.
//!
//! Every DLPI primitive travels as a control block made of a fixed
//! structure of host-order words, optionally followed by variable
//! length regions (addresses, SNAP ids, statistics) which the fixed
//! part references by offset and length from the start of the block.
//! Frames travel in an accompanying data block. This module is the
//! only place these layouts are known; everything else deals in
//! [`DlReq`] and [`UpMsg`].

use super::addr::DlsapAddr;
use super::addr::MacAddr;
use super::addr::SnapId;
use super::dlpi::DL_POLL_FINAL;
use super::dlpi::DlErrno;
use super::dlpi::DlPrim;
use super::dlpi::DlState;
use super::dlpi::FlushFlags;
use super::dlpi::MacType;
use super::dlpi::Originator;
use super::dlpi::ServiceMode;
use super::dlpi::errno::EPROTO;
use super::msg::BindReq;
use super::msg::DlReq;
use super::msg::InfoAck;
use super::msg::UpMsg;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::mem::size_of;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::NativeEndian;
use zerocopy::byteorder::U32;

type Word = U32<NativeEndian>;

#[inline]
fn w(val: u32) -> Word {
    Word::new(val)
}

/// Declare a fixed DLPI structure made entirely of words.
macro_rules! dl_struct {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Debug,
            FromBytes,
            Immutable,
            IntoBytes,
            KnownLayout,
            Unaligned,
        )]
        #[repr(C)]
        pub struct $name {
            $(pub $field: Word,)+
        }
    };
}

dl_struct!(
    /// The leading word shared by every primitive.
    DlHeader { primitive }
);

dl_struct!(InfoAckWire {
    primitive,
    max_sdu,
    min_sdu,
    addr_length,
    mac_type,
    reserved,
    current_state,
    sap_length,
    service_mode,
    qos_length,
    qos_offset,
    qos_range_length,
    qos_range_offset,
    provider_style,
    addr_offset,
    version,
    brdcst_addr_length,
    brdcst_addr_offset,
    growth,
});

dl_struct!(AttachReqWire { primitive, ppa });

dl_struct!(BindReqWire {
    primitive,
    sap,
    max_conind,
    service_mode,
    conn_mgmt,
    xidtest_flg,
});

dl_struct!(BindAckWire {
    primitive,
    sap,
    addr_length,
    addr_offset,
    max_conind,
    xidtest_flg,
});

dl_struct!(SubsBindReqWire {
    primitive,
    subs_sap_offset,
    subs_sap_length,
    subs_bind_class,
});

dl_struct!(SubsBindAckWire { primitive, subs_sap_offset, subs_sap_length });

dl_struct!(OkAckWire { primitive, correct_primitive });

dl_struct!(ErrorAckWire { primitive, error_primitive, errno, unix_errno });

dl_struct!(
    /// The layout shared by `DL_ENABMULTI_REQ`, `DL_DISABMULTI_REQ`,
    /// `DL_SET_PHYS_ADDR_REQ` and `DL_PHYS_ADDR_ACK`.
    AddrWire { primitive, addr_length, addr_offset }
);

dl_struct!(PhysAddrReqWire { primitive, addr_type });

dl_struct!(StatsAckWire { primitive, stat_length, stat_offset });

dl_struct!(ConnectReqWire {
    primitive,
    dest_addr_length,
    dest_addr_offset,
    qos_length,
    qos_offset,
    growth,
});

dl_struct!(ConnectIndWire {
    primitive,
    correlation,
    called_addr_length,
    called_addr_offset,
    calling_addr_length,
    calling_addr_offset,
    qos_length,
    qos_offset,
    growth,
});

dl_struct!(ConnectResWire {
    primitive,
    correlation,
    resp_token,
    qos_length,
    qos_offset,
    growth,
});

dl_struct!(ConnectConWire {
    primitive,
    resp_addr_length,
    resp_addr_offset,
    qos_length,
    qos_offset,
    growth,
});

dl_struct!(TokenAckWire { primitive, token });

dl_struct!(DisconnectReqWire { primitive, reason, correlation });

dl_struct!(DisconnectIndWire { primitive, originator, reason, correlation });

dl_struct!(ResetIndWire { primitive, originator, reason });

dl_struct!(UnitdataReqWire {
    primitive,
    dest_addr_length,
    dest_addr_offset,
    priority_min,
    priority_max,
});

dl_struct!(UnitdataIndWire {
    primitive,
    dest_addr_length,
    dest_addr_offset,
    src_addr_length,
    src_addr_offset,
    group_address,
});

dl_struct!(UderrorIndWire {
    primitive,
    dest_addr_length,
    dest_addr_offset,
    unix_errno,
    errno,
});

dl_struct!(
    /// `DL_TEST_REQ`, `DL_TEST_RES`, `DL_XID_REQ` and `DL_XID_RES`.
    TestReqWire { primitive, flag, dest_addr_length, dest_addr_offset }
);

dl_struct!(
    /// `DL_TEST_IND`, `DL_TEST_CON`, `DL_XID_IND` and `DL_XID_CON`.
    TestIndWire {
        primitive,
        flag,
        dest_addr_length,
        dest_addr_offset,
        src_addr_length,
        src_addr_offset,
    }
);

dl_struct!(PromiscReqWire { primitive, level });

/// The STREAMS message type a [`WireMsg`] travels as.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MsgType {
    Data,
    Proto,
    PcProto,
    Flush,
    Error,
    Hangup,
    Stop,
    Start,
}

/// A message in its wire form: a control block plus an optional data
/// block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireMsg {
    pub mtype: MsgType,
    pub ctl: Vec<u8>,
    pub data: Vec<u8>,
}

impl WireMsg {
    fn proto(ctl: Vec<u8>) -> Self {
        Self { mtype: MsgType::Proto, ctl, data: Vec::new() }
    }

    fn pcproto(ctl: Vec<u8>) -> Self {
        Self { mtype: MsgType::PcProto, ctl, data: Vec::new() }
    }

    fn with_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }
}

/// A control block which could not be decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireError {
    /// The block is too short to hold a primitive.
    Short,
    /// The primitive is not one DLPI defines.
    UnknownPrim(u32),
    /// The primitive is known but its block is truncated, or one of
    /// its regions lies outside the block.
    Malformed(DlPrim),
}

impl WireError {
    /// The message a stream sends back upstream in response to an
    /// undecodable block. A known primitive is refused with
    /// `DL_BADPRIM`; anything else is a protocol error on the stream.
    pub fn reply(&self) -> UpMsg {
        match self {
            Self::Short | Self::UnknownPrim(_) => UpMsg::Error(EPROTO),
            Self::Malformed(prim) => {
                UpMsg::error_ack(*prim, DlErrno::BadPrim, 0)
            }
        }
    }
}

impl Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Short => write!(f, "control block too short"),
            Self::UnknownPrim(raw) => write!(f, "unknown primitive: {raw:#x}"),
            Self::Malformed(prim) => write!(f, "malformed {prim}"),
        }
    }
}

fn read<T: FromBytes>(ctl: &[u8], prim: DlPrim) -> Result<T, WireError> {
    T::read_from_prefix(ctl)
        .map(|(val, _)| val)
        .map_err(|_| WireError::Malformed(prim))
}

fn region(
    ctl: &[u8],
    prim: DlPrim,
    len: Word,
    off: Word,
) -> Result<&[u8], WireError> {
    let (len, off) = (len.get() as usize, off.get() as usize);
    if len == 0 {
        return Ok(&[]);
    }

    off.checked_add(len)
        .and_then(|end| ctl.get(off..end))
        .ok_or(WireError::Malformed(prim))
}

/// Accumulates the variable regions which follow a fixed structure
/// `T`, handing back the length/offset pair for each.
struct Tail {
    base: usize,
    bytes: Vec<u8>,
}

impl Tail {
    fn new<T>() -> Self {
        Self { base: size_of::<T>(), bytes: Vec::new() }
    }

    fn push(&mut self, region: &[u8]) -> (Word, Word) {
        if region.is_empty() {
            return (w(0), w(0));
        }

        let off = self.base + self.bytes.len();
        self.bytes.extend_from_slice(region);
        (w(region.len() as u32), w(off as u32))
    }

    fn finish<T: IntoBytes + Immutable>(self, hdr: &T) -> Vec<u8> {
        let mut out = hdr.as_bytes().to_vec();
        out.extend_from_slice(&self.bytes);
        out
    }
}

fn fixed<T: IntoBytes + Immutable>(hdr: &T) -> Vec<u8> {
    hdr.as_bytes().to_vec()
}

/// Decode a downstream control block, plus its data block if any, into
/// a request.
pub fn decode_req(ctl: &[u8], data: &[u8]) -> Result<DlReq, WireError> {
    let hdr =
        DlHeader::read_from_prefix(ctl).map_err(|_| WireError::Short)?.0;
    let raw = hdr.primitive.get();
    let prim = DlPrim::from_raw(raw).ok_or(WireError::UnknownPrim(raw))?;

    let req = match prim {
        DlPrim::InfoReq => DlReq::Info,

        DlPrim::AttachReq => {
            let r: AttachReqWire = read(ctl, prim)?;
            DlReq::Attach { ppa: r.ppa.get() }
        }

        DlPrim::DetachReq => DlReq::Detach,

        DlPrim::BindReq => {
            let r: BindReqWire = read(ctl, prim)?;
            let sap = u16::try_from(r.sap.get())
                .map_err(|_| WireError::Malformed(prim))?;
            DlReq::Bind(BindReq {
                sap,
                max_conind: r.max_conind.get(),
                service_mode: ServiceMode::from_bits_retain(
                    r.service_mode.get(),
                ),
                conn_mgmt: r.conn_mgmt.get() != 0,
                xidtest_flg: r.xidtest_flg.get(),
            })
        }

        DlPrim::UnbindReq => DlReq::Unbind,

        DlPrim::SubsBindReq => {
            let r: SubsBindReqWire = read(ctl, prim)?;
            let bytes =
                region(ctl, prim, r.subs_sap_length, r.subs_sap_offset)?;
            let snap =
                SnapId::parse(bytes).ok_or(WireError::Malformed(prim))?;
            DlReq::SubsBind { snap }
        }

        DlPrim::UnitdataReq => {
            let r: UnitdataReqWire = read(ctl, prim)?;
            let dest =
                region(ctl, prim, r.dest_addr_length, r.dest_addr_offset)?;
            DlReq::Unitdata { dest: dest.to_vec(), data: data.to_vec() }
        }

        DlPrim::TestReq
        | DlPrim::TestRes
        | DlPrim::XidReq
        | DlPrim::XidRes => {
            let r: TestReqWire = read(ctl, prim)?;
            let dest = region(ctl, prim, r.dest_addr_length, r.dest_addr_offset)?
                .to_vec();
            let response =
                matches!(prim, DlPrim::TestRes | DlPrim::XidRes);
            let poll_final = r.flag.get() & DL_POLL_FINAL != 0;
            let data = data.to_vec();
            if matches!(prim, DlPrim::TestReq | DlPrim::TestRes) {
                DlReq::Test { response, poll_final, dest, data }
            } else {
                DlReq::Xid { response, poll_final, dest, data }
            }
        }

        DlPrim::ConnectReq => {
            let r: ConnectReqWire = read(ctl, prim)?;
            let dest =
                region(ctl, prim, r.dest_addr_length, r.dest_addr_offset)?;
            DlReq::Connect { dest: dest.to_vec() }
        }

        DlPrim::ConnectRes => {
            let r: ConnectResWire = read(ctl, prim)?;
            DlReq::ConnectRes {
                correlation: r.correlation.get(),
                token: r.resp_token.get(),
            }
        }

        DlPrim::TokenReq => DlReq::Token,

        DlPrim::DisconnectReq => {
            let r: DisconnectReqWire = read(ctl, prim)?;
            DlReq::Disconnect {
                reason: r.reason.get(),
                correlation: r.correlation.get(),
            }
        }

        DlPrim::ResetReq => DlReq::Reset,
        DlPrim::ResetRes => DlReq::ResetRes,

        DlPrim::EnabmultiReq | DlPrim::DisabmultiReq | DlPrim::SetPhysAddrReq => {
            let r: AddrWire = read(ctl, prim)?;
            let addr = region(ctl, prim, r.addr_length, r.addr_offset)?.to_vec();
            match prim {
                DlPrim::EnabmultiReq => DlReq::EnabMulti { addr },
                DlPrim::DisabmultiReq => DlReq::DisabMulti { addr },
                _ => DlReq::SetPhysAddr { addr },
            }
        }

        DlPrim::PhysAddrReq => {
            let r: PhysAddrReqWire = read(ctl, prim)?;
            DlReq::PhysAddr { addr_type: r.addr_type.get() }
        }

        DlPrim::GetStatisticsReq => DlReq::GetStatistics,

        DlPrim::PromisconReq | DlPrim::PromiscoffReq => {
            let r: PromiscReqWire = read(ctl, prim)?;
            let level = r.level.get();
            if prim == DlPrim::PromisconReq {
                DlReq::PromiscOn { level }
            } else {
                DlReq::PromiscOff { level }
            }
        }

        other => DlReq::Unsupported(other),
    };

    Ok(req)
}

/// Encode a request into its wire form. This is what a DLS user does
/// before sending a primitive down its stream.
pub fn encode_req(req: &DlReq) -> WireMsg {
    let prim = w(req.prim().raw());

    match req {
        DlReq::Info
        | DlReq::Detach
        | DlReq::Unbind
        | DlReq::Token
        | DlReq::Reset
        | DlReq::ResetRes
        | DlReq::GetStatistics
        | DlReq::Unsupported(_) => {
            WireMsg::proto(fixed(&DlHeader { primitive: prim }))
        }

        DlReq::Attach { ppa } => {
            WireMsg::proto(fixed(&AttachReqWire { primitive: prim, ppa: w(*ppa) }))
        }

        DlReq::Bind(b) => WireMsg::proto(fixed(&BindReqWire {
            primitive: prim,
            sap: w(u32::from(b.sap)),
            max_conind: w(b.max_conind),
            service_mode: w(b.service_mode.bits()),
            conn_mgmt: w(u32::from(b.conn_mgmt)),
            xidtest_flg: w(b.xidtest_flg),
        })),

        DlReq::SubsBind { snap } => {
            let mut tail = Tail::new::<SubsBindReqWire>();
            let (len, off) = tail.push(&snap.to_bytes());
            WireMsg::proto(tail.finish(&SubsBindReqWire {
                primitive: prim,
                subs_sap_offset: off,
                subs_sap_length: len,
                subs_bind_class: w(0),
            }))
        }

        DlReq::Unitdata { dest, data } => {
            let mut tail = Tail::new::<UnitdataReqWire>();
            let (len, off) = tail.push(dest);
            WireMsg::proto(tail.finish(&UnitdataReqWire {
                primitive: prim,
                dest_addr_length: len,
                dest_addr_offset: off,
                priority_min: w(0),
                priority_max: w(0),
            }))
            .with_data(data)
        }

        DlReq::Test { poll_final, dest, data, .. }
        | DlReq::Xid { poll_final, dest, data, .. } => {
            let mut tail = Tail::new::<TestReqWire>();
            let (len, off) = tail.push(dest);
            let flag = if *poll_final { DL_POLL_FINAL } else { 0 };
            WireMsg::proto(tail.finish(&TestReqWire {
                primitive: prim,
                flag: w(flag),
                dest_addr_length: len,
                dest_addr_offset: off,
            }))
            .with_data(data)
        }

        DlReq::Connect { dest } => {
            let mut tail = Tail::new::<ConnectReqWire>();
            let (len, off) = tail.push(dest);
            WireMsg::proto(tail.finish(&ConnectReqWire {
                primitive: prim,
                dest_addr_length: len,
                dest_addr_offset: off,
                qos_length: w(0),
                qos_offset: w(0),
                growth: w(0),
            }))
        }

        DlReq::ConnectRes { correlation, token } => {
            WireMsg::proto(fixed(&ConnectResWire {
                primitive: prim,
                correlation: w(*correlation),
                resp_token: w(*token),
                qos_length: w(0),
                qos_offset: w(0),
                growth: w(0),
            }))
        }

        DlReq::Disconnect { reason, correlation } => {
            WireMsg::proto(fixed(&DisconnectReqWire {
                primitive: prim,
                reason: w(*reason),
                correlation: w(*correlation),
            }))
        }

        DlReq::EnabMulti { addr }
        | DlReq::DisabMulti { addr }
        | DlReq::SetPhysAddr { addr } => {
            let mut tail = Tail::new::<AddrWire>();
            let (len, off) = tail.push(addr);
            WireMsg::proto(tail.finish(&AddrWire {
                primitive: prim,
                addr_length: len,
                addr_offset: off,
            }))
        }

        DlReq::PhysAddr { addr_type } => WireMsg::proto(fixed(
            &PhysAddrReqWire { primitive: prim, addr_type: w(*addr_type) },
        )),

        DlReq::PromiscOn { level } | DlReq::PromiscOff { level } => {
            WireMsg::proto(fixed(&PromiscReqWire {
                primitive: prim,
                level: w(*level),
            }))
        }
    }
}

fn encode_info_ack(info: &InfoAck) -> Vec<u8> {
    let mut tail = Tail::new::<InfoAckWire>();
    let addr = info.addr.map(|a| a.to_bytes()).unwrap_or_default();
    let (_, addr_off) = tail.push(&addr);
    let brdcst = info.brdcst_addr.map(|b| b.bytes());
    let (brdcst_len, brdcst_off) =
        tail.push(brdcst.as_ref().map(|b| &b[..]).unwrap_or(&[]));

    tail.finish(&InfoAckWire {
        primitive: w(DlPrim::InfoAck.raw()),
        max_sdu: w(info.max_sdu),
        min_sdu: w(info.min_sdu),
        addr_length: w(info.addr_length),
        mac_type: w(info.mac_type.raw()),
        reserved: w(0),
        current_state: w(info.current_state.raw()),
        sap_length: w(info.sap_length as u32),
        service_mode: w(info.service_mode.bits()),
        qos_length: w(0),
        qos_offset: w(0),
        qos_range_length: w(0),
        qos_range_offset: w(0),
        provider_style: w(info.provider_style),
        addr_offset: addr_off,
        version: w(info.version),
        brdcst_addr_length: brdcst_len,
        brdcst_addr_offset: brdcst_off,
        growth: w(0),
    })
}

fn encode_test_ind(
    prim: DlPrim,
    poll_final: bool,
    dest: &DlsapAddr,
    src: &DlsapAddr,
    data: &[u8],
) -> WireMsg {
    let mut tail = Tail::new::<TestIndWire>();
    let (dest_len, dest_off) = tail.push(&dest.to_bytes());
    let (src_len, src_off) = tail.push(&src.to_bytes());
    let flag = if poll_final { DL_POLL_FINAL } else { 0 };
    WireMsg::proto(tail.finish(&TestIndWire {
        primitive: w(prim.raw()),
        flag: w(flag),
        dest_addr_length: dest_len,
        dest_addr_offset: dest_off,
        src_addr_length: src_len,
        src_addr_offset: src_off,
    }))
    .with_data(data)
}

/// Encode an upstream message into its wire form.
pub fn encode_up(msg: &UpMsg) -> WireMsg {
    let prim = msg.prim().map(|p| w(p.raw())).unwrap_or(w(0));

    match msg {
        UpMsg::OkAck { prim: correct } => WireMsg::pcproto(fixed(&OkAckWire {
            primitive: prim,
            correct_primitive: w(correct.raw()),
        })),

        UpMsg::ErrorAck { prim: failed, errno, unix_errno } => {
            WireMsg::pcproto(fixed(&ErrorAckWire {
                primitive: prim,
                error_primitive: w(failed.raw()),
                errno: w(errno.raw()),
                unix_errno: w(*unix_errno as u32),
            }))
        }

        UpMsg::InfoAck(info) => WireMsg::pcproto(encode_info_ack(info)),

        UpMsg::BindAck { sap, addr, max_conind, xidtest_flg } => {
            let mut tail = Tail::new::<BindAckWire>();
            let (len, off) = tail.push(&addr.to_bytes());
            WireMsg::pcproto(tail.finish(&BindAckWire {
                primitive: prim,
                sap: w(u32::from(*sap)),
                addr_length: len,
                addr_offset: off,
                max_conind: w(*max_conind),
                xidtest_flg: w(*xidtest_flg),
            }))
        }

        UpMsg::SubsBindAck { snap } => {
            let mut tail = Tail::new::<SubsBindAckWire>();
            let (len, off) = tail.push(&snap.to_bytes());
            WireMsg::pcproto(tail.finish(&SubsBindAckWire {
                primitive: prim,
                subs_sap_offset: off,
                subs_sap_length: len,
            }))
        }

        UpMsg::TokenAck { token } => WireMsg::pcproto(fixed(&TokenAckWire {
            primitive: prim,
            token: w(*token),
        })),

        UpMsg::PhysAddrAck { addr } => {
            let mut tail = Tail::new::<AddrWire>();
            let (len, off) = tail.push(&addr.bytes());
            WireMsg::pcproto(tail.finish(&AddrWire {
                primitive: prim,
                addr_length: len,
                addr_offset: off,
            }))
        }

        UpMsg::StatisticsAck { stats } => {
            let mut tail = Tail::new::<StatsAckWire>();
            let (len, off) = tail.push(stats);
            WireMsg::pcproto(tail.finish(&StatsAckWire {
                primitive: prim,
                stat_length: len,
                stat_offset: off,
            }))
        }

        UpMsg::ConnectInd { correlation, called, calling } => {
            let mut tail = Tail::new::<ConnectIndWire>();
            let (called_len, called_off) = tail.push(&called.to_bytes());
            let (calling_len, calling_off) = tail.push(&calling.to_bytes());
            WireMsg::proto(tail.finish(&ConnectIndWire {
                primitive: prim,
                correlation: w(*correlation),
                called_addr_length: called_len,
                called_addr_offset: called_off,
                calling_addr_length: calling_len,
                calling_addr_offset: calling_off,
                qos_length: w(0),
                qos_offset: w(0),
                growth: w(0),
            }))
        }

        UpMsg::ConnectCon { responder } => {
            let mut tail = Tail::new::<ConnectConWire>();
            let (len, off) = tail.push(&responder.to_bytes());
            WireMsg::proto(tail.finish(&ConnectConWire {
                primitive: prim,
                resp_addr_length: len,
                resp_addr_offset: off,
                qos_length: w(0),
                qos_offset: w(0),
                growth: w(0),
            }))
        }

        UpMsg::DisconnectInd { originator, reason, correlation } => {
            WireMsg::proto(fixed(&DisconnectIndWire {
                primitive: prim,
                originator: w(originator.raw()),
                reason: w(*reason),
                correlation: w(*correlation),
            }))
        }

        UpMsg::ResetInd { originator, reason } => {
            WireMsg::proto(fixed(&ResetIndWire {
                primitive: prim,
                originator: w(originator.raw()),
                reason: w(*reason),
            }))
        }

        UpMsg::ResetCon => WireMsg::proto(fixed(&DlHeader { primitive: prim })),

        UpMsg::UnitdataInd { dest, src, group, data } => {
            let mut tail = Tail::new::<UnitdataIndWire>();
            let (dest_len, dest_off) = tail.push(&dest.to_bytes());
            let (src_len, src_off) = tail.push(&src.to_bytes());
            WireMsg::proto(tail.finish(&UnitdataIndWire {
                primitive: prim,
                dest_addr_length: dest_len,
                dest_addr_offset: dest_off,
                src_addr_length: src_len,
                src_addr_offset: src_off,
                group_address: w(u32::from(*group)),
            }))
            .with_data(data)
        }

        UpMsg::UderrorInd { dest, errno, unix_errno } => {
            let mut tail = Tail::new::<UderrorIndWire>();
            let (len, off) = tail.push(dest);
            WireMsg::proto(tail.finish(&UderrorIndWire {
                primitive: prim,
                dest_addr_length: len,
                dest_addr_offset: off,
                unix_errno: w(*unix_errno as u32),
                errno: w(errno.raw()),
            }))
        }

        UpMsg::Xid { confirm, poll_final, dest, src, data } => {
            let p = if *confirm { DlPrim::XidCon } else { DlPrim::XidInd };
            encode_test_ind(p, *poll_final, dest, src, data)
        }

        UpMsg::Test { confirm, poll_final, dest, src, data } => {
            let p = if *confirm { DlPrim::TestCon } else { DlPrim::TestInd };
            encode_test_ind(p, *poll_final, dest, src, data)
        }

        UpMsg::Data(frame) => WireMsg {
            mtype: MsgType::Data,
            ctl: Vec::new(),
            data: frame.clone(),
        },

        UpMsg::Flush(flags) => WireMsg {
            mtype: MsgType::Flush,
            ctl: vec![flags.bits()],
            data: Vec::new(),
        },

        // Both the read and write side error bytes carry the errno.
        UpMsg::Error(errno) => WireMsg {
            mtype: MsgType::Error,
            ctl: vec![*errno as u8, *errno as u8],
            data: Vec::new(),
        },

        UpMsg::Hangup => ctl_only(MsgType::Hangup),
        UpMsg::Stop => ctl_only(MsgType::Stop),
        UpMsg::Start => ctl_only(MsgType::Start),
    }
}

fn ctl_only(mtype: MsgType) -> WireMsg {
    WireMsg { mtype, ctl: Vec::new(), data: Vec::new() }
}

/// Read the leading fields of an encoded `DL_INFO_ACK`. This is mostly
/// of use to consumers which only care about the state and limits.
pub fn peek_info_ack(
    ctl: &[u8],
) -> Result<(DlState, MacType, u32, u32), WireError> {
    let prim = DlPrim::InfoAck;
    let r: InfoAckWire = read(ctl, prim)?;
    let state = DlState::from_raw(r.current_state.get())
        .ok_or(WireError::Malformed(prim))?;
    let mac_type = MacType::from_raw(r.mac_type.get())
        .ok_or(WireError::Malformed(prim))?;
    Ok((state, mac_type, r.max_sdu.get(), r.min_sdu.get()))
}

/// Read an encoded `DL_DISCONNECT_IND`.
pub fn peek_disconnect_ind(
    ctl: &[u8],
) -> Result<(Originator, u32, u32), WireError> {
    let prim = DlPrim::DisconnectInd;
    let r: DisconnectIndWire = read(ctl, prim)?;
    let originator = Originator::from_raw(r.originator.get())
        .ok_or(WireError::Malformed(prim))?;
    Ok((originator, r.reason.get(), r.correlation.get()))
}

/// Read the calling address of an encoded `DL_CONNECT_IND`.
pub fn peek_connect_ind(ctl: &[u8]) -> Result<(u32, DlsapAddr), WireError> {
    let prim = DlPrim::ConnectInd;
    let r: ConnectIndWire = read(ctl, prim)?;
    let calling =
        region(ctl, prim, r.calling_addr_length, r.calling_addr_offset)?;
    let calling =
        DlsapAddr::from_bytes(calling).ok_or(WireError::Malformed(prim))?;
    Ok((r.correlation.get(), calling))
}

/// Read the MAC of an encoded `DL_PHYS_ADDR_ACK`.
pub fn peek_phys_addr_ack(ctl: &[u8]) -> Result<MacAddr, WireError> {
    let prim = DlPrim::PhysAddrAck;
    let r: AddrWire = read(ctl, prim)?;
    let bytes = region(ctl, prim, r.addr_length, r.addr_offset)?;
    MacAddr::from_slice(bytes).ok_or(WireError::Malformed(prim))
}

/// The error code and failed primitive of an encoded `DL_ERROR_ACK`.
pub fn peek_error_ack(ctl: &[u8]) -> Result<(DlPrim, DlErrno), WireError> {
    let prim = DlPrim::ErrorAck;
    let r: ErrorAckWire = read(ctl, prim)?;
    let failed = DlPrim::from_raw(r.error_primitive.get())
        .ok_or(WireError::Malformed(prim))?;
    let errno =
        DlErrno::from_raw(r.errno.get()).ok_or(WireError::Malformed(prim))?;
    Ok((failed, errno))
}
