// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.
//!
//! The harness stands in for both neighbours of the engine: a
//! [`MockLower`] records every request the engine makes of the LLC2
//! layer (and can be told to reject them), and a [`RecordingUser`]
//! records every message the engine sends up a stream. Tests drive
//! upcalls by hand in place of the LLC2 layer.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

use slog::Drain;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

// Let's make our lives easier and pub use a bunch of stuff.
pub use llc2_api::BindReq;
pub use llc2_api::DlErrno;
pub use llc2_api::DlPrim;
pub use llc2_api::DlReq;
pub use llc2_api::DlState;
pub use llc2_api::DlsapAddr;
pub use llc2_api::FlushFlags;
pub use llc2_api::MacAddr;
pub use llc2_api::Originator;
pub use llc2_api::SNAP_SAP;
pub use llc2_api::ServiceMode;
pub use llc2_api::SnapId;
pub use llc2_api::UpMsg;
pub use llc2_dlpi::Dlpi;
pub use llc2_dlpi::DlpiConfig;
pub use llc2_dlpi::engine::DataInd;
pub use llc2_dlpi::engine::DlpiError;
pub use llc2_dlpi::engine::DlsUser;
pub use llc2_dlpi::engine::FlowStatus;
pub use llc2_dlpi::engine::LinkId;
pub use llc2_dlpi::engine::Llc2Lower;
pub use llc2_dlpi::engine::LowerError;
pub use llc2_dlpi::engine::MacConfig;
pub use llc2_dlpi::provider::Providers;
pub use llc2_dlpi::provider::SlogLog;

/// The adapter every harness registers.
pub const PPA: u32 = 0;

/// The adapter's burned-in address.
pub const BIA: MacAddr = MacAddr::from_const([0x02, 0x08, 0x20, 0x0A, 0x0B, 0x0C]);

/// A remote station.
pub fn remote(n: u8, sap: u16) -> DlsapAddr {
    DlsapAddr::new(MacAddr::from_const([0x02, 0x99, 0, 0, 0, n]), sap)
}

/// Build the logger tests hand the engine: terminal output, filtered
/// by `RUST_LOG`, drained asynchronously.
pub fn test_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("unit" => "llc2-dlpi"))
}

// ================================================================
// The lower layer
// ================================================================

/// Which lower-layer request a [`LowerCall`] is.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LowerOp {
    Bind,
    Unbind,
    Unitdata,
    Test,
    Xid,
    Data,
    Connect,
    ConnectRes,
    Disconnect,
    ResetReq,
    ResetRes,
    Xon,
    Multicast,
    SetPhysAddr,
    GetStatistics,
}

/// A request the engine made of the lower layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LowerCall {
    Bind { ppa: u32, link: LinkId, sap: u16, mode: ServiceMode },
    Unbind { ppa: u32, sap: u16 },
    Unitdata {
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        snap: Option<SnapId>,
        data: Vec<u8>,
    },
    Test {
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        response: bool,
        poll_final: bool,
        data: Vec<u8>,
    },
    Xid {
        ppa: u32,
        dest: DlsapAddr,
        src: DlsapAddr,
        response: bool,
        poll_final: bool,
        data: Vec<u8>,
    },
    Data { ppa: u32, sid: u32, frame: Vec<u8> },
    Connect { ppa: u32, link: LinkId, dest: DlsapAddr, src_sap: u16 },
    ConnectRes {
        ppa: u32,
        link: LinkId,
        src: DlsapAddr,
        dest: DlsapAddr,
        sid: u32,
    },
    Disconnect { ppa: u32, sid: u32 },
    ResetReq { ppa: u32, sid: u32 },
    ResetRes { ppa: u32, sid: u32 },
    Xon { ppa: u32, sid: u32 },
    Multicast { ppa: u32, link: LinkId, addr: MacAddr, enable: bool },
    SetPhysAddr { ppa: u32, link: LinkId, addr: MacAddr },
    GetStatistics { ppa: u32, link: LinkId },
}

impl LowerCall {
    pub fn op(&self) -> LowerOp {
        match self {
            Self::Bind { .. } => LowerOp::Bind,
            Self::Unbind { .. } => LowerOp::Unbind,
            Self::Unitdata { .. } => LowerOp::Unitdata,
            Self::Test { .. } => LowerOp::Test,
            Self::Xid { .. } => LowerOp::Xid,
            Self::Data { .. } => LowerOp::Data,
            Self::Connect { .. } => LowerOp::Connect,
            Self::ConnectRes { .. } => LowerOp::ConnectRes,
            Self::Disconnect { .. } => LowerOp::Disconnect,
            Self::ResetReq { .. } => LowerOp::ResetReq,
            Self::ResetRes { .. } => LowerOp::ResetRes,
            Self::Xon { .. } => LowerOp::Xon,
            Self::Multicast { .. } => LowerOp::Multicast,
            Self::SetPhysAddr { .. } => LowerOp::SetPhysAddr,
            Self::GetStatistics { .. } => LowerOp::GetStatistics,
        }
    }
}

/// A lower layer which records what it is asked to do.
#[derive(Default)]
pub struct MockLower {
    calls: Mutex<Vec<LowerCall>>,
    fail: Mutex<HashMap<LowerOp, LowerError>>,
    next_sid: AtomicU32,
}

impl MockLower {
    pub fn new() -> Self {
        Self { next_sid: AtomicU32::new(0x0401), ..Default::default() }
    }

    /// Reject every `op` request with `err` until [`Self::succeed`].
    pub fn fail(&self, op: LowerOp, err: LowerError) {
        self.fail.lock().unwrap().insert(op, err);
    }

    pub fn succeed(&self, op: LowerOp) {
        self.fail.lock().unwrap().remove(&op);
    }

    /// The session id the next connect request is given.
    pub fn set_next_sid(&self, sid: u32) {
        self.next_sid.store(sid, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LowerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<LowerCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// The recorded calls of one kind.
    pub fn calls_of(&self, op: LowerOp) -> Vec<LowerCall> {
        self.calls().into_iter().filter(|c| c.op() == op).collect()
    }

    pub fn count(&self, op: LowerOp) -> usize {
        self.calls_of(op).len()
    }

    /// Poll until at least `n` calls of `op` have been made, for tests
    /// which run close on another thread.
    pub fn wait_for(&self, op: LowerOp, n: usize) -> bool {
        for _ in 0..500 {
            if self.count(op) >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn record(&self, call: LowerCall) -> Result<(), LowerError> {
        let op = call.op();
        self.calls.lock().unwrap().push(call);
        match self.fail.lock().unwrap().get(&op) {
            Some(err) => Err(*err),
            None => Ok(()),
        }
    }
}

impl Llc2Lower for MockLower {
    fn bind(
        &self,
        ppa: u32,
        link: LinkId,
        sap: u16,
        mode: ServiceMode,
    ) -> Result<(), LowerError> {
        self.record(LowerCall::Bind { ppa, link, sap, mode })
    }

    fn unbind(&self, ppa: u32, sap: u16) -> Result<(), LowerError> {
        self.record(LowerCall::Unbind { ppa, sap })
    }

    fn unitdata(
        &self,
        ppa: u32,
        dest: &DlsapAddr,
        src: &DlsapAddr,
        snap: Option<SnapId>,
        data: &[u8],
    ) -> Result<(), LowerError> {
        self.record(LowerCall::Unitdata {
            ppa,
            dest: *dest,
            src: *src,
            snap,
            data: data.to_vec(),
        })
    }

    fn test(
        &self,
        ppa: u32,
        dest: &DlsapAddr,
        src: &DlsapAddr,
        response: bool,
        poll_final: bool,
        data: &[u8],
    ) -> Result<(), LowerError> {
        self.record(LowerCall::Test {
            ppa,
            dest: *dest,
            src: *src,
            response,
            poll_final,
            data: data.to_vec(),
        })
    }

    fn xid(
        &self,
        ppa: u32,
        dest: &DlsapAddr,
        src: &DlsapAddr,
        response: bool,
        poll_final: bool,
        data: &[u8],
    ) -> Result<(), LowerError> {
        self.record(LowerCall::Xid {
            ppa,
            dest: *dest,
            src: *src,
            response,
            poll_final,
            data: data.to_vec(),
        })
    }

    fn data(&self, ppa: u32, sid: u32, frame: &[u8]) -> Result<(), LowerError> {
        self.record(LowerCall::Data { ppa, sid, frame: frame.to_vec() })
    }

    fn connect(
        &self,
        ppa: u32,
        link: LinkId,
        dest: &DlsapAddr,
        src_sap: u16,
    ) -> Result<u32, LowerError> {
        self.record(LowerCall::Connect { ppa, link, dest: *dest, src_sap })?;
        Ok(self.next_sid.fetch_add(1, Ordering::SeqCst))
    }

    fn connect_res(
        &self,
        ppa: u32,
        link: LinkId,
        src: &DlsapAddr,
        dest: &DlsapAddr,
        sid: u32,
    ) -> Result<(), LowerError> {
        self.record(LowerCall::ConnectRes {
            ppa,
            link,
            src: *src,
            dest: *dest,
            sid,
        })
    }

    fn disconnect(&self, ppa: u32, sid: u32) -> Result<(), LowerError> {
        self.record(LowerCall::Disconnect { ppa, sid })
    }

    fn reset_req(&self, ppa: u32, sid: u32) -> Result<(), LowerError> {
        self.record(LowerCall::ResetReq { ppa, sid })
    }

    fn reset_res(&self, ppa: u32, sid: u32) -> Result<(), LowerError> {
        self.record(LowerCall::ResetRes { ppa, sid })
    }

    fn xon(&self, ppa: u32, sid: u32) -> Result<(), LowerError> {
        self.record(LowerCall::Xon { ppa, sid })
    }

    fn multicast(
        &self,
        ppa: u32,
        link: LinkId,
        addr: &MacAddr,
        enable: bool,
    ) -> Result<(), LowerError> {
        self.record(LowerCall::Multicast { ppa, link, addr: *addr, enable })
    }

    fn set_phys_addr(
        &self,
        ppa: u32,
        link: LinkId,
        addr: &MacAddr,
    ) -> Result<(), LowerError> {
        self.record(LowerCall::SetPhysAddr { ppa, link, addr: *addr })
    }

    fn get_statistics(
        &self,
        ppa: u32,
        link: LinkId,
    ) -> Result<(), LowerError> {
        self.record(LowerCall::GetStatistics { ppa, link })
    }
}

// ================================================================
// The DLS user
// ================================================================

/// A stream head which records what it is sent.
pub struct RecordingUser {
    msgs: Mutex<Vec<UpMsg>>,
    can_put: AtomicBool,
}

impl RecordingUser {
    pub fn new() -> Self {
        Self { msgs: Mutex::new(Vec::new()), can_put: AtomicBool::new(true) }
    }

    /// Take everything received so far.
    pub fn take(&self) -> Vec<UpMsg> {
        std::mem::take(&mut *self.msgs.lock().unwrap())
    }

    pub fn msgs(&self) -> Vec<UpMsg> {
        self.msgs.lock().unwrap().clone()
    }

    pub fn set_can_put(&self, can_put: bool) {
        self.can_put.store(can_put, Ordering::SeqCst);
    }
}

impl Default for RecordingUser {
    fn default() -> Self {
        Self::new()
    }
}

impl DlsUser for RecordingUser {
    fn put(&self, msg: UpMsg) {
        self.msgs.lock().unwrap().push(msg);
    }

    fn can_put(&self) -> bool {
        self.can_put.load(Ordering::SeqCst)
    }
}

/// Assert that a user received exactly these messages since it was
/// last drained.
#[macro_export]
macro_rules! expect_msgs {
    ($user:expr, $($msg:expr),* $(,)?) => {
        let got = $user.take();
        let want: Vec<$crate::UpMsg> = vec![$($msg),*];
        assert_eq!(got, want, "unexpected upstream messages");
    };
}

// ================================================================
// The harness
// ================================================================

/// An engine with one initialized Ethernet adapter at [`PPA`].
pub struct Harness {
    pub dlpi: Arc<Dlpi>,
    pub lower: Arc<MockLower>,
}

/// An open stream and the user recording what it is sent.
pub struct Stream {
    pub id: LinkId,
    pub user: Arc<RecordingUser>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DlpiConfig { retry_delay_ms: 1, ..Default::default() })
    }

    pub fn with_config(cfg: DlpiConfig) -> Self {
        let lower = Arc::new(MockLower::new());
        let providers =
            Providers { log: Box::new(SlogLog::new(test_logger())) };
        let dlpi = Dlpi::new(
            cfg,
            Arc::clone(&lower) as Arc<dyn Llc2Lower>,
            providers,
        )
        .unwrap();
        dlpi.register_adapter(PPA, MacConfig::ethernet(BIA)).unwrap();
        dlpi.set_adapter_initialized(PPA, true).unwrap();
        Self { dlpi: Arc::new(dlpi), lower }
    }

    pub fn open(&self) -> Stream {
        let user = Arc::new(RecordingUser::new());
        let id =
            self.dlpi.open(Arc::clone(&user) as Arc<dyn DlsUser>).unwrap();
        Stream { id, user }
    }

    pub fn put(&self, s: &Stream, req: DlReq) {
        self.dlpi.put(s.id, req).unwrap();
    }

    pub fn state(&self, s: &Stream) -> DlState {
        self.dlpi.state(s.id).unwrap()
    }

    /// Open a stream and attach it to [`PPA`].
    pub fn attached(&self) -> Stream {
        let s = self.open();
        self.put(&s, DlReq::Attach { ppa: PPA });
        expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::AttachReq));
        s
    }

    /// Open, attach and bind a stream, confirming the bind as the
    /// lower layer would.
    pub fn bound(&self, sap: u16, mode: ServiceMode, max_conind: u32) -> Stream {
        let s = self.attached();
        self.put(
            &s,
            DlReq::Bind(BindReq {
                sap,
                max_conind,
                service_mode: mode,
                conn_mgmt: false,
                xidtest_flg: 0,
            }),
        );
        assert_eq!(self.state(&s), DlState::BindPending);
        self.dlpi.bind_con(PPA, sap, Ok(()));
        assert_eq!(self.state(&s), DlState::Idle);
        let max_conind =
            if mode == ServiceMode::CODLS { max_conind } else { 0 };
        expect_msgs!(
            s.user,
            UpMsg::BindAck {
                sap,
                addr: DlsapAddr::new(BIA, sap),
                max_conind,
                xidtest_flg: 0,
            }
        );
        s
    }

    /// A connection-mode stream with an established session to `dest`.
    pub fn connected(&self, sap: u16, dest: DlsapAddr, sid: u32) -> Stream {
        let s = self.bound(sap, ServiceMode::CODLS, 0);
        self.lower.set_next_sid(sid);
        self.put(&s, DlReq::Connect { dest: dest.to_bytes() });
        assert_eq!(self.state(&s), DlState::OutconPending);
        self.dlpi.connect_con(PPA, s.id, sid, 0);
        assert_eq!(self.state(&s), DlState::DataXfer);
        expect_msgs!(s.user, UpMsg::ConnectCon { responder: dest });
        s
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
