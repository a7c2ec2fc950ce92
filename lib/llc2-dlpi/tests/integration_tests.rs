// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests.
//!
//! These drive the engine the way a stream head and the LLC2 layer
//! would: primitives go down through `put`, the mock lower layer
//! records what the engine asks of it, and the tests play the lower
//! layer's part by calling the upcalls by hand.

use common::*;
use llc2_api::DL_CURR_PHYS_ADDR;
use llc2_api::DL_FACT_PHYS_ADDR;
use llc2_api::DiscReason;
use llc2_api::errno::EAGAIN;
use llc2_api::errno::EPROTO;
use llc2_dlpi::print::print_links_into;
use llc2_test_utils as common;
use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

#[ctor::ctor]
fn register_usdt() {
    usdt::register_probes().unwrap();
}

const LLC_SAP: u16 = 0x04;

fn bind_req(sap: u16, mode: ServiceMode, max_conind: u32) -> DlReq {
    DlReq::Bind(BindReq {
        sap,
        max_conind,
        service_mode: mode,
        conn_mgmt: false,
        xidtest_flg: 0,
    })
}

fn listener_dump(h: &Harness, s: &Stream) -> (u32, u32, usize, u32) {
    let d = h.dlpi.dump_link(s.id).unwrap();
    (d.max_conind, d.conind, d.outstanding.len(), d.pending)
}

// ================================================================
// Dispatch
// ================================================================

// Every request a state has no business with is refused with OUTSTATE
// and changes nothing.
#[test]
fn unexpected_primitives_are_outstate() {
    let h = Harness::new();

    let s = h.open();
    for req in [bind_req(LLC_SAP, ServiceMode::CODLS, 0), DlReq::Unbind, DlReq::Reset]
    {
        let prim = req.prim();
        h.put(&s, req);
        assert_eq!(h.state(&s), DlState::Unattached);
        expect_msgs!(
            s.user,
            UpMsg::error_ack(prim, DlErrno::Outstate, 0)
        );
    }

    let s = h.attached();
    h.put(&s, DlReq::Connect { dest: remote(1, LLC_SAP).to_bytes() });
    assert_eq!(h.state(&s), DlState::Unbound);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::ConnectReq, DlErrno::Outstate, 0)
    );

    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    for req in [bind_req(0x08, ServiceMode::CODLS, 0), DlReq::ResetRes, DlReq::Unbind]
    {
        let prim = req.prim();
        h.put(&s, req);
        assert_eq!(h.state(&s), DlState::DataXfer);
        expect_msgs!(
            s.user,
            UpMsg::error_ack(prim, DlErrno::Outstate, 0)
        );
    }
}

#[test]
fn info_in_any_state() {
    let h = Harness::new();
    let s = h.open();
    h.put(&s, DlReq::Info);
    let msgs = s.user.take();
    assert!(matches!(
        &msgs[..],
        [UpMsg::InfoAck(ack)] if ack.current_state == DlState::Unattached
    ));

    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    h.put(&s, DlReq::Info);
    match &s.user.take()[..] {
        [UpMsg::InfoAck(ack)] => {
            assert_eq!(ack.current_state, DlState::Idle);
            assert_eq!(ack.addr, Some(DlsapAddr::new(BIA, LLC_SAP)));
            assert_eq!(ack.service_mode, ServiceMode::CLDLS);
        }
        msgs => panic!("expected INFO_ACK, got {msgs:?}"),
    }
}

#[test]
fn no_adapters_only_info() {
    let lower = Arc::new(MockLower::new());
    let dlpi = Dlpi::new(
        DlpiConfig::default(),
        lower as Arc<dyn Llc2Lower>,
        Providers::println(),
    )
    .unwrap();
    let user = Arc::new(RecordingUser::new());
    let id = dlpi.open(Arc::clone(&user) as Arc<dyn DlsUser>).unwrap();

    dlpi.put(id, DlReq::Attach { ppa: 0 }).unwrap();
    expect_msgs!(
        user,
        UpMsg::error_ack(DlPrim::AttachReq, DlErrno::BadPpa, 0)
    );

    dlpi.put(id, DlReq::Info).unwrap();
    assert!(matches!(&user.take()[..], [UpMsg::InfoAck(_)]));
}

#[test]
fn undecodable_primitive() {
    let h = Harness::new();
    let s = h.open();
    h.dlpi.put_proto(s.id, &[0, 0], &[]).unwrap();
    expect_msgs!(s.user, UpMsg::Error(EPROTO));
    assert_eq!(h.state(&s), DlState::Unattached);
}

#[test]
fn open_exhaustion() {
    let h = Harness::with_config(DlpiConfig {
        max_links: 3,
        ..Default::default()
    });

    let a = h.open();
    let _b = h.open();
    let user = Arc::new(RecordingUser::new());
    let err = h.dlpi.open(Arc::clone(&user) as Arc<dyn DlsUser>).unwrap_err();
    assert_eq!(err, DlpiError::NoFreeLink);
    assert_eq!(err.errno(), EAGAIN);

    // Minor 0 is never handed out.
    assert_ne!(h.dlpi.minor(a.id).unwrap(), 0);

    h.dlpi.close(a.id).unwrap();
    assert!(h.dlpi.open(user as Arc<dyn DlsUser>).is_ok());
}

// ================================================================
// Attach and bind
// ================================================================

#[test]
fn attach_detach() {
    let h = Harness::new();
    let s = h.attached();
    assert_eq!(h.state(&s), DlState::Unbound);

    h.put(&s, DlReq::Detach);
    assert_eq!(h.state(&s), DlState::Unattached);
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::DetachReq));

    // In range with nothing registered, and out of range.
    for ppa in [3, 1000] {
        h.put(&s, DlReq::Attach { ppa });
        assert_eq!(h.state(&s), DlState::Unattached);
        expect_msgs!(
            s.user,
            UpMsg::error_ack(DlPrim::AttachReq, DlErrno::BadPpa, 0)
        );
    }

    h.put(&s, DlReq::Attach { ppa: PPA });
    assert_eq!(h.state(&s), DlState::Unbound);
}

#[test]
fn uninitialized_adapter() {
    let h = Harness::new();
    let s = h.attached();
    h.dlpi.set_adapter_initialized(PPA, false).unwrap();

    h.put(&s, bind_req(LLC_SAP, ServiceMode::CODLS, 0));
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::BindReq, DlErrno::NotInit, 0)
    );

    h.put(&s, DlReq::PhysAddr { addr_type: DL_FACT_PHYS_ADDR });
    expect_msgs!(s.user, UpMsg::PhysAddrAck { addr: BIA });
}

#[test]
fn second_listener_refused() {
    let h = Harness::new();
    let _first = h.bound(LLC_SAP, ServiceMode::CODLS, 1);

    let second = h.attached();
    h.put(&second, bind_req(LLC_SAP, ServiceMode::CODLS, 1));
    assert_eq!(h.state(&second), DlState::Unbound);
    expect_msgs!(
        second.user,
        UpMsg::error_ack(DlPrim::BindReq, DlErrno::Bound, 0)
    );

    // A non-listening stream may share the SAP.
    h.put(&second, bind_req(LLC_SAP, ServiceMode::CODLS, 0));
    assert_eq!(h.state(&second), DlState::BindPending);
}

// The newest listener is searched first; unbinding takes it off the
// listen queue but leaves it on the chain.
#[test]
fn listen_queue_order() {
    let h = Harness::new();
    let a = h.bound(0x04, ServiceMode::CODLS, 1);
    let b = h.bound(0x08, ServiceMode::CODLS, 1);
    let c = h.bound(0x0C, ServiceMode::CODLS, 0);

    let (chain, listen) = h.dlpi.queues(PPA).unwrap();
    assert_eq!(chain, vec![a.id, b.id, c.id]);
    assert_eq!(listen, vec![b.id, a.id]);

    h.put(&b, DlReq::Unbind);
    h.dlpi.unbind_con(PPA, 0x08);
    let (chain, listen) = h.dlpi.queues(PPA).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(listen, vec![a.id]);
}

#[test]
fn bind_rejected_below() {
    let h = Harness::new();
    let s = h.attached();

    h.lower.fail(LowerOp::Bind, LowerError::NoResources);
    h.put(&s, bind_req(LLC_SAP, ServiceMode::CODLS, 0));
    assert_eq!(h.state(&s), DlState::Unbound);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::BindReq, DlErrno::Syserr, 63)
    );

    // Or refused asynchronously.
    h.lower.succeed(LowerOp::Bind);
    h.put(&s, bind_req(LLC_SAP, ServiceMode::CODLS, 0));
    h.dlpi.bind_con(PPA, LLC_SAP, Err(DlErrno::BadAddr));
    assert_eq!(h.state(&s), DlState::Unbound);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::BindReq, DlErrno::BadAddr, 0)
    );
}

#[test]
fn unbind_round_trip() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CODLS, 0);

    h.put(&s, DlReq::Unbind);
    assert_eq!(h.state(&s), DlState::UnbindPending);
    assert_eq!(
        h.lower.calls_of(LowerOp::Unbind),
        vec![LowerCall::Unbind { ppa: PPA, sap: LLC_SAP }]
    );

    h.dlpi.unbind_con(PPA, LLC_SAP);
    assert_eq!(h.state(&s), DlState::Unbound);
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::UnbindReq));
}

// An IDLE connectionless stream cannot open a session.
#[test]
fn connect_on_connectionless() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);

    h.put(&s, DlReq::Connect { dest: remote(1, LLC_SAP).to_bytes() });
    assert_eq!(h.state(&s), DlState::Idle);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::ConnectReq, DlErrno::Unsupported, 0)
    );
    assert_eq!(h.lower.count(LowerOp::Connect), 0);
}

// ================================================================
// Connection establishment
// ================================================================

#[test]
fn outgoing_connect() {
    let h = Harness::new();
    let dest = remote(1, LLC_SAP);
    let s = h.connected(LLC_SAP, dest, 0x0411);
    assert_eq!(h.dlpi.dump_link(s.id).unwrap().sid, 0x0411);

    // Only one session to the same remote from a SAP.
    let dup = h.bound(LLC_SAP, ServiceMode::CODLS, 0);
    h.put(&dup, DlReq::Connect { dest: dest.to_bytes() });
    assert_eq!(h.state(&dup), DlState::Idle);
    expect_msgs!(
        dup.user,
        UpMsg::error_ack(DlPrim::ConnectReq, DlErrno::BadAddr, 0)
    );
    assert_eq!(h.dlpi.dump_link(s.id).unwrap().remote, dest);
    assert_eq!(h.dlpi.dump_link(dup.id).unwrap().remote, DlsapAddr::default());

    // Another remote is fine.
    let other = remote(2, LLC_SAP);
    h.put(&dup, DlReq::Connect { dest: other.to_bytes() });
    assert_eq!(h.state(&dup), DlState::OutconPending);
    assert_eq!(h.dlpi.dump_link(dup.id).unwrap().remote, other);
}

// Two streams on one SAP race to connect to the same remote; exactly
// one gets through.
#[test]
fn concurrent_connects_to_one_remote() {
    let dest = remote(1, LLC_SAP);

    for _ in 0..20 {
        let h = Harness::new();
        let a = h.bound(LLC_SAP, ServiceMode::CODLS, 0);
        let b = h.bound(LLC_SAP, ServiceMode::CODLS, 0);
        let barrier = Barrier::new(2);

        thread::scope(|sc| {
            for s in [&a, &b] {
                let (h, barrier) = (&h, &barrier);
                sc.spawn(move || {
                    barrier.wait();
                    h.put(s, DlReq::Connect { dest: dest.to_bytes() });
                });
            }
        });

        let states = [h.state(&a), h.state(&b)];
        let won = states
            .iter()
            .filter(|st| **st == DlState::OutconPending)
            .count();
        assert_eq!(won, 1, "{states:?}");
        assert_eq!(h.lower.count(LowerOp::Connect), 1);

        let lost = if states[0] == DlState::Idle { &a } else { &b };
        expect_msgs!(
            lost.user,
            UpMsg::error_ack(DlPrim::ConnectReq, DlErrno::BadAddr, 0)
        );
    }
}

#[test]
fn outgoing_connect_refused() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CODLS, 0);
    h.lower.set_next_sid(0x0401);

    h.put(&s, DlReq::Connect { dest: remote(1, LLC_SAP).to_bytes() });
    h.dlpi.connect_con(PPA, s.id, 0x0401, 111);
    assert_eq!(h.state(&s), DlState::Idle);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::ConnectReq, DlErrno::Syserr, 111)
    );
}

// A listener with max_conind 2 sees two indications; the third waits
// until a slot frees up.
#[test]
fn listener_queues_excess_indications() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 2);
    let resp = h.bound(LLC_SAP, ServiceMode::CODLS, 0);
    let called = DlsapAddr::new(BIA, LLC_SAP);

    for (sid, n) in [(0x0401, 1), (0x0402, 2), (0x0403, 3)] {
        h.dlpi.connect_ind(PPA, LLC_SAP, remote(n, LLC_SAP), sid);
        let (max, conind, out, _) = listener_dump(&h, &lsn);
        assert!(out as u32 <= max);
        assert_eq!(out as u32 + conind, max);
    }

    assert_eq!(h.state(&lsn), DlState::InconPending);
    expect_msgs!(
        lsn.user,
        UpMsg::ConnectInd {
            correlation: 0x0401,
            called,
            calling: remote(1, LLC_SAP),
        },
        UpMsg::ConnectInd {
            correlation: 0x0402,
            called,
            calling: remote(2, LLC_SAP),
        },
    );
    assert_eq!(listener_dump(&h, &lsn), (2, 0, 2, 1));

    // Hand S1 to the responder stream.
    let token = h.dlpi.minor(resp.id).unwrap();
    h.put(&lsn, DlReq::ConnectRes { correlation: 0x0401, token });
    assert_eq!(h.state(&resp), DlState::ConnResPending);
    assert_eq!(
        h.lower.calls_of(LowerOp::ConnectRes),
        vec![LowerCall::ConnectRes {
            ppa: PPA,
            link: resp.id,
            src: called,
            dest: remote(1, LLC_SAP),
            sid: 0x0401,
        }]
    );

    h.dlpi.connect_con(PPA, resp.id, 0x0401, 0);
    assert_eq!(h.state(&resp), DlState::DataXfer);
    assert_eq!(h.state(&lsn), DlState::InconPending);
    expect_msgs!(
        lsn.user,
        UpMsg::ok_ack(DlPrim::ConnectRes),
        UpMsg::ConnectInd {
            correlation: 0x0403,
            called,
            calling: remote(3, LLC_SAP),
        },
    );
    assert_eq!(listener_dump(&h, &lsn), (2, 0, 2, 0));
    assert!(resp.user.take().is_empty());
}

#[test]
fn accept_on_listener() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    lsn.user.take();

    // Unknown correlation.
    h.put(&lsn, DlReq::ConnectRes { correlation: 0x0499, token: 0 });
    expect_msgs!(
        lsn.user,
        UpMsg::error_ack(DlPrim::ConnectRes, DlErrno::BadCorr, 0)
    );

    h.put(&lsn, DlReq::ConnectRes { correlation: 0x0401, token: 0 });
    assert_eq!(h.state(&lsn), DlState::ConnResPending);
    h.dlpi.connect_con(PPA, lsn.id, 0x0401, 0);
    assert_eq!(h.state(&lsn), DlState::DataXfer);
    expect_msgs!(lsn.user, UpMsg::ok_ack(DlPrim::ConnectRes));
    assert_eq!(listener_dump(&h, &lsn), (1, 1, 0, 0));
}

#[test]
fn bad_token() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    lsn.user.take();

    let own = h.dlpi.minor(lsn.id).unwrap();
    for token in [own, 200] {
        h.put(&lsn, DlReq::ConnectRes { correlation: 0x0401, token });
        expect_msgs!(
            lsn.user,
            UpMsg::error_ack(DlPrim::ConnectRes, DlErrno::BadToken, 0)
        );
    }
    assert_eq!(h.state(&lsn), DlState::InconPending);
}

#[test]
fn no_listener_refuses_session() {
    let h = Harness::new();
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    assert_eq!(
        h.lower.calls(),
        vec![LowerCall::Disconnect { ppa: PPA, sid: 0x0401 }]
    );
}

#[test]
fn withdrawn_indications() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(2, LLC_SAP), 0x0402);
    lsn.user.take();
    assert_eq!(listener_dump(&h, &lsn), (1, 0, 1, 1));

    // The undelivered one goes quietly.
    h.dlpi.disconnect_ind(PPA, 0x0402, 0);
    assert!(lsn.user.take().is_empty());
    assert_eq!(listener_dump(&h, &lsn), (1, 0, 1, 0));

    h.dlpi.disconnect_ind(PPA, 0x0401, 7);
    expect_msgs!(
        lsn.user,
        UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason: 7,
            correlation: 0x0401,
        }
    );
    assert_eq!(h.state(&lsn), DlState::Idle);
    assert_eq!(listener_dump(&h, &lsn), (1, 1, 0, 0));
}

#[test]
fn pending_indications_are_bounded() {
    let h = Harness::with_config(DlpiConfig {
        max_pending_conind: 1,
        retry_delay_ms: 1,
        ..Default::default()
    });
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    let called = DlsapAddr::new(BIA, LLC_SAP);

    for (sid, n) in [(0x0401, 1), (0x0402, 2), (0x0403, 3)] {
        h.dlpi.connect_ind(PPA, LLC_SAP, remote(n, LLC_SAP), sid);
    }
    expect_msgs!(
        lsn.user,
        UpMsg::ConnectInd {
            correlation: 0x0401,
            called,
            calling: remote(1, LLC_SAP),
        }
    );
    assert_eq!(listener_dump(&h, &lsn), (1, 0, 1, 1));
    assert_eq!(
        h.lower.calls_of(LowerOp::Disconnect),
        vec![LowerCall::Disconnect { ppa: PPA, sid: 0x0403 }]
    );

    // Once the queued one moves up there is room again.
    h.dlpi.disconnect_ind(PPA, 0x0401, 0);
    expect_msgs!(
        lsn.user,
        UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason: 0,
            correlation: 0x0401,
        },
        UpMsg::ConnectInd {
            correlation: 0x0402,
            called,
            calling: remote(2, LLC_SAP),
        },
    );
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(4, LLC_SAP), 0x0404);
    assert_eq!(listener_dump(&h, &lsn), (1, 0, 1, 1));
    assert_eq!(h.lower.count(LowerOp::Disconnect), 1);
}

#[test]
fn listener_refuses_indication() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    lsn.user.take();

    h.put(&lsn, DlReq::Disconnect { reason: 0, correlation: 0x0401 });
    assert_eq!(h.state(&lsn), DlState::Discon9Pending);
    assert_eq!(
        h.lower.calls_of(LowerOp::Disconnect),
        vec![LowerCall::Disconnect { ppa: PPA, sid: 0x0401 }]
    );

    h.dlpi.disconnect_con(PPA, 0x0401, 0);
    assert_eq!(h.state(&lsn), DlState::Idle);
    expect_msgs!(lsn.user, UpMsg::ok_ack(DlPrim::DisconnectReq));
    assert_eq!(listener_dump(&h, &lsn), (1, 1, 0, 0));
}

// ================================================================
// Disconnect and reset
// ================================================================

#[test]
fn user_disconnect() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    h.put(&s, DlReq::Disconnect { reason: 0, correlation: 0 });
    assert_eq!(h.state(&s), DlState::Discon11Pending);
    h.dlpi.disconnect_con(PPA, 0x0401, 0);
    assert_eq!(h.state(&s), DlState::Idle);
    expect_msgs!(
        s.user,
        UpMsg::Flush(FlushFlags::FLUSHRW),
        UpMsg::ok_ack(DlPrim::DisconnectReq),
    );
}

#[test]
fn disconnect_rolls_back() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    h.put(&s, DlReq::Disconnect { reason: 0, correlation: 0 });
    h.dlpi.disconnect_con(PPA, 0x0401, 5);
    assert_eq!(h.state(&s), DlState::DataXfer);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::DisconnectReq, DlErrno::Syserr, 5)
    );

    h.lower.fail(LowerOp::Disconnect, LowerError::NoResources);
    h.put(&s, DlReq::Disconnect { reason: 0, correlation: 0 });
    assert_eq!(h.state(&s), DlState::DataXfer);
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::DisconnectReq, DlErrno::Syserr, 63)
    );
}

#[test]
fn remote_disconnect() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    h.dlpi.disconnect_ind(PPA, 0x0401, 3);
    assert_eq!(h.state(&s), DlState::Idle);
    expect_msgs!(
        s.user,
        UpMsg::Flush(FlushFlags::FLUSHRW),
        UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason: 3,
            correlation: 0,
        },
    );
}

#[test]
fn provider_reset() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    h.dlpi.reset_ind(PPA, 0x0401, Originator::Provider, 9);
    assert_eq!(h.state(&s), DlState::ProvResetPending);
    expect_msgs!(
        s.user,
        UpMsg::Flush(FlushFlags::FLUSHRW),
        UpMsg::ResetInd { originator: Originator::Provider, reason: 9 },
    );

    h.put(&s, DlReq::ResetRes);
    assert_eq!(h.state(&s), DlState::ResetResPending);
    assert_eq!(
        h.lower.calls_of(LowerOp::ResetRes),
        vec![LowerCall::ResetRes { ppa: PPA, sid: 0x0401 }]
    );
    assert_eq!(h.lower.count(LowerOp::ResetReq), 0);

    h.dlpi.reset_con(PPA, 0x0401, 0);
    assert_eq!(h.state(&s), DlState::DataXfer);
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::ResetRes));
}

#[test]
fn user_reset() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    h.put(&s, DlReq::Reset);
    assert_eq!(h.state(&s), DlState::UserResetPending);
    assert_eq!(h.lower.count(LowerOp::ResetReq), 1);

    h.dlpi.reset_con(PPA, 0x0401, 0);
    assert_eq!(h.state(&s), DlState::DataXfer);
    expect_msgs!(s.user, UpMsg::ResetCon, UpMsg::Flush(FlushFlags::FLUSHRW));
}

// ================================================================
// Data
// ================================================================

#[test]
fn data_downstream() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    h.dlpi.put_data(s.id, vec![1, 2, 3]).unwrap();
    assert_eq!(
        h.lower.calls_of(LowerOp::Data),
        vec![LowerCall::Data { ppa: PPA, sid: 0x0401, frame: vec![1, 2, 3] }]
    );

    // Too small and too large.
    h.dlpi.put_data(s.id, vec![]).unwrap();
    h.dlpi.put_data(s.id, vec![0; 1501]).unwrap();
    expect_msgs!(s.user, UpMsg::Error(EPROTO), UpMsg::Error(EPROTO));

    // The lower layer pushes back; frames queue in order until it
    // backenables.
    h.lower.take_calls();
    h.lower.fail(LowerOp::Data, LowerError::NoResources);
    h.dlpi.put_data(s.id, vec![4]).unwrap();
    h.dlpi.put_data(s.id, vec![5]).unwrap();
    assert_eq!(h.lower.count(LowerOp::Data), 1);
    assert_eq!(h.dlpi.dump_link(s.id).unwrap().write_queued, 2);

    h.lower.succeed(LowerOp::Data);
    h.lower.take_calls();
    h.dlpi.backenable(PPA);
    assert_eq!(
        h.lower.calls_of(LowerOp::Data),
        vec![
            LowerCall::Data { ppa: PPA, sid: 0x0401, frame: vec![4] },
            LowerCall::Data { ppa: PPA, sid: 0x0401, frame: vec![5] },
        ]
    );
    assert_eq!(h.dlpi.dump_link(s.id).unwrap().write_queued, 0);
}

#[test]
fn data_outside_session() {
    let h = Harness::new();

    let idle = h.bound(LLC_SAP, ServiceMode::CODLS, 0);
    h.dlpi.put_data(idle.id, vec![1]).unwrap();
    assert!(idle.user.take().is_empty());

    let unbound = h.attached();
    h.dlpi.put_data(unbound.id, vec![1]).unwrap();
    expect_msgs!(unbound.user, UpMsg::Error(EPROTO));
    assert_eq!(h.lower.count(LowerOp::Data), 0);
}

#[test]
fn data_upstream_flow_control() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    assert_eq!(
        h.dlpi.data_ind(PPA, s.id, 0x0401, vec![1]),
        DataInd::Delivered
    );
    expect_msgs!(s.user, UpMsg::Data(vec![1]));

    s.user.set_can_put(false);
    assert_eq!(h.dlpi.can_put(PPA, s.id, 0x0401), FlowStatus::Busy);
    assert_eq!(h.dlpi.data_ind(PPA, s.id, 0x0401, vec![2]), DataInd::Queued);
    assert_eq!(h.dlpi.data_ind(PPA, s.id, 0x0401, vec![3]), DataInd::Queued);
    assert!(s.user.take().is_empty());

    // Wrong session.
    assert_eq!(
        h.dlpi.data_ind(PPA, s.id, 0x0499, vec![9]),
        DataInd::Rejected(vec![9])
    );
    assert_eq!(h.dlpi.can_put(PPA, s.id, 0x0499), FlowStatus::State);

    s.user.set_can_put(true);
    h.dlpi.read_service(s.id).unwrap();
    expect_msgs!(s.user, UpMsg::Data(vec![2]), UpMsg::Data(vec![3]));
    assert_eq!(
        h.lower.calls_of(LowerOp::Xon),
        vec![LowerCall::Xon { ppa: PPA, sid: 0x0401 }]
    );
    assert_eq!(h.dlpi.can_put(PPA, s.id, 0x0401), FlowStatus::Okay);
}

#[test]
fn flushes() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    s.user.set_can_put(false);
    h.dlpi.data_ind(PPA, s.id, 0x0401, vec![1]);
    h.lower.fail(LowerOp::Data, LowerError::NoResources);
    h.dlpi.put_data(s.id, vec![2]).unwrap();

    h.dlpi.put_flush(s.id, FlushFlags::FLUSHW).unwrap();
    let d = h.dlpi.dump_link(s.id).unwrap();
    assert_eq!((d.read_queued, d.write_queued), (1, 0));

    h.dlpi.put_flush(s.id, FlushFlags::FLUSHR).unwrap();
    expect_msgs!(s.user, UpMsg::Flush(FlushFlags::FLUSHR));
    assert_eq!(h.dlpi.dump_link(s.id).unwrap().read_queued, 0);

    h.dlpi.data_ind(PPA, s.id, 0x0401, vec![3]);
    h.dlpi.put_data(s.id, vec![4]).unwrap();
    h.dlpi.flush_all();
    let d = h.dlpi.dump_link(s.id).unwrap();
    assert_eq!((d.read_queued, d.write_queued), (0, 0));
}

// ================================================================
// Connectionless
// ================================================================

#[test]
fn unitdata_both_ways() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    let peer = remote(1, LLC_SAP);

    h.put(&s, DlReq::Unitdata { dest: peer.to_bytes(), data: vec![7, 7] });
    assert_eq!(
        h.lower.calls_of(LowerOp::Unitdata),
        vec![LowerCall::Unitdata {
            ppa: PPA,
            dest: peer,
            src: DlsapAddr::new(BIA, LLC_SAP),
            snap: None,
            data: vec![7, 7],
        }]
    );

    h.put(&s, DlReq::Unitdata { dest: vec![1, 2], data: vec![7] });
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::UnitdataReq, DlErrno::BadAddr, 0)
    );

    let me = DlsapAddr::new(BIA, LLC_SAP);
    h.dlpi.unitdata_ind(PPA, me, peer, &[1, 2, 3]);
    expect_msgs!(
        s.user,
        UpMsg::UnitdataInd { dest: me, src: peer, group: false, data: vec![1, 2, 3] }
    );

    // Another SAP is someone else's business.
    h.dlpi.unitdata_ind(PPA, DlsapAddr::new(BIA, 0x08), peer, &[1]);
    assert!(s.user.take().is_empty());
}

// A stream's own frames are those for the adapter's factory address,
// even after the adapter was given another.
#[test]
fn inbound_classified_by_burned_in_address() {
    let h = Harness::new();
    let s = h.attached();
    let new = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x42]);
    h.put(&s, DlReq::SetPhysAddr { addr: new.bytes().to_vec() });
    h.dlpi.set_phys_addr_ack(PPA, s.id, new, Ok(()));
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::SetPhysAddrReq));

    h.put(&s, bind_req(LLC_SAP, ServiceMode::CLDLS, 0));
    h.dlpi.bind_con(PPA, LLC_SAP, Ok(()));
    assert_eq!(h.state(&s), DlState::Idle);
    s.user.take();

    let peer = remote(1, LLC_SAP);
    let factory = DlsapAddr::new(BIA, LLC_SAP);
    let current = DlsapAddr::new(new, LLC_SAP);
    h.dlpi.unitdata_ind(PPA, factory, peer, &[1]);
    h.dlpi.unitdata_ind(PPA, current, peer, &[2]);
    expect_msgs!(
        s.user,
        UpMsg::UnitdataInd { dest: factory, src: peer, group: false, data: vec![1] },
        UpMsg::UnitdataInd { dest: current, src: peer, group: true, data: vec![2] },
    );

    // With screening on, only enabled group addresses get through.
    let grp = MacAddr::from_const([0x01, 0x80, 0xC2, 0, 0, 0x0A]);
    h.put(&s, DlReq::EnabMulti { addr: grp.bytes().to_vec() });
    h.dlpi.multicast_ack(PPA, s.id, grp, true, Ok(()));
    s.user.take();
    h.dlpi.unitdata_ind(PPA, current, peer, &[3]);
    h.dlpi.unitdata_ind(PPA, factory, peer, &[4]);
    expect_msgs!(
        s.user,
        UpMsg::UnitdataInd { dest: factory, src: peer, group: false, data: vec![4] },
    );
}

#[test]
fn snap_subscription() {
    let h = Harness::new();
    let s = h.bound(SNAP_SAP, ServiceMode::CLDLS, 0);
    let snap = SnapId { oui: [0x00, 0x00, 0x0C], ether_type: 0x2000 };

    h.put(&s, DlReq::SubsBind { snap });
    expect_msgs!(s.user, UpMsg::SubsBindAck { snap });

    let peer = remote(1, SNAP_SAP);
    h.put(&s, DlReq::Unitdata { dest: peer.to_bytes(), data: vec![1] });
    assert!(matches!(
        &h.lower.calls_of(LowerOp::Unitdata)[..],
        [LowerCall::Unitdata { snap: Some(got), .. }] if *got == snap
    ));

    let me = DlsapAddr::new(BIA, SNAP_SAP);
    let mut frame = snap.to_bytes().to_vec();
    frame.extend_from_slice(&[0xAB, 0xCD]);
    h.dlpi.unitdata_ind(PPA, me, peer, &frame);
    expect_msgs!(
        s.user,
        UpMsg::UnitdataInd { dest: me, src: peer, group: false, data: vec![0xAB, 0xCD] }
    );

    // Another protocol behind the same SAP.
    let other = SnapId { oui: [0x00, 0x00, 0x0C], ether_type: 0x2004 };
    let mut frame = other.to_bytes().to_vec();
    frame.push(0);
    h.dlpi.unitdata_ind(PPA, me, peer, &frame);
    assert!(s.user.take().is_empty());

    // SUBS_BIND only makes sense on the SNAP SAP.
    let llc = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    h.put(&llc, DlReq::SubsBind { snap });
    expect_msgs!(
        llc.user,
        UpMsg::error_ack(DlPrim::SubsBindReq, DlErrno::Outstate, 0)
    );
}

#[test]
fn xid_and_test() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    let me = DlsapAddr::new(BIA, LLC_SAP);
    let peer = remote(1, LLC_SAP);

    h.put(&s, DlReq::Xid {
        response: false,
        poll_final: true,
        dest: peer.to_bytes(),
        data: vec![0x81],
    });
    assert_eq!(h.lower.count(LowerOp::Xid), 1);

    h.dlpi.xid_ind(PPA, me, peer, &[0x81], true, true);
    expect_msgs!(
        s.user,
        UpMsg::Xid { confirm: true, poll_final: true, dest: me, src: peer, data: vec![0x81] }
    );

    h.dlpi.test_ind(PPA, me, peer, &[1], false, false);
    expect_msgs!(
        s.user,
        UpMsg::Test { confirm: false, poll_final: false, dest: me, src: peer, data: vec![1] }
    );

    h.dlpi.test_response_ind(PPA, me, peer, &[2]);
    expect_msgs!(
        s.user,
        UpMsg::Test { confirm: false, poll_final: false, dest: me, src: peer, data: vec![2] }
    );

    // The user can't take it; the frame is dropped.
    s.user.set_can_put(false);
    h.dlpi.test_ind(PPA, me, peer, &[3], false, false);
    assert!(s.user.take().is_empty());
}

// ================================================================
// Multicast and adapter management
// ================================================================

#[test]
fn multicast_screening() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    let peer = remote(1, LLC_SAP);
    let grp_a = MacAddr::from_const([0x01, 0x80, 0xC2, 0, 0, 0x0A]);
    let grp_b = MacAddr::from_const([0x01, 0x80, 0xC2, 0, 0, 0x0B]);
    let to_a = DlsapAddr::new(grp_a, LLC_SAP);
    let to_b = DlsapAddr::new(grp_b, LLC_SAP);

    // No table: everything not for us is a group frame.
    h.dlpi.unitdata_ind(PPA, to_b, peer, &[1]);
    assert!(matches!(
        &s.user.take()[..],
        [UpMsg::UnitdataInd { group: true, .. }]
    ));

    h.put(&s, DlReq::EnabMulti { addr: grp_a.bytes().to_vec() });
    assert_eq!(
        h.lower.calls_of(LowerOp::Multicast),
        vec![LowerCall::Multicast { ppa: PPA, link: s.id, addr: grp_a, enable: true }]
    );
    h.dlpi.multicast_ack(PPA, s.id, grp_a, true, Ok(()));
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::EnabmultiReq));

    h.dlpi.unitdata_ind(PPA, to_b, peer, &[2]);
    assert!(s.user.take().is_empty());
    h.dlpi.unitdata_ind(PPA, to_a, peer, &[3]);
    assert!(matches!(
        &s.user.take()[..],
        [UpMsg::UnitdataInd { group: true, .. }]
    ));

    // Removing the entry restores the old classification.
    h.put(&s, DlReq::DisabMulti { addr: grp_a.bytes().to_vec() });
    h.dlpi.multicast_ack(PPA, s.id, grp_a, false, Ok(()));
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::DisabmultiReq));
    h.dlpi.unitdata_ind(PPA, to_b, peer, &[4]);
    assert_eq!(s.user.take().len(), 1);

    h.put(&s, DlReq::DisabMulti { addr: grp_a.bytes().to_vec() });
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::DisabmultiReq, DlErrno::NotEnab, 0)
    );
}

#[test]
fn multicast_refused_by_adapter() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    let grp = MacAddr::from_const([0x01, 0x80, 0xC2, 0, 0, 0x0A]);

    h.put(&s, DlReq::EnabMulti { addr: grp.bytes().to_vec() });
    h.dlpi.multicast_ack(PPA, s.id, grp, true, Err(DlErrno::TooMany));
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::EnabmultiReq, DlErrno::TooMany, 0)
    );
    assert!(h.dlpi.dump_link(s.id).unwrap().multicast.is_empty());
}

#[test]
fn token_and_addresses() {
    let h = Harness::new();
    let s = h.attached();
    let minor = h.dlpi.minor(s.id).unwrap();

    h.put(&s, DlReq::Token);
    expect_msgs!(s.user, UpMsg::TokenAck { token: minor });

    let new = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x42]);
    h.put(&s, DlReq::SetPhysAddr { addr: new.bytes().to_vec() });
    assert_eq!(h.lower.count(LowerOp::SetPhysAddr), 1);
    h.dlpi.set_phys_addr_ack(PPA, s.id, new, Ok(()));
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::SetPhysAddrReq));

    h.put(&s, DlReq::PhysAddr { addr_type: DL_CURR_PHYS_ADDR });
    h.put(&s, DlReq::PhysAddr { addr_type: DL_FACT_PHYS_ADDR });
    expect_msgs!(
        s.user,
        UpMsg::PhysAddrAck { addr: new },
        UpMsg::PhysAddrAck { addr: BIA },
    );

    h.put(&s, DlReq::SetPhysAddr { addr: BIA.bytes().to_vec() });
    h.dlpi.set_phys_addr_ack(PPA, s.id, BIA, Ok(()));
    expect_msgs!(s.user, UpMsg::ok_ack(DlPrim::SetPhysAddrReq));

    // Group addresses are refused.
    h.put(&s, DlReq::SetPhysAddr { addr: MacAddr::BROADCAST.bytes().to_vec() });
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::SetPhysAddrReq, DlErrno::BadAddr, 0)
    );

    // Not while anything is bound.
    let _b = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    h.put(&s, DlReq::SetPhysAddr { addr: new.bytes().to_vec() });
    expect_msgs!(
        s.user,
        UpMsg::error_ack(DlPrim::SetPhysAddrReq, DlErrno::Busy, 0)
    );

    h.put(&s, DlReq::GetStatistics);
    h.dlpi.get_statistics_ack(PPA, s.id, vec![1, 2]);
    expect_msgs!(s.user, UpMsg::StatisticsAck { stats: vec![1, 2] });
}

// ================================================================
// Close
// ================================================================

#[test]
fn close_idle() {
    let h = Harness::new();
    let s = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);
    let id = s.id;

    let dlpi = Arc::clone(&h.dlpi);
    let closer = thread::spawn(move || dlpi.close(id));
    assert!(h.lower.wait_for(LowerOp::Unbind, 1));
    h.dlpi.unbind_con(PPA, LLC_SAP);
    closer.join().unwrap().unwrap();

    assert_eq!(h.dlpi.state(id), Err(DlpiError::NotOpen(id)));
    assert!(h.dlpi.dump_links().links.is_empty());
    assert!(s.user.take().is_empty());
}

// A session is disconnected, the SAP unbound, and the link returned
// clean, all while the lower layer answers from another thread.
#[test]
fn close_connected() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    let grp = MacAddr::from_const([0x01, 0x80, 0xC2, 0, 0, 0x0A]);
    h.put(&s, DlReq::EnabMulti { addr: grp.bytes().to_vec() });
    s.user.set_can_put(false);
    h.dlpi.data_ind(PPA, s.id, 0x0401, vec![1]);
    let id = s.id;

    let dlpi = Arc::clone(&h.dlpi);
    let closer = thread::spawn(move || dlpi.close(id));

    assert!(h.lower.wait_for(LowerOp::Disconnect, 1));
    // The remote hangs up at the same moment.
    h.dlpi.disconnect_ind(PPA, 0x0401, 0);
    assert!(h.lower.wait_for(LowerOp::Unbind, 1));
    h.dlpi.unbind_con(PPA, LLC_SAP);
    closer.join().unwrap().unwrap();

    assert!(h.dlpi.dump_links().links.is_empty());

    let (chain, listen) = h.dlpi.queues(PPA).unwrap();
    assert!(!chain.contains(&id) && !listen.contains(&id));

    // The remote's disconnect raced close and was never sent up.
    assert!(s.user.take().is_empty());
    assert_eq!(h.lower.count(LowerOp::Disconnect), 1);
}

#[test]
fn close_listener_refuses_indications() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(2, LLC_SAP), 0x0402);
    let id = lsn.id;

    let dlpi = Arc::clone(&h.dlpi);
    let closer = thread::spawn(move || dlpi.close(id));

    assert!(h.lower.wait_for(LowerOp::Disconnect, 1));
    h.dlpi.disconnect_con(PPA, 0x0401, 0);
    assert!(h.lower.wait_for(LowerOp::Disconnect, 2));
    h.dlpi.disconnect_con(PPA, 0x0402, 0);
    assert!(h.lower.wait_for(LowerOp::Unbind, 1));
    h.dlpi.unbind_con(PPA, LLC_SAP);
    closer.join().unwrap().unwrap();

    assert_eq!(
        h.lower.calls_of(LowerOp::Disconnect),
        vec![
            LowerCall::Disconnect { ppa: PPA, sid: 0x0401 },
            LowerCall::Disconnect { ppa: PPA, sid: 0x0402 },
        ]
    );

    // No listener left to take a new indication.
    h.lower.take_calls();
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(3, LLC_SAP), 0x0403);
    assert_eq!(
        h.lower.calls(),
        vec![LowerCall::Disconnect { ppa: PPA, sid: 0x0403 }]
    );
}

#[test]
fn close_interrupted() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    let id = s.id;

    let dlpi = Arc::clone(&h.dlpi);
    let closer = thread::spawn(move || dlpi.close(id));
    assert!(h.lower.wait_for(LowerOp::Disconnect, 1));
    h.dlpi.interrupt(id).unwrap();
    closer.join().unwrap().unwrap();

    assert_eq!(h.dlpi.state(id), Err(DlpiError::NotOpen(id)));
}

#[test]
fn close_retries_are_bounded() {
    let h = Harness::with_config(DlpiConfig {
        close_retries: 3,
        retry_delay_ms: 1,
        ..Default::default()
    });
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    h.lower.fail(LowerOp::Disconnect, LowerError::NoResources);
    h.lower.fail(LowerOp::Unbind, LowerError::NoResources);

    h.dlpi.close(s.id).unwrap();
    assert_eq!(h.lower.count(LowerOp::Disconnect), 3);
    assert_eq!(h.lower.count(LowerOp::Unbind), 3);
    assert!(h.dlpi.dump_links().links.is_empty());
}

#[test]
fn close_wait_times_out() {
    let h = Harness::with_config(DlpiConfig {
        close_wait_timeout_ms: Some(20),
        retry_delay_ms: 1,
        ..Default::default()
    });
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    // Nobody ever confirms.
    h.dlpi.close(s.id).unwrap();
    assert_eq!(h.lower.count(LowerOp::Disconnect), 1);
    assert_eq!(h.lower.count(LowerOp::Unbind), 1);
}

#[test]
fn close_twice() {
    let h = Harness::new();
    let s = h.open();
    h.dlpi.close(s.id).unwrap();
    assert_eq!(h.dlpi.close(s.id), Err(DlpiError::NotOpen(s.id)));
}

// Close a stream on another thread, let `event` happen once close has
// asked the lower layer to disconnect, then confirm the unbind that
// follows.
fn close_through(h: &Harness, s: &Stream, sap: u16, event: impl FnOnce()) {
    let id = s.id;
    let dlpi = Arc::clone(&h.dlpi);
    let closer = thread::spawn(move || dlpi.close(id));

    assert!(h.lower.wait_for(LowerOp::Disconnect, 1));
    event();
    assert!(h.lower.wait_for(LowerOp::Unbind, 1));
    h.dlpi.unbind_con(PPA, sap);
    closer.join().unwrap().unwrap();

    assert!(h.dlpi.dump_links().links.is_empty());
}

#[test]
fn close_woken_by_shutdown() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    lsn.user.take();

    close_through(&h, &lsn, LLC_SAP, || h.dlpi.shutdown(PPA, false));

    // The refusal already sent is not repeated.
    assert_eq!(
        h.lower.calls_of(LowerOp::Disconnect),
        vec![LowerCall::Disconnect { ppa: PPA, sid: 0x0401 }]
    );
    assert!(lsn.user.take().is_empty());
}

#[test]
fn close_woken_by_linkdown() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    close_through(&h, &s, LLC_SAP, || h.dlpi.linkdown(PPA));
    assert_eq!(h.lower.count(LowerOp::Disconnect), 1);
    assert!(s.user.take().is_empty());
}

// The lower layer accepts close's disconnect and later reports that it
// failed. Close moves on rather than asking again.
#[test]
fn close_after_failed_disconnect() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    lsn.user.take();

    close_through(&h, &lsn, LLC_SAP, || {
        h.dlpi.disconnect_con(PPA, 0x0401, EPROTO)
    });
    assert_eq!(h.lower.count(LowerOp::Disconnect), 1);
    assert!(lsn.user.take().is_empty());

    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);

    close_through(&h, &s, LLC_SAP, || {
        h.dlpi.disconnect_con(PPA, 0x0401, EPROTO)
    });
    assert_eq!(h.lower.count(LowerOp::Disconnect), 1);
    assert!(s.user.take().is_empty());
}

// Upcalls for the closing stream and its neighbours keep arriving from
// another thread while close runs.
#[test]
fn close_races_upcalls() {
    let h = Harness::new();
    let s = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    let lsn = h.bound(0x08, ServiceMode::CODLS, 2);
    let id = s.id;
    let stop = Arc::new(AtomicBool::new(false));

    let upcalls = {
        let dlpi = Arc::clone(&h.dlpi);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut sid = 0x0800;
            while !stop.load(Ordering::SeqCst) {
                let _ = dlpi.data_ind(PPA, id, 0x0401, vec![1]);
                dlpi.connect_ind(PPA, 0x08, remote(2, 0x08), sid);
                dlpi.disconnect_ind(PPA, 0x0401, 0);
                dlpi.disconnect_ind(PPA, sid, 0);
                sid += 1;
            }
        })
    };

    // The remote's disconnect confirms close's own, whichever comes
    // first.
    let dlpi = Arc::clone(&h.dlpi);
    let closer = thread::spawn(move || dlpi.close(id));
    assert!(h.lower.wait_for(LowerOp::Unbind, 1));
    h.dlpi.unbind_con(PPA, LLC_SAP);
    closer.join().unwrap().unwrap();

    // Nothing reaches the stream once close has returned.
    s.user.take();
    thread::sleep(Duration::from_millis(20));
    stop.store(true, Ordering::SeqCst);
    upcalls.join().unwrap();
    assert!(s.user.take().is_empty());

    let (chain, listen) = h.dlpi.queues(PPA).unwrap();
    assert!(!chain.contains(&id));
    assert_eq!(listen, vec![lsn.id]);

    // Every indication was withdrawn again, so the listener is whole.
    assert_eq!(h.state(&lsn), DlState::Idle);
    assert_eq!(listener_dump(&h, &lsn), (2, 2, 0, 0));
    assert_eq!(h.dlpi.dump_links().links.len(), 1);
}

// ================================================================
// Adapter events
// ================================================================

#[test]
fn graceful_shutdown() {
    let h = Harness::new();
    let conn = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    let cl = h.bound(0x08, ServiceMode::CLDLS, 0);
    let lsn = h.bound(0x10, ServiceMode::CODLS, 1);
    h.dlpi.connect_ind(PPA, 0x10, remote(2, 0x10), 0x0402);
    lsn.user.take();
    let reason = DiscReason::DiscTransientCondition.raw();

    h.dlpi.shutdown(PPA, false);

    // Sessions are torn down first, then the now idle bindings go.
    assert_eq!(h.state(&conn), DlState::Unbound);
    expect_msgs!(
        conn.user,
        UpMsg::Flush(FlushFlags::FLUSHRW),
        UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason,
            correlation: 0,
        },
        UpMsg::Hangup,
    );

    assert_eq!(h.state(&lsn), DlState::Unbound);
    expect_msgs!(
        lsn.user,
        UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason,
            correlation: 0x0402,
        },
        UpMsg::Hangup,
    );
    assert!(!h.dlpi.queues(PPA).unwrap().1.contains(&lsn.id));

    assert_eq!(h.state(&cl), DlState::Unbound);
    expect_msgs!(cl.user, UpMsg::Hangup);

    // The adapter is shutting down; nothing is unbound below.
    assert_eq!(h.lower.count(LowerOp::Unbind), 0);
}

#[test]
fn link_down_releases_sessions() {
    let h = Harness::new();
    let conn = h.connected(SNAP_SAP, remote(1, SNAP_SAP), 0x0401);

    h.dlpi.linkdown(PPA);
    assert_eq!(h.state(&conn), DlState::Unbound);
    expect_msgs!(
        conn.user,
        UpMsg::Flush(FlushFlags::FLUSHRW),
        UpMsg::DisconnectInd {
            originator: Originator::Provider,
            reason: DiscReason::DiscTransientCondition.raw(),
            correlation: 0,
        },
        UpMsg::Stop,
    );
}

#[test]
fn abortive_shutdown() {
    let h = Harness::new();
    let conn = h.connected(LLC_SAP, remote(1, LLC_SAP), 0x0401);
    let cl = h.bound(0x08, ServiceMode::CLDLS, 0);

    h.dlpi.shutdown(PPA, true);
    for s in [&conn, &cl] {
        assert_eq!(h.state(s), DlState::Unattached);
        expect_msgs!(s.user, UpMsg::Error(EPROTO));
    }

    // The links can be used again.
    h.put(&cl, DlReq::Attach { ppa: PPA });
    expect_msgs!(cl.user, UpMsg::ok_ack(DlPrim::AttachReq));
}

#[test]
fn shutdown_uninitialized_is_noop() {
    let h = Harness::new();
    let cl = h.bound(0x08, ServiceMode::CLDLS, 0);
    h.dlpi.set_adapter_initialized(PPA, false).unwrap();

    h.dlpi.shutdown(PPA, true);
    assert_eq!(h.state(&cl), DlState::Idle);
    assert!(cl.user.take().is_empty());
}

#[test]
fn link_down_and_up() {
    let h = Harness::new();
    let snap = h.bound(SNAP_SAP, ServiceMode::CLDLS, 0);
    let llc = h.bound(LLC_SAP, ServiceMode::CLDLS, 0);

    h.dlpi.linkdown(PPA);
    assert_eq!(h.state(&snap), DlState::Unbound);
    assert_eq!(h.state(&llc), DlState::Unbound);
    expect_msgs!(snap.user, UpMsg::Stop);
    expect_msgs!(llc.user, UpMsg::Hangup);

    h.lower.take_calls();
    h.dlpi.linkup(PPA);
    assert_eq!(
        h.lower.calls(),
        vec![LowerCall::Bind {
            ppa: PPA,
            link: snap.id,
            sap: SNAP_SAP,
            mode: ServiceMode::CLDLS,
        }]
    );
    expect_msgs!(snap.user, UpMsg::Start);
    assert_eq!(h.state(&snap), DlState::BindPending);

    h.dlpi.bind_con(PPA, SNAP_SAP, Ok(()));
    assert_eq!(h.state(&snap), DlState::Idle);
    assert_eq!(h.state(&llc), DlState::Unbound);
}

#[test]
fn link_up_rebind_refused() {
    let h = Harness::new();
    let snap = h.bound(SNAP_SAP, ServiceMode::CLDLS, 0);
    h.dlpi.linkdown(PPA);
    snap.user.take();

    h.lower.fail(LowerOp::Bind, LowerError::NoResources);
    h.dlpi.linkup(PPA);
    assert_eq!(h.state(&snap), DlState::Unbound);
    expect_msgs!(snap.user, UpMsg::Error(EPROTO));
}

// ================================================================
// Diagnostics
// ================================================================

#[test]
fn dump_and_print() {
    let h = Harness::new();
    let lsn = h.bound(LLC_SAP, ServiceMode::CODLS, 2);
    h.dlpi.connect_ind(PPA, LLC_SAP, remote(1, LLC_SAP), 0x0401);
    let _idle = h.open();

    let resp = h.dlpi.dump_links();
    assert_eq!(resp.links.len(), 2);

    let mut out = Vec::new();
    print_links_into(&mut out, &resp).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("DL_INCON_PENDING"), "{out}");
    assert!(out.contains("0x0401"));

    let minor = h.dlpi.minor(lsn.id).unwrap();
    assert!(resp.links.iter().any(|l| l.minor == minor));
    assert!(!h.dlpi.trace().snapshot().is_empty());
}
