// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print engine dumps in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both diagnostic tooling and integration tests.

use crate::engine::trace::TraceRec;
use itertools::Itertools;
use llc2_api::DumpLinksResp;
use llc2_api::LinkDump;
use llc2_api::ServiceMode;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpLinksResp`].
pub fn print_links(resp: &DumpLinksResp) -> std::io::Result<()> {
    print_links_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpLinksResp`].
pub fn print_links_into(
    writer: &mut impl Write,
    resp: &DumpLinksResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Links")?;
    write_hrb(&mut t)?;
    writeln!(
        t,
        "MINOR\tPPA\tSTATE\tSAP\tMODE\tSID\tCONIND\tOUT\tPEND\tMCAST\tRQ\tWQ"
    )?;
    write_hr(&mut t)?;
    for link in &resp.links {
        print_link(&mut t, link)?;
    }
    t.flush()?;

    let listeners = resp.links.iter().filter(|l| !l.outstanding.is_empty());
    for link in listeners {
        writeln!(t, "\nOutstanding indications on minor {}", link.minor)?;
        write_hr(&mut t)?;
        writeln!(t, "SID\tCALLING")?;
        for (sid, remote) in &link.outstanding {
            writeln!(t, "0x{sid:04X}\t{remote}")?;
        }
        t.flush()?;
    }

    writeln!(t)?;
    t.flush()
}

fn print_link(t: &mut impl Write, link: &LinkDump) -> std::io::Result<()> {
    let ppa = match link.ppa {
        Some(ppa) => ppa.to_string(),
        None => "-".to_string(),
    };
    let sap = match link.snap {
        Some(snap) => format!("0x{:02X}/{snap}", link.sap),
        None => format!("0x{:02X}", link.sap),
    };
    let mcast = if link.multicast.is_empty() {
        "-".to_string()
    } else {
        link.multicast.iter().join(",")
    };
    let rq = if link.flow_controlled {
        format!("{}*", link.read_queued)
    } else {
        link.read_queued.to_string()
    };

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t0x{:04X}\t{}/{}\t{}\t{}\t{}\t{}\t{}",
        link.minor,
        ppa,
        link.state,
        sap,
        mode_str(link.service_mode),
        link.sid,
        link.conind,
        link.max_conind,
        link.outstanding.len(),
        link.pending,
        mcast,
        rq,
        link.write_queued,
    )
}

fn mode_str(mode: ServiceMode) -> String {
    let names = [
        (ServiceMode::CODLS, "CO"),
        (ServiceMode::CLDLS, "CL"),
        (ServiceMode::ACLDLS, "ACL"),
    ];

    let s = names
        .iter()
        .filter(|(m, _)| mode.contains(*m))
        .map(|(_, n)| n)
        .join("|");
    if s.is_empty() { "-".to_string() } else { s }
}

/// Print the engine's trace ring, oldest record first.
pub fn print_trace(recs: &[TraceRec]) -> std::io::Result<()> {
    print_trace_into(&mut std::io::stdout(), recs)
}

/// Print the engine's trace ring, oldest record first.
pub fn print_trace_into(
    writer: &mut impl Write,
    recs: &[TraceRec],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Trace")?;
    write_hrb(&mut t)?;
    writeln!(t, "MS\tLINE\tEVENT\tMINOR\tP1\tP2")?;
    write_hr(&mut t)?;
    for r in recs {
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t0x{:X}\t0x{:X}",
            r.ms, r.line, r.event, r.minor, r.p1, r.p2
        )?;
    }
    writeln!(t)?;
    t.flush()
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
