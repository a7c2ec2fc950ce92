// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::dlpi::ETHER_ADDR_SIZE;
use super::dlpi::IEEE_ADDR_SIZE;
use super::dlpi::MAC_ADDR_SIZE;
use super::dlpi::MAX_LLC_SAP;
use super::dlpi::SNAP_HDR_SIZE;
use alloc::str::FromStr;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use serde::Deserialize;
use serde::Serialize;

/// A MAC address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Hash,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }

    /// Build an address from a slice, which must be exactly
    /// [`MAC_ADDR_SIZE`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let inner: [u8; 6] = bytes.try_into().ok()?;
        Some(Self { inner })
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl From<&[u8; 6]> for MacAddr {
    fn from(bytes: &[u8; 6]) -> Self {
        Self { inner: *bytes }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for MacAddr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<u8> = s
            .split(':')
            .map(|s| {
                u8::from_str_radix(s, 16).map_err(|_| format!("bad octet: {s}"))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        Self::from_slice(&octets).ok_or_else(|| {
            format!("incorrect number of bytes: {}", octets.len())
        })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = &self.inner;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr {{ inner: {self} }}")
    }
}

/// A DLSAP address: a MAC address plus a service access point.
///
/// On the wire this takes one of two forms, selected by the SAP value
/// the link is bound with. An IEEE 802.2 address is the MAC followed by
/// a single SAP byte ([`IEEE_ADDR_SIZE`]); an Ethernet address is the
/// MAC followed by a big-endian two byte type ([`ETHER_ADDR_SIZE`]).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct DlsapAddr {
    pub mac: MacAddr,
    pub sap: u16,
}

impl DlsapAddr {
    pub const fn new(mac: MacAddr, sap: u16) -> Self {
        Self { mac, sap }
    }

    /// Does this address name an Ethernet type rather than an LLC SAP?
    pub fn is_ether(&self) -> bool {
        self.sap > MAX_LLC_SAP
    }

    /// The length of this address in its wire form.
    pub fn wire_len(&self) -> usize {
        if self.is_ether() { ETHER_ADDR_SIZE } else { IEEE_ADDR_SIZE }
    }

    /// Serialize into the wire form, appending to `out`.
    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.mac.bytes());
        if self.is_ether() {
            out.extend_from_slice(&self.sap.to_be_bytes());
        } else {
            out.push(self.sap as u8);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.emit(&mut out);
        out
    }

    /// Parse either wire form, selected by the length of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mac = MacAddr::from_slice(bytes.get(..MAC_ADDR_SIZE)?)?;
        let sap = match bytes.len() {
            IEEE_ADDR_SIZE => u16::from(bytes[MAC_ADDR_SIZE]),
            ETHER_ADDR_SIZE => u16::from_be_bytes([
                bytes[MAC_ADDR_SIZE],
                bytes[MAC_ADDR_SIZE + 1],
            ]),
            _ => return None,
        };
        Some(Self { mac, sap })
    }
}

impl Display for DlsapAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_ether() {
            write!(f, "{}/0x{:04X}", self.mac, self.sap)
        } else {
            write!(f, "{}/0x{:02X}", self.mac, self.sap)
        }
    }
}

/// The identity of a SNAP subsequent bind: an organizationally unique
/// identifier plus a protocol id.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct SnapId {
    pub oui: [u8; 3],
    pub ether_type: u16,
}

impl SnapId {
    /// Parse the 5 byte SNAP header which follows the LLC header of a
    /// SNAP frame.
    pub fn parse(hdr: &[u8]) -> Option<Self> {
        let hdr = hdr.get(..SNAP_HDR_SIZE)?;
        Some(Self {
            oui: [hdr[0], hdr[1], hdr[2]],
            ether_type: u16::from_be_bytes([hdr[3], hdr[4]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; SNAP_HDR_SIZE] {
        let t = self.ether_type.to_be_bytes();
        [self.oui[0], self.oui[1], self.oui[2], t[0], t[1]]
    }
}

impl Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}-{:02X}-{:02X}/0x{:04X}",
            self.oui[0], self.oui[1], self.oui[2], self.ether_type
        )
    }
}
