// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The upstream side of a link: its DLS user.

use llc2_api::UpMsg;

/// The consumer of a link's upstream messages; in STREAMS terms the
/// read queue of the module or stream head above the provider.
///
/// Both methods are called with the link's lock held. An
/// implementation must not call back into the engine from them.
pub trait DlsUser: Send + Sync {
    /// Deliver a message upstream.
    fn put(&self, msg: UpMsg);

    /// Can the user accept a data message right now? When this
    /// returns `false` the engine queues data on the link until
    /// [`crate::engine::Dlpi::read_service`] is run.
    fn can_put(&self) -> bool;
}
