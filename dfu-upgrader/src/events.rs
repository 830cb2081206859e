// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle events delivered to the caller.

use crate::config::Mode;
use crate::error::UpgradeError;
use crate::upgrader::UpgradeState;
use dfu_mgmt::UploadProgress;

/// Events posted to the channel handed out by
/// [`FirmwareUpgrader::new`](crate::FirmwareUpgrader::new).
///
/// For a given upgrade the events are totally ordered: `UpgradeStarted`
/// first, then any number of `StateChanged` and `UploadProgressChanged`,
/// then exactly one of the terminal three. At most one `StateChanged` is
/// posted per transition.
#[derive(Clone, Debug)]
pub enum UpgradeEvent {
    UpgradeStarted {
        mode: Mode,
    },
    StateChanged {
        from: UpgradeState,
        to: UpgradeState,
    },
    /// Forwarded verbatim from the image client's upload pump.
    UploadProgressChanged(UploadProgress),
    UpgradeComplete,
    UpgradeFailed {
        /// The state the machine was in when the failure was detected.
        state: UpgradeState,
        error: UpgradeError,
    },
    UpgradeCancelled {
        state: UpgradeState,
    },
}
