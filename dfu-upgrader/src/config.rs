// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Upgrade modes and configuration.

use dfu_mgmt::ImageAlignment;
use serde::Deserialize;
use serde::Serialize;

/// Smallest upload MTU the image clients accept.
pub const MTU_MIN: u16 = 23;
/// Largest upload MTU the image clients accept.
pub const MTU_MAX: u16 = 1024;

/// How the new images are activated after upload.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Mark the staged images for a one-shot test boot and stop; the
    /// device reverts unless something else confirms them.
    TestOnly,
    /// Confirm the staged images outright, then reboot into them.
    #[default]
    ConfirmOnly,
    /// Test-boot the staged images, then confirm them once they are
    /// observed running.
    TestAndConfirm,
}

/// Per-upgrade configuration supplied to
/// [`FirmwareUpgrader::start`](crate::FirmwareUpgrader::start).
///
/// Immutable for the duration of the upgrade, with two exceptions:
/// `erase_app_settings` is cleared once the erase command has been
/// serviced, and `reassembly_buffer_size` is filled in by parameter
/// negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfiguration {
    /// Wipe application-layer persisted state after upload, before the
    /// new images are tested or confirmed.
    pub erase_app_settings: bool,
    /// Number of unacknowledged upload chunks kept in flight; must be at
    /// least 1.
    pub pipeline_depth: u32,
    /// Chunk-boundary alignment applied when pipelining.
    pub byte_alignment: ImageAlignment,
    /// Per-request payload cap; overwritten by parameter negotiation,
    /// 0 disables.
    pub reassembly_buffer_size: u64,
}

impl Default for UpgradeConfiguration {
    fn default() -> Self {
        Self {
            erase_app_settings: true,
            pipeline_depth: 1,
            byte_alignment: ImageAlignment::Disabled,
            reassembly_buffer_size: 0,
        }
    }
}
