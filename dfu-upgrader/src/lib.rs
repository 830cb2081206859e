// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client-side orchestration of device firmware upgrades.
//!
//! [`FirmwareUpgrader`] drives a complete upgrade transaction against an
//! embedded device exposing image, reset, and basic management command
//! groups: it negotiates parameters, validates the desired images against
//! the device's slot inventory, uploads what is missing, arranges for the
//! device to test and/or confirm the new images, reboots it, reconnects
//! after the swap, and reports terminal success or failure through an
//! event channel owned by the caller.
//!
//! The transport and the byte-level command clients are collaborators
//! supplied by the caller (see the `dfu-mgmt` traits); this crate owns
//! only the upgrade state machine itself. Errors are fatal to the
//! upgrade: this crate never retries a failed command.

mod config;
mod error;
mod events;
mod image;
mod planner;
mod reconnect;
mod slate;
mod upgrader;

pub use config::Mode;
pub use config::UpgradeConfiguration;
pub use config::MTU_MAX;
pub use config::MTU_MIN;
pub use error::UpgradeError;
pub use events::UpgradeEvent;
pub use image::ImageParser;
pub use image::Sha256ImageParser;
pub use slate::ImageHash;
pub use upgrader::FirmwareUpgrader;
pub use upgrader::UpgradeState;
