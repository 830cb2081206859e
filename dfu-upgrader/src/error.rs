// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error type returned when a firmware upgrade fails.

use dfu_mgmt::ClientError;
use dfu_mgmt::ReturnCode;
use thiserror::Error;

/// Why an upgrade could not be started or did not complete.
///
/// Every variant is fatal to the upgrade in progress; the only failures
/// the orchestrator absorbs are parameter-negotiation failures and an
/// erase-app-settings command answering with a benign non-zero return
/// code.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UpgradeError {
    #[error("an upgrade is already in progress")]
    AlreadyRunning,
    #[error("invalid firmware image: {0}")]
    InvalidImage(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("management response was empty")]
    NilResponse,
    #[error("malformed management response: {0}")]
    InvalidResponse(&'static str),
    #[error("device returned management error code {0}")]
    RemoteReturnCode(ReturnCode),
    #[error("transport error")]
    Transport(#[from] ClientError),
    #[error("failed to reconnect after reset")]
    ConnectionFailedAfterReset(#[source] ClientError),
    #[error("staged image is already confirmed and cannot be tested")]
    AlreadyConfirmedCannotTest,
    #[error("staged image did not become pending after test")]
    NotPending,
    #[error("staged image did not become permanent after confirm")]
    NotPermanent,
    #[error("device did not boot the staged image")]
    BootFailed,
    #[error("booted image was not confirmed by the device")]
    NotConfirmed,
    #[error("device reported an unexpected number of image slots")]
    SlotCountMismatch,
}
