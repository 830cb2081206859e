// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Traits implemented by concrete transports and command-group clients.
//!
//! Async operations return a `BoxFuture` so implementations stay object
//! safe; the orchestrator holds them as trait objects.
//!
//! Responses come back as `Result<Option<R>, ClientError>`: `Err` is a
//! transport or decode failure, `Ok(None)` is a callback that produced
//! neither a response nor an error (the orchestrator treats that as its
//! own failure kind).

use crate::types::ConnectOutcome;
use crate::types::ConnectionState;
use crate::types::EraseResponse;
use crate::types::ImageStateResponse;
use crate::types::ParamsResponse;
use crate::types::ResetResponse;
use crate::types::UploadImage;
use crate::types::UploadOutcome;
use crate::types::UploadProgress;
use crate::types::UploadSettings;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::watch;

/// Transport-level or decode-level failure surfaced by a client.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode management response: {0}")]
    Decode(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
}

/// Connection-oriented transport carrying management requests.
pub trait Transport: Send + Sync {
    /// Ask the transport to (re)establish the link.
    fn connect(&self) -> BoxFuture<'_, Result<ConnectOutcome, ClientError>>;

    /// Observe connection state changes.
    ///
    /// Subscribing replaces observer registration; dropping the receiver
    /// deregisters.
    fn state_changes(&self) -> watch::Receiver<ConnectionState>;
}

/// Image command group: list, upload, test, confirm.
pub trait ImageClient: Send + Sync {
    /// Request the device's current image-slot inventory.
    fn list(
        &self,
    ) -> BoxFuture<'_, Result<Option<ImageStateResponse>, ClientError>>;

    /// Upload the given images in order, reporting progress on
    /// `progress`. The client owns chunking, MTU, and pipelining; the
    /// future resolves when the last chunk is acknowledged or the upload
    /// is cancelled.
    fn upload(
        &self,
        images: Vec<UploadImage>,
        settings: UploadSettings,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> BoxFuture<'_, Result<UploadOutcome, ClientError>>;

    /// Abort an in-flight upload; the upload future resolves with
    /// [`UploadOutcome::Cancelled`].
    fn cancel_upload(&self);

    /// Stop the chunk pump at the next chunk boundary.
    fn pause_upload(&self);

    /// Resume a paused chunk pump.
    fn continue_upload(&self);

    /// Mark the staged image with the given hash for a one-shot test on
    /// next boot.
    fn test(
        &self,
        hash: Vec<u8>,
    ) -> BoxFuture<'_, Result<Option<ImageStateResponse>, ClientError>>;

    /// Confirm the image with the given hash, or the currently running
    /// image when `hash` is `None`.
    fn confirm(
        &self,
        hash: Option<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Option<ImageStateResponse>, ClientError>>;

    /// Set the transport MTU used for upload chunks. Returns false if the
    /// client rejects the value.
    fn set_mtu(&self, mtu: u16) -> bool;
}

/// Default command group: parameter negotiation and reset.
pub trait DefaultClient: Send + Sync {
    fn params(
        &self,
    ) -> BoxFuture<'_, Result<Option<ParamsResponse>, ClientError>>;

    fn reset(
        &self,
    ) -> BoxFuture<'_, Result<Option<ResetResponse>, ClientError>>;
}

/// Basic command group.
pub trait BasicClient: Send + Sync {
    /// Wipe application-layer persisted state on the device.
    fn erase_app_settings(
        &self,
    ) -> BoxFuture<'_, Result<Option<EraseResponse>, ClientError>>;
}
