// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Management-protocol surface for device firmware upgrades.
//!
//! This crate defines the request/response contracts the upgrade
//! orchestrator consumes: the slot-report records decoded from an
//! image-list response, the per-command response types carrying a raw
//! management return code, and the traits implemented by concrete
//! transports (BLE, serial, UDP) and command-group clients.
//!
//! None of the on-wire encoding lives here; chunking, MTU handling, and
//! pipelining are the concrete client's business.

mod client;
mod types;

pub use client::BasicClient;
pub use client::ClientError;
pub use client::DefaultClient;
pub use client::ImageClient;
pub use client::Transport;
pub use types::ConnectOutcome;
pub use types::ConnectionState;
pub use types::EraseResponse;
pub use types::GroupError;
pub use types::ImageAlignment;
pub use types::ImageStateResponse;
pub use types::ParamsResponse;
pub use types::ResetResponse;
pub use types::ReturnCode;
pub use types::SlotEntry;
pub use types::UploadImage;
pub use types::UploadOutcome;
pub use types::UploadProgress;
pub use types::UploadSettings;
