// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data carried across the management-protocol seam.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Raw management return code reported by the device.
///
/// `0` is success; everything else is command-group specific.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
    pub const OK: ReturnCode = ReturnCode(0);

    /// "Command unknown" — returned by firmware that predates a command.
    pub const UNSUPPORTED: ReturnCode = ReturnCode(8);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command-group error reported by newer firmware revisions.
///
/// Older firmware signals failure through the legacy payload `rc` alone;
/// newer revisions report a `(group, rc)` pair in a separate error map
/// and may leave the legacy field at zero. When present, the group error
/// is authoritative for success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupError {
    pub group: u16,
    pub rc: ReturnCode,
}

/// One record of the device's image-slot inventory.
///
/// The device reports two slots per image index: slot 0 is the primary
/// (currently running) location, slot 1 the secondary (staging) location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub image: u32,
    pub slot: u32,
    pub hash: Vec<u8>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub permanent: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub bootable: bool,
}

/// Decoded image-state response: the slot report, plus the return code.
///
/// Image-list, image-test, and image-confirm all answer with this shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStateResponse {
    pub rc: ReturnCode,
    #[serde(default)]
    pub err: Option<GroupError>,
    pub images: Vec<SlotEntry>,
}

impl ImageStateResponse {
    pub fn is_success(&self) -> bool {
        match self.err {
            Some(err) => err.rc.is_success(),
            None => self.rc.is_success(),
        }
    }

    /// The code that explains a non-success response.
    pub fn error_code(&self) -> ReturnCode {
        self.err.map(|e| e.rc).unwrap_or(self.rc)
    }

    /// Look up the entry for a given `(image, slot)` pair, if reported.
    pub fn slot(&self, image: u32, slot: u32) -> Option<&SlotEntry> {
        self.images.iter().find(|e| e.image == image && e.slot == slot)
    }
}

/// Decoded parameter-negotiation response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamsResponse {
    pub rc: ReturnCode,
    #[serde(default)]
    pub err: Option<GroupError>,
    /// Maximum payload the device can reassemble per management request.
    pub buf_size: u64,
    pub buf_count: u32,
}

impl ParamsResponse {
    pub fn is_success(&self) -> bool {
        match self.err {
            Some(err) => err.rc.is_success(),
            None => self.rc.is_success(),
        }
    }

    /// The code that explains a non-success response.
    pub fn error_code(&self) -> ReturnCode {
        self.err.map(|e| e.rc).unwrap_or(self.rc)
    }
}

/// Decoded erase-app-settings response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraseResponse {
    pub rc: ReturnCode,
    #[serde(default)]
    pub err: Option<GroupError>,
}

impl EraseResponse {
    pub fn is_success(&self) -> bool {
        match self.err {
            Some(err) => err.rc.is_success(),
            None => self.rc.is_success(),
        }
    }

    /// The code that explains a non-success response.
    pub fn error_code(&self) -> ReturnCode {
        self.err.map(|e| e.rc).unwrap_or(self.rc)
    }
}

/// Decoded reset response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub rc: ReturnCode,
    #[serde(default)]
    pub err: Option<GroupError>,
}

impl ResetResponse {
    pub fn is_success(&self) -> bool {
        match self.err {
            Some(err) => err.rc.is_success(),
            None => self.rc.is_success(),
        }
    }

    /// The code that explains a non-success response.
    pub fn error_code(&self) -> ReturnCode {
        self.err.map(|e| e.rc).unwrap_or(self.rc)
    }
}

/// Chunk-boundary alignment applied by the image client when pipelining.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ImageAlignment {
    #[default]
    Disabled,
    TwoByte,
    FourByte,
    EightByte,
    SixteenByte,
}

impl ImageAlignment {
    /// The alignment in bytes, or `None` when disabled.
    pub fn bytes(self) -> Option<u8> {
        match self {
            ImageAlignment::Disabled => None,
            ImageAlignment::TwoByte => Some(2),
            ImageAlignment::FourByte => Some(4),
            ImageAlignment::EightByte => Some(8),
            ImageAlignment::SixteenByte => Some(16),
        }
    }
}

/// Upload parameters handed to the image client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Number of unacknowledged upload chunks kept in flight.
    pub pipeline_depth: u32,
    pub byte_alignment: ImageAlignment,
    /// Per-request payload cap negotiated with the device; 0 disables.
    pub reassembly_buffer_size: u64,
}

/// One firmware blob queued for upload, tagged with its image index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadImage {
    pub image: u32,
    pub data: Vec<u8>,
}

/// Progress of an in-flight upload, as reported by the image client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub image_size: u64,
    pub timestamp: DateTime<Utc>,
}

/// How an upload ended, short of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Finished,
    Cancelled,
}

/// Transport connection state, observed through a watch channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Outcome of a connect request.
///
/// `Deferred` means the transport accepted the request but the link will
/// come up asynchronously; a later [`ConnectionState`] change reports the
/// result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(image: u32, slot: u32, hash: &[u8]) -> SlotEntry {
        SlotEntry {
            image,
            slot,
            hash: hash.to_vec(),
            version: None,
            confirmed: false,
            pending: false,
            permanent: false,
            active: false,
            bootable: true,
        }
    }

    #[test]
    fn return_code_success() {
        assert!(ReturnCode::OK.is_success());
        assert!(!ReturnCode(1).is_success());
        assert!(!ReturnCode::UNSUPPORTED.is_success());
        assert!(!ReturnCode(-1).is_success());
    }

    #[test]
    fn group_error_is_authoritative_when_present() {
        let resp = EraseResponse { rc: ReturnCode::OK, err: None };
        assert!(resp.is_success());
        assert_eq!(resp.error_code(), ReturnCode::OK);

        let resp = EraseResponse { rc: ReturnCode(5), err: None };
        assert!(!resp.is_success());
        assert_eq!(resp.error_code(), ReturnCode(5));

        // A group error can fail the command while the legacy field
        // stays zero.
        let resp = EraseResponse {
            rc: ReturnCode::OK,
            err: Some(GroupError { group: 63, rc: ReturnCode(3) }),
        };
        assert!(!resp.is_success());
        assert_eq!(resp.error_code(), ReturnCode(3));

        let resp = EraseResponse {
            rc: ReturnCode(5),
            err: Some(GroupError { group: 63, rc: ReturnCode::OK }),
        };
        assert!(resp.is_success());
    }

    #[test]
    fn slot_lookup() {
        let response = ImageStateResponse {
            rc: ReturnCode::OK,
            err: None,
            images: vec![
                entry(0, 0, b"aaaa"),
                entry(0, 1, b"bbbb"),
                entry(1, 0, b"cccc"),
            ],
        };
        assert_eq!(response.slot(0, 1).map(|e| e.hash.as_slice()), Some(&b"bbbb"[..]));
        assert_eq!(response.slot(1, 0).map(|e| e.hash.as_slice()), Some(&b"cccc"[..]));
        assert!(response.slot(1, 1).is_none());
        assert!(response.slot(2, 0).is_none());
    }

    #[test]
    fn alignment_bytes() {
        assert_eq!(ImageAlignment::Disabled.bytes(), None);
        assert_eq!(ImageAlignment::FourByte.bytes(), Some(4));
        assert_eq!(ImageAlignment::SixteenByte.bytes(), Some(16));
    }
}
