// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-image progress records.

use dfu_mgmt::SlotEntry;
use std::cmp::Ordering;
use std::fmt;

/// Identifying hash of a firmware image, as matched against the hashes
/// the device reports in its slot entries.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageHash([u8; 32]);

impl ImageHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hash from a device-reported byte string; `None` if the
    /// length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for ImageHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageHash({})", hex::encode(self.0))
    }
}

/// In-memory progress record for one image of an upgrade.
///
/// The flags are monotonic: once set, they stay set for the remainder of
/// the upgrade. Only this crate can set them.
#[derive(Clone, Debug)]
pub struct ImageSlate {
    index: u32,
    data: Vec<u8>,
    hash: ImageHash,
    uploaded: bool,
    tested: bool,
    confirmed: bool,
    running: bool,
}

impl ImageSlate {
    pub(crate) fn new(index: u32, data: Vec<u8>, hash: ImageHash) -> Self {
        Self {
            index,
            data,
            hash,
            uploaded: false,
            tested: false,
            confirmed: false,
            running: false,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self) -> ImageHash {
        self.hash
    }

    pub fn uploaded(&self) -> bool {
        self.uploaded
    }

    pub fn tested(&self) -> bool {
        self.tested
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    /// Validation found this image executing from the primary slot, with
    /// nothing staged in the secondary. It needs no upload and takes no
    /// part in a test round.
    pub fn running(&self) -> bool {
        self.running
    }

    /// Does this device-reported entry carry this image's hash?
    pub(crate) fn matches(&self, entry: &SlotEntry) -> bool {
        entry.hash.as_slice() == self.hash.as_ref()
    }

    pub(crate) fn mark_uploaded(&mut self) {
        self.uploaded = true;
    }

    /// A running image is necessarily on the device.
    pub(crate) fn mark_running(&mut self) {
        self.uploaded = true;
        self.running = true;
    }

    /// A tested image is necessarily on the device.
    pub(crate) fn mark_tested(&mut self) {
        self.uploaded = true;
        self.tested = true;
    }

    /// A confirmed image is necessarily on the device.
    pub(crate) fn mark_confirmed(&mut self) {
        self.uploaded = true;
        self.confirmed = true;
    }
}

impl PartialEq for ImageSlate {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.hash == other.hash
    }
}

impl Eq for ImageSlate {}

impl PartialOrd for ImageSlate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageSlate {
    /// Slates order by image index, then hash; uploads proceed in this
    /// order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index).then(self.hash.cmp(&other.hash))
    }
}
