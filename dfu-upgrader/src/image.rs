// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extraction of an image's identifying hash.

use crate::error::UpgradeError;
use crate::slate::ImageHash;
use sha2::Digest;
use sha2::Sha256;

/// Shortest blob that can plausibly carry an image header.
const MIN_IMAGE_LEN: usize = 32;

/// Derives the hash by which a firmware blob is matched against the
/// device's slot inventory.
///
/// Firmware formats that embed a digest in a trailer can supply their own
/// implementation; the hash only needs to agree with what the device
/// reports in its slot entries.
pub trait ImageParser: Send + Sync {
    fn hash(&self, data: &[u8]) -> Result<ImageHash, UpgradeError>;
}

/// Default parser: SHA-256 over the whole blob.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256ImageParser;

impl ImageParser for Sha256ImageParser {
    fn hash(&self, data: &[u8]) -> Result<ImageHash, UpgradeError> {
        if data.len() < MIN_IMAGE_LEN {
            return Err(UpgradeError::InvalidImage(format!(
                "image is {} bytes, shorter than a {MIN_IMAGE_LEN}-byte \
                 image header",
                data.len()
            )));
        }
        let digest = Sha256::digest(data);
        Ok(ImageHash::new(digest.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_image() {
        let parser = Sha256ImageParser;
        assert!(matches!(
            parser.hash(&[0u8; 31]),
            Err(UpgradeError::InvalidImage(_))
        ));
        assert!(parser.hash(&[0u8; 32]).is_ok());
    }

    #[test]
    fn hash_is_stable() {
        let parser = Sha256ImageParser;
        let a = parser.hash(&[7u8; 64]).unwrap();
        let b = parser.hash(&[7u8; 64]).unwrap();
        let c = parser.hash(&[8u8; 64]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
