// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decides the next upgrade action from the device's slot inventory.
//!
//! [`evaluate`] is pure over its inputs (flag marking on the slates
//! included); it performs no I/O and issues no commands. The state
//! machine dispatches whatever decision comes back.

use crate::config::Mode;
use crate::error::UpgradeError;
use crate::slate::ImageHash;
use crate::slate::ImageSlate;
use dfu_mgmt::ImageStateResponse;

/// Primary slot: the currently running image's location.
pub(crate) const SLOT_PRIMARY: u32 = 0;
/// Secondary slot: the staging location for an incoming image.
pub(crate) const SLOT_SECONDARY: u32 = 1;

/// The next action for the state machine to take.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PlanDecision {
    /// Every image is accounted for.
    Success,
    /// At least one image still needs to be sent to the device.
    Upload,
    /// Mark the staged image with this hash for a test boot.
    Test(ImageHash),
    /// Confirm the staged image with this hash.
    Confirm(ImageHash),
    /// Confirm the image currently running in the primary slot, to drop a
    /// foreign image's hold on the secondary slot, then validate again.
    ValidationConfirm(ImageHash),
    /// Reboot the device; the staged image activates on the way up.
    Reset,
    /// Reboot the device, then validate again from scratch.
    ResetAndRevalidate,
    Fail(UpgradeError),
}

/// Walk the slates in `(index, hash)` order against the reported slot
/// inventory and return the first decision that requires action.
///
/// `slates` must already be sorted; flags are updated in place for the
/// images the report accounts for.
pub(crate) fn evaluate(
    report: &ImageStateResponse,
    slates: &mut [ImageSlate],
    mode: Mode,
) -> PlanDecision {
    for slate in slates.iter_mut() {
        let primary = report.slot(slate.index(), SLOT_PRIMARY);
        let secondary = report.slot(slate.index(), SLOT_SECONDARY);

        if let Some(entry) = primary.filter(|e| slate.matches(e)) {
            // The image is already running.
            if entry.confirmed || entry.permanent {
                slate.mark_running();
                slate.mark_confirmed();
                continue;
            }
            // Running but unconfirmed.
            slate.mark_running();
            match mode {
                Mode::ConfirmOnly | Mode::TestAndConfirm => {
                    return PlanDecision::Confirm(slate.hash());
                }
                Mode::TestOnly => continue,
            }
        }

        if let Some(entry) = secondary {
            if slate.matches(entry) {
                // Already staged; only activation remains.
                slate.mark_uploaded();
                if !entry.pending {
                    return match mode {
                        Mode::TestOnly | Mode::TestAndConfirm => {
                            PlanDecision::Test(slate.hash())
                        }
                        Mode::ConfirmOnly => {
                            PlanDecision::Confirm(slate.hash())
                        }
                    };
                }
                if entry.permanent {
                    // The device will swap to it on the next boot.
                    return match mode {
                        Mode::ConfirmOnly | Mode::TestAndConfirm => {
                            PlanDecision::Reset
                        }
                        Mode::TestOnly => PlanDecision::Fail(
                            UpgradeError::AlreadyConfirmedCannotTest,
                        ),
                    };
                }
                // Pending but not permanent.
                return match mode {
                    Mode::ConfirmOnly => PlanDecision::Confirm(slate.hash()),
                    Mode::TestOnly | Mode::TestAndConfirm => {
                        PlanDecision::Reset
                    }
                };
            }

            // A different image occupies the staging slot.
            if entry.confirmed {
                // Confirm whatever is running in the primary slot to
                // release the secondary so it can be rewritten.
                let Some(primary) = primary else {
                    return PlanDecision::Fail(UpgradeError::InvalidResponse(
                        "secondary slot is foreign and confirmed but no \
                         primary slot was reported",
                    ));
                };
                let Some(hash) = ImageHash::from_bytes(&primary.hash) else {
                    return PlanDecision::Fail(UpgradeError::InvalidResponse(
                        "primary slot hash has the wrong length",
                    ));
                };
                return PlanDecision::ValidationConfirm(hash);
            }
            if entry.pending {
                return PlanDecision::ResetAndRevalidate;
            }
            // Inert foreign image; the upload will overwrite it.
        }
    }

    if slates.iter().all(|s| s.uploaded()) {
        PlanDecision::Success
    } else {
        PlanDecision::Upload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfu_mgmt::ReturnCode;
    use dfu_mgmt::SlotEntry;

    fn hash(fill: u8) -> ImageHash {
        ImageHash::new([fill; 32])
    }

    fn slate(index: u32, fill: u8) -> ImageSlate {
        ImageSlate::new(index, vec![fill; 64], hash(fill))
    }

    struct EntrySpec {
        image: u32,
        slot: u32,
        hash: ImageHash,
        confirmed: bool,
        pending: bool,
        permanent: bool,
    }

    fn entry(image: u32, slot: u32, h: ImageHash) -> EntrySpec {
        EntrySpec {
            image,
            slot,
            hash: h,
            confirmed: false,
            pending: false,
            permanent: false,
        }
    }

    fn report(entries: Vec<EntrySpec>) -> ImageStateResponse {
        ImageStateResponse {
            rc: ReturnCode::OK,
            err: None,
            images: entries
                .into_iter()
                .map(|e| SlotEntry {
                    image: e.image,
                    slot: e.slot,
                    hash: e.hash.to_vec(),
                    version: None,
                    confirmed: e.confirmed,
                    pending: e.pending,
                    permanent: e.permanent,
                    active: e.slot == 0,
                    bootable: true,
                })
                .collect(),
        }
    }

    #[test]
    fn already_running_and_confirmed_is_success() {
        let mut slates = vec![slate(0, 0xaa)];
        let report = report(vec![EntrySpec {
            confirmed: true,
            ..entry(0, 0, hash(0xaa))
        }]);
        assert_eq!(
            evaluate(&report, &mut slates, Mode::ConfirmOnly),
            PlanDecision::Success
        );
        assert!(slates[0].uploaded());
        assert!(slates[0].confirmed());
    }

    #[test]
    fn clean_device_wants_upload() {
        let mut slates = vec![slate(0, 0xaa)];
        let report = report(vec![EntrySpec {
            confirmed: true,
            ..entry(0, 0, hash(0x11))
        }]);
        assert_eq!(
            evaluate(&report, &mut slates, Mode::ConfirmOnly),
            PlanDecision::Upload
        );
        assert!(!slates[0].uploaded());
    }

    #[test]
    fn running_unconfirmed_confirms_in_confirm_modes() {
        for mode in [Mode::ConfirmOnly, Mode::TestAndConfirm] {
            let mut slates = vec![slate(0, 0xaa)];
            let report = report(vec![entry(0, 0, hash(0xaa))]);
            assert_eq!(
                evaluate(&report, &mut slates, mode),
                PlanDecision::Confirm(hash(0xaa))
            );
            assert!(slates[0].uploaded());
            assert!(!slates[0].confirmed());
        }
    }

    #[test]
    fn running_unconfirmed_is_done_for_test_only() {
        let mut slates = vec![slate(0, 0xaa)];
        let report = report(vec![entry(0, 0, hash(0xaa))]);
        assert_eq!(
            evaluate(&report, &mut slates, Mode::TestOnly),
            PlanDecision::Success
        );
        // Satisfied without staging: excluded from any test round.
        assert!(slates[0].running());
        assert!(!slates[0].tested());
    }

    #[test]
    fn running_unconfirmed_does_not_block_another_upload() {
        // Image 0 already runs unconfirmed; image 1 still needs to go up.
        let mut slates = vec![slate(0, 0xaa), slate(1, 0xbb)];
        let r = report(vec![
            entry(0, 0, hash(0xaa)),
            EntrySpec { confirmed: true, ..entry(1, 0, hash(0x11)) },
        ]);
        assert_eq!(
            evaluate(&r, &mut slates, Mode::TestOnly),
            PlanDecision::Upload
        );
        assert!(slates[0].running());
        assert!(!slates[1].uploaded());
    }

    #[test]
    fn staged_idle_image_gets_tested_or_confirmed() {
        let staged = |mode| {
            let mut slates = vec![slate(0, 0xaa)];
            let r = report(vec![
                EntrySpec { confirmed: true, ..entry(0, 0, hash(0x11)) },
                entry(0, 1, hash(0xaa)),
            ]);
            evaluate(&r, &mut slates, mode)
        };
        assert_eq!(staged(Mode::TestOnly), PlanDecision::Test(hash(0xaa)));
        assert_eq!(
            staged(Mode::TestAndConfirm),
            PlanDecision::Test(hash(0xaa))
        );
        assert_eq!(
            staged(Mode::ConfirmOnly),
            PlanDecision::Confirm(hash(0xaa))
        );
    }

    #[test]
    fn staged_pending_permanent_resets_or_fails() {
        let staged = |mode| {
            let mut slates = vec![slate(0, 0xaa)];
            let r = report(vec![
                EntrySpec { confirmed: true, ..entry(0, 0, hash(0x11)) },
                EntrySpec {
                    pending: true,
                    permanent: true,
                    ..entry(0, 1, hash(0xaa))
                },
            ]);
            evaluate(&r, &mut slates, mode)
        };
        assert_eq!(staged(Mode::ConfirmOnly), PlanDecision::Reset);
        assert_eq!(staged(Mode::TestAndConfirm), PlanDecision::Reset);
        assert_eq!(
            staged(Mode::TestOnly),
            PlanDecision::Fail(UpgradeError::AlreadyConfirmedCannotTest)
        );
    }

    #[test]
    fn staged_pending_not_permanent() {
        let staged = |mode| {
            let mut slates = vec![slate(0, 0xaa)];
            let r = report(vec![
                EntrySpec { confirmed: true, ..entry(0, 0, hash(0x11)) },
                EntrySpec { pending: true, ..entry(0, 1, hash(0xaa)) },
            ]);
            evaluate(&r, &mut slates, mode)
        };
        assert_eq!(
            staged(Mode::ConfirmOnly),
            PlanDecision::Confirm(hash(0xaa))
        );
        assert_eq!(staged(Mode::TestOnly), PlanDecision::Reset);
        assert_eq!(staged(Mode::TestAndConfirm), PlanDecision::Reset);
    }

    #[test]
    fn foreign_confirmed_in_secondary_confirms_primary() {
        let mut slates = vec![slate(0, 0xaa)];
        let r = report(vec![
            EntrySpec { confirmed: true, ..entry(0, 0, hash(0x11)) },
            EntrySpec { confirmed: true, ..entry(0, 1, hash(0x22)) },
        ]);
        assert_eq!(
            evaluate(&r, &mut slates, Mode::ConfirmOnly),
            PlanDecision::ValidationConfirm(hash(0x11))
        );
    }

    #[test]
    fn foreign_confirmed_without_primary_is_invalid() {
        let mut slates = vec![slate(0, 0xaa)];
        let r = report(vec![EntrySpec {
            confirmed: true,
            ..entry(0, 1, hash(0x22))
        }]);
        assert!(matches!(
            evaluate(&r, &mut slates, Mode::ConfirmOnly),
            PlanDecision::Fail(UpgradeError::InvalidResponse(_))
        ));
    }

    #[test]
    fn foreign_pending_in_secondary_revalidates_after_reset() {
        let mut slates = vec![slate(0, 0xaa)];
        let r = report(vec![
            EntrySpec { confirmed: true, ..entry(0, 0, hash(0x11)) },
            EntrySpec { pending: true, ..entry(0, 1, hash(0x22)) },
        ]);
        assert_eq!(
            evaluate(&r, &mut slates, Mode::TestAndConfirm),
            PlanDecision::ResetAndRevalidate
        );
    }

    #[test]
    fn foreign_inert_in_secondary_is_overwritten_by_upload() {
        let mut slates = vec![slate(0, 0xaa)];
        let r = report(vec![
            EntrySpec { confirmed: true, ..entry(0, 0, hash(0x11)) },
            entry(0, 1, hash(0x22)),
        ]);
        assert_eq!(
            evaluate(&r, &mut slates, Mode::ConfirmOnly),
            PlanDecision::Upload
        );
    }

    #[test]
    fn first_actionable_slate_wins() {
        // Image 0 is fully done; image 1 is staged idle. The scan stops
        // at image 1's decision.
        let mut slates = vec![slate(0, 0xaa), slate(1, 0xbb)];
        let r = report(vec![
            EntrySpec { confirmed: true, ..entry(0, 0, hash(0xaa)) },
            EntrySpec { confirmed: true, ..entry(1, 0, hash(0x11)) },
            entry(1, 1, hash(0xbb)),
        ]);
        assert_eq!(
            evaluate(&r, &mut slates, Mode::ConfirmOnly),
            PlanDecision::Confirm(hash(0xbb))
        );
        assert!(slates[0].confirmed());
        assert!(slates[1].uploaded());
    }

    #[test]
    fn mixed_coverage_still_uploads() {
        // Image 0 already confirmed, image 1 absent entirely.
        let mut slates = vec![slate(0, 0xaa), slate(1, 0xbb)];
        let r = report(vec![
            EntrySpec { confirmed: true, ..entry(0, 0, hash(0xaa)) },
            EntrySpec { confirmed: true, ..entry(1, 0, hash(0x11)) },
        ]);
        assert_eq!(
            evaluate(&r, &mut slates, Mode::ConfirmOnly),
            PlanDecision::Upload
        );
        assert!(slates[0].uploaded());
        assert!(!slates[1].uploaded());
    }
}
