// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The upgrade state machine.
//!
//! [`FirmwareUpgrader`] is the caller-facing handle; each call to
//! [`FirmwareUpgrader::start`] spawns an inner task that owns every piece
//! of mutable upgrade state and drives the transaction to a terminal
//! event. The handle talks to the task over an unbounded control channel
//! and observes it through a watch channel, so the task never shares its
//! state and holds no locks across a suspension point.
//!
//! The task issues one management request at a time. Control input is
//! honored at command boundaries: `pause` inhibits the next command,
//! `cancel` aborts the image client's chunk pump while an upload is in
//! flight and is ignored everywhere else.

use crate::config::Mode;
use crate::config::UpgradeConfiguration;
use crate::config::MTU_MAX;
use crate::config::MTU_MIN;
use crate::error::UpgradeError;
use crate::events::UpgradeEvent;
use crate::image::ImageParser;
use crate::planner;
use crate::planner::PlanDecision;
use crate::reconnect;
use crate::slate::ImageHash;
use crate::slate::ImageSlate;
use dfu_mgmt::BasicClient;
use dfu_mgmt::DefaultClient;
use dfu_mgmt::ImageClient;
use dfu_mgmt::ImageStateResponse;
use dfu_mgmt::ReturnCode;
use dfu_mgmt::Transport;
use dfu_mgmt::UploadImage;
use dfu_mgmt::UploadOutcome;
use dfu_mgmt::UploadSettings;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::fmt;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::watch;
use uuid::Uuid;

/// Where the machine currently is.
///
/// `None` means idle: no upgrade is running. `Success` is observed
/// transiently on the way to `None` when an upgrade completes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeState {
    None,
    RequestParameters,
    Validate,
    Upload,
    Test,
    Reset,
    Confirm,
    Success,
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeState::None => "none",
            UpgradeState::RequestParameters => "request-parameters",
            UpgradeState::Validate => "validate",
            UpgradeState::Upload => "upload",
            UpgradeState::Test => "test",
            UpgradeState::Reset => "reset",
            UpgradeState::Confirm => "confirm",
            UpgradeState::Success => "success",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug)]
enum ControlMsg {
    Pause,
    Resume,
    Cancel,
}

/// Drives firmware upgrades against one device.
///
/// Construct once per device with the transport and command clients, then
/// call [`start`](Self::start) per upgrade. Lifecycle events arrive on
/// the channel returned by [`new`](Self::new); the handle itself only
/// carries control input and cheap predicates.
pub struct FirmwareUpgrader {
    transport: Arc<dyn Transport>,
    image_client: Arc<dyn ImageClient>,
    default_client: Arc<dyn DefaultClient>,
    basic_client: Arc<dyn BasicClient>,
    parser: Arc<dyn ImageParser>,
    mode: Mode,
    estimated_swap_time: Duration,
    events_tx: mpsc::UnboundedSender<UpgradeEvent>,
    state_tx: watch::Sender<UpgradeState>,
    state_rx: watch::Receiver<UpgradeState>,
    paused: Arc<AtomicBool>,
    control: StdMutex<mpsc::UnboundedSender<ControlMsg>>,
    log: Logger,
}

impl FirmwareUpgrader {
    pub fn new(
        transport: Arc<dyn Transport>,
        image_client: Arc<dyn ImageClient>,
        default_client: Arc<dyn DefaultClient>,
        basic_client: Arc<dyn BasicClient>,
        parser: Arc<dyn ImageParser>,
        log: Logger,
    ) -> (Self, mpsc::UnboundedReceiver<UpgradeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(UpgradeState::None);
        // Replaced with a live channel by each `start()`.
        let (control, _) = mpsc::unbounded_channel();
        let upgrader = Self {
            transport,
            image_client,
            default_client,
            basic_client,
            parser,
            mode: Mode::default(),
            estimated_swap_time: Duration::ZERO,
            events_tx,
            state_tx,
            state_rx,
            paused: Arc::new(AtomicBool::new(false)),
            control: StdMutex::new(control),
            log,
        };
        (upgrader, events_rx)
    }

    /// Choose how staged images get activated. Takes effect at the next
    /// `start`; ignored while an upgrade is running.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.is_in_progress() {
            warn!(self.log, "ignoring mode change during upgrade");
            return;
        }
        self.mode = mode;
    }

    /// Estimate of how long the device-side image swap takes after a
    /// reset; reconnection is delayed by this much.
    pub fn set_estimated_swap_time(&mut self, estimate: Duration) {
        if self.is_in_progress() {
            warn!(self.log, "ignoring swap-time change during upgrade");
            return;
        }
        self.estimated_swap_time = estimate;
    }

    /// Begin an upgrade of `images`, each a `(image index, firmware
    /// blob)` pair.
    ///
    /// Fails synchronously with [`UpgradeError::AlreadyRunning`] if an
    /// upgrade is active, and with [`UpgradeError::InvalidImage`] if any
    /// blob cannot be parsed to a hash.
    pub fn start(
        &self,
        images: Vec<(u32, Vec<u8>)>,
        configuration: UpgradeConfiguration,
    ) -> Result<(), UpgradeError> {
        if configuration.pipeline_depth == 0 {
            return Err(UpgradeError::InvalidConfiguration(
                "pipeline_depth must be at least 1",
            ));
        }
        if images.is_empty() {
            return Err(UpgradeError::InvalidImage(
                "no firmware images supplied".to_string(),
            ));
        }

        let mut slates = Vec::with_capacity(images.len());
        for (index, data) in images {
            let hash = self.parser.hash(&data)?;
            slates.push(ImageSlate::new(index, data, hash));
        }
        slates.sort();
        if slates.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(UpgradeError::InvalidImage(
                "duplicate (index, hash) pair".to_string(),
            ));
        }

        let mut control = self.control.lock().unwrap();
        if *self.state_rx.borrow() != UpgradeState::None {
            return Err(UpgradeError::AlreadyRunning);
        }
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        *control = ctl_tx;
        self.paused.store(false, Ordering::SeqCst);

        let upgrade_id = Uuid::new_v4();
        let log = self.log.new(o!("upgrade_id" => upgrade_id.to_string()));
        info!(
            log, "starting firmware upgrade";
            "mode" => ?self.mode,
            "images" => slates.len(),
        );

        self.state_tx.send_replace(UpgradeState::RequestParameters);
        self.emit(UpgradeEvent::UpgradeStarted { mode: self.mode });
        self.emit(UpgradeEvent::StateChanged {
            from: UpgradeState::None,
            to: UpgradeState::RequestParameters,
        });

        let inner = Inner {
            log,
            transport: Arc::clone(&self.transport),
            image_client: Arc::clone(&self.image_client),
            default_client: Arc::clone(&self.default_client),
            basic_client: Arc::clone(&self.basic_client),
            mode: self.mode,
            estimated_swap_time: self.estimated_swap_time,
            configuration,
            slates,
            state: UpgradeState::RequestParameters,
            state_tx: self.state_tx.clone(),
            events_tx: self.events_tx.clone(),
            ctl_rx,
            paused: Arc::clone(&self.paused),
        };
        tokio::spawn(inner.run());
        Ok(())
    }

    /// Abort the upgrade. Effective only while the upload is in flight;
    /// past upload, rolling back is worse than completing, so this is a
    /// no-op.
    pub fn cancel(&self) {
        let _ = self.control.lock().unwrap().send(ControlMsg::Cancel);
    }

    /// Stop issuing management commands. While uploading, the chunk pump
    /// stops at the next chunk boundary; in other states the machine
    /// holds off its next command.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.control.lock().unwrap().send(ControlMsg::Pause);
    }

    /// Resume a paused upgrade from the state it was paused in.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.control.lock().unwrap().send(ControlMsg::Resume);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_in_progress(&self) -> bool {
        *self.state_rx.borrow() != UpgradeState::None
    }

    pub fn state(&self) -> UpgradeState {
        *self.state_rx.borrow()
    }

    /// Observe state transitions without consuming lifecycle events.
    pub fn state_watch(&self) -> watch::Receiver<UpgradeState> {
        self.state_rx.clone()
    }

    /// Set the transport MTU used for upload chunks. Returns true iff
    /// the value is within [`MTU_MIN`]..=[`MTU_MAX`]; in-range values are
    /// forwarded to the image client, and a client that declines one is
    /// logged without affecting the return value.
    pub fn set_upload_mtu(&self, mtu: u16) -> bool {
        if !(MTU_MIN..=MTU_MAX).contains(&mtu) {
            return false;
        }
        if !self.image_client.set_mtu(mtu) {
            warn!(self.log, "image client declined upload mtu"; "mtu" => mtu);
        }
        true
    }

    fn emit(&self, event: UpgradeEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// What the machine does after a reset completes and the device is back.
#[derive(Clone, Copy, Debug)]
enum AfterReset {
    /// Run validation again from scratch.
    Revalidate,
    /// The staged image activated during the reboot: verify it in
    /// test-and-confirm mode, otherwise the upgrade is done.
    Activate,
}

/// What the machine does after a confirm scan completes.
#[derive(Clone, Copy, Debug)]
enum AfterConfirm {
    Reset,
    Success,
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Success,
    Cancelled,
}

/// One step of the transition graph; `drive()` walks these.
#[derive(Clone, Copy, Debug)]
enum Step {
    RequestParameters,
    Validate,
    Upload,
    Test(ImageHash),
    /// `None` confirms whatever is running in the primary slot (the
    /// post-reboot verify).
    Confirm(Option<ImageHash>),
    Reset(AfterReset),
    Done(Outcome),
}

/// The running upgrade. Owns all mutable state; lives on its own task
/// from `start()` until a terminal transition.
struct Inner {
    log: Logger,
    transport: Arc<dyn Transport>,
    image_client: Arc<dyn ImageClient>,
    default_client: Arc<dyn DefaultClient>,
    basic_client: Arc<dyn BasicClient>,
    mode: Mode,
    estimated_swap_time: Duration,
    configuration: UpgradeConfiguration,
    slates: Vec<ImageSlate>,
    state: UpgradeState,
    state_tx: watch::Sender<UpgradeState>,
    events_tx: mpsc::UnboundedSender<UpgradeEvent>,
    ctl_rx: mpsc::UnboundedReceiver<ControlMsg>,
    paused: Arc<AtomicBool>,
}

impl Inner {
    async fn run(mut self) {
        match self.drive().await {
            Ok(Outcome::Success) => {
                self.set_state(UpgradeState::Success);
                self.state_tx.send_replace(UpgradeState::None);
                info!(self.log, "firmware upgrade complete");
                self.emit(UpgradeEvent::UpgradeComplete);
            }
            Ok(Outcome::Cancelled) => {
                self.state_tx.send_replace(UpgradeState::None);
                info!(self.log, "firmware upgrade cancelled");
                self.emit(UpgradeEvent::UpgradeCancelled {
                    state: UpgradeState::None,
                });
            }
            Err(error) => {
                let failure_state = self.state;
                self.state_tx.send_replace(UpgradeState::None);
                error!(
                    self.log, "firmware upgrade failed";
                    "state" => %failure_state,
                    "err" => %error,
                );
                self.emit(UpgradeEvent::UpgradeFailed {
                    state: failure_state,
                    error,
                });
            }
        }
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn drive(&mut self) -> Result<Outcome, UpgradeError> {
        let mut step = Step::RequestParameters;
        loop {
            step = match step {
                Step::RequestParameters => {
                    self.request_parameters().await;
                    Step::Validate
                }
                Step::Validate => {
                    self.set_state(UpgradeState::Validate);
                    self.pause_point().await;
                    let report = self.read_image_state().await?;
                    debug!(
                        self.log, "validating images against device state";
                        "slots" => report.images.len(),
                    );
                    match planner::evaluate(
                        &report,
                        &mut self.slates,
                        self.mode,
                    ) {
                        PlanDecision::Success => Step::Done(Outcome::Success),
                        PlanDecision::Upload => Step::Upload,
                        PlanDecision::Test(hash) => Step::Test(hash),
                        PlanDecision::Confirm(hash) => {
                            Step::Confirm(Some(hash))
                        }
                        PlanDecision::ValidationConfirm(hash) => {
                            self.validation_confirm(hash).await?;
                            Step::Validate
                        }
                        PlanDecision::Reset => {
                            Step::Reset(AfterReset::Activate)
                        }
                        PlanDecision::ResetAndRevalidate => {
                            Step::Reset(AfterReset::Revalidate)
                        }
                        PlanDecision::Fail(err) => return Err(err),
                    }
                }
                Step::Upload => {
                    self.set_state(UpgradeState::Upload);
                    self.pause_point().await;
                    match self.run_upload().await? {
                        UploadOutcome::Cancelled => {
                            return Ok(Outcome::Cancelled);
                        }
                        UploadOutcome::Finished => {
                            self.erase_app_settings_gate().await?;
                            self.after_upload()
                        }
                    }
                }
                Step::Test(hash) => {
                    self.set_state(UpgradeState::Test);
                    self.run_test(hash).await?;
                    Step::Reset(AfterReset::Activate)
                }
                Step::Confirm(target) => {
                    self.set_state(UpgradeState::Confirm);
                    match self.run_confirm(target).await? {
                        AfterConfirm::Reset => {
                            Step::Reset(AfterReset::Activate)
                        }
                        AfterConfirm::Success => Step::Done(Outcome::Success),
                    }
                }
                Step::Reset(after) => {
                    self.run_reset().await?;
                    match after {
                        AfterReset::Revalidate => Step::Validate,
                        AfterReset::Activate => match self.mode {
                            Mode::TestAndConfirm => Step::Confirm(None),
                            Mode::TestOnly | Mode::ConfirmOnly => {
                                Step::Done(Outcome::Success)
                            }
                        },
                    }
                }
                Step::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// Negotiate the reassembly buffer size. This is the one request
    /// whose failure is absorbed: older firmware predates the command.
    async fn request_parameters(&mut self) {
        self.set_state(UpgradeState::RequestParameters);
        self.pause_point().await;
        match self.default_client.params().await {
            Err(err) => {
                warn!(
                    self.log,
                    "parameter negotiation failed; proceeding without";
                    "err" => %err,
                );
                self.configuration.reassembly_buffer_size = 0;
            }
            Ok(None) => {
                warn!(
                    self.log,
                    "parameter negotiation returned no response; \
                     proceeding without",
                );
                self.configuration.reassembly_buffer_size = 0;
            }
            Ok(Some(resp)) if !resp.is_success() => {
                info!(
                    self.log,
                    "device does not support parameter negotiation";
                    "rc" => %resp.error_code(),
                );
                self.configuration.reassembly_buffer_size = 0;
            }
            Ok(Some(resp)) => {
                debug!(
                    self.log, "negotiated parameters";
                    "buf_size" => resp.buf_size,
                    "buf_count" => resp.buf_count,
                );
                self.configuration.reassembly_buffer_size = resp.buf_size;
            }
        }
    }

    async fn read_image_state(
        &mut self,
    ) -> Result<ImageStateResponse, UpgradeError> {
        let resp = self
            .image_client
            .list()
            .await?
            .ok_or(UpgradeError::NilResponse)?;
        if !resp.is_success() {
            return Err(UpgradeError::RemoteReturnCode(resp.error_code()));
        }
        if resp.images.is_empty() {
            return Err(UpgradeError::InvalidResponse(
                "image list reported no slots",
            ));
        }
        Ok(resp)
    }

    /// Confirm the primary slot's image to release a foreign image's
    /// hold on the secondary slot; validation restarts afterwards.
    async fn validation_confirm(
        &mut self,
        hash: ImageHash,
    ) -> Result<(), UpgradeError> {
        self.pause_point().await;
        debug!(
            self.log, "confirming primary image to free secondary slot";
            "hash" => %hash,
        );
        let resp = self
            .image_client
            .confirm(Some(hash.to_vec()))
            .await?
            .ok_or(UpgradeError::NilResponse)?;
        if !resp.is_success() {
            return Err(UpgradeError::RemoteReturnCode(resp.error_code()));
        }
        Ok(())
    }

    async fn run_upload(&mut self) -> Result<UploadOutcome, UpgradeError> {
        let images: Vec<UploadImage> = self
            .slates
            .iter()
            .filter(|s| !s.uploaded())
            .map(|s| UploadImage { image: s.index(), data: s.data().to_vec() })
            .collect();
        let settings = UploadSettings {
            pipeline_depth: self.configuration.pipeline_depth,
            byte_alignment: self.configuration.byte_alignment,
            reassembly_buffer_size: self.configuration.reassembly_buffer_size,
        };
        info!(
            self.log, "uploading images";
            "count" => images.len(),
            "total_bytes" => images.iter().map(|i| i.data.len()).sum::<usize>(),
        );

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let client = Arc::clone(&self.image_client);
        let events_tx = self.events_tx.clone();
        let log = self.log.clone();
        let mut upload = client.upload(images, settings, progress_tx);
        let outcome = loop {
            tokio::select! {
                result = &mut upload => {
                    // Forward any progress still queued behind completion.
                    while let Ok(progress) = progress_rx.try_recv() {
                        let _ = events_tx
                            .send(UpgradeEvent::UploadProgressChanged(progress));
                    }
                    break result?;
                }
                Some(progress) = progress_rx.recv() => {
                    let _ = events_tx
                        .send(UpgradeEvent::UploadProgressChanged(progress));
                }
                Some(msg) = self.ctl_rx.recv() => match msg {
                    ControlMsg::Pause => client.pause_upload(),
                    ControlMsg::Resume => client.continue_upload(),
                    ControlMsg::Cancel => {
                        info!(log, "cancelling upload");
                        client.cancel_upload();
                    }
                },
            }
        };

        if let UploadOutcome::Finished = outcome {
            for slate in self.slates.iter_mut().filter(|s| !s.uploaded()) {
                slate.mark_uploaded();
            }
            info!(self.log, "upload complete");
        }
        Ok(outcome)
    }

    /// Service the erase-app-settings request once, then fall through to
    /// the post-upload dispatch.
    ///
    /// Some devices answer "nothing to erase" with a non-zero legacy
    /// return code; that counts as success here. The command only fails
    /// the upgrade on a transport error or a response that reports a
    /// group error while the legacy code still reads zero.
    async fn erase_app_settings_gate(&mut self) -> Result<(), UpgradeError> {
        while self.configuration.erase_app_settings {
            self.pause_point().await;
            debug!(self.log, "erasing app settings");
            let resp = self
                .basic_client
                .erase_app_settings()
                .await?
                .ok_or(UpgradeError::NilResponse)?;
            if !resp.is_success() && resp.rc == ReturnCode::OK {
                return Err(UpgradeError::RemoteReturnCode(resp.error_code()));
            }
            if !resp.is_success() {
                debug!(
                    self.log, "erase-app-settings returned benign code";
                    "rc" => %resp.rc,
                );
            }
            self.configuration.erase_app_settings = false;
        }
        Ok(())
    }

    fn after_upload(&self) -> Step {
        match self.mode {
            Mode::ConfirmOnly => {
                match self.slates.iter().find(|s| !s.confirmed()) {
                    Some(slate) => Step::Confirm(Some(slate.hash())),
                    None => Step::Done(Outcome::Success),
                }
            }
            Mode::TestOnly | Mode::TestAndConfirm => {
                // Images found running in the primary slot were never
                // staged and have nothing to test.
                match self
                    .slates
                    .iter()
                    .find(|s| !s.tested() && !s.running())
                {
                    Some(slate) => Step::Test(slate.hash()),
                    None => Step::Reset(AfterReset::Activate),
                }
            }
        }
    }

    /// Issue image-test commands until every participating image's
    /// secondary slot reports pending.
    async fn run_test(
        &mut self,
        mut target: ImageHash,
    ) -> Result<(), UpgradeError> {
        loop {
            self.pause_point().await;
            debug!(self.log, "requesting test"; "hash" => %target);
            let resp = self
                .image_client
                .test(target.to_vec())
                .await?
                .ok_or(UpgradeError::NilResponse)?;
            if !resp.is_success() {
                return Err(UpgradeError::RemoteReturnCode(resp.error_code()));
            }

            let mut retest = None;
            for slate in self.slates.iter_mut() {
                if slate.confirmed() || slate.running() {
                    // Already accounted for by validation; nothing is
                    // staged for it, so it is not part of the test round.
                    continue;
                }
                let staged_pending = resp
                    .slot(slate.index(), planner::SLOT_SECONDARY)
                    .map(|e| slate.matches(e) && e.pending)
                    .unwrap_or(false);
                if staged_pending {
                    slate.mark_tested();
                } else if !slate.tested() {
                    retest = Some(slate.hash());
                    break;
                } else {
                    return Err(UpgradeError::NotPending);
                }
            }
            match retest {
                Some(hash) => target = hash,
                None => return Ok(()),
            }
        }
    }

    /// Issue image-confirm commands and interpret the resulting slot
    /// report.
    ///
    /// `target == None` is the post-reboot verify: it confirms whatever
    /// runs in the primary slot and checks that the staged image actually
    /// booted.
    async fn run_confirm(
        &mut self,
        mut target: Option<ImageHash>,
    ) -> Result<AfterConfirm, UpgradeError> {
        loop {
            self.pause_point().await;
            match &target {
                Some(hash) => {
                    debug!(self.log, "requesting confirm"; "hash" => %hash);
                }
                None => debug!(self.log, "verifying running image"),
            }
            let resp = self
                .image_client
                .confirm(target.map(|h| h.to_vec()))
                .await?
                .ok_or(UpgradeError::NilResponse)?;
            if !resp.is_success() {
                return Err(UpgradeError::RemoteReturnCode(resp.error_code()));
            }

            match self.mode {
                Mode::ConfirmOnly => {
                    let mut again = None;
                    for slate in self.slates.iter_mut() {
                        if slate.confirmed() {
                            continue;
                        }
                        let Some(entry) =
                            resp.slot(slate.index(), planner::SLOT_SECONDARY)
                        else {
                            // No secondary entry: acceptable only when
                            // the image is visibly running.
                            let running = resp
                                .slot(slate.index(), planner::SLOT_PRIMARY)
                                .map(|e| slate.matches(e))
                                .unwrap_or(false);
                            if !running {
                                return Err(UpgradeError::InvalidResponse(
                                    "no slot entry for an image being \
                                     confirmed",
                                ));
                            }
                            slate.mark_confirmed();
                            continue;
                        };
                        if entry.permanent {
                            slate.mark_confirmed();
                        } else if entry.pending {
                            // A pending image only becomes permanent
                            // through a reboot.
                            return Ok(AfterConfirm::Reset);
                        } else if !slate.confirmed() {
                            again = Some(slate.hash());
                            break;
                        } else {
                            return Err(UpgradeError::NotPermanent);
                        }
                    }
                    match again {
                        Some(hash) => target = Some(hash),
                        None => return Ok(AfterConfirm::Reset),
                    }
                }
                Mode::TestAndConfirm => {
                    for slate in self.slates.iter_mut() {
                        if slate.confirmed() {
                            continue;
                        }
                        let Some(entry) =
                            resp.slot(slate.index(), planner::SLOT_PRIMARY)
                        else {
                            return Err(UpgradeError::SlotCountMismatch);
                        };
                        if !slate.matches(entry) {
                            return Err(UpgradeError::BootFailed);
                        }
                        if !entry.confirmed {
                            return Err(UpgradeError::NotConfirmed);
                        }
                        slate.mark_confirmed();
                    }
                    return Ok(AfterConfirm::Success);
                }
                Mode::TestOnly => {
                    unreachable!("confirm is never issued in test-only mode")
                }
            }
        }
    }

    /// Send the reset, wait out the swap, and reconnect.
    async fn run_reset(&mut self) -> Result<(), UpgradeError> {
        self.set_state(UpgradeState::Reset);
        self.pause_point().await;
        // Observe connection state from before the reset goes out, so a
        // disconnect racing the response is not missed.
        let mut conn_rx = self.transport.state_changes();
        debug!(self.log, "requesting reset");
        let resp = self
            .default_client
            .reset()
            .await?
            .ok_or(UpgradeError::NilResponse)?;
        if !resp.is_success() {
            return Err(UpgradeError::RemoteReturnCode(resp.error_code()));
        }
        let reset_response_time = Instant::now();
        reconnect::rejoin_after_reset(
            &self.transport,
            &mut conn_rx,
            reset_response_time,
            self.estimated_swap_time,
            &self.log,
        )
        .await
    }

    /// Command boundary: service queued control input, and hold here
    /// while paused.
    async fn pause_point(&mut self) {
        while let Ok(msg) = self.ctl_rx.try_recv() {
            self.note_idle_control(msg);
        }
        if self.paused.load(Ordering::SeqCst) {
            debug!(self.log, "paused; holding before next command");
        }
        while self.paused.load(Ordering::SeqCst) {
            match self.ctl_rx.recv().await {
                Some(msg) => self.note_idle_control(msg),
                // The handle is gone; nobody can resume us, so carry the
                // upgrade to a terminal state rather than hang.
                None => return,
            }
        }
    }

    fn note_idle_control(&self, msg: ControlMsg) {
        if let ControlMsg::Cancel = msg {
            // Cancellation only applies while the upload is in flight.
            debug!(self.log, "ignoring cancel outside of upload");
        }
    }

    fn set_state(&mut self, to: UpgradeState) {
        if self.state == to {
            return;
        }
        let from = mem::replace(&mut self.state, to);
        self.state_tx.send_replace(to);
        info!(
            self.log, "upgrade state changed";
            "from" => %from,
            "to" => %to,
        );
        self.emit(UpgradeEvent::StateChanged { from, to });
    }

    fn emit(&self, event: UpgradeEvent) {
        let _ = self.events_tx.send(event);
    }
}
