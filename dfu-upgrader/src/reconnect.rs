// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection after a device reset.
//!
//! The device-side swap runs during the post-reset boot and can take
//! seconds; connecting before it finishes just fails. We wait out the
//! caller's swap-time estimate, measured from the reset response, before
//! asking the transport to reconnect.

use crate::error::UpgradeError;
use dfu_mgmt::ConnectOutcome;
use dfu_mgmt::ConnectionState;
use dfu_mgmt::Transport;
use slog::debug;
use slog::info;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;

/// Wait for the post-reset disconnect, sleep out the remaining swap
/// time, and bring the transport back up.
///
/// `reset_response_time` is when the reset command was acknowledged; the
/// disconnect may arrive before or after it.
pub(crate) async fn rejoin_after_reset(
    transport: &Arc<dyn Transport>,
    conn_rx: &mut watch::Receiver<ConnectionState>,
    reset_response_time: Instant,
    estimated_swap_time: Duration,
    log: &Logger,
) -> Result<(), UpgradeError> {
    await_state(conn_rx, ConnectionState::Disconnected).await?;

    let elapsed = reset_response_time.elapsed();
    let remaining = estimated_swap_time.saturating_sub(elapsed);
    debug!(
        log, "device disconnected after reset";
        "elapsed_millis" => elapsed.as_millis(),
        "swap_wait_millis" => remaining.as_millis(),
    );
    if !remaining.is_zero() {
        tokio::time::sleep(remaining).await;
    }

    match transport.connect().await {
        Ok(ConnectOutcome::Connected) => {
            info!(log, "reconnected after reset");
            Ok(())
        }
        Ok(ConnectOutcome::Deferred) => {
            debug!(log, "reconnect deferred; waiting for transport");
            await_state(conn_rx, ConnectionState::Connected).await?;
            info!(log, "reconnected after reset");
            Ok(())
        }
        Err(err) => Err(UpgradeError::ConnectionFailedAfterReset(err)),
    }
}

async fn await_state(
    conn_rx: &mut watch::Receiver<ConnectionState>,
    wanted: ConnectionState,
) -> Result<(), UpgradeError> {
    loop {
        if *conn_rx.borrow_and_update() == wanted {
            return Ok(());
        }
        if conn_rx.changed().await.is_err() {
            return Err(UpgradeError::Transport(
                dfu_mgmt::ClientError::Transport(
                    "transport dropped its connection-state channel"
                        .to_string(),
                ),
            ));
        }
    }
}
