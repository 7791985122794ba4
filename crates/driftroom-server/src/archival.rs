//! Periodic archival sweep (§4.G), a cancellable `tokio::time::interval`
//! task per Design Note §9 ("replace the sleep-in-a-loop archival worker").

use std::sync::Arc;

use chrono::Utc;
use driftroom_db::Store;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Runs the archival sweep until `cancel` fires. Each tick closes and
/// archives every room whose `expires_at` has passed; failures leave a room
/// `closed` for the next tick to retry, matching §4.E Archive's retry
/// contract.
pub async fn run(state: Arc<AppState>, period: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("archival worker shutting down");
                return;
            }
            _ = ticker.tick() => {
                sweep(&state).await;
            }
        }
    }
}

async fn sweep(state: &AppState) {
    let expired = match state.store.get_expired_rooms(Utc::now()).await {
        Ok(ids) => ids,
        Err(err) => {
            error!(error = %err, "failed to list expired rooms");
            return;
        }
    };

    for room_id in expired {
        if let Err(err) = crate::lifecycle::close_room(state.store.as_ref(), &room_id).await {
            warn!(room_id, error = %err, "failed to close expired room");
            continue;
        }
        let room = match state.store.get_room(&room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => continue,
            Err(err) => {
                warn!(room_id, error = %err, "failed to reload room before archiving");
                continue;
            }
        };
        match crate::lifecycle::archive_room(
            state.store.as_ref(),
            state.blob.as_ref(),
            &state.master_key,
            &room,
        )
        .await
        {
            Ok(true) => info!(room_id, "archived expired room"),
            Ok(false) => warn!(room_id, "archive transition rejected, will retry next sweep"),
            Err(err) => warn!(room_id, error = %err, "failed to archive room, will retry next sweep"),
        }
    }
}
