//! Reaper service — background eviction of idle rooms.
//!
//! DESIGN
//! ======
//! Rooms are retained after the last client leaves so reconnecting users
//! keep their canvas. The reaper sweeps on an interval and evicts rooms
//! that have had no clients for the configured TTL, bounding memory for
//! long-lived deployments. Occupied rooms are never evicted.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::state::AppState;

const DEFAULT_ROOM_IDLE_TTL_SECS: u64 = 3600;
const DEFAULT_ROOM_REAP_INTERVAL_SECS: u64 = 60;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Spawn the background reaper task. Returns a handle for shutdown.
pub fn spawn_idle_reaper(state: AppState) -> JoinHandle<()> {
    let ttl = Duration::from_secs(env_parse("ROOM_IDLE_TTL_SECS", DEFAULT_ROOM_IDLE_TTL_SECS));
    let interval =
        Duration::from_secs(env_parse("ROOM_REAP_INTERVAL_SECS", DEFAULT_ROOM_REAP_INTERVAL_SECS));
    info!(ttl_secs = ttl.as_secs(), interval_secs = interval.as_secs(), "idle room reaper configured");

    tokio::spawn(async move {
        loop {
            evict_idle_rooms(&state, ttl).await;
            tokio::time::sleep(interval).await;
        }
    })
}

/// Drop every room that has been empty for at least `ttl`.
pub(crate) async fn evict_idle_rooms(state: &AppState, ttl: Duration) {
    let mut rooms = state.rooms.write().await;
    rooms.retain(|room_id, room| {
        let expired = room.clients.is_empty()
            && room.idle_since.is_some_and(|since| since.elapsed() >= ttl);
        if expired {
            info!(%room_id, strokes = room.history.len(), "evicted idle room");
        }
        !expired
    });
}

#[cfg(test)]
#[path = "reaper_test.rs"]
mod tests;
