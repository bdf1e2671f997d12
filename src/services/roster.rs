//! Roster service — ephemeral identity, colors, and online-list fan-out.
//!
//! DESIGN
//! ======
//! Each connection gets a collision-resistant UUID identity and a color
//! drawn at random from a fixed palette. Colors are cosmetic; reuse across
//! users is acceptable. The roster is process-wide and every change is
//! rebroadcast to all connections, whichever room they are in.

use rand::Rng;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::state::{AppState, RosterUser};

/// Fixed presence palette.
pub const PALETTE: [&str; 10] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe",
];

/// Pick a palette color at random.
#[must_use]
pub fn pick_color() -> String {
    let idx = rand::rng().random_range(0..PALETTE.len());
    PALETTE[idx].to_string()
}

/// Register a new connection: assign identity and color, add it to the
/// roster, and rebroadcast the roster to everyone (the new connection
/// included).
pub async fn register(state: &AppState, tx: mpsc::Sender<Frame>) -> (Uuid, String) {
    let user_id = Uuid::new_v4();
    let color = pick_color();

    {
        let mut roster = state.roster.write().await;
        roster.push(RosterUser { user_id, color: color.clone() });
    }
    {
        let mut connections = state.connections.write().await;
        connections.insert(user_id, tx);
    }

    broadcast_roster(state).await;
    info!(%user_id, %color, "user connected");
    (user_id, color)
}

/// Remove a connection from the roster and rebroadcast.
pub async fn unregister(state: &AppState, user_id: Uuid) {
    {
        let mut roster = state.roster.write().await;
        roster.retain(|u| u.user_id != user_id);
    }
    {
        let mut connections = state.connections.write().await;
        connections.remove(&user_id);
    }

    broadcast_roster(state).await;
    info!(%user_id, "user disconnected");
}

/// Look up a user's assigned color.
pub async fn color_of(state: &AppState, user_id: Uuid) -> Option<String> {
    let roster = state.roster.read().await;
    roster
        .iter()
        .find(|u| u.user_id == user_id)
        .map(|u| u.color.clone())
}

/// Send the current roster to every connection.
pub async fn broadcast_roster(state: &AppState) {
    let users = {
        let roster = state.roster.read().await;
        roster.clone()
    };

    let mut data = Data::new();
    data.insert("users".into(), serde_json::to_value(&users).unwrap_or_default());
    let frame = Frame::request("roster:update", data);

    let connections = state.connections.read().await;
    for tx in connections.values() {
        // Best-effort: a full channel drops this update, the next one wins.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "roster_test.rs"]
mod tests;
