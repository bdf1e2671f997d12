//! Room service — stroke commits, per-user undo/redo, snapshots, fan-out.
//!
//! DESIGN
//! ======
//! The room registry is the sole mutation boundary for canvas state. Every
//! operation acquires the registry write lock, mutates in memory, and
//! completes synchronously, so commits, undos, and redos within a room are
//! linearizable in server receipt order. The committed stroke (with
//! server-assigned fields) is returned for broadcast.
//!
//! Undo and redo act only on strokes owned by the requesting user. A failed
//! undo/redo is a local return value mapped to an error frame for the
//! requester; it never mutates state.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::frame::Frame;
use crate::state::{AppState, Point, RoomState, Stroke, StrokeStatus, Tool};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("no active stroke to undo")]
    NothingToUndo,
    #[error("no undone stroke to redo")]
    NothingToRedo,
}

impl crate::frame::ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NothingToUndo => "E_NOTHING_TO_UNDO",
            Self::NothingToRedo => "E_NOTHING_TO_REDO",
        }
    }
}

/// Client-proposed stroke, before the server assigns canonical fields.
#[derive(Debug, Clone, Deserialize)]
pub struct StrokeDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub color: String,
    #[serde(alias = "size")]
    pub width: f64,
    pub tool: Tool,
    pub points: Vec<Point>,
}

/// Active strokes grouped by owner, each group in history order.
pub type Snapshot = HashMap<Uuid, Vec<Stroke>>;

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a room, creating it lazily on first reference. Registers the
/// connection's sender and returns the snapshot used to bootstrap the
/// client's replica.
pub async fn join_room(
    state: &AppState,
    room_id: &str,
    user_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Snapshot {
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .entry(room_id.to_string())
        .or_insert_with(RoomState::new);

    room.idle_since = None;
    room.clients.insert(user_id, tx);

    info!(room_id, %user_id, clients = room.clients.len(), "client joined room");
    group_active(&room.history)
}

/// Leave a room. The room itself is retained so reconnecting users keep
/// their canvas; an empty room is stamped idle for the reaper.
pub async fn part_room(state: &AppState, room_id: &str, user_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };

    room.clients.remove(&user_id);
    info!(room_id, %user_id, remaining = room.clients.len(), "client left room");

    if room.clients.is_empty() {
        room.idle_since = Some(std::time::Instant::now());
    }
}

// =============================================================================
// COMMIT
// =============================================================================

/// Commit a stroke: assign canonical id, receipt sequence, and timestamp,
/// append to the room history, and clear the owner's redo stack. Returns
/// the canonical stroke for broadcast.
pub async fn commit_stroke(
    state: &AppState,
    room_id: &str,
    owner_id: Uuid,
    draft: StrokeDraft,
) -> Stroke {
    let mut rooms = state.rooms.write().await;
    let room = rooms
        .entry(room_id.to_string())
        .or_insert_with(RoomState::new);

    // Accept a client-proposed id only if it doesn't collide with an
    // existing stroke; ids must stay unique for the room's lifetime.
    let id = match draft.id {
        Some(id) if !room.history.iter().any(|s| s.id == id) => id,
        _ => Uuid::new_v4(),
    };

    let seq = room.next_seq;
    room.next_seq += 1;

    let stroke = Stroke {
        id,
        owner_id,
        color: draft.color,
        width: draft.width,
        tool: draft.tool,
        points: draft.points,
        status: StrokeStatus::Active,
        seq,
        created_at: crate::frame::now_ms(),
    };

    // A new commit invalidates everything the owner could still redo.
    room.redo_stacks.remove(&owner_id);
    room.history.push(stroke.clone());

    info!(room_id, owner = %owner_id, stroke = %stroke.id, points = stroke.points.len(), "stroke committed");
    stroke
}

// =============================================================================
// UNDO / REDO
// =============================================================================

/// Undo the requesting user's most recent active stroke. Flips it to
/// `Undone` and pushes its id onto the user's redo stack.
///
/// # Errors
///
/// Returns `NothingToUndo` if the user has no active stroke in the room;
/// nothing is mutated in that case.
pub async fn undo(state: &AppState, room_id: &str, user_id: Uuid) -> Result<Uuid, RoomError> {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return Err(RoomError::NothingToUndo);
    };

    // History is in receipt order, so the reverse scan lands on the stroke
    // with the highest receipt sequence owned by this user.
    let Some(stroke) = room
        .history
        .iter_mut()
        .rev()
        .find(|s| s.owner_id == user_id && s.status == StrokeStatus::Active)
    else {
        return Err(RoomError::NothingToUndo);
    };

    stroke.status = StrokeStatus::Undone;
    let stroke_id = stroke.id;
    room.redo_stacks.entry(user_id).or_default().push(stroke_id);

    info!(room_id, %user_id, stroke = %stroke_id, "stroke undone");
    Ok(stroke_id)
}

/// Redo the requesting user's most recently undone stroke. Flips it back to
/// `Active` and returns a clone for broadcast; the stroke is not re-appended
/// to history (it never left).
///
/// # Errors
///
/// Returns `NothingToRedo` if the user's redo stack is empty; nothing is
/// mutated in that case.
pub async fn redo(state: &AppState, room_id: &str, user_id: Uuid) -> Result<Stroke, RoomError> {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return Err(RoomError::NothingToRedo);
    };

    let Some(stack) = room.redo_stacks.get_mut(&user_id) else {
        return Err(RoomError::NothingToRedo);
    };
    // Peek before pop: the id is consumed only once the stroke is resolved.
    let Some(&stroke_id) = stack.last() else {
        return Err(RoomError::NothingToRedo);
    };
    let Some(stroke) = room.history.iter_mut().find(|s| s.id == stroke_id) else {
        // Unreachable: undo only pushes ids of strokes present in history.
        return Err(RoomError::NothingToRedo);
    };

    stack.pop();
    stroke.status = StrokeStatus::Active;

    info!(room_id, %user_id, stroke = %stroke_id, "stroke redone");
    Ok(stroke.clone())
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Active strokes of a room grouped by owner, used to bootstrap a newly
/// joined connection. Empty for an unknown room.
pub async fn snapshot(state: &AppState, room_id: &str) -> Snapshot {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return Snapshot::new();
    };
    group_active(&room.history)
}

fn group_active(history: &[Stroke]) -> Snapshot {
    let mut grouped = Snapshot::new();
    for stroke in history {
        if stroke.status == StrokeStatus::Active {
            grouped
                .entry(stroke.owner_id)
                .or_default()
                .push(stroke.clone());
        }
    }
    grouped
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a room, optionally excluding one.
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room) = rooms.get(room_id) else {
        return;
    };

    for (user_id, tx) in &room.clients {
        if exclude == Some(*user_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
