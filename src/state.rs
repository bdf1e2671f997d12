//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the room registry plus the process-wide roster. Each room has
//! its own stroke history, per-user redo stacks, and connected clients.
//! Rooms are keyed by caller-chosen string identifiers and created lazily
//! on first reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;

// =============================================================================
// STROKE
// =============================================================================

/// Drawing tool a stroke was made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    Pencil,
    Eraser,
}

/// Visibility of a committed stroke. The only field that changes after
/// commit: undo flips it to `Undone`, redo flips it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeStatus {
    Active,
    Undone,
}

/// One 2-D point of a stroke path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One continuous drawing gesture. Payload (points + styling) is immutable
/// once committed; only `status` changes across undo/redo cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stroke {
    /// Unique within the stroke's room for the room's lifetime.
    pub id: Uuid,
    pub owner_id: Uuid,
    pub color: String,
    pub width: f64,
    pub tool: Tool,
    pub points: Vec<Point>,
    pub status: StrokeStatus,
    /// Per-room receipt sequence assigned by the server. The single
    /// ordering authority for concurrent interleaving.
    pub seq: u64,
    /// Milliseconds since Unix epoch at server receipt. Informational only;
    /// never consulted for ordering.
    pub created_at: i64,
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state. All mutation goes through `services::room`.
pub struct RoomState {
    /// Append-only stroke log in server receipt order.
    pub history: Vec<Stroke>,
    /// Per-user LIFO stacks of stroke ids the user has undone. Ids, not
    /// clones: the stroke stays in `history` and only flips status.
    pub redo_stacks: HashMap<Uuid, Vec<Uuid>>,
    /// Connected clients: `user_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Receipt counter for the next committed stroke.
    pub next_seq: u64,
    /// Set when the last client leaves; cleared on join. Consumed by the
    /// idle-room reaper.
    pub idle_since: Option<Instant>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            redo_stacks: HashMap::new(),
            clients: HashMap::new(),
            next_seq: 0,
            idle_since: None,
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// One online user as shown in the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterUser {
    pub user_id: Uuid,
    pub color: String,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    /// Room registry: lazily created, retained until the reaper evicts.
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    /// Process-wide online list in insertion order.
    pub roster: Arc<RwLock<Vec<RosterUser>>>,
    /// Process-wide `user_id` -> sender map for roster fan-out.
    pub connections: Arc<RwLock<HashMap<Uuid, mpsc::Sender<Frame>>>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            roster: Arc::new(RwLock::new(Vec::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
