//! inkroom — collaborative drawing server.
//!
//! Per-room authoritative stroke history, per-user undo/redo stacks, and a
//! WebSocket broadcast protocol that keeps every connected client's replica
//! consistent with the server's canonical ordering.

pub mod frame;
pub mod routes;
pub mod services;
pub mod state;
