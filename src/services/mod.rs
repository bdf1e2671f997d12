//! Domain services used by the websocket routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own canvas and roster state transitions so the route
//! handlers can stay focused on protocol translation and fan-out.

pub mod reaper;
pub mod room;
pub mod roster;
