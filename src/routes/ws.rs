//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, assigns an ephemeral identity and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from peers → forward to client
//!
//! Handler functions are pure business logic — they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! reply to sender and broadcast to room peers. The server is the sole
//! ordering authority: strokes enter history in receipt order under the
//! registry lock, never client-timestamp order.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade with `?room=<id>` → roster registration → `session:connected`
//! 2. Room join → `canvas:state` snapshot
//! 3. Client sends frames → dispatch → handler returns Outcome
//! 4. Dispatch applies Outcome (reply / broadcast / both)
//! 5. Close → room part + roster removal (rebroadcasts the roster)

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services;
use crate::services::room::StrokeDraft;
use crate::state::AppState;

/// Room joined when the client doesn't name one.
const DEFAULT_ROOM: &str = "lobby";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
enum Outcome {
    /// Broadcast done+data to ALL room clients including sender.
    /// Sender's copy carries `parent_id` for correlation.
    Broadcast(Data),
    /// Broadcast data to all room peers EXCLUDING sender. No reply to
    /// sender. Used for cursor moves (ephemeral, last-write-wins).
    BroadcastExcludeSender(Data),
    /// Reply to sender with one payload, broadcast different data to peers.
    ReplyAndBroadcast { reply: Data, broadcast: Data },
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let room_id = params
        .get("room")
        .cloned()
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());

    ws.on_upgrade(move |socket| run_ws(socket, state, room_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, room_id: String) {
    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    let (user_id, color) = services::roster::register(&state, client_tx.clone()).await;

    let welcome = Frame::request("session:connected", Data::new())
        .with_room_id(room_id.clone())
        .with_data("user_id", user_id.to_string())
        .with_data("color", color);
    if send_frame(&mut socket, &welcome).await.is_err() {
        services::roster::unregister(&state, user_id).await;
        return;
    }

    // Bootstrap the replica with the current active strokes.
    let snapshot = services::room::join_room(&state, &room_id, user_id, client_tx).await;
    let mut snap_data = Data::new();
    snap_data.insert("strokes".into(), serde_json::to_value(&snapshot).unwrap_or_default());
    let state_frame = Frame::request("canvas:state", snap_data).with_room_id(room_id.clone());
    if send_frame(&mut socket, &state_frame).await.is_err() {
        services::room::part_room(&state, &room_id, user_id).await;
        services::roster::unregister(&state, user_id).await;
        return;
    }

    info!(%user_id, %room_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let sender_frames = process_inbound_text(&state, &room_id, user_id, &text).await;
                        for frame in sender_frames {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // A vanished connection is treated exactly like a graceful close:
    // nothing half-committed exists, so cleanup is roster + room removal.
    services::room::part_room(&state, &room_id, user_id).await;
    services::roster::unregister(&state, user_id).await;
    info!(%user_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender. Split from the socket loop so tests can exercise dispatch and
/// fan-out end-to-end without a live transport.
async fn process_inbound_text(
    state: &AppState,
    room_id: &str,
    user_id: Uuid,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%user_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection's identity and room; clients cannot speak for
    // other users or other rooms.
    req.from = Some(user_id.to_string());
    req.room_id = Some(room_id.to_string());

    let prefix = req.prefix();
    if prefix != "cursor" {
        info!(%user_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    // Dispatch to handler — returns Outcome or error Frame.
    let result = match prefix {
        "stroke" => handle_stroke(state, room_id, user_id, &req).await,
        "cursor" => Ok(handle_cursor(user_id, &req)),
        "chat" => handle_chat(state, user_id, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome — the dispatch layer owns all outbound logic.
    match result {
        Ok(Outcome::Broadcast(data)) => {
            let sender_frame = req.done_with(data);
            // Peers get a copy without parent_id (they didn't originate the request).
            let mut peer_frame = sender_frame.clone();
            peer_frame.id = Uuid::new_v4();
            peer_frame.parent_id = None;
            services::room::broadcast(state, room_id, &peer_frame, Some(user_id)).await;
            vec![sender_frame]
        }
        Ok(Outcome::BroadcastExcludeSender(data)) => {
            let frame = Frame::request(&req.syscall, data).with_room_id(room_id);
            services::room::broadcast(state, room_id, &frame, Some(user_id)).await;
            vec![]
        }
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            let sender_frame = req.done_with(reply);
            let notif = Frame::request(&req.syscall, broadcast).with_room_id(room_id);
            services::room::broadcast(state, room_id, &notif, Some(user_id)).await;
            vec![sender_frame]
        }
        Err(err_frame) => {
            vec![err_frame]
        }
    }
}

// =============================================================================
// STROKE HANDLERS
// =============================================================================

async fn handle_stroke(
    state: &AppState,
    room_id: &str,
    user_id: Uuid,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "commit" => {
            let Some(value) = req.data.get("stroke") else {
                return Err(req.error("stroke required"));
            };
            let draft: StrokeDraft = match serde_json::from_value(value.clone()) {
                Ok(d) => d,
                Err(e) => return Err(req.error(format!("invalid stroke: {e}"))),
            };
            if draft.points.is_empty() {
                return Err(req.error("stroke requires at least one point"));
            }

            let stroke = services::room::commit_stroke(state, room_id, user_id, draft).await;
            let stroke_value = serde_json::to_value(&stroke).unwrap_or_default();

            let mut reply = Data::new();
            reply.insert("stroke".into(), stroke_value.clone());

            let mut broadcast = Data::new();
            broadcast.insert("user_id".into(), serde_json::json!(user_id));
            broadcast.insert("stroke".into(), stroke_value);

            Ok(Outcome::ReplyAndBroadcast { reply, broadcast })
        }
        "undo" => match services::room::undo(state, room_id, user_id).await {
            Ok(stroke_id) => {
                let mut data = Data::new();
                data.insert("user_id".into(), serde_json::json!(user_id));
                data.insert("stroke_id".into(), serde_json::json!(stroke_id));
                Ok(Outcome::Broadcast(data))
            }
            Err(e) => Err(req.error_from(&e)),
        },
        "redo" => match services::room::redo(state, room_id, user_id).await {
            Ok(stroke) => {
                let mut data = Data::new();
                data.insert("user_id".into(), serde_json::json!(user_id));
                data.insert("stroke".into(), serde_json::to_value(&stroke).unwrap_or_default());
                Ok(Outcome::Broadcast(data))
            }
            Err(e) => Err(req.error_from(&e)),
        },
        _ => Err(req.error(format!("unknown stroke op: {op}"))),
    }
}

// =============================================================================
// CURSOR HANDLER
// =============================================================================

fn handle_cursor(user_id: Uuid, req: &Frame) -> Outcome {
    let x = req
        .data
        .get("x")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);
    let y = req
        .data
        .get("y")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);

    let mut data = Data::new();
    data.insert("user_id".into(), serde_json::json!(user_id));
    data.insert("x".into(), serde_json::json!(x));
    data.insert("y".into(), serde_json::json!(y));

    Outcome::BroadcastExcludeSender(data)
}

// =============================================================================
// CHAT HANDLER
// =============================================================================

async fn handle_chat(state: &AppState, user_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "send" => {
            let message = req
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim();
            if message.is_empty() {
                return Err(req.error("message required"));
            }

            let color = services::roster::color_of(state, user_id)
                .await
                .unwrap_or_else(|| "#000000".to_string());

            let mut data = Data::new();
            data.insert("user_id".into(), serde_json::json!(user_id));
            data.insert("message".into(), serde_json::json!(message));
            data.insert("color".into(), serde_json::json!(color));

            Ok(Outcome::Broadcast(data))
        }
        _ => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    let is_cursor = frame.syscall.starts_with("cursor:");
    if !is_cursor {
        if frame.status == Status::Error {
            let code = frame
                .data
                .get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            let message = frame
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
