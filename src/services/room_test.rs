use super::*;
use crate::frame::Data;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

fn draft(color: &str) -> StrokeDraft {
    StrokeDraft {
        id: None,
        color: color.into(),
        width: 4.0,
        tool: Tool::Brush,
        points: vec![Point { x: 1.0, y: 2.0 }, Point { x: 3.0, y: 4.0 }],
    }
}

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

#[tokio::test]
async fn commit_assigns_canonical_fields() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    let stroke = commit_stroke(&state, "r1", owner, draft("#3cb44b")).await;

    assert_eq!(stroke.owner_id, owner);
    assert_eq!(stroke.status, StrokeStatus::Active);
    assert_eq!(stroke.seq, 0);
    assert!(stroke.created_at > 0);
    assert_eq!(stroke.points.len(), 2);

    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").expect("room created lazily");
    assert_eq!(room.history.len(), 1);
    assert_eq!(room.history[0].id, stroke.id);
    assert_eq!(room.next_seq, 1);
}

#[tokio::test]
async fn commit_keeps_proposed_id_unless_it_collides() {
    let state = AppState::new();
    let owner = Uuid::new_v4();
    let proposed = Uuid::new_v4();

    let mut d = draft("#e6194b");
    d.id = Some(proposed);
    let first = commit_stroke(&state, "r1", owner, d.clone()).await;
    assert_eq!(first.id, proposed);

    // Same proposed id again: the server must mint a fresh one.
    let second = commit_stroke(&state, "r1", owner, d).await;
    assert_ne!(second.id, proposed);
}

#[tokio::test]
async fn commit_seq_increases_in_receipt_order() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    let a = commit_stroke(&state, "r1", owner, draft("#e6194b")).await;
    let b = commit_stroke(&state, "r1", owner, draft("#3cb44b")).await;
    let c = commit_stroke(&state, "r1", owner, draft("#ffe119")).await;

    assert_eq!((a.seq, b.seq, c.seq), (0, 1, 2));
}

#[tokio::test]
async fn undo_n_strokes_empties_owner_history() {
    let state = AppState::new();
    let owner = Uuid::new_v4();
    let n: usize = 4;

    for _ in 0..n {
        commit_stroke(&state, "r1", owner, draft("#e6194b")).await;
    }
    for _ in 0..n {
        undo(&state, "r1", owner).await.expect("undo should succeed");
    }

    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").unwrap();
    assert_eq!(room.redo_stacks.get(&owner).map(Vec::len), Some(n));
    assert!(
        room.history
            .iter()
            .all(|s| s.owner_id != owner || s.status == StrokeStatus::Undone)
    );
}

#[tokio::test]
async fn undo_picks_most_recent_active_stroke() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    let first = commit_stroke(&state, "r1", owner, draft("#e6194b")).await;
    let second = commit_stroke(&state, "r1", owner, draft("#3cb44b")).await;

    let undone = undo(&state, "r1", owner).await.unwrap();
    assert_eq!(undone, second.id);

    let undone = undo(&state, "r1", owner).await.unwrap();
    assert_eq!(undone, first.id);
}

#[tokio::test]
async fn undo_then_redo_round_trips_same_stroke() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    let committed = commit_stroke(&state, "r1", owner, draft("#4363d8")).await;
    let undone_id = undo(&state, "r1", owner).await.unwrap();
    assert_eq!(undone_id, committed.id);

    let redone = redo(&state, "r1", owner).await.unwrap();
    assert_eq!(redone.id, committed.id);
    assert_eq!(redone.points, committed.points);
    assert_eq!(redone.color, committed.color);
    assert!((redone.width - committed.width).abs() < f64::EPSILON);
    assert_eq!(redone.tool, committed.tool);
    assert_eq!(redone.status, StrokeStatus::Active);

    // Redo does not re-append: the stroke count is unchanged.
    let rooms = state.rooms.read().await;
    assert_eq!(rooms.get("r1").unwrap().history.len(), 1);
}

#[tokio::test]
async fn undo_without_eligible_stroke_mutates_nothing() {
    let state = AppState::new();
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();

    // Only the other user has strokes; owner's undo must not touch them.
    commit_stroke(&state, "r1", other, draft("#f58231")).await;

    let result = undo(&state, "r1", owner).await;
    assert!(matches!(result, Err(RoomError::NothingToUndo)));

    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").unwrap();
    assert_eq!(room.history.len(), 1);
    assert_eq!(room.history[0].status, StrokeStatus::Active);
    assert!(room.redo_stacks.get(&owner).is_none());
}

#[tokio::test]
async fn undo_on_unknown_room_returns_nothing_to_undo() {
    let state = AppState::new();
    let result = undo(&state, "ghost", Uuid::new_v4()).await;
    assert!(matches!(result, Err(RoomError::NothingToUndo)));
    assert!(state.rooms.read().await.is_empty());
}

#[tokio::test]
async fn redo_on_empty_stack_mutates_nothing() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    commit_stroke(&state, "r1", owner, draft("#911eb4")).await;

    let result = redo(&state, "r1", owner).await;
    assert!(matches!(result, Err(RoomError::NothingToRedo)));

    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").unwrap();
    assert_eq!(room.history.len(), 1);
    assert_eq!(room.history[0].status, StrokeStatus::Active);
}

#[tokio::test]
async fn new_commit_clears_owner_redo_stack() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    commit_stroke(&state, "r1", owner, draft("#e6194b")).await;
    commit_stroke(&state, "r1", owner, draft("#3cb44b")).await;
    undo(&state, "r1", owner).await.unwrap();
    undo(&state, "r1", owner).await.unwrap();

    // An unrelated new stroke invalidates the entire redo stack.
    commit_stroke(&state, "r1", owner, draft("#46f0f0")).await;

    let result = redo(&state, "r1", owner).await;
    assert!(matches!(result, Err(RoomError::NothingToRedo)));
}

#[tokio::test]
async fn commit_leaves_other_users_redo_stacks_alone() {
    let state = AppState::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    commit_stroke(&state, "r1", alice, draft("#e6194b")).await;
    undo(&state, "r1", alice).await.unwrap();

    commit_stroke(&state, "r1", bob, draft("#3cb44b")).await;

    // Bob's commit must not invalidate Alice's redo.
    let redone = redo(&state, "r1", alice).await.unwrap();
    assert_eq!(redone.owner_id, alice);
}

#[tokio::test]
async fn undo_only_acts_on_own_strokes() {
    let state = AppState::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    commit_stroke(&state, "r1", alice, draft("#e6194b")).await;
    let bob_stroke = commit_stroke(&state, "r1", bob, draft("#3cb44b")).await;

    // Alice undoes: her stroke flips, Bob's most recent one does not.
    undo(&state, "r1", alice).await.unwrap();

    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").unwrap();
    let bob_in_history = room.history.iter().find(|s| s.id == bob_stroke.id).unwrap();
    assert_eq!(bob_in_history.status, StrokeStatus::Active);
}

#[tokio::test]
async fn snapshot_excludes_undone_and_groups_by_owner() {
    let state = AppState::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let a1 = commit_stroke(&state, "r1", alice, draft("#e6194b")).await;
    let a2 = commit_stroke(&state, "r1", alice, draft("#3cb44b")).await;
    let b1 = commit_stroke(&state, "r1", bob, draft("#ffe119")).await;
    undo(&state, "r1", alice).await.unwrap();

    let snap = snapshot(&state, "r1").await;
    assert_eq!(snap.len(), 2);
    let alice_strokes = snap.get(&alice).unwrap();
    assert_eq!(alice_strokes.len(), 1);
    assert_eq!(alice_strokes[0].id, a1.id);
    assert!(alice_strokes.iter().all(|s| s.id != a2.id));
    let bob_strokes = snap.get(&bob).unwrap();
    assert_eq!(bob_strokes.len(), 1);
    assert_eq!(bob_strokes[0].id, b1.id);
}

#[tokio::test]
async fn snapshot_groups_in_history_order() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    let first = commit_stroke(&state, "r1", owner, draft("#e6194b")).await;
    let second = commit_stroke(&state, "r1", owner, draft("#3cb44b")).await;
    let third = commit_stroke(&state, "r1", owner, draft("#ffe119")).await;

    let snap = snapshot(&state, "r1").await;
    let ids: Vec<Uuid> = snap.get(&owner).unwrap().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);
}

#[tokio::test]
async fn snapshot_of_unknown_room_is_empty() {
    let state = AppState::new();
    assert!(snapshot(&state, "ghost").await.is_empty());
}

#[tokio::test]
async fn concurrent_commits_interleave_without_loss() {
    let state = AppState::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (a, b) = tokio::join!(
        commit_stroke(&state, "r1", alice, draft("#e6194b")),
        commit_stroke(&state, "r1", bob, draft("#3cb44b")),
    );

    assert_ne!(a.id, b.id);
    assert_ne!(a.seq, b.seq);

    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").unwrap();
    assert_eq!(room.history.len(), 2);
    drop(rooms);

    let snap = snapshot(&state, "r1").await;
    assert_eq!(snap.get(&alice).map(Vec::len), Some(1));
    assert_eq!(snap.get(&bob).map(Vec::len), Some(1));
}

#[tokio::test]
async fn rooms_are_independent() {
    let state = AppState::new();
    let owner = Uuid::new_v4();

    commit_stroke(&state, "r1", owner, draft("#e6194b")).await;
    commit_stroke(&state, "r2", owner, draft("#3cb44b")).await;

    undo(&state, "r1", owner).await.unwrap();

    // r2 is untouched by r1's undo.
    let snap = snapshot(&state, "r2").await;
    assert_eq!(snap.get(&owner).map(Vec::len), Some(1));
    assert!(snapshot(&state, "r1").await.is_empty());
}

#[tokio::test]
async fn join_room_returns_snapshot_and_registers_client() {
    let state = AppState::new();
    let painter = Uuid::new_v4();
    let joiner = Uuid::new_v4();

    commit_stroke(&state, "r1", painter, draft("#bcf60c")).await;

    let (tx, _rx) = mpsc::channel(8);
    let snap = join_room(&state, "r1", joiner, tx).await;
    assert_eq!(snap.get(&painter).map(Vec::len), Some(1));

    let rooms = state.rooms.read().await;
    assert!(rooms.get("r1").unwrap().clients.contains_key(&joiner));
}

#[tokio::test]
async fn part_room_stamps_idle_when_last_client_leaves() {
    let state = AppState::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let (tx_a, _rx_a) = mpsc::channel(8);
    let (tx_b, _rx_b) = mpsc::channel(8);

    join_room(&state, "r1", a, tx_a).await;
    join_room(&state, "r1", b, tx_b).await;

    part_room(&state, "r1", a).await;
    {
        let rooms = state.rooms.read().await;
        let room = rooms.get("r1").unwrap();
        assert!(room.idle_since.is_none());
        assert!(room.clients.contains_key(&b));
    }

    part_room(&state, "r1", b).await;
    let rooms = state.rooms.read().await;
    let room = rooms.get("r1").unwrap();
    assert!(room.clients.is_empty());
    assert!(room.idle_since.is_some());
}

#[tokio::test]
async fn rejoin_clears_idle_stamp() {
    let state = AppState::new();
    let user = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);

    join_room(&state, "r1", user, tx.clone()).await;
    part_room(&state, "r1", user).await;
    join_room(&state, "r1", user, tx).await;

    let rooms = state.rooms.read().await;
    assert!(rooms.get("r1").unwrap().idle_since.is_none());
}

#[tokio::test]
async fn broadcast_sends_to_all_except_excluded_client() {
    let state = AppState::new();
    test_helpers::seed_room(&state, "r1").await;

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let user_c = Uuid::new_v4();

    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let (tx_c, mut rx_c) = mpsc::channel(8);

    {
        let mut rooms = state.rooms.write().await;
        let room = rooms.get_mut("r1").expect("room should exist");
        room.clients.insert(user_a, tx_a);
        room.clients.insert(user_b, tx_b);
        room.clients.insert(user_c, tx_c);
    }

    let frame = Frame::request("stroke:commit", Data::new()).with_room_id("r1");
    broadcast(&state, "r1", &frame, Some(user_b)).await;

    let recv_a = assert_channel_has_frame(&mut rx_a).await;
    let recv_c = assert_channel_has_frame(&mut rx_c).await;
    assert_eq!(recv_a.syscall, "stroke:commit");
    assert_eq!(recv_c.syscall, "stroke:commit");
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_unknown_room_is_noop() {
    let state = AppState::new();
    let frame = Frame::request("stroke:undo", Data::new()).with_room_id("ghost");
    broadcast(&state, "ghost", &frame, None).await;
}

#[test]
fn room_error_code_variants() {
    use crate::frame::ErrorCode;

    assert_eq!(RoomError::NothingToUndo.error_code(), "E_NOTHING_TO_UNDO");
    assert_eq!(RoomError::NothingToRedo.error_code(), "E_NOTHING_TO_REDO");
}

#[test]
fn stroke_draft_accepts_size_alias() {
    let json = serde_json::json!({
        "color": "#fabebe",
        "size": 6.0,
        "tool": "pencil",
        "points": [{"x": 0.0, "y": 0.0}],
    });
    let draft: StrokeDraft = serde_json::from_value(json).unwrap();
    assert!((draft.width - 6.0).abs() < f64::EPSILON);
    assert_eq!(draft.tool, Tool::Pencil);
    assert!(draft.id.is_none());
}
