//! End-to-end presence tests over real WebSocket connections.
//!
//! Verifies:
//! 1. Join notifications and snapshots fire on the user's first connection.
//! 2. Extra connections of the same user join and leave silently.
//! 3. A user's departure is announced exactly once, when the last
//!    connection goes away.
//! 4. Typing, cursor, and status updates relay to room peers but never echo
//!    back to the originator.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard_proto::client::{self, ClientMessage};
use taskboard_proto::event::{self, ServerEvent};
use taskboard_proto::user::UserSummary;
use taskboard_server::broadcast::BroadcastRouter;
use taskboard_server::directory::{StaticCredentials, StaticDirectory, TeamRole};
use taskboard_server::presence::PresenceRegistry;
use taskboard_server::session::{self, BoardState};
use tokio_tungstenite::tungstenite;

type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Starts a server with alice, bob, and carol all on team-1 (alice owns it),
/// and alice alone on team-2.
async fn start_test_server() -> std::net::SocketAddr {
    let mut verifier = StaticCredentials::new();
    verifier.insert("tok-alice", UserSummary::new("u-alice", "alice"));
    verifier.insert("tok-bob", UserSummary::new("u-bob", "bob"));
    verifier.insert("tok-carol", UserSummary::new("u-carol", "carol"));

    let mut directory = StaticDirectory::new();
    directory.add_member("team-1", "u-alice", TeamRole::Owner);
    directory.add_member("team-1", "u-bob", TeamRole::Member);
    directory.add_member("team-1", "u-carol", TeamRole::Member);
    directory.add_member("team-2", "u-alice", TeamRole::Owner);

    let presence = Arc::new(PresenceRegistry::new());
    let router = Arc::new(BroadcastRouter::new(Arc::clone(&presence)));
    let state = Arc::new(BoardState::new(presence, router, directory, verifier));

    let (addr, _handle) = session::start_server("127.0.0.1:0", state)
        .await
        .expect("failed to start test server");
    addr
}

async fn ws_send(ws: &mut ClientSocket, msg: &ClientMessage) {
    let bytes = client::encode(msg).unwrap();
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();
}

async fn ws_recv(ws: &mut ClientSocket) -> ServerEvent {
    let msg = ws.next().await.unwrap().unwrap();
    event::decode(&msg.into_data()).unwrap()
}

/// Asserts that no event arrives within a short window.
async fn assert_silent(ws: &mut ClientSocket) {
    let result = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected silence, got {result:?}");
}

/// Connects, authenticates, and waits for the Connected ack.
async fn connect(addr: std::net::SocketAddr, token: &str) -> ClientSocket {
    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws_send(
        &mut ws,
        &ClientMessage::Authenticate {
            token: token.to_string(),
        },
    )
    .await;
    let ack = ws_recv(&mut ws).await;
    assert!(matches!(ack, ServerEvent::Connected { .. }), "got: {ack:?}");
    ws
}

/// Joins a team and returns the snapshot members' user ids, sorted.
async fn join(ws: &mut ClientSocket, team_id: &str) -> Vec<String> {
    ws_send(
        ws,
        &ClientMessage::JoinTeam {
            team_id: team_id.to_string(),
        },
    )
    .await;
    match ws_recv(ws).await {
        ServerEvent::PresenceSnapshot { members, .. } => {
            members.into_iter().map(|m| m.user_id).collect()
        }
        other => panic!("expected PresenceSnapshot, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Join / snapshot / departure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_announces_user_and_seeds_snapshot() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    let members = join(&mut alice, "team-1").await;
    assert_eq!(members, vec!["u-alice"]);

    let mut bob = connect(addr, "tok-bob").await;
    let members = join(&mut bob, "team-1").await;
    assert_eq!(members, vec!["u-alice", "u-bob"]);

    // Alice sees bob arrive; the snapshot goes only to the joiner.
    match ws_recv(&mut alice).await {
        ServerEvent::PresenceJoined { team_id, user } => {
            assert_eq!(team_id, "team-1");
            assert_eq!(user.user_id, "u-bob");
        }
        other => panic!("expected PresenceJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_announces_departure_to_room() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-1").await;
    let mut bob = connect(addr, "tok-bob").await;
    join(&mut bob, "team-1").await;
    let ServerEvent::PresenceJoined { .. } = ws_recv(&mut alice).await else {
        panic!("expected PresenceJoined");
    };

    drop(bob);

    match ws_recv(&mut alice).await {
        ServerEvent::PresenceLeft { team_id, user_id } => {
            assert_eq!(team_id, "team-1");
            assert_eq!(user_id, "u-bob");
        }
        other => panic!("expected PresenceLeft, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_leave_announces_departure() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-1").await;
    let mut bob = connect(addr, "tok-bob").await;
    join(&mut bob, "team-1").await;
    let ServerEvent::PresenceJoined { .. } = ws_recv(&mut alice).await else {
        panic!("expected PresenceJoined");
    };

    ws_send(
        &mut bob,
        &ClientMessage::LeaveTeam {
            team_id: "team-1".to_string(),
        },
    )
    .await;

    match ws_recv(&mut alice).await {
        ServerEvent::PresenceLeft { user_id, .. } => assert_eq!(user_id, "u-bob"),
        other => panic!("expected PresenceLeft, got {other:?}"),
    }
    // Bob's session stays open after leaving.
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn extra_connections_of_same_user_are_silent() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-1").await;

    let mut bob_tab1 = connect(addr, "tok-bob").await;
    join(&mut bob_tab1, "team-1").await;
    let ServerEvent::PresenceJoined { .. } = ws_recv(&mut alice).await else {
        panic!("expected PresenceJoined");
    };

    // Second tab: snapshot still lists bob once, and the room hears nothing.
    let mut bob_tab2 = connect(addr, "tok-bob").await;
    let members = join(&mut bob_tab2, "team-1").await;
    assert_eq!(members, vec!["u-alice", "u-bob"]);
    assert_silent(&mut alice).await;

    // Dropping one of two tabs is silent too.
    drop(bob_tab1);
    assert_silent(&mut alice).await;

    // Dropping the last tab announces the departure exactly once.
    drop(bob_tab2);
    match ws_recv(&mut alice).await {
        ServerEvent::PresenceLeft { user_id, .. } => assert_eq!(user_id, "u-bob"),
        other => panic!("expected PresenceLeft, got {other:?}"),
    }
    assert_silent(&mut alice).await;
}

// ---------------------------------------------------------------------------
// Ephemeral relays
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typing_relays_to_peers_without_echo() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-1").await;
    let mut bob = connect(addr, "tok-bob").await;
    join(&mut bob, "team-1").await;
    let ServerEvent::PresenceJoined { .. } = ws_recv(&mut alice).await else {
        panic!("expected PresenceJoined");
    };

    ws_send(
        &mut bob,
        &ClientMessage::Typing {
            team_id: "team-1".to_string(),
            task_id: "task-9".to_string(),
            is_typing: true,
        },
    )
    .await;

    match ws_recv(&mut alice).await {
        ServerEvent::Typing {
            task_id,
            user_id,
            is_typing,
            ..
        } => {
            assert_eq!(task_id, "task-9");
            assert_eq!(user_id, "u-bob");
            assert!(is_typing);
        }
        other => panic!("expected Typing, got {other:?}"),
    }
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn cursor_relays_with_server_assigned_user() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-1").await;
    let mut bob = connect(addr, "tok-bob").await;
    join(&mut bob, "team-1").await;
    let ServerEvent::PresenceJoined { .. } = ws_recv(&mut alice).await else {
        panic!("expected PresenceJoined");
    };

    ws_send(
        &mut bob,
        &ClientMessage::Cursor {
            team_id: "team-1".to_string(),
            task_id: "task-9".to_string(),
            position: 17,
        },
    )
    .await;

    match ws_recv(&mut alice).await {
        ServerEvent::Cursor {
            user_id, position, ..
        } => {
            // The sender identity comes from the session, not the payload.
            assert_eq!(user_id, "u-bob");
            assert_eq!(position, 17);
        }
        other => panic!("expected Cursor, got {other:?}"),
    }
}

#[tokio::test]
async fn status_change_reaches_every_joined_room() {
    let addr = start_test_server().await;

    // Alice is in team-1 and team-2; bob observes team-1.
    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-1").await;
    join(&mut alice, "team-2").await;
    let mut bob = connect(addr, "tok-bob").await;
    join(&mut bob, "team-1").await;
    let ServerEvent::PresenceJoined { .. } = ws_recv(&mut alice).await else {
        panic!("expected PresenceJoined");
    };

    ws_send(
        &mut alice,
        &ClientMessage::Status {
            status: "away".to_string(),
        },
    )
    .await;

    match ws_recv(&mut bob).await {
        ServerEvent::StatusChanged {
            team_id,
            user_id,
            status,
        } => {
            assert_eq!(team_id, "team-1");
            assert_eq!(user_id, "u-alice");
            assert_eq!(status, "away");
        }
        other => panic!("expected StatusChanged, got {other:?}"),
    }
    // No echo back to alice.
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn relays_do_not_cross_rooms() {
    let addr = start_test_server().await;

    let mut alice = connect(addr, "tok-alice").await;
    join(&mut alice, "team-2").await;
    let mut bob = connect(addr, "tok-bob").await;
    join(&mut bob, "team-1").await;

    ws_send(
        &mut bob,
        &ClientMessage::Typing {
            team_id: "team-1".to_string(),
            task_id: "task-9".to_string(),
            is_typing: true,
        },
    )
    .await;

    assert_silent(&mut alice).await;
}
