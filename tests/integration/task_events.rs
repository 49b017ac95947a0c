//! End-to-end task event tests: server-side mutations through the ordering
//! service reach WebSocket clients in the owning team's room.
//!
//! Verifies:
//! 1. Create, update, move, delete, and comment mutations broadcast the
//!    matching event to room members.
//! 2. Cross-column moves compact the source column and report the clamped
//!    destination position.
//! 3. Events stay inside the owning team's room.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard_proto::client::{self, ClientMessage};
use taskboard_proto::event::{self, ServerEvent};
use taskboard_proto::task::{Partition, Priority, Task, TaskStatus};
use taskboard_proto::user::UserSummary;
use taskboard_server::broadcast::BroadcastRouter;
use taskboard_server::directory::{StaticCredentials, StaticDirectory, TeamRole};
use taskboard_server::presence::PresenceRegistry;
use taskboard_server::session::{self, BoardState};
use taskboard_server::store::MemoryStore;
use taskboard_server::tasks::{TaskDraft, TaskOrderingService, TaskPatch};
use tokio_tungstenite::tungstenite;

type ClientSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Starts a server whose broadcast router is shared with a task service, so
/// service mutations fan out to connected clients.
async fn start_board() -> (std::net::SocketAddr, TaskOrderingService<MemoryStore>) {
    let mut verifier = StaticCredentials::new();
    verifier.insert("tok-alice", UserSummary::new("u-alice", "alice"));
    verifier.insert("tok-bob", UserSummary::new("u-bob", "bob"));

    let mut directory = StaticDirectory::new();
    directory.add_member("team-1", "u-alice", TeamRole::Owner);
    directory.add_member("team-2", "u-bob", TeamRole::Owner);

    let presence = Arc::new(PresenceRegistry::new());
    let router = Arc::new(BroadcastRouter::new(Arc::clone(&presence)));
    let service = TaskOrderingService::new(MemoryStore::new(), Arc::clone(&router));
    let state = Arc::new(BoardState::new(presence, router, directory, verifier));

    let (addr, _handle) = session::start_server("127.0.0.1:0", state)
        .await
        .expect("failed to start test server");
    (addr, service)
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

/// Connects, authenticates, and joins the given team.
async fn connect_into_room(addr: std::net::SocketAddr, token: &str, team_id: &str) -> ClientSocket {
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
    ws_send(
        &mut ws,
        &ClientMessage::JoinTeam {
            team_id: team_id.to_string(),
        },
    )
    .await;
    let snapshot = ws_recv(&mut ws).await;
    assert!(matches!(snapshot, ServerEvent::PresenceSnapshot { .. }));
    ws
}

fn draft(partition: &Partition, title: &str) -> TaskDraft {
    TaskDraft {
        partition: partition.clone(),
        title: title.to_string(),
        description: String::new(),
        assignees: Vec::new(),
        priority: Priority::Medium,
        due_date: None,
        created_by: "u-alice".to_string(),
    }
}

fn assert_dense(tasks: &[Task]) {
    for (i, task) in tasks.iter().enumerate() {
        assert_eq!(task.position as usize, i, "positions must be dense");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_broadcasts_task_created() {
    let (addr, service) = start_board().await;
    let mut alice = connect_into_room(addr, "tok-alice", "team-1").await;

    let partition = Partition::new("team-1", "col-todo");
    let created = service.create_task(draft(&partition, "ship it")).await.unwrap();

    match ws_recv(&mut alice).await {
        ServerEvent::TaskCreated { task } => {
            assert_eq!(task.id, created.id);
            assert_eq!(task.title, "ship it");
            assert_eq!(task.position, 0);
        }
        other => panic!("expected TaskCreated, got {other:?}"),
    }
}

#[tokio::test]
async fn update_broadcasts_task_updated() {
    let (addr, service) = start_board().await;
    let mut alice = connect_into_room(addr, "tok-alice", "team-1").await;

    let partition = Partition::new("team-1", "col-todo");
    let created = service.create_task(draft(&partition, "draft")).await.unwrap();
    let ServerEvent::TaskCreated { .. } = ws_recv(&mut alice).await else {
        panic!("expected TaskCreated");
    };

    service
        .update_task(
            &created.id,
            TaskPatch {
                status: Some(TaskStatus::Completed),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();

    match ws_recv(&mut alice).await {
        ServerEvent::TaskUpdated { task } => {
            assert_eq!(task.id, created.id);
            assert_eq!(task.status, TaskStatus::Completed);
            assert!(task.completed_at.is_some());
        }
        other => panic!("expected TaskUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn cross_column_move_broadcasts_and_compacts() {
    let (addr, service) = start_board().await;
    let mut alice = connect_into_room(addr, "tok-alice", "team-1").await;

    let todo = Partition::new("team-1", "col-todo");
    let doing = Partition::new("team-1", "col-doing");
    let mut created = Vec::new();
    for title in ["a", "b", "c"] {
        created.push(service.create_task(draft(&todo, title)).await.unwrap());
        let ServerEvent::TaskCreated { .. } = ws_recv(&mut alice).await else {
            panic!("expected TaskCreated");
        };
    }

    // Move the first todo task into an empty column at a far position.
    service.move_task(&created[0].id, doing.clone(), 10).await.unwrap();

    match ws_recv(&mut alice).await {
        ServerEvent::TaskMoved {
            task_id,
            from,
            to,
            position,
        } => {
            assert_eq!(task_id, created[0].id);
            assert_eq!(from, todo);
            assert_eq!(to, doing);
            // Clamped into the empty destination.
            assert_eq!(position, 0);
        }
        other => panic!("expected TaskMoved, got {other:?}"),
    }

    let remaining = service.tasks_in_partition(&todo).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_dense(&remaining);
    let moved = service.tasks_in_partition(&doing).await.unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id, created[0].id);
}

#[tokio::test]
async fn delete_broadcasts_and_compacts() {
    let (addr, service) = start_board().await;
    let mut alice = connect_into_room(addr, "tok-alice", "team-1").await;

    let partition = Partition::new("team-1", "col-todo");
    let mut created = Vec::new();
    for title in ["a", "b", "c"] {
        created.push(service.create_task(draft(&partition, title)).await.unwrap());
        let ServerEvent::TaskCreated { .. } = ws_recv(&mut alice).await else {
            panic!("expected TaskCreated");
        };
    }

    service.delete_task(&created[1].id).await.unwrap();

    match ws_recv(&mut alice).await {
        ServerEvent::TaskDeleted { task_id, partition: p } => {
            assert_eq!(task_id, created[1].id);
            assert_eq!(p, partition);
        }
        other => panic!("expected TaskDeleted, got {other:?}"),
    }

    let remaining = service.tasks_in_partition(&partition).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_dense(&remaining);
    assert_eq!(remaining[0].id, created[0].id);
    assert_eq!(remaining[1].id, created[2].id);
}

#[tokio::test]
async fn comment_broadcasts_comment_added() {
    let (addr, service) = start_board().await;
    let mut alice = connect_into_room(addr, "tok-alice", "team-1").await;

    let partition = Partition::new("team-1", "col-todo");
    let created = service.create_task(draft(&partition, "discuss")).await.unwrap();
    let ServerEvent::TaskCreated { .. } = ws_recv(&mut alice).await else {
        panic!("expected TaskCreated");
    };

    let comment = service
        .add_comment(&created.id, "u-alice", "looks good")
        .await
        .unwrap();

    match ws_recv(&mut alice).await {
        ServerEvent::CommentAdded { task_id, comment: c } => {
            assert_eq!(task_id, created.id);
            assert_eq!(c.id, comment.id);
            assert_eq!(c.content, "looks good");
            assert_eq!(c.user_id, "u-alice");
        }
        other => panic!("expected CommentAdded, got {other:?}"),
    }
}

#[tokio::test]
async fn events_stay_inside_owning_team_room() {
    let (addr, service) = start_board().await;
    let mut bob = connect_into_room(addr, "tok-bob", "team-2").await;

    // Mutation in team-1; bob only observes team-2.
    let partition = Partition::new("team-1", "col-todo");
    service.create_task(draft(&partition, "private")).await.unwrap();

    let result = tokio::time::timeout(Duration::from_millis(200), bob.next()).await;
    assert!(result.is_err(), "expected silence, got {result:?}");
}
