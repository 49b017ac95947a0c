//! Collaboration session core: shared state, WebSocket handler, and the
//! per-connection lifecycle.
//!
//! Each connection goes through the same lifecycle:
//! 1. Wait for an `Authenticate` message and verify the token.
//! 2. Register the connection with presence and the broadcast router.
//! 3. Send `Connected` back.
//! 4. Split into a writer task (drains the outbound queue onto the socket)
//!    and a reader task (handles client messages).
//! 5. On disconnect, drop the connection everywhere and notify the rooms
//!    the user fully departed from.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::client::{self, ClientMessage};
use taskboard_proto::event::{self, ServerEvent};
use taskboard_proto::user::UserSummary;

use crate::broadcast::BroadcastRouter;
use crate::directory::{CredentialVerifier, TeamDirectory};
use crate::presence::{ConnectionId, PresenceRegistry};

/// Shared server state: presence, fan-out, and the identity collaborators.
pub struct BoardState<D, V> {
    /// Live connection and room membership tracking.
    pub presence: Arc<PresenceRegistry>,
    /// Event fan-out to room members.
    pub router: Arc<BroadcastRouter>,
    /// Team membership collaborator.
    pub directory: D,
    /// Credential collaborator.
    pub verifier: V,
}

impl<D, V> BoardState<D, V> {
    /// Creates server state over the given collaborators.
    pub fn new(
        presence: Arc<PresenceRegistry>,
        router: Arc<BroadcastRouter>,
        directory: D,
        verifier: V,
    ) -> Self {
        Self {
            presence,
            router,
            directory,
            verifier,
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
pub async fn handle_socket<D, V>(socket: WebSocket, state: Arc<BoardState<D, V>>)
where
    D: TeamDirectory + 'static,
    V: CredentialVerifier + 'static,
{
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(token) = wait_for_authenticate(&mut ws_receiver).await else {
        tracing::warn!("connection closed before authentication");
        return;
    };

    let user = match state.verifier.verify_identity(&token).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "authentication failed, closing connection");
            let rejection = ServerEvent::AuthRejected {
                reason: e.to_string(),
            };
            let _ = send_event(&mut ws_sender, &rejection).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let connection = ConnectionId::new();
    tracing::info!(%connection, user_id = %user.user_id, "session authenticated");

    state.presence.register_connection(connection, user.clone()).await;
    let outbox = state.router.attach(connection).await;

    let connected = ServerEvent::Connected {
        user_id: user.user_id.clone(),
        username: user.username.clone(),
    };
    if let Err(e) = send_event(&mut ws_sender, &connected).await {
        tracing::error!(%connection, error = %e, "failed to send Connected ack");
        state.router.detach(connection).await;
        state.presence.drop_connection(connection).await;
        return;
    }

    // Writer task: forward queued events to the socket.
    let writer_connection = connection;
    let writer_outbox = Arc::clone(&outbox);
    let mut write_task = tokio::spawn(async move {
        while let Some(bytes) = writer_outbox.pop().await {
            if ws_sender.send(Message::Binary(bytes.into())).await.is_err() {
                tracing::warn!(connection = %writer_connection, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader task: handle client messages until the socket closes.
    let reader_state = Arc::clone(&state);
    let reader_user = user.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_client_message(connection, &reader_user, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(%connection, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Teardown: notify rooms where this was the user's last connection.
    let departures = state.presence.drop_connection(connection).await;
    state.router.detach(connection).await;
    for departure in departures {
        state
            .router
            .publish(
                &departure.team_id,
                &ServerEvent::PresenceLeft {
                    team_id: departure.team_id.clone(),
                    user_id: departure.user_id.clone(),
                },
                None,
            )
            .await;
    }
    tracing::info!(%connection, user_id = %user.user_id, "session closed");
}

/// Waits for the first message on the WebSocket, expecting `Authenticate`.
///
/// Returns the token, or `None` if the connection closes or the first
/// decodable message is anything else.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match client::decode(&data) {
                Ok(ClientMessage::Authenticate { token }) => {
                    if token.is_empty() {
                        tracing::warn!("received Authenticate with empty token");
                        return None;
                    }
                    return Some(token);
                }
                Ok(other) => {
                    tracing::warn!(msg = ?other, "expected Authenticate, got different message");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode authentication message");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-binary frames during authentication.
            }
        }
    }
    None
}

/// Handles a binary WebSocket message from an authenticated client.
async fn handle_client_message<D, V>(
    connection: ConnectionId,
    user: &UserSummary,
    data: &[u8],
    state: &Arc<BoardState<D, V>>,
) where
    D: TeamDirectory,
    V: CredentialVerifier,
{
    let msg = match client::decode(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(%connection, error = %e, "failed to decode message");
            return;
        }
    };

    match msg {
        ClientMessage::JoinTeam { team_id } => {
            handle_join_team(connection, user, &team_id, state).await;
        }
        ClientMessage::LeaveTeam { team_id } => {
            match state.presence.leave_room(&team_id, connection).await {
                Ok(true) => {
                    state
                        .router
                        .publish(
                            &team_id,
                            &ServerEvent::PresenceLeft {
                                team_id: team_id.clone(),
                                user_id: user.user_id.clone(),
                            },
                            Some(connection),
                        )
                        .await;
                }
                Ok(false) => {
                    // Other connections keep the user present.
                }
                Err(e) => {
                    tracing::warn!(%connection, error = %e, "leave-team failed");
                }
            }
        }
        ClientMessage::Typing {
            team_id,
            task_id,
            is_typing,
        } => {
            state
                .router
                .publish(
                    &team_id,
                    &ServerEvent::Typing {
                        team_id: team_id.clone(),
                        task_id,
                        user_id: user.user_id.clone(),
                        is_typing,
                    },
                    Some(connection),
                )
                .await;
        }
        ClientMessage::Cursor {
            team_id,
            task_id,
            position,
        } => {
            state
                .router
                .publish(
                    &team_id,
                    &ServerEvent::Cursor {
                        team_id: team_id.clone(),
                        task_id,
                        user_id: user.user_id.clone(),
                        position,
                    },
                    Some(connection),
                )
                .await;
        }
        ClientMessage::Status { status } => {
            match state.presence.set_status(connection, status.clone()).await {
                Ok((user_id, teams)) => {
                    for team_id in teams {
                        state
                            .router
                            .publish(
                                &team_id,
                                &ServerEvent::StatusChanged {
                                    team_id: team_id.clone(),
                                    user_id: user_id.clone(),
                                    status: status.clone(),
                                },
                                Some(connection),
                            )
                            .await;
                    }
                }
                Err(e) => {
                    tracing::warn!(%connection, error = %e, "status update failed");
                }
            }
        }
        ClientMessage::Authenticate { .. } => {
            tracing::warn!(%connection, "received duplicate Authenticate");
            state
                .router
                .send_to(
                    connection,
                    &ServerEvent::Error {
                        reason: "already authenticated".to_string(),
                    },
                )
                .await;
        }
    }
}

/// Checks membership and joins the room; the requester gets a snapshot and
/// the room gets a joined notification on the user's first connection.
async fn handle_join_team<D, V>(
    connection: ConnectionId,
    user: &UserSummary,
    team_id: &str,
    state: &Arc<BoardState<D, V>>,
) where
    D: TeamDirectory,
    V: CredentialVerifier,
{
    match state.directory.is_team_member(team_id, &user.user_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(%connection, team_id, user_id = %user.user_id, "join denied: not a member");
            state
                .router
                .send_to(
                    connection,
                    &ServerEvent::Error {
                        reason: format!("not a member of team {team_id}"),
                    },
                )
                .await;
            return;
        }
        Err(e) => {
            tracing::warn!(%connection, team_id, error = %e, "membership check failed");
            state
                .router
                .send_to(
                    connection,
                    &ServerEvent::Error {
                        reason: "membership check failed".to_string(),
                    },
                )
                .await;
            return;
        }
    }

    match state.presence.join_room(team_id, connection).await {
        Ok(snapshot) => {
            if snapshot.newly_present {
                state
                    .router
                    .publish(
                        team_id,
                        &ServerEvent::PresenceJoined {
                            team_id: team_id.to_string(),
                            user: user.clone(),
                        },
                        Some(connection),
                    )
                    .await;
            }
            state
                .router
                .send_to(
                    connection,
                    &ServerEvent::PresenceSnapshot {
                        team_id: team_id.to_string(),
                        members: snapshot.members,
                    },
                )
                .await;
        }
        Err(e) => {
            tracing::warn!(%connection, team_id, error = %e, "join-team failed");
        }
    }
}

/// Encodes and sends a server event directly on a WebSocket sender.
async fn send_event(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), String> {
    let bytes = event::encode(event)?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the collaboration server with a pre-configured [`BoardState`],
/// returning the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server<D, V>(
    addr: &str,
    state: Arc<BoardState<D, V>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
>
where
    D: TeamDirectory + 'static,
    V: CredentialVerifier + 'static,
{
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<D, V>))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "collaboration server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler<D, V>(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<BoardState<D, V>>>,
) -> impl axum::response::IntoResponse
where
    D: TeamDirectory + 'static,
    V: CredentialVerifier + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
