//! In-memory presence registry: who is connected, and to which team rooms.
//!
//! The registry is the single source of truth for liveness and is never
//! persisted — a process restart is equivalent to every user disconnecting.
//! A user may hold several simultaneous connections (tabs, devices); only
//! the zero-to-one and one-to-zero transitions of a (user, room) pair are
//! externally observable, so callers use the returned flags to decide
//! whether to emit joined/left notifications.

use std::collections::{HashMap, HashSet};

use taskboard_proto::user::UserSummary;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identifier of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh connection identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from presence operations.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The connection id has no registration.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// A (room, user) pair whose last live connection just dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Room that needs a "user left" notification.
    pub team_id: String,
    /// The departed user.
    pub user_id: String,
}

/// Result of joining a room.
#[derive(Debug, Clone)]
pub struct JoinSnapshot {
    /// True only on the user's first live connection in the room; the
    /// caller emits a "joined" notification exactly when this is set.
    pub newly_present: bool,
    /// Distinct users currently present (deduplicated across connections),
    /// including the joiner, sorted by user id.
    pub members: Vec<UserSummary>,
}

struct ConnectionState {
    summary: UserSummary,
    status: Option<String>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct PresenceInner {
    connections: HashMap<ConnectionId, ConnectionState>,
    /// Room id -> user id -> that user's live connections in the room.
    rooms: HashMap<String, HashMap<String, HashSet<ConnectionId>>>,
}

impl PresenceInner {
    fn member_summaries(&self, team_id: &str) -> Vec<UserSummary> {
        let Some(room) = self.rooms.get(team_id) else {
            return Vec::new();
        };
        let mut members: Vec<UserSummary> = room
            .values()
            .filter_map(|conns| {
                conns
                    .iter()
                    .find_map(|conn| self.connections.get(conn).map(|c| c.summary.clone()))
            })
            .collect();
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        members
    }
}

/// Registry of live connections and their room memberships.
///
/// One registry-wide [`RwLock`]; every critical section is a handful of map
/// operations. Sessions only ever mutate their own entries.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<PresenceInner>,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for an authenticated user. Idempotent: a
    /// repeated registration for the same connection id is ignored.
    pub async fn register_connection(&self, connection: ConnectionId, summary: UserSummary) {
        let mut inner = self.inner.write().await;
        inner.connections.entry(connection).or_insert(ConnectionState {
            summary,
            status: None,
            rooms: HashSet::new(),
        });
    }

    /// Adds the connection to a room and returns the membership snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::UnknownConnection`] if the connection was
    /// never registered.
    pub async fn join_room(
        &self,
        team_id: &str,
        connection: ConnectionId,
    ) -> Result<JoinSnapshot, PresenceError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .connections
            .get_mut(&connection)
            .ok_or(PresenceError::UnknownConnection(connection))?;
        let user_id = state.summary.user_id.clone();
        state.rooms.insert(team_id.to_string());

        let user_conns = inner
            .rooms
            .entry(team_id.to_string())
            .or_default()
            .entry(user_id)
            .or_default();
        let newly_present = user_conns.is_empty();
        user_conns.insert(connection);

        Ok(JoinSnapshot {
            newly_present,
            members: inner.member_summaries(team_id),
        })
    }

    /// Removes one membership record. Returns `true` if this was the user's
    /// last connection in the room (the user fully departed).
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::UnknownConnection`] if the connection was
    /// never registered.
    pub async fn leave_room(
        &self,
        team_id: &str,
        connection: ConnectionId,
    ) -> Result<bool, PresenceError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .connections
            .get_mut(&connection)
            .ok_or(PresenceError::UnknownConnection(connection))?;
        let user_id = state.summary.user_id.clone();
        state.rooms.remove(team_id);

        Ok(remove_membership(&mut inner.rooms, team_id, &user_id, connection))
    }

    /// Removes a connection from every room it joined and from the
    /// connection map. Returns the (room, user) pairs where this was the
    /// user's last live connection.
    ///
    /// Unknown connections return an empty list; transport loss can race
    /// with an explicit teardown.
    pub async fn drop_connection(&self, connection: ConnectionId) -> Vec<Departure> {
        let mut inner = self.inner.write().await;
        let Some(state) = inner.connections.remove(&connection) else {
            return Vec::new();
        };
        let user_id = state.summary.user_id;

        let mut departures = Vec::new();
        for team_id in state.rooms {
            if remove_membership(&mut inner.rooms, &team_id, &user_id, connection) {
                departures.push(Departure {
                    team_id,
                    user_id: user_id.clone(),
                });
            }
        }
        departures
    }

    /// Distinct user ids currently present in a room, sorted.
    pub async fn members_of(&self, team_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut members: Vec<String> = inner
            .rooms
            .get(team_id)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Summaries of the distinct users currently present in a room.
    pub async fn member_summaries(&self, team_id: &str) -> Vec<UserSummary> {
        let inner = self.inner.read().await;
        inner.member_summaries(team_id)
    }

    /// Every live connection currently joined to a room, across all users.
    pub async fn connections_in(&self, team_id: &str) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(team_id)
            .map(|room| room.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    /// Updates the connection's status label. Returns the user id and the
    /// rooms that should be notified of the change.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::UnknownConnection`] if the connection was
    /// never registered.
    pub async fn set_status(
        &self,
        connection: ConnectionId,
        status: String,
    ) -> Result<(String, Vec<String>), PresenceError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .connections
            .get_mut(&connection)
            .ok_or(PresenceError::UnknownConnection(connection))?;
        state.status = Some(status);
        let mut rooms: Vec<String> = state.rooms.iter().cloned().collect();
        rooms.sort();
        Ok((state.summary.user_id.clone(), rooms))
    }
}

/// Removes one (user, connection) membership record from a room, cleaning
/// up emptied maps. Returns `true` on the user's one-to-zero transition.
fn remove_membership(
    rooms: &mut HashMap<String, HashMap<String, HashSet<ConnectionId>>>,
    team_id: &str,
    user_id: &str,
    connection: ConnectionId,
) -> bool {
    let Some(room) = rooms.get_mut(team_id) else {
        return false;
    };
    let Some(user_conns) = room.get_mut(user_id) else {
        return false;
    };
    user_conns.remove(&connection);
    let departed = user_conns.is_empty();
    if departed {
        room.remove(user_id);
    }
    if room.is_empty() {
        rooms.remove(team_id);
    }
    departed
}
