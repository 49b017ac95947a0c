//! Identity and team membership collaborators.
//!
//! The session layer talks to two seams: a [`CredentialVerifier`] that
//! turns an opaque token into a user summary, and a [`TeamDirectory`] that
//! answers membership questions per team. The shipped implementations are
//! static tables loaded from configuration; a deployment backed by a real
//! identity provider implements the same traits.

use std::collections::HashMap;

use serde::Deserialize;
use taskboard_proto::user::UserSummary;

/// Errors from identity verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is invalid or expired; the connection is closed.
    #[error("credentials rejected: {0}")]
    Rejected(String),
    /// The verifier backend could not be reached.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Errors from membership lookups.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The directory backend could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// A user's role within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    /// Team owner.
    Owner,
    /// Team administrator.
    Admin,
    /// Regular member.
    Member,
}

/// Verifies connection credentials.
pub trait CredentialVerifier: Send + Sync {
    /// Resolves a token to the authenticated user.
    fn verify_identity(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<UserSummary, AuthError>> + Send;
}

/// Answers team membership questions.
pub trait TeamDirectory: Send + Sync {
    /// Whether the user belongs to the team.
    fn is_team_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, DirectoryError>> + Send;

    /// The user's role in the team, if a member.
    fn role_of(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<TeamRole>, DirectoryError>> + Send;
}

/// Token table verifier backed by configuration.
#[derive(Default)]
pub struct StaticCredentials {
    tokens: HashMap<String, UserSummary>,
}

impl StaticCredentials {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token for a user.
    pub fn insert(&mut self, token: impl Into<String>, user: UserSummary) {
        self.tokens.insert(token.into(), user);
    }
}

impl CredentialVerifier for StaticCredentials {
    async fn verify_identity(&self, token: &str) -> Result<UserSummary, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::Rejected("unknown token".to_string()))
    }
}

/// Membership table directory backed by configuration.
#[derive(Default)]
pub struct StaticDirectory {
    teams: HashMap<String, HashMap<String, TeamRole>>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user to a team with the given role.
    pub fn add_member(&mut self, team_id: impl Into<String>, user_id: impl Into<String>, role: TeamRole) {
        self.teams
            .entry(team_id.into())
            .or_default()
            .insert(user_id.into(), role);
    }
}

impl TeamDirectory for StaticDirectory {
    async fn is_team_member(&self, team_id: &str, user_id: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .teams
            .get(team_id)
            .is_some_and(|members| members.contains_key(user_id)))
    }

    async fn role_of(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Option<TeamRole>, DirectoryError> {
        Ok(self
            .teams
            .get(team_id)
            .and_then(|members| members.get(user_id).copied()))
    }
}
