//! Taskboard collaboration server -- ordered tasks, presence, live events.
//!
//! An axum WebSocket server that keeps each team column's tasks at dense,
//! gap-free positions, tracks who is present in each team room, and fans
//! task and presence events out to connected clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin taskboard-server
//!
//! # Run on custom address with a seeded config
//! cargo run --bin taskboard-server -- --bind 127.0.0.1:8080 --config board.toml
//!
//! # Or via environment variable
//! TASKBOARD_ADDR=127.0.0.1:8080 cargo run --bin taskboard-server
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_proto::user::UserSummary;
use taskboard_server::broadcast::BroadcastRouter;
use taskboard_server::config::{BoardCliArgs, BoardConfig};
use taskboard_server::directory::{StaticCredentials, StaticDirectory, TeamRole};
use taskboard_server::presence::PresenceRegistry;
use taskboard_server::session::{self, BoardState};

#[tokio::main]
async fn main() {
    let cli = BoardCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match BoardConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskboard server");

    let mut verifier = StaticCredentials::new();
    for entry in &config.users {
        let mut user = UserSummary::new(&entry.user_id, &entry.username);
        user.avatar_url = entry.avatar_url.clone();
        verifier.insert(entry.token.clone(), user);
    }

    let mut directory = StaticDirectory::new();
    for team in &config.teams {
        if let Some(owner) = &team.owner {
            directory.add_member(&team.team_id, owner, TeamRole::Owner);
        }
        for member in &team.members {
            directory.add_member(&team.team_id, member, TeamRole::Member);
        }
    }
    tracing::info!(
        users = config.users.len(),
        teams = config.teams.len(),
        "loaded static directories"
    );

    let presence = Arc::new(PresenceRegistry::new());
    let router = Arc::new(BroadcastRouter::with_queue_depth(
        Arc::clone(&presence),
        config.outbound_queue_depth,
    ));
    let state = Arc::new(BoardState::new(presence, router, directory, verifier));

    match session::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "taskboard server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
