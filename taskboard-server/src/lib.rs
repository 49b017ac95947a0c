//! Taskboard collaboration server library.
//!
//! Exposes the server core for use in tests and embedding: the dense-position
//! task ordering engine, the presence registry, the broadcast router, and the
//! WebSocket session layer that ties them together.

pub mod broadcast;
pub mod config;
pub mod directory;
pub mod ordering;
pub mod presence;
pub mod session;
pub mod store;
pub mod tasks;
