//! Shared protocol definitions for the Taskboard wire format.

pub mod client;
pub mod event;
pub mod task;
pub mod user;
