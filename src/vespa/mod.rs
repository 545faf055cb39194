//! Thin HTTP client surface for the backend's search/feed/deploy HTTP API —
//! the backend itself is an external collaborator; this module only owns
//! the plumbing to reach it.

pub mod client;

pub use client::{BatchFeedResult, FeedMode, VespaClient, VespaDeployClient};
