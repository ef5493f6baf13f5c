//! Relay synchronization and event-graph reconstruction engine for Nostr.
//!
//! The engine keeps one WebSocket connection per desired relay, keeps each
//! connection's subscriptions consistent with the follow list and the growing
//! event cache, deduplicates and merges incoming events, and reconstructs
//! threaded conversations from flat `e`-tag data.

pub mod client;
pub mod config;
pub mod event;
pub mod keys;
mod net;
pub mod store;
pub mod thread;
pub mod wire;
