//! Coordination Service Module
//!
//! The scheduler keeps all shared state in a hierarchical, ZooKeeper-style
//! coordination service. This module defines the contract the rest of the crate
//! consumes and ships two implementations of it.
//!
//! ## Submodules
//! - **`coordinator`**: the `Coordinator` trait (create/delete/exists/get/set/children/watch).
//! - **`types`**: modes, ACLs, node metadata, watch events and `CoordError`.
//! - **`watch`**: `WatchLatch`, the one-shot wait primitive fed by watch delivery.
//! - **`memory`**: `MemoryEnsemble`, an in-process service; each session acts as
//!   an independent client (and, in tests, as an independent process).
//! - **`handlers`** / **`protocol`**: the HTTP face of an ensemble.
//! - **`client`**: `HttpCoordinator`, the remote client with sessions, heartbeats and retries.

pub mod client;
pub mod coordinator;
pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod types;
pub mod watch;

pub use coordinator::Coordinator;
pub use types::{Acl, CoordError, CoordResult, CreateMode, Stat};

#[cfg(test)]
mod tests;
