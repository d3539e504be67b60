//! Distributed Delay Queue and Task Scheduler Library
//!
//! This library crate defines the modules that make up a scheduler node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of three layers, leaves first:
//!
//! - **`coordination`**: The shared-state layer. A ZooKeeper-style hierarchical
//!   namespace with atomic create/delete, sequential nodes and one-shot watches,
//!   available in-process (`MemoryEnsemble`) or over HTTP (`HttpCoordinator`).
//! - **`queue`**: The delay queue. Timestamped ids stored as sequential nodes;
//!   consumption is race-safe across processes without any lock.
//! - **`scheduler`**: The task layer. Task-id offer/poll, progress and
//!   cancellation tracking, a worker pool and the operator HTTP endpoints.
//!
//! Configuration lives in **`config`**.

pub mod config;
pub mod coordination;
pub mod queue;
pub mod scheduler;
