//! Distributed Delay Queue Module
//!
//! A FIFO-ish queue of timestamped ids stored in a coordination-service
//! directory. There is no lock around queue access: ordering comes from the
//! service's sequential node names, and exclusivity from its atomic delete.
//!
//! ## Submodules
//! - **`item`**: `DelayItem` and the `qn-<release>-<sequence>` name codec.
//! - **`sequenced`**: `SequencedQueue` (offer, element, remove, take, peek, poll, cleanup).
//! - **`error`**: `QueueError`, with `NotFound` as an expected outcome.

pub mod error;
pub mod item;
pub mod sequenced;

pub use error::{QueueError, QueueResult};
pub use item::DelayItem;
pub use sequenced::SequencedQueue;
