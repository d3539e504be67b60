//! Status API Definitions
//!
//! DTOs for the operator-facing HTTP surface. Map keys are task ids.

use super::state::StateNode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ENDPOINT_STATE: &str = "/scheduler/state";
pub const ENDPOINT_SCHEDULED: &str = "/scheduler/scheduled";
pub const ENDPOINT_OFFER: &str = "/scheduler/offer";
pub const ENDPOINT_PROGRESS: &str = "/tasks/progress";
pub const ENDPOINT_MESSAGES: &str = "/tasks/messages";
pub const ENDPOINT_CANCEL: &str = "/tasks/:id/cancel";
pub const ENDPOINT_DONE: &str = "/tasks/:id/done";

/// Default `max` for the scheduled listing.
pub const DEFAULT_SCHEDULED_LIMIT: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
pub struct OfferRequest {
    pub release_time: i64,
    pub id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OfferResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduledQuery {
    pub start: i64,
    pub end: i64,
    pub max: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduledResponse {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub root: StateNode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub progress: HashMap<i64, i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: HashMap<i64, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskActionResponse {
    pub task_id: i64,
    pub error: Option<String>,
}
