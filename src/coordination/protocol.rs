//! Coordination Wire Protocol
//!
//! DTOs exchanged between `HttpCoordinator` and the coordination server.
//! Every endpoint is a JSON `POST`; service-level faults travel inside
//! [`CoordReply`] with an HTTP 200, so a non-2xx status always means a
//! transport problem.

use super::types::*;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_SESSION_OPEN: &str = "/coord/session/open";
pub const ENDPOINT_SESSION_CLOSE: &str = "/coord/session/close";
pub const ENDPOINT_SESSION_HEARTBEAT: &str = "/coord/session/heartbeat";
pub const ENDPOINT_CREATE: &str = "/coord/create";
pub const ENDPOINT_DELETE: &str = "/coord/delete";
pub const ENDPOINT_EXISTS: &str = "/coord/exists";
pub const ENDPOINT_GET_DATA: &str = "/coord/get_data";
pub const ENDPOINT_SET_DATA: &str = "/coord/set_data";
pub const ENDPOINT_CHILDREN: &str = "/coord/children";
pub const ENDPOINT_WATCH_CHILDREN: &str = "/coord/watch/children";
pub const ENDPOINT_WATCH_WAIT: &str = "/coord/watch/wait";
pub const ENDPOINT_WATCH_CANCEL: &str = "/coord/watch/cancel";

#[derive(Debug, Serialize, Deserialize)]
pub struct CoordReply<T> {
    pub result: CoordResult<T>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenSessionRequest {}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    pub session: u64,
    pub path: String,
    pub data: Vec<u8>,
    pub acl: Acl,
    pub mode: CreateMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub session: u64,
    pub path: String,
    pub expected_version: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathRequest {
    pub session: u64,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetDataRequest {
    pub session: u64,
    pub path: String,
    pub data: Vec<u8>,
    pub expected_version: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetDataResponse {
    pub data: Vec<u8>,
    pub stat: Stat,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WatchChildrenResponse {
    pub children: Vec<String>,
    pub watch_id: u64,
}

/// Body of both the long-poll wait and the cancel of a remote watch.
#[derive(Debug, Serialize, Deserialize)]
pub struct WatchWaitRequest {
    pub session: u64,
    pub watch_id: u64,
}

/// Long-poll answer. `pending` means the watch is still armed and the client
/// should ask again; `event: None` with `pending: false` means it will never fire.
#[derive(Debug, Serialize, Deserialize)]
pub struct WatchWaitResponse {
    pub event: Option<WatchEvent>,
    pub pending: bool,
}
