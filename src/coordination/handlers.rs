//! Coordination Server
//!
//! Exposes a [`MemoryEnsemble`] over HTTP so scheduler processes on other hosts
//! can share it. Each remote client owns one ensemble session; sessions that
//! stop heartbeating are expired by [`CoordinationServer::reaper_loop`].

use super::coordinator::Coordinator;
use super::memory::{MemoryEnsemble, MemorySession};
use super::protocol::*;
use super::types::*;
use super::watch::{WatchLatch, WatchOutcome};
use crate::config::CoordinationConfig;

use axum::{Extension, Json, Router, routing::post};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct SessionEntry {
    session: Arc<MemorySession>,
    last_seen: Instant,
}

struct PendingWatch {
    session: u64,
    latch: WatchLatch,
    /// When the watch was armed or last handed back after a long-poll window.
    parked_at: Instant,
}

pub struct CoordinationServer {
    ensemble: Arc<MemoryEnsemble>,
    sessions: DashMap<u64, SessionEntry>,
    watches: DashMap<u64, PendingWatch>,
    /// Cancels that arrived while their watch was out on a long-poll.
    cancelled: DashMap<u64, Instant>,
    next_watch: AtomicU64,
    session_timeout: Duration,
    watch_poll: Duration,
}

impl CoordinationServer {
    pub fn new(ensemble: Arc<MemoryEnsemble>, config: &CoordinationConfig) -> Arc<Self> {
        Arc::new(Self {
            ensemble,
            sessions: DashMap::new(),
            watches: DashMap::new(),
            cancelled: DashMap::new(),
            next_watch: AtomicU64::new(1),
            session_timeout: config.session_timeout(),
            watch_poll: config.watch_poll(),
        })
    }

    pub fn ensemble(&self) -> &Arc<MemoryEnsemble> {
        &self.ensemble
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Remote watches currently parked between long-polls.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    fn open_session(&self) -> u64 {
        let session = self.ensemble.connect();
        let id = session.session_id();
        self.sessions.insert(
            id,
            SessionEntry {
                session,
                last_seen: Instant::now(),
            },
        );
        tracing::info!("Remote coordination session {} opened", id);
        id
    }

    /// Looks a session up and refreshes its liveness. Unknown ids are reported
    /// as expired so the client opens a fresh session.
    fn touch(&self, id: u64) -> CoordResult<Arc<MemorySession>> {
        match self.sessions.get_mut(&id) {
            Some(mut entry) => {
                entry.last_seen = Instant::now();
                Ok(entry.session.clone())
            }
            None => Err(CoordError::SessionExpired),
        }
    }

    fn drop_session(&self, id: u64) {
        self.sessions.remove(&id);
        self.watches.retain(|_, watch| watch.session != id);
    }

    /// Drops a remote watch the client no longer waits on. A watch that is
    /// out on a long-poll right now is marked so the poll does not park it again.
    fn cancel_watch(&self, watch_id: u64) {
        if self.watches.remove(&watch_id).is_none() {
            self.cancelled.insert(watch_id, Instant::now());
        }
        tracing::trace!("Cancelled remote watch {}", watch_id);
    }

    /// Puts a watch back after an empty long-poll window, unless it was
    /// cancelled meanwhile.
    fn park_watch(&self, watch_id: u64, mut pending: PendingWatch) {
        if self.cancelled.remove(&watch_id).is_some() {
            return;
        }
        pending.parked_at = Instant::now();
        self.watches.insert(watch_id, pending);
    }

    /// Expires idle sessions and abandoned watches.
    pub async fn reaper_loop(self: Arc<Self>) {
        let every = (self.session_timeout / 3)
            .min(self.watch_poll)
            .max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;
            self.reap_idle_sessions();
            self.reap_stale_watches();
        }
    }

    pub fn reap_idle_sessions(&self) {
        let idle: Vec<u64> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().last_seen.elapsed() > self.session_timeout)
            .map(|entry| *entry.key())
            .collect();

        for id in idle {
            tracing::warn!("Expiring idle coordination session {}", id);
            self.ensemble.expire_session(id);
            self.drop_session(id);
        }
    }

    /// Drops parked watches nobody has polled for two long-poll windows, along
    /// with cancel marks that outlived any poll they could have matched.
    pub fn reap_stale_watches(&self) {
        let stale_after = self.watch_poll * 2;
        let before = self.watches.len();

        self.watches
            .retain(|_, watch| watch.parked_at.elapsed() <= stale_after);
        self.cancelled
            .retain(|_, since| since.elapsed() <= stale_after);

        let dropped = before.saturating_sub(self.watches.len());
        if dropped > 0 {
            tracing::debug!("Dropped {} unpolled remote watches", dropped);
        }
    }
}

fn reply<T>(result: CoordResult<T>) -> Json<CoordReply<T>> {
    Json(CoordReply { result })
}

pub fn router(server: Arc<CoordinationServer>) -> Router {
    Router::new()
        .route(ENDPOINT_SESSION_OPEN, post(handle_open_session))
        .route(ENDPOINT_SESSION_CLOSE, post(handle_close_session))
        .route(ENDPOINT_SESSION_HEARTBEAT, post(handle_heartbeat))
        .route(ENDPOINT_CREATE, post(handle_create))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_EXISTS, post(handle_exists))
        .route(ENDPOINT_GET_DATA, post(handle_get_data))
        .route(ENDPOINT_SET_DATA, post(handle_set_data))
        .route(ENDPOINT_CHILDREN, post(handle_children))
        .route(ENDPOINT_WATCH_CHILDREN, post(handle_watch_children))
        .route(ENDPOINT_WATCH_WAIT, post(handle_watch_wait))
        .route(ENDPOINT_WATCH_CANCEL, post(handle_watch_cancel))
        .layer(Extension(server))
}

pub async fn handle_open_session(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(_req): Json<OpenSessionRequest>,
) -> Json<CoordReply<u64>> {
    reply(Ok(server.open_session()))
}

pub async fn handle_close_session(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SessionRequest>,
) -> Json<CoordReply<()>> {
    let result = match server.touch(req.session) {
        Ok(session) => {
            let closed = session.close().await;
            server.drop_session(req.session);
            tracing::info!("Remote coordination session {} closed", req.session);
            closed
        }
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_heartbeat(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SessionRequest>,
) -> Json<CoordReply<()>> {
    reply(server.touch(req.session).map(|_| ()))
}

pub async fn handle_create(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<CreateRequest>,
) -> Json<CoordReply<String>> {
    let result = match server.touch(req.session) {
        Ok(session) => session.create(&req.path, req.data, req.acl, req.mode).await,
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_delete(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<DeleteRequest>,
) -> Json<CoordReply<()>> {
    let result = match server.touch(req.session) {
        Ok(session) => session.delete(&req.path, req.expected_version).await,
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_exists(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> Json<CoordReply<Option<Stat>>> {
    let result = match server.touch(req.session) {
        Ok(session) => session.exists(&req.path).await,
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_get_data(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> Json<CoordReply<GetDataResponse>> {
    let result = match server.touch(req.session) {
        Ok(session) => session
            .get_data(&req.path)
            .await
            .map(|(data, stat)| GetDataResponse { data, stat }),
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_set_data(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SetDataRequest>,
) -> Json<CoordReply<Stat>> {
    let result = match server.touch(req.session) {
        Ok(session) => {
            session
                .set_data(&req.path, req.data, req.expected_version)
                .await
        }
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_children(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> Json<CoordReply<Vec<String>>> {
    let result = match server.touch(req.session) {
        Ok(session) => session.get_children(&req.path).await,
        Err(e) => Err(e),
    };
    reply(result)
}

pub async fn handle_watch_children(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> Json<CoordReply<WatchChildrenResponse>> {
    let result = match server.touch(req.session) {
        Ok(session) => session.watch_children(&req.path).await.map(|(children, latch)| {
            let watch_id = server.next_watch.fetch_add(1, Ordering::SeqCst);
            server.watches.insert(
                watch_id,
                PendingWatch {
                    session: req.session,
                    latch,
                    parked_at: Instant::now(),
                },
            );
            tracing::trace!("Armed remote watch {} on {}", watch_id, req.path);
            WatchChildrenResponse { children, watch_id }
        }),
        Err(e) => Err(e),
    };
    reply(result)
}

/// Holds the request open until the watch fires or the long-poll window ends.
pub async fn handle_watch_wait(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<WatchWaitRequest>,
) -> Json<CoordReply<WatchWaitResponse>> {
    if let Err(e) = server.touch(req.session) {
        server.watches.remove(&req.watch_id);
        return reply(Err(e));
    }

    // The latch leaves the table while we wait on it, so a second poller for the
    // same id sees it as gone rather than racing for the event.
    let Some((_, mut pending)) = server.watches.remove(&req.watch_id) else {
        return reply(Ok(WatchWaitResponse {
            event: None,
            pending: false,
        }));
    };

    let deadline = tokio::time::Instant::now() + server.watch_poll;
    let response = match pending.latch.wait_until(Some(deadline)).await {
        WatchOutcome::Fired(event) => WatchWaitResponse {
            event: Some(event),
            pending: false,
        },
        WatchOutcome::TimedOut => {
            server.park_watch(req.watch_id, pending);
            WatchWaitResponse {
                event: None,
                pending: true,
            }
        }
        WatchOutcome::Abandoned => WatchWaitResponse {
            event: None,
            pending: false,
        },
    };

    reply(Ok(response))
}

pub async fn handle_watch_cancel(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<WatchWaitRequest>,
) -> Json<CoordReply<()>> {
    server.cancel_watch(req.watch_id);
    reply(server.touch(req.session).map(|_| ()))
}
