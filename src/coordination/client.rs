//! HTTP Coordination Client
//!
//! Implements [`Coordinator`] against a remote coordination server.
//!
//! ## Responsibilities
//! - **Sessions**: opens a session on the first reachable host and keeps it
//!   alive with periodic heartbeats; reopens it when the server reports expiry.
//! - **Retries**: transport failures are retried with exponential backoff and
//!   jitter, then surface as `ConnectionLoss`. Requests that change the tree
//!   in a way a replay would repeat (`create`, `delete`, session open) are
//!   retried only when the connection was never established.
//! - **Watches**: each armed watch gets a background long-poll task that feeds
//!   the local [`WatchLatch`].

use super::coordinator::Coordinator;
use super::protocol::*;
use super::types::*;
use super::watch::{WatchLatch, WatchTrigger};
use crate::config::CoordinationConfig;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct HttpCoordinator {
    http_client: reqwest::Client,
    config: CoordinationConfig,
    host_index: AtomicUsize,
    session: AtomicU64,
    closed: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl HttpCoordinator {
    /// Opens a session and starts heartbeating.
    pub async fn connect(config: CoordinationConfig) -> CoordResult<Arc<Self>> {
        if config.hosts.is_empty() {
            return Err(CoordError::ConnectionLoss(
                "no coordination hosts configured".to_string(),
            ));
        }

        let heartbeat_interval = config.heartbeat_interval();
        let coordinator = Arc::new(Self {
            http_client: reqwest::Client::new(),
            config,
            host_index: AtomicUsize::new(0),
            session: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        });

        coordinator.open_session().await?;

        let handle = tokio::spawn(Self::heartbeat_loop(
            Arc::downgrade(&coordinator),
            heartbeat_interval,
        ));
        if let Ok(mut slot) = coordinator.heartbeat.lock() {
            *slot = Some(handle);
        }

        Ok(coordinator)
    }

    fn base_url(&self) -> String {
        let hosts = &self.config.hosts;
        let idx = self.host_index.load(Ordering::SeqCst) % hosts.len();
        format!("http://{}", hosts[idx])
    }

    fn rotate_host(&self) {
        if self.config.hosts.len() > 1 {
            let next = self.host_index.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(
                "Switching coordination host to {}",
                self.config.hosts[next % self.config.hosts.len()]
            );
        }
    }

    async fn open_session(&self) -> CoordResult<u64> {
        let mut last_error = None;

        for _ in 0..self.config.hosts.len() {
            match self
                .send::<_, u64>(ENDPOINT_SESSION_OPEN, &OpenSessionRequest {})
                .await
            {
                Ok(id) => {
                    self.session.store(id, Ordering::SeqCst);
                    tracing::info!("Coordination session {} opened at {}", id, self.base_url());
                    return Ok(id);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Could not open session at {}: {}", self.base_url(), e);
                    self.rotate_host();
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| CoordError::ConnectionLoss("no host reachable".to_string())))
    }

    /// One request/reply exchange with transport retries.
    async fn send<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &Req,
    ) -> CoordResult<Resp> {
        let url = format!("{}{}", self.base_url(), endpoint);
        let response = post_with_retry(
            &self.http_client,
            url,
            payload,
            self.config.request_timeout(),
            self.config.retries,
            self.config.retry_backoff_ms,
            replay_safe(endpoint),
        )
        .await?;

        if !response.status().is_success() {
            return Err(CoordError::ConnectionLoss(format!(
                "{} answered {}",
                endpoint,
                response.status()
            )));
        }

        let reply: CoordReply<Resp> = response
            .json()
            .await
            .map_err(|e| CoordError::ConnectionLoss(e.to_string()))?;

        reply.result
    }

    /// Like `send`, but reacts to session expiry and connection loss before
    /// handing the fault back to the caller.
    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &Req,
    ) -> CoordResult<Resp> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoordError::SessionClosed);
        }

        let result = self.send(endpoint, payload).await;

        match &result {
            Err(CoordError::SessionExpired) => {
                tracing::warn!(
                    "Coordination session {} expired, reopening",
                    self.session_id()
                );
                if let Err(e) = self.open_session().await {
                    tracing::warn!("Failed to reopen coordination session: {}", e);
                }
            }
            Err(CoordError::ConnectionLoss(reason)) => {
                tracing::warn!("Lost connection to {}: {}", self.base_url(), reason);
                self.rotate_host();
            }
            _ => {}
        }

        result
    }

    async fn heartbeat_loop(coordinator: Weak<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            if coordinator.closed.load(Ordering::SeqCst) {
                break;
            }

            let request = SessionRequest {
                session: coordinator.session_id(),
            };
            match coordinator
                .call::<_, ()>(ENDPOINT_SESSION_HEARTBEAT, &request)
                .await
            {
                Ok(_) => tracing::trace!("Heartbeat for session {}", request.session),
                Err(e) => tracing::debug!("Heartbeat for session {} failed: {}", request.session, e),
            }
        }
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    fn session_id(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: Acl,
        mode: CreateMode,
    ) -> CoordResult<String> {
        let request = CreateRequest {
            session: self.session_id(),
            path: path.to_string(),
            data,
            acl,
            mode,
        };
        self.call(ENDPOINT_CREATE, &request).await
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> CoordResult<()> {
        let request = DeleteRequest {
            session: self.session_id(),
            path: path.to_string(),
            expected_version,
        };
        self.call(ENDPOINT_DELETE, &request).await
    }

    async fn exists(&self, path: &str) -> CoordResult<Option<Stat>> {
        let request = PathRequest {
            session: self.session_id(),
            path: path.to_string(),
        };
        self.call(ENDPOINT_EXISTS, &request).await
    }

    async fn get_data(&self, path: &str) -> CoordResult<(Vec<u8>, Stat)> {
        let request = PathRequest {
            session: self.session_id(),
            path: path.to_string(),
        };
        let response: GetDataResponse = self.call(ENDPOINT_GET_DATA, &request).await?;
        Ok((response.data, response.stat))
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> CoordResult<Stat> {
        let request = SetDataRequest {
            session: self.session_id(),
            path: path.to_string(),
            data,
            expected_version,
        };
        self.call(ENDPOINT_SET_DATA, &request).await
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        let request = PathRequest {
            session: self.session_id(),
            path: path.to_string(),
        };
        self.call(ENDPOINT_CHILDREN, &request).await
    }

    async fn watch_children(&self, path: &str) -> CoordResult<(Vec<String>, WatchLatch)> {
        let session = self.session_id();
        let request = PathRequest {
            session,
            path: path.to_string(),
        };
        let response: WatchChildrenResponse =
            self.call(ENDPOINT_WATCH_CHILDREN, &request).await?;

        let (trigger, latch) = WatchLatch::pair();
        let waiter = WatchWaiter {
            http_client: self.http_client.clone(),
            url: format!("{}{}", self.base_url(), ENDPOINT_WATCH_WAIT),
            cancel_url: format!("{}{}", self.base_url(), ENDPOINT_WATCH_CANCEL),
            path: path.to_string(),
            request: WatchWaitRequest {
                session,
                watch_id: response.watch_id,
            },
            timeout: self.config.watch_poll() + self.config.request_timeout(),
            retries: self.config.retries,
            backoff_ms: self.config.retry_backoff_ms,
        };
        tokio::spawn(waiter.run(trigger));

        Ok((response.children, latch))
    }

    async fn close(&self) -> CoordResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Ok(mut slot) = self.heartbeat.lock()
            && let Some(handle) = slot.take()
        {
            handle.abort();
        }

        let request = SessionRequest {
            session: self.session_id(),
        };
        self.send::<_, ()>(ENDPOINT_SESSION_CLOSE, &request).await?;
        tracing::info!("Coordination session {} closed", request.session);
        Ok(())
    }
}

/// Long-polls the server for one watch and fires the local trigger.
struct WatchWaiter {
    http_client: reqwest::Client,
    url: String,
    cancel_url: String,
    path: String,
    request: WatchWaitRequest,
    timeout: Duration,
    retries: usize,
    backoff_ms: u64,
}

impl WatchWaiter {
    async fn run(self, mut trigger: WatchTrigger) {
        let mut failures = 0;

        loop {
            let outcome = tokio::select! {
                outcome = self.poll_once() => outcome,
                _ = trigger.abandoned() => {
                    tracing::trace!("Watch {} no longer awaited", self.request.watch_id);
                    self.cancel().await;
                    return;
                }
            };

            match outcome {
                Ok(WatchWaitResponse {
                    event: Some(event), ..
                }) => {
                    trigger.fire(event);
                    return;
                }
                Ok(WatchWaitResponse { pending: true, .. }) => {
                    failures = 0;
                }
                Ok(_) => return,
                Err(e) if e.is_transient() && failures < self.retries => {
                    failures += 1;
                    tracing::debug!("Watch {} poll failed: {}", self.request.watch_id, e);
                    tokio::time::sleep(Duration::from_millis(self.backoff_ms)).await;
                }
                Err(e) => {
                    tracing::debug!("Releasing watch {}: {}", self.request.watch_id, e);
                    self.cancel().await;
                    trigger.fire(WatchEvent {
                        path: self.path,
                        kind: WatchEventKind::SessionClosed,
                    });
                    return;
                }
            }
        }
    }

    async fn poll_once(&self) -> CoordResult<WatchWaitResponse> {
        let response = post_with_retry(
            &self.http_client,
            self.url.clone(),
            &self.request,
            self.timeout,
            1,
            self.backoff_ms,
            true,
        )
        .await?;

        response
            .json::<CoordReply<WatchWaitResponse>>()
            .await
            .map_err(|e| CoordError::ConnectionLoss(e.to_string()))?
            .result
    }

    /// Tells the server to drop the watch. Best effort: the server also
    /// forgets watches nobody polls.
    async fn cancel(&self) {
        let sent = post_with_retry(
            &self.http_client,
            self.cancel_url.clone(),
            &self.request,
            self.timeout,
            1,
            self.backoff_ms,
            true,
        )
        .await;

        if let Err(e) = sent {
            tracing::debug!("Could not cancel watch {}: {}", self.request.watch_id, e);
        }
    }
}

/// Whether replaying a request after an ambiguous transport failure is
/// harmless. A replayed sequential create adds a second node, a replayed
/// delete reports `NoNode` for a node this client removed itself, and a
/// replayed open leaks a session.
fn replay_safe(endpoint: &str) -> bool {
    !matches!(
        endpoint,
        ENDPOINT_CREATE | ENDPOINT_DELETE | ENDPOINT_SESSION_OPEN
    )
}

async fn post_with_retry<T: Serialize>(
    http_client: &reqwest::Client,
    url: String,
    payload: &T,
    timeout: Duration,
    attempts: usize,
    initial_delay_ms: u64,
    replay_safe: bool,
) -> CoordResult<reqwest::Response> {
    let mut delay_ms = initial_delay_ms;
    let attempts = attempts.max(1);

    for attempt in 0..attempts {
        let response = http_client
            .post(url.clone())
            .json(payload)
            .timeout(timeout)
            .send()
            .await;

        match response {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                // Past the connect step the server may already have applied it
                if !replay_safe && !e.is_connect() {
                    return Err(CoordError::ConnectionLoss(e.to_string()));
                }
                if attempt + 1 == attempts {
                    return Err(CoordError::ConnectionLoss(e.to_string()));
                }
                // Simple jitter to prevent thundering herd
                let jitter = rand::random::<u64>() % 50;
                tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(1200);
            }
        }
    }

    Err(CoordError::ConnectionLoss(
        "retry attempts exhausted".to_string(),
    ))
}
