//! Sequenced Delay Queue
//!
//! A queue of [`DelayItem`]s kept as sequential children of one coordination
//! directory. Any number of processes may offer to and consume from the same
//! directory concurrently.
//!
//! ## Guarantees
//! - **Ordering**: candidates are scanned by service-assigned sequence number,
//!   so among due items the oldest-created wins regardless of release time.
//! - **At-most-once**: an item is handed out only by the caller whose `delete`
//!   of its node succeeds. A caller that loses the race sees `NoNode` and moves
//!   on to the next candidate.
//! - **Delay**: nothing is handed out before its release time.
//! - **Transient faults**: session expiry or connection loss while listing
//!   backs off briefly and reads as an empty queue, leaving stored items untouched.

use super::error::{QueueError, QueueResult};
use super::item::{DelayItem, NodeName, decode_id, now_millis};
use crate::coordination::coordinator::{delete_tree, ensure_path};
use crate::coordination::types::join_path;
use crate::coordination::watch::{WatchLatch, WatchOutcome};
use crate::coordination::{Acl, CoordError, Coordinator, CreateMode};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_millis(100);

/// A decoded child name, before its payload is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub name: String,
    pub sequence: u64,
    pub release_time: i64,
}

/// Outcome of one pass over the ordered children.
#[derive(Debug, Default)]
struct Scan {
    item: Option<DelayItem>,
    /// Earliest release time among entries passed over as not yet due.
    next_release: Option<i64>,
}

pub struct SequencedQueue {
    client: Arc<dyn Coordinator>,
    dir: String,
    acl: Acl,
    transient_backoff: Duration,
}

impl SequencedQueue {
    /// Binds a queue to `dir`, creating every missing path component.
    ///
    /// This is the only place a queue reports a configuration fault; after
    /// construction a vanished directory is quietly recreated.
    pub async fn create(client: Arc<dyn Coordinator>, dir: &str, acl: Acl) -> QueueResult<Self> {
        ensure_path(client.as_ref(), dir, acl)
            .await
            .map_err(|source| QueueError::Configuration {
                path: dir.to_string(),
                source,
            })?;

        tracing::info!("Queue ready at {}", dir);

        Ok(Self {
            client,
            dir: dir.to_string(),
            acl,
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
        })
    }

    pub fn with_transient_backoff(mut self, backoff: Duration) -> Self {
        self.transient_backoff = backoff;
        self
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn client(&self) -> &Arc<dyn Coordinator> {
        &self.client
    }

    /// Appends an item and returns the created node path.
    pub async fn offer(&self, item: &DelayItem) -> QueueResult<String> {
        let path = join_path(&self.dir, &item.node_prefix());

        loop {
            match self
                .client
                .create(&path, item.payload(), self.acl, CreateMode::PersistentSequential)
                .await
            {
                Ok(created) => {
                    tracing::debug!(
                        "Offered id {} due at {} as {}",
                        item.id(),
                        item.release_time(),
                        created
                    );
                    return Ok(created);
                }
                Err(CoordError::NoNode(_)) => {
                    tracing::warn!("Queue directory {} vanished, recreating", self.dir);
                    self.recreate_dir().await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Lowest-sequence surviving item, left in place.
    pub async fn element(&self) -> QueueResult<DelayItem> {
        let (children, _) = self.ordered_children(false).await?;

        for entry in children.values() {
            if let Some(item) = self.read(entry).await? {
                return Ok(item);
            }
        }

        Err(QueueError::NotFound(self.dir.clone()))
    }

    /// Claims the lowest-sequence item that is already due. Never waits.
    pub async fn remove(&self) -> QueueResult<DelayItem> {
        let (children, _) = self.ordered_children(false).await?;

        self.claim_due(&children)
            .await?
            .item
            .ok_or_else(|| QueueError::NotFound(self.dir.clone()))
    }

    /// Claims the next due item, waiting for one to become available.
    ///
    /// `None` waits without bound; `Some(timeout)` gives up and returns
    /// `Ok(None)` once `timeout` has elapsed. Each pass arms a child watch
    /// together with the listing, then sleeps until the watch fires, the
    /// earliest pending item falls due, or the deadline passes.
    pub async fn take(&self, timeout: Option<Duration>) -> QueueResult<Option<DelayItem>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let (children, latch) = match self.ordered_children(true).await {
                Ok(listing) => listing,
                Err(QueueError::NotFound(_)) => {
                    tracing::warn!("Queue directory {} missing, recreating", self.dir);
                    self.recreate_dir().await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let scan = match self.claim_due(&children).await {
                Ok(scan) => scan,
                Err(e) if e.is_transient() => {
                    tracing::warn!("Transient fault while scanning {}: {}", self.dir, e);
                    tokio::time::sleep(self.transient_backoff).await;
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Ok(None);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(item) = scan.item {
                return Ok(Some(item));
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }

            let wake = earliest(deadline, scan.next_release.map(release_instant));

            // No latch means the listing hit a transient fault and already backed off.
            let Some(mut latch) = latch else {
                continue;
            };

            match latch.wait_until(wake).await {
                WatchOutcome::Fired(event) => {
                    tracing::trace!("Woken by {:?} on {}", event.kind, event.path);
                }
                WatchOutcome::TimedOut => {}
                WatchOutcome::Abandoned => {
                    let pause = Instant::now() + self.transient_backoff;
                    tokio::time::sleep_until(earliest(wake, Some(pause)).unwrap_or(pause)).await;
                }
            }
        }
    }

    /// `element` without the `NotFound`.
    pub async fn peek(&self) -> QueueResult<Option<DelayItem>> {
        match self.element().await {
            Ok(item) => Ok(Some(item)),
            Err(QueueError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `remove` without the `NotFound`.
    pub async fn poll(&self) -> QueueResult<Option<DelayItem>> {
        match self.remove().await {
            Ok(item) => Ok(Some(item)),
            Err(QueueError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Decoded child names in sequence order, payloads unread.
    pub async fn entries(&self) -> QueueResult<Vec<QueueEntry>> {
        let (children, _) = self.ordered_children(false).await?;
        Ok(children.into_values().collect())
    }

    /// Every surviving item in sequence order, none consumed.
    pub async fn list(&self) -> QueueResult<Vec<DelayItem>> {
        let mut items = Vec::new();
        for entry in self.entries().await? {
            if let Some(item) = self.read(&entry).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Reads one entry's payload. `None` if the node is gone or its payload is
    /// malformed.
    pub async fn read(&self, entry: &QueueEntry) -> QueueResult<Option<DelayItem>> {
        let path = join_path(&self.dir, &entry.name);

        match self.client.get_data(&path).await {
            Ok((payload, _)) => match decode_id(&payload) {
                Ok(id) => Ok(Some(DelayItem::new(id, entry.release_time))),
                Err(reason) => {
                    let violation = QueueError::ProtocolViolation {
                        name: path,
                        reason,
                    };
                    tracing::warn!("Skipping queue node: {}", violation);
                    Ok(None)
                }
            },
            Err(CoordError::NoNode(_)) => {
                tracing::trace!("{} consumed elsewhere", path);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Recursively deletes `path`. Maintenance and test teardown only.
    pub async fn cleanup(&self, path: &str) -> QueueResult<()> {
        delete_tree(self.client.as_ref(), path).await?;
        tracing::info!("Removed {}", path);
        Ok(())
    }

    async fn recreate_dir(&self) -> QueueResult<()> {
        ensure_path(self.client.as_ref(), &self.dir, self.acl).await?;
        Ok(())
    }

    /// Lists the directory keyed by sequence number, optionally arming a
    /// child watch in the same call.
    async fn ordered_children(
        &self,
        watch: bool,
    ) -> QueueResult<(BTreeMap<u64, QueueEntry>, Option<WatchLatch>)> {
        let listing = if watch {
            self.client
                .watch_children(&self.dir)
                .await
                .map(|(names, latch)| (names, Some(latch)))
        } else {
            self.client
                .get_children(&self.dir)
                .await
                .map(|names| (names, None))
        };

        let (names, latch) = match listing {
            Ok(listing) => listing,
            Err(CoordError::NoNode(_)) => return Err(QueueError::NotFound(self.dir.clone())),
            Err(e) if e.is_transient() => {
                tracing::warn!("Listing {} failed ({}), backing off", self.dir, e);
                tokio::time::sleep(self.transient_backoff).await;
                return Ok((BTreeMap::new(), None));
            }
            Err(e) => return Err(e.into()),
        };

        let mut ordered = BTreeMap::new();
        for name in names {
            match NodeName::parse(&name) {
                Ok(parsed) => {
                    ordered.insert(
                        parsed.sequence,
                        QueueEntry {
                            name,
                            sequence: parsed.sequence,
                            release_time: parsed.release_time,
                        },
                    );
                }
                Err(reason) => {
                    let violation = QueueError::ProtocolViolation {
                        name: join_path(&self.dir, &name),
                        reason,
                    };
                    tracing::warn!("Skipping queue node: {}", violation);
                }
            }
        }

        Ok((ordered, latch))
    }

    /// Scans in sequence order and deletes the first due survivor.
    async fn claim_due(&self, children: &BTreeMap<u64, QueueEntry>) -> QueueResult<Scan> {
        let now = now_millis();
        let mut scan = Scan::default();

        for entry in children.values() {
            if entry.release_time > now {
                scan.next_release = Some(
                    scan.next_release
                        .map_or(entry.release_time, |next| next.min(entry.release_time)),
                );
                continue;
            }

            let Some(item) = self.read(entry).await? else {
                continue;
            };

            let path = join_path(&self.dir, &entry.name);
            match self.client.delete(&path, None).await {
                Ok(()) => {
                    tracing::debug!("Claimed id {} from {}", item.id(), path);
                    scan.item = Some(item);
                    return Ok(scan);
                }
                Err(CoordError::NoNode(_)) => {
                    tracing::trace!("Lost the race for {}", path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(scan)
    }
}

/// Instant at which an item released at `release_time` becomes due.
fn release_instant(release_time: i64) -> Instant {
    let remaining = release_time.saturating_sub(now_millis()).max(0) as u64;
    Instant::now() + Duration::from_millis(remaining + 1)
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
