//! In-process coordination service.
//!
//! `MemoryEnsemble` keeps the whole node tree in one place and serializes every
//! mutation, which is what gives sequential creates their total order and makes
//! `create`/`delete` atomic. Each `MemorySession` is an independent client of
//! the ensemble, so several sessions over one ensemble behave like several
//! processes sharing one service.

use super::coordinator::Coordinator;
use super::types::*;
use super::watch::{WatchLatch, WatchTrigger};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct ZNode {
    data: Vec<u8>,
    acl: Acl,
    version: i32,
    cversion: i32,
    num_children: usize,
    next_seq: u64,
    ctime: u64,
    mtime: u64,
}

impl ZNode {
    fn new(data: Vec<u8>, acl: Acl) -> Self {
        let now = now_ms();
        Self {
            data,
            acl,
            version: 0,
            cversion: 0,
            num_children: 0,
            next_seq: 0,
            ctime: now,
            mtime: now,
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            cversion: self.cversion,
            num_children: self.num_children,
            ctime: self.ctime,
            mtime: self.mtime,
        }
    }
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, ZNode>,
    /// Path -> armed child watches, tagged with the owning session.
    child_watches: HashMap<String, Vec<(u64, WatchTrigger)>>,
    expired: HashSet<u64>,
    closed: HashSet<u64>,
}

impl Tree {
    fn check_session(&self, session: u64) -> CoordResult<()> {
        if self.closed.contains(&session) {
            return Err(CoordError::SessionClosed);
        }
        if self.expired.contains(&session) {
            return Err(CoordError::SessionExpired);
        }
        Ok(())
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn fire(&mut self, path: &str, kind: WatchEventKind) {
        if let Some(triggers) = self.child_watches.remove(path) {
            for (_, trigger) in triggers {
                trigger.fire(WatchEvent {
                    path: path.to_string(),
                    kind: kind.clone(),
                });
            }
        }
    }

    fn release_session_watches(&mut self, session: u64) {
        for (path, triggers) in self.child_watches.iter_mut() {
            let (owned, kept): (Vec<_>, Vec<_>) = std::mem::take(triggers)
                .into_iter()
                .partition(|(owner, _)| *owner == session);
            *triggers = kept;

            for (_, trigger) in owned {
                trigger.fire(WatchEvent {
                    path: path.clone(),
                    kind: WatchEventKind::SessionClosed,
                });
            }
        }
        self.child_watches.retain(|_, triggers| !triggers.is_empty());
    }
}

/// Shared node tree. Hand out sessions with [`MemoryEnsemble::connect`].
#[derive(Debug)]
pub struct MemoryEnsemble {
    tree: Mutex<Tree>,
    next_session: AtomicU64,
}

impl MemoryEnsemble {
    /// Creates an ensemble holding only the root node `/`.
    pub fn new() -> Arc<Self> {
        let mut tree = Tree::default();
        tree.nodes.insert("/".to_string(), ZNode::new(Vec::new(), Acl::Open));

        Arc::new(Self {
            tree: Mutex::new(tree),
            next_session: AtomicU64::new(1),
        })
    }

    /// Opens a new session against this ensemble.
    pub fn connect(self: &Arc<Self>) -> Arc<MemorySession> {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened coordination session {}", id);
        Arc::new(MemorySession {
            ensemble: self.clone(),
            id,
        })
    }

    /// Marks a session as expired. Its operations fail with `SessionExpired`
    /// and its armed watches are released until [`Self::revive_session`].
    pub fn expire_session(&self, session: u64) {
        let mut tree = self.lock();
        if tree.expired.insert(session) {
            tracing::info!("Coordination session {} expired", session);
        }
        tree.release_session_watches(session);
    }

    pub fn revive_session(&self, session: u64) {
        let mut tree = self.lock();
        if tree.expired.remove(&session) {
            tracing::info!("Coordination session {} revived", session);
        }
    }

    pub fn close_session(&self, session: u64) {
        let mut tree = self.lock();
        if tree.closed.insert(session) {
            tracing::debug!("Closed coordination session {}", session);
        }
        tree.release_session_watches(session);
    }

    /// Total number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of armed, not yet fired watches.
    pub fn watch_count(&self) -> usize {
        self.lock()
            .child_watches
            .values()
            .map(|triggers| triggers.iter().filter(|(_, t)| !t.is_abandoned()).count())
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create(
        &self,
        session: u64,
        path: &str,
        data: Vec<u8>,
        acl: Acl,
        mode: CreateMode,
    ) -> CoordResult<String> {
        validate_path(path)?;
        let parent = parent_path(path).ok_or_else(|| CoordError::NodeExists(path.to_string()))?;

        let mut tree = self.lock();
        tree.check_session(session)?;

        let actual = {
            let parent_node = tree
                .nodes
                .get_mut(parent)
                .ok_or_else(|| CoordError::NoNode(parent.to_string()))?;

            if !parent_node.acl.allows_write() {
                return Err(CoordError::NoAuth(parent.to_string()));
            }

            if mode.is_sequential() {
                let seq = parent_node.next_seq;
                parent_node.next_seq += 1;
                format!("{}{:010}", path, seq)
            } else {
                path.to_string()
            }
        };

        if tree.nodes.contains_key(&actual) {
            return Err(CoordError::NodeExists(actual));
        }

        if let Some(parent_node) = tree.nodes.get_mut(parent) {
            parent_node.cversion += 1;
            parent_node.num_children += 1;
        }
        tree.nodes.insert(actual.clone(), ZNode::new(data, acl));
        tree.fire(parent, WatchEventKind::ChildrenChanged);

        tracing::trace!("Created {}", actual);
        Ok(actual)
    }

    fn delete(&self, session: u64, path: &str, expected_version: Option<i32>) -> CoordResult<()> {
        validate_path(path)?;
        let parent = parent_path(path).ok_or_else(|| CoordError::NoAuth(path.to_string()))?;

        let mut tree = self.lock();
        tree.check_session(session)?;

        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;

        if !node.acl.allows_write() {
            return Err(CoordError::NoAuth(path.to_string()));
        }
        if let Some(expected) = expected_version
            && expected != node.version
        {
            return Err(CoordError::BadVersion {
                path: path.to_string(),
                expected,
                actual: node.version,
            });
        }
        if node.num_children > 0 {
            return Err(CoordError::NotEmpty(path.to_string()));
        }

        tree.nodes.remove(path);
        if let Some(parent_node) = tree.nodes.get_mut(parent) {
            parent_node.cversion += 1;
            parent_node.num_children = parent_node.num_children.saturating_sub(1);
        }
        tree.fire(path, WatchEventKind::NodeDeleted);
        tree.fire(parent, WatchEventKind::ChildrenChanged);

        tracing::trace!("Deleted {}", path);
        Ok(())
    }

    fn exists(&self, session: u64, path: &str) -> CoordResult<Option<Stat>> {
        validate_path(path)?;
        let tree = self.lock();
        tree.check_session(session)?;
        Ok(tree.nodes.get(path).map(ZNode::stat))
    }

    fn get_data(&self, session: u64, path: &str) -> CoordResult<(Vec<u8>, Stat)> {
        validate_path(path)?;
        let tree = self.lock();
        tree.check_session(session)?;
        tree.nodes
            .get(path)
            .map(|node| (node.data.clone(), node.stat()))
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    fn set_data(
        &self,
        session: u64,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> CoordResult<Stat> {
        validate_path(path)?;
        let mut tree = self.lock();
        tree.check_session(session)?;

        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;

        if !node.acl.allows_write() {
            return Err(CoordError::NoAuth(path.to_string()));
        }
        if let Some(expected) = expected_version
            && expected != node.version
        {
            return Err(CoordError::BadVersion {
                path: path.to_string(),
                expected,
                actual: node.version,
            });
        }

        node.data = data;
        node.version += 1;
        node.mtime = now_ms();
        Ok(node.stat())
    }

    fn get_children(&self, session: u64, path: &str) -> CoordResult<Vec<String>> {
        validate_path(path)?;
        let tree = self.lock();
        tree.check_session(session)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode(path.to_string()));
        }
        Ok(tree.children_of(path))
    }

    fn watch_children(&self, session: u64, path: &str) -> CoordResult<(Vec<String>, WatchLatch)> {
        validate_path(path)?;
        let mut tree = self.lock();
        tree.check_session(session)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode(path.to_string()));
        }

        let children = tree.children_of(path);
        let (trigger, latch) = WatchLatch::pair();
        let triggers = tree.child_watches.entry(path.to_string()).or_default();
        triggers.retain(|(_, t)| !t.is_abandoned());
        triggers.push((session, trigger));

        Ok((children, latch))
    }
}

/// One client session over a [`MemoryEnsemble`].
#[derive(Debug)]
pub struct MemorySession {
    ensemble: Arc<MemoryEnsemble>,
    id: u64,
}

impl MemorySession {
    pub fn ensemble(&self) -> &Arc<MemoryEnsemble> {
        &self.ensemble
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    fn session_id(&self) -> u64 {
        self.id
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: Acl,
        mode: CreateMode,
    ) -> CoordResult<String> {
        self.ensemble.create(self.id, path, data, acl, mode)
    }

    async fn delete(&self, path: &str, expected_version: Option<i32>) -> CoordResult<()> {
        self.ensemble.delete(self.id, path, expected_version)
    }

    async fn exists(&self, path: &str) -> CoordResult<Option<Stat>> {
        self.ensemble.exists(self.id, path)
    }

    async fn get_data(&self, path: &str) -> CoordResult<(Vec<u8>, Stat)> {
        self.ensemble.get_data(self.id, path)
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> CoordResult<Stat> {
        self.ensemble.set_data(self.id, path, data, expected_version)
    }

    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        self.ensemble.get_children(self.id, path)
    }

    async fn watch_children(&self, path: &str) -> CoordResult<(Vec<String>, WatchLatch)> {
        self.ensemble.watch_children(self.id, path)
    }

    async fn close(&self) -> CoordResult<()> {
        self.ensemble.close_session(self.id);
        Ok(())
    }
}
