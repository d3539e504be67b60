//! The coordination-service contract consumed by the queue and the registry.
//!
//! Implementations must guarantee that sequential creates under one parent get
//! strictly increasing, globally unique suffixes across every session, and that
//! `create`/`delete` are atomic. Nothing layered on top of this trait takes a
//! lock of its own.

use super::types::{
    Acl, CoordError, CoordResult, CreateMode, Stat, join_path, validate_path,
};
use super::watch::WatchLatch;

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Identifier of the session this handle speaks for.
    fn session_id(&self) -> u64;

    /// Creates a node and returns its actual path (which differs from `path`
    /// for sequential nodes). Fails with `NoNode` if the parent is missing and
    /// `NodeExists` if the node is already there.
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        acl: Acl,
        mode: CreateMode,
    ) -> CoordResult<String>;

    /// Deletes a childless node. `expected_version` of `None` matches any version.
    async fn delete(&self, path: &str, expected_version: Option<i32>) -> CoordResult<()>;

    /// Returns the node's metadata, or `None` if it does not exist.
    async fn exists(&self, path: &str) -> CoordResult<Option<Stat>>;

    async fn get_data(&self, path: &str) -> CoordResult<(Vec<u8>, Stat)>;

    /// Replaces the node's payload. `expected_version` of `None` matches any version.
    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<i32>,
    ) -> CoordResult<Stat>;

    /// Lists the names (not full paths) of the node's children, unordered.
    async fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Lists children and arms a one-shot watch on the child list in the same
    /// step, so no change between the listing and the watch is lost.
    async fn watch_children(&self, path: &str) -> CoordResult<(Vec<String>, WatchLatch)>;

    /// Ends the session. Pending watches are released with `SessionClosed`.
    async fn close(&self) -> CoordResult<()>;
}

/// Creates every missing component of `path`, root first. Components that
/// already exist are left alone, so repeated calls create nothing.
pub async fn ensure_path(client: &dyn Coordinator, path: &str, acl: Acl) -> CoordResult<()> {
    validate_path(path)?;

    let mut current = String::new();
    for component in path.split('/').filter(|component| !component.is_empty()) {
        current.push('/');
        current.push_str(component);

        match client
            .create(&current, Vec::new(), acl, CreateMode::Persistent)
            .await
        {
            Ok(_) => tracing::debug!("Created {}", current),
            Err(CoordError::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Deletes `path` and everything below it, children before parents. Nodes
/// that disappear underneath the walk are ignored.
pub fn delete_tree<'a>(
    client: &'a dyn Coordinator,
    path: &'a str,
) -> Pin<Box<dyn Future<Output = CoordResult<()>> + Send + 'a>> {
    Box::pin(async move {
        let children = match client.get_children(path).await {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        for child in children {
            let child_path = join_path(path, &child);
            delete_tree(client, &child_path).await?;
        }

        match client.delete(path, None).await {
            Ok(()) | Err(CoordError::NoNode(_)) => Ok(()),
            Err(e) => Err(e),
        }
    })
}
