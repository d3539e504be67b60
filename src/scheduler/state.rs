use crate::coordination::Coordinator;
use crate::coordination::types::join_path;
use crate::queue::item::decode_id;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// One node of a coordination-tree snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateNode {
    pub name: String,
    pub path: String,
    /// Payload of a leaf, when it decodes as an 8-byte long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    /// Set when this subtree could not be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StateNode>,
}

impl StateNode {
    fn new(path: &str) -> Self {
        let name = match path.rsplit_once('/') {
            Some((_, last)) if !last.is_empty() => last.to_string(),
            _ => path.to_string(),
        };

        Self {
            name,
            path: path.to_string(),
            value: None,
            error: None,
            children: Vec::new(),
        }
    }

    pub fn child(&self, name: &str) -> Option<&StateNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Follows a `/`-separated chain of child names.
    pub fn descend(&self, relative: &str) -> Option<&StateNode> {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |node, part| node.child(part))
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.name, indent = depth * 2)?;
        if let Some(value) = self.value {
            write!(f, " = {}", value)?;
        }
        if let Some(error) = &self.error {
            write!(f, " (error: {})", error)?;
        }
        writeln!(f)?;

        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Depth-first walk from `path`, children sorted by name. A node that cannot
/// be read keeps its error and is not descended into; its siblings are
/// unaffected.
pub fn snapshot<'a>(
    client: &'a dyn Coordinator,
    path: &'a str,
) -> Pin<Box<dyn Future<Output = StateNode> + Send + 'a>> {
    Box::pin(async move {
        let mut node = StateNode::new(path);

        let mut children = match client.get_children(path).await {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", path, e);
                node.error = Some(e.to_string());
                return node;
            }
        };
        children.sort();

        if children.is_empty() {
            match client.get_data(path).await {
                Ok((payload, _)) => node.value = decode_id(&payload).ok(),
                Err(e) => {
                    tracing::warn!("Cannot read {}: {}", path, e);
                    node.error = Some(e.to_string());
                }
            }
            return node;
        }

        for child in children {
            let child_path = join_path(path, &child);
            node.children.push(snapshot(client, &child_path).await);
        }

        node
    })
}
