//! Permission nodes, menu trees and the resolver that builds them from role
//! assignments.

mod enforcer;
mod resolver;
mod tree;

use serde::{Deserialize, Serialize};

pub use enforcer::{Enforcer, RolePolicy};
pub use resolver::{Identity, IdentitySource, PermissionResolver, PermissionSource};
pub use tree::build_tree;

use crate::error::ErrorKind;

/// Parent id of top-level nodes.
pub const ROOT_PARENT_ID: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    #[serde(rename = "dir")]
    Directory,
    Menu,
    Button,
    Api,
}

impl PermissionKind {
    /// Kinds that appear in navigation trees.
    pub const NAVIGATION: &'static [PermissionKind] =
        &[PermissionKind::Directory, PermissionKind::Menu];

    pub const ALL: &'static [PermissionKind] = &[
        PermissionKind::Directory,
        PermissionKind::Menu,
        PermissionKind::Button,
        PermissionKind::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Directory => "dir",
            PermissionKind::Menu => "menu",
            PermissionKind::Button => "button",
            PermissionKind::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dir" => Some(PermissionKind::Directory),
            "menu" => Some(PermissionKind::Menu),
            "button" => Some(PermissionKind::Button),
            "api" => Some(PermissionKind::Api),
            _ => None,
        }
    }
}

/// A permission entry. Directory and menu nodes double as navigation entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionNode {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub kind: PermissionKind,
    pub path: String,
    /// HTTP method for `api` nodes; None matches any action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub sort: i64,
    pub active: bool,
}

/// One node of a menu forest with its ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuTree {
    #[serde(flatten)]
    pub node: PermissionNode,
    pub children: Vec<MenuTree>,
}

impl MenuTree {
    /// Number of nodes in this subtree, including itself.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            count += 1;
            stack.extend(tree.children.iter());
        }
        count
    }
}

// Flatten before dropping so a deep chain does not recurse once per level.
impl Drop for MenuTree {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut tree) = stack.pop() {
            stack.append(&mut tree.children);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A node was reached twice while walking the tree, i.e. the parent links
    /// form a cycle or repeat an id.
    #[error("permission data integrity violation at node {node_id}")]
    DataIntegrity { node_id: i64 },
    #[error("permission store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("permission store did not answer in time")]
    Timeout,
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::DataIntegrity { .. } => ErrorKind::PermissionDataIntegrity,
            ResolveError::Store(_) => ErrorKind::Internal,
            ResolveError::Timeout => ErrorKind::Timeout,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn node(id: i64, parent_id: i64, kind: PermissionKind, sort: i64) -> PermissionNode {
        PermissionNode {
            id,
            parent_id,
            name: format!("node-{}", id),
            kind,
            path: format!("/node/{}", id),
            method: None,
            component: None,
            icon: None,
            sort,
            active: true,
        }
    }

    pub fn menu(id: i64, parent_id: i64, sort: i64) -> PermissionNode {
        node(id, parent_id, PermissionKind::Menu, sort)
    }
}
