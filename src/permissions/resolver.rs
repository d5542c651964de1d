use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{MenuTree, PermissionKind, PermissionNode, ROOT_PARENT_ID, ResolveError, build_tree};

/// Current state of a user as seen by the permission store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub active: bool,
    pub is_admin: bool,
    /// Active roles only
    pub role_ids: Vec<i64>,
}

/// Read-only queries the resolver needs from the relational store.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Every active node of the given kinds.
    async fn active_nodes(&self, kinds: &[PermissionKind])
    -> Result<Vec<PermissionNode>, sqlx::Error>;

    /// Distinct active nodes of the given kinds reachable through the user's
    /// active roles.
    async fn user_nodes(
        &self,
        user_id: i64,
        kinds: &[PermissionKind],
    ) -> Result<Vec<PermissionNode>, sqlx::Error>;

    async fn identity(&self, user_id: i64) -> Result<Option<Identity>, sqlx::Error>;
}

/// Fresh identity lookup, used when tokens are rotated.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn identity(&self, user_id: i64) -> Result<Option<Identity>, ResolveError>;
}

/// Turns role memberships into menu trees and flat permission lists.
///
/// Every store call is bounded by `timeout`. A timeout is an error, never an
/// empty result, and nothing is retried.
#[derive(Clone)]
pub struct PermissionResolver {
    source: Arc<dyn PermissionSource>,
    timeout: Duration,
}

impl PermissionResolver {
    pub fn new(source: Arc<dyn PermissionSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Navigation forest for a user. Only directory and menu nodes are included.
    ///
    /// Administrators get every active node regardless of role assignment.
    pub async fn resolve_menus(
        &self,
        user_id: i64,
        is_admin: bool,
    ) -> Result<Vec<MenuTree>, ResolveError> {
        let nodes = self.nodes_for(user_id, is_admin, PermissionKind::NAVIGATION).await?;
        let forest = build_tree(&nodes, ROOT_PARENT_ID)?;
        debug!(user_id, nodes = nodes.len(), "Resolved menu tree");
        Ok(forest)
    }

    /// Flat list of every permission of every kind, ordered by sort then id.
    pub async fn resolve_permissions(
        &self,
        user_id: i64,
        is_admin: bool,
    ) -> Result<Vec<PermissionNode>, ResolveError> {
        let mut nodes = self.nodes_for(user_id, is_admin, PermissionKind::ALL).await?;
        nodes.sort_by_key(|node| (node.sort, node.id));
        nodes.dedup_by_key(|node| node.id);
        Ok(nodes)
    }

    async fn nodes_for(
        &self,
        user_id: i64,
        is_admin: bool,
        kinds: &[PermissionKind],
    ) -> Result<Vec<PermissionNode>, ResolveError> {
        if is_admin {
            info!(user_id, "Administrator bypass: resolving all active permissions");
            self.bounded(self.source.active_nodes(kinds)).await
        } else {
            self.bounded(self.source.user_nodes(user_id, kinds)).await
        }
    }

    async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, ResolveError> {
        match tokio::time::timeout(self.timeout, query).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ResolveError::Timeout),
        }
    }
}

#[async_trait]
impl IdentitySource for PermissionResolver {
    async fn identity(&self, user_id: i64) -> Result<Option<Identity>, ResolveError> {
        self.bounded(self.source.identity(user_id)).await
    }
}
