//! Permission node storage.

use sqlx::sqlite::SqlitePool;
use tracing::warn;

use crate::permissions::{PermissionKind, PermissionNode};

#[derive(Clone)]
pub struct PermissionStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PermissionRow {
    id: i64,
    parent_id: i64,
    name: String,
    kind: String,
    path: String,
    method: Option<String>,
    component: Option<String>,
    icon: Option<String>,
    sort: i64,
    status: i64,
}

impl PermissionRow {
    fn into_node(self) -> Option<PermissionNode> {
        let Some(kind) = PermissionKind::parse(&self.kind) else {
            warn!(id = self.id, kind = %self.kind, "Skipping permission with unknown kind");
            return None;
        };
        Some(PermissionNode {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            kind,
            path: self.path,
            method: self.method,
            component: self.component,
            icon: self.icon,
            sort: self.sort,
            active: self.status == 1,
        })
    }
}

/// Fields needed to create a permission node.
#[derive(Debug, Clone)]
pub struct NewPermission {
    pub parent_id: i64,
    pub name: String,
    pub kind: PermissionKind,
    pub path: String,
    pub method: Option<String>,
    pub component: Option<String>,
    pub icon: Option<String>,
    pub sort: i64,
}

impl NewPermission {
    pub fn new(parent_id: i64, name: &str, kind: PermissionKind, path: &str, sort: i64) -> Self {
        Self {
            parent_id,
            name: name.to_string(),
            kind,
            path: path.to_string(),
            method: None,
            component: None,
            icon: None,
            sort,
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }
}

const PERMISSION_COLUMNS: &str =
    "p.id, p.parent_id, p.name, p.kind, p.path, p.method, p.component, p.icon, p.sort, p.status";

fn filter_kinds(rows: Vec<PermissionRow>, kinds: &[PermissionKind]) -> Vec<PermissionNode> {
    rows.into_iter()
        .filter_map(PermissionRow::into_node)
        .filter(|node| kinds.contains(&node.kind))
        .collect()
}

impl PermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active node. Returns its ID.
    pub async fn create(&self, node: &NewPermission) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO permissions (parent_id, name, kind, path, method, component, icon, sort)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node.parent_id)
        .bind(&node.name)
        .bind(node.kind.as_str())
        .bind(&node.path)
        .bind(&node.method)
        .bind(&node.component)
        .bind(&node.icon)
        .bind(node.sort)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE permissions SET status = ? WHERE id = ?")
            .bind(if active { 1 } else { 2 })
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a node under another parent.
    pub async fn set_parent(&self, id: i64, parent_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE permissions SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every active node of the given kinds.
    pub async fn list_active(
        &self,
        kinds: &[PermissionKind],
    ) -> Result<Vec<PermissionNode>, sqlx::Error> {
        let rows: Vec<PermissionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM permissions p WHERE p.status = 1",
            PERMISSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(filter_kinds(rows, kinds))
    }

    /// Distinct active nodes of the given kinds granted through the user's
    /// active roles.
    pub async fn list_for_user(
        &self,
        user_id: i64,
        kinds: &[PermissionKind],
    ) -> Result<Vec<PermissionNode>, sqlx::Error> {
        let rows: Vec<PermissionRow> = sqlx::query_as(&format!(
            "SELECT DISTINCT {} FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             JOIN roles r ON r.id = rp.role_id
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ? AND r.status = 1 AND p.status = 1",
            PERMISSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(filter_kinds(rows, kinds))
    }
}
