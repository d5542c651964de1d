mod permission;
mod role;
mod token;
mod user;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use permission::{NewPermission, PermissionStore};
pub use role::RoleStore;
pub use token::{RefreshTokenStore, StoredRefreshToken};
pub use user::{NewUser, User, UserStatus, UserStore};

use crate::jwt::{RefreshLedger, RefreshTokenResult};
use crate::permissions::{Identity, PermissionKind, PermissionNode, PermissionSource};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        // Every connection to sqlite::memory: is a separate database.
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{}?mode=rwc", path), 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // status: 1 = active, 2 = disabled
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    email TEXT UNIQUE COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    status INTEGER NOT NULL DEFAULT 1,
                    is_admin INTEGER NOT NULL DEFAULT 0,
                    department_id INTEGER,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE TABLE roles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT UNIQUE NOT NULL,
                    status INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE TABLE user_roles (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                    PRIMARY KEY (user_id, role_id)
                )",
                "CREATE INDEX idx_user_roles_role_id ON user_roles(role_id)",
                // parent_id 0 marks a top-level node, so it is not a foreign key
                "CREATE TABLE permissions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    parent_id INTEGER NOT NULL DEFAULT 0,
                    name TEXT NOT NULL,
                    kind TEXT NOT NULL CHECK (kind IN ('dir', 'menu', 'button', 'api')),
                    path TEXT NOT NULL DEFAULT '',
                    method TEXT,
                    component TEXT,
                    icon TEXT,
                    sort INTEGER NOT NULL DEFAULT 0,
                    status INTEGER NOT NULL DEFAULT 1
                )",
                "CREATE INDEX idx_permissions_parent_id ON permissions(parent_id)",
                "CREATE TABLE role_permissions (
                    role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                    permission_id INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
                    PRIMARY KEY (role_id, permission_id)
                )",
                "CREATE INDEX idx_role_permissions_permission_id ON role_permissions(permission_id)",
                "CREATE TABLE refresh_tokens (
                    jti TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    issued_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_refresh_tokens_user_id ON refresh_tokens(user_id)",
                "CREATE INDEX idx_refresh_tokens_expires_at ON refresh_tokens(expires_at)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the role store.
    pub fn roles(&self) -> RoleStore {
        RoleStore::new(self.pool.clone())
    }

    /// Get the permission store.
    pub fn permissions(&self) -> PermissionStore {
        PermissionStore::new(self.pool.clone())
    }

    /// Get the refresh token ledger.
    pub fn refresh_tokens(&self) -> RefreshTokenStore {
        RefreshTokenStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PermissionSource for Database {
    async fn active_nodes(
        &self,
        kinds: &[PermissionKind],
    ) -> Result<Vec<PermissionNode>, sqlx::Error> {
        self.permissions().list_active(kinds).await
    }

    async fn user_nodes(
        &self,
        user_id: i64,
        kinds: &[PermissionKind],
    ) -> Result<Vec<PermissionNode>, sqlx::Error> {
        self.permissions().list_for_user(user_id, kinds).await
    }

    async fn identity(&self, user_id: i64) -> Result<Option<Identity>, sqlx::Error> {
        let Some(user) = self.users().get_by_id(user_id).await? else {
            return Ok(None);
        };
        let role_ids = self.roles().active_role_ids(user_id).await?;

        Ok(Some(Identity {
            user_id: user.id,
            username: user.username,
            active: user.status == UserStatus::Active,
            is_admin: user.is_admin,
            role_ids,
        }))
    }
}

#[async_trait]
impl RefreshLedger for Database {
    async fn record(&self, user_id: i64, token: &RefreshTokenResult) -> Result<(), sqlx::Error> {
        self.refresh_tokens()
            .record(&token.jti, user_id, token.issued_at, token.expires_at)
            .await
    }

    async fn consume(&self, jti: &str) -> Result<bool, sqlx::Error> {
        self.refresh_tokens().consume(jti).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user(db: &Database, username: &str) -> i64 {
        db.users()
            .create(&NewUser {
                username,
                email: None,
                password_hash: "hash",
                is_admin: false,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_database_is_shared_across_calls() {
        let db = Database::open(":memory:").await.unwrap();
        let id = user(&db, "alice").await;

        // A second store handle must see the same database
        assert!(db.users().get_by_id(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_identity_reflects_active_roles() {
        let db = Database::open(":memory:").await.unwrap();
        let id = user(&db, "alice").await;
        let editor = db.roles().create("editor").await.unwrap();
        let viewer = db.roles().create("viewer").await.unwrap();
        db.roles().assign(id, editor).await.unwrap();
        db.roles().assign(id, viewer).await.unwrap();
        db.roles().set_active(viewer, false).await.unwrap();

        let identity = PermissionSource::identity(&db, id).await.unwrap().unwrap();
        assert_eq!(identity.username, "alice");
        assert!(identity.active);
        assert!(!identity.is_admin);
        assert_eq!(identity.role_ids, vec![editor]);

        db.users().set_status(id, UserStatus::Disabled).await.unwrap();
        let identity = PermissionSource::identity(&db, id).await.unwrap().unwrap();
        assert!(!identity.active);

        assert!(PermissionSource::identity(&db, 404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_consumes_once() {
        let db = Database::open(":memory:").await.unwrap();
        let id = user(&db, "alice").await;
        let token = RefreshTokenResult {
            token: "t".to_string(),
            jti: "jti-1".to_string(),
            issued_at: 100,
            expires_at: 200,
            duration: 100,
        };

        db.record(id, &token).await.unwrap();
        assert!(db.consume("jti-1").await.unwrap());
        assert!(!db.consume("jti-1").await.unwrap());
        assert!(!db.consume("unknown").await.unwrap());
    }
}
