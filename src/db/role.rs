//! Roles and their many-to-many links to users and permissions.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
}

impl RoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active role. Returns the role ID.
    pub async fn create(&self, name: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO roles (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn set_active(&self, role_id: i64, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE roles SET status = ? WHERE id = ?")
            .bind(if active { 1 } else { 2 })
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Give a user a role. Assigning twice is a no-op.
    pub async fn assign(&self, user_id: i64, role_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn revoke(&self, user_id: i64, role_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Grant a permission node to a role. Granting twice is a no-op.
    pub async fn grant(&self, role_id: i64, permission_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?, ?)",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn withdraw(&self, role_id: i64, permission_id: i64) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// IDs of the user's active roles, ascending.
    pub async fn active_role_ids(&self, user_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT r.id FROM user_roles ur
             JOIN roles r ON r.id = ur.role_id
             WHERE ur.user_id = ? AND r.status = 1
             ORDER BY r.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewUser};

    #[tokio::test]
    async fn test_assign_and_revoke() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create(&NewUser {
                username: "alice",
                email: None,
                password_hash: "hash",
                is_admin: false,
            })
            .await
            .unwrap();
        let a = db.roles().create("a").await.unwrap();
        let b = db.roles().create("b").await.unwrap();

        db.roles().assign(user, b).await.unwrap();
        db.roles().assign(user, a).await.unwrap();
        db.roles().assign(user, a).await.unwrap();
        assert_eq!(db.roles().active_role_ids(user).await.unwrap(), vec![a, b]);

        assert!(db.roles().revoke(user, a).await.unwrap());
        assert!(!db.roles().revoke(user, a).await.unwrap());
        assert_eq!(db.roles().active_role_ids(user).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_duplicate_role_name_fails() {
        let db = Database::open(":memory:").await.unwrap();
        db.roles().create("editor").await.unwrap();
        assert!(db.roles().create("editor").await.is_err());
    }
}
