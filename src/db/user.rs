use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// Account status. Stored as 1 (active) and 2 (disabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            UserStatus::Active => 1,
            UserStatus::Disabled => 2,
        }
    }

    /// Anything other than 1 counts as disabled.
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => UserStatus::Active,
            _ => UserStatus::Disabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub status: UserStatus,
    pub is_admin: bool,
    pub department_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    password_hash: String,
    status: i64,
    is_admin: i64,
    department_id: Option<i64>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            status: UserStatus::from_i64(row.status),
            is_admin: row.is_admin != 0,
            department_id: row.department_id,
        }
    }
}

/// Fields needed to create a user.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub password_hash: &'a str,
    pub is_admin: bool,
}

const USER_COLUMNS: &str = "id, username, email, password_hash, status, is_admin, department_id";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active user. Returns the user ID.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin) VALUES (?, ?, ?, ?)",
        )
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.is_admin as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Check if a username is available.
    pub async fn is_username_available(&self, username: &str) -> Result<bool, sqlx::Error> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.is_none())
    }

    /// Check if an email address is not yet bound to an account.
    pub async fn is_email_available(&self, email: &str) -> Result<bool, sqlx::Error> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.is_none())
    }

    /// Enable or disable a user. Returns false if the user does not exist.
    pub async fn set_status(&self, id: i64, status: UserStatus) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET status = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check if an admin user exists.
    pub async fn admin_exists(&self) -> Result<bool, sqlx::Error> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE is_admin = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewUser, UserStatus};

    fn alice() -> NewUser<'static> {
        NewUser {
            username: "alice",
            email: Some("alice@example.com"),
            password_hash: "hash",
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db.users().create(&alice()).await.unwrap();

        let user = db.users().get_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
        assert_eq!(user.status, UserStatus::Active);
        assert!(!user.is_admin);

        let user = db.users().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn test_duplicate_username_fails() {
        let db = Database::open(":memory:").await.unwrap();

        db.users().create(&alice()).await.unwrap();
        let result = db
            .users()
            .create(&NewUser {
                email: None,
                ..alice()
            })
            .await;

        match result {
            Err(sqlx::Error::Database(e)) => assert!(e.is_unique_violation()),
            other => panic!("expected unique violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_availability() {
        let db = Database::open(":memory:").await.unwrap();

        assert!(db.users().is_username_available("alice").await.unwrap());
        assert!(db.users().is_email_available("alice@example.com").await.unwrap());

        db.users().create(&alice()).await.unwrap();
        assert!(!db.users().is_username_available("Alice").await.unwrap());
        assert!(!db.users().is_email_available("alice@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_status() {
        let db = Database::open(":memory:").await.unwrap();
        let id = db.users().create(&alice()).await.unwrap();

        assert!(db.users().set_status(id, UserStatus::Disabled).await.unwrap());
        let user = db.users().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Disabled);

        assert!(!db.users().set_status(999, UserStatus::Active).await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_exists() {
        let db = Database::open(":memory:").await.unwrap();
        assert!(!db.users().admin_exists().await.unwrap());

        db.users()
            .create(&NewUser {
                is_admin: true,
                ..alice()
            })
            .await
            .unwrap();
        assert!(db.users().admin_exists().await.unwrap());
    }
}
