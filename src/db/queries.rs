use crate::db::models::*;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::info;
use uuid::Uuid;

pub type DbPool = Pool<Sqlite>;

/// Durable identity storage, keyed by unique name.
///
/// Every operation is atomic at the single-record level. Name uniqueness is
/// enforced by the store itself, not by a lookup before insert.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> AppResult<Option<Identity>>;

    /// Insert a new identity without a secret. Fails with `AlreadyExists`
    /// if the name is taken.
    async fn insert(&self, new_identity: NewIdentity) -> AppResult<Identity>;

    /// Persist the mutable fields (category, secret, expiry) of an existing
    /// identity. Fails with `NotFound` if it no longer exists.
    async fn update(&self, identity: &Identity) -> AppResult<()>;

    /// Remove an identity. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> AppResult<bool>;

    /// All identities in a stable order (creation time, then name).
    async fn list_all(&self) -> AppResult<Vec<Identity>>;
}

/// SQLite-backed identity store
#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    pool: DbPool,
}

impl SqliteIdentityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_by_name(&self, name: &str) -> AppResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(identity)
    }

    async fn insert(&self, new_identity: NewIdentity) -> AppResult<Identity> {
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            name: new_identity.name,
            category: new_identity.category.as_str().to_string(),
            secret: None,
            secret_expires_at: new_identity.secret_expires_at,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO identities (id, name, category, secret, secret_expires_at, created_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&identity.id)
        .bind(&identity.name)
        .bind(&identity.category)
        .bind(identity.secret_expires_at)
        .bind(identity.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::AlreadyExists(identity.name.clone())
            }
            other => AppError::Database(other),
        })?;

        Ok(identity)
    }

    async fn update(&self, identity: &Identity) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE identities SET category = ?, secret = ?, secret_expires_at = ? WHERE name = ?",
        )
        .bind(&identity.category)
        .bind(identity.secret.as_deref())
        .bind(identity.secret_expires_at)
        .bind(&identity.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(&identity.name));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM identities WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> AppResult<Vec<Identity>> {
        let identities = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities ORDER BY created_at ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(identities)
    }
}

#[cfg(test)]
pub async fn setup_test_db() -> DbPool {
    use sqlx::sqlite::SqlitePoolOptions;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    init_db(&pool).await.expect("Failed to init database");
    pool
}

/// Initialize database with migrations
pub async fn init_db(pool: &DbPool) -> AppResult<()> {
    info!("Running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT UNIQUE NOT NULL,
            category TEXT NOT NULL,
            secret BLOB,
            secret_expires_at DATETIME,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_identity(name: &str, category: Category) -> NewIdentity {
        NewIdentity {
            name: name.to_string(),
            category,
            secret_expires_at: Some(Utc::now() + category.secret_lifetime()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        let created = store.insert(new_identity("alice", Category::Guest)).await.unwrap();

        let found = store.find_by_name("alice").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.category(), Category::Guest);
        assert!(!found.has_secret());
        assert!(found.secret_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_find_nonexistent() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        assert!(store.find_by_name("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_name() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        store.insert(new_identity("alice", Category::Guest)).await.unwrap();

        let result = store.insert(new_identity("alice", Category::Permanent)).await;
        assert!(matches!(result, Err(AppError::AlreadyExists(name)) if name == "alice"));
    }

    #[tokio::test]
    async fn test_update_secret_and_expiry() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        let mut identity = store.insert(new_identity("bob", Category::Permanent)).await.unwrap();

        let expires = Utc::now() + Duration::days(3);
        identity.secret = Some(vec![9, 8, 7]);
        identity.secret_expires_at = Some(expires);
        store.update(&identity).await.unwrap();

        let found = store.find_by_name("bob").await.unwrap().unwrap();
        assert_eq!(found.secret, Some(vec![9, 8, 7]));
        assert_eq!(
            found.secret_expires_at.map(|t| t.timestamp_millis()),
            Some(expires.timestamp_millis())
        );

        identity.secret = None;
        store.update(&identity).await.unwrap();
        let found = store.find_by_name("bob").await.unwrap().unwrap();
        assert!(found.secret.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_identity() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        let identity = store.insert(new_identity("carol", Category::Guest)).await.unwrap();
        assert!(store.delete("carol").await.unwrap());

        let result = store.update(&identity).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        store.insert(new_identity("dave", Category::Guest)).await.unwrap();

        assert!(store.delete("dave").await.unwrap());
        assert!(!store.delete("dave").await.unwrap());
        assert!(store.find_by_name("dave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_all_in_creation_order() {
        let store = SqliteIdentityStore::new(setup_test_db().await);
        for name in ["zed", "amy", "kim"] {
            store.insert(new_identity(name, Category::Guest)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let names: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["zed", "amy", "kim"]);
    }

    #[tokio::test]
    async fn test_init_db_idempotent() {
        let pool = setup_test_db().await;
        init_db(&pool).await.unwrap();
    }
}
