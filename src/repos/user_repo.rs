/*
 * Responsibility
 * - users テーブル向け SQLx 操作 (PgUserRepo)
 * - DATABASE_URL が無い環境向けの in-memory 実装 (MemoryUserRepo)
 * - unique 違反は RepoError::Conflict、見つからない場合は RepoError::NotFound
 */
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repos::error::{RepoError, RepoResult};
use crate::services::auth::password::Credential;
use crate::services::user::{Role, User, role_names};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: &User) -> RepoResult<()>;
    async fn update(&self, user: &User) -> RepoResult<()>;
    async fn query_by_id(&self, id: Uuid) -> RepoResult<User>;
    async fn query_by_email(&self, email: &str) -> RepoResult<User>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: Uuid,
    name: String,
    email: String,
    roles: Vec<String>,
    password_hash: String,
    department: Option<String>,
    enabled: bool,
    date_created: DateTime<Utc>,
    date_updated: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let roles = row
            .roles
            .iter()
            .map(|r| r.parse::<Role>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RepoError::Corrupt(format!("user {}: {e}", row.user_id)))?;

        Ok(User {
            id: row.user_id,
            name: row.name,
            email: row.email,
            roles,
            credential: Credential::from_hash(row.password_hash),
            department: row.department,
            enabled: row.enabled,
            date_created: row.date_created,
            date_updated: row.date_updated,
        })
    }
}

const SELECT_USER: &str = r#"
    SELECT user_id, name, email, roles, password_hash, department, enabled, date_created, date_updated
    FROM users
"#;

#[derive(Debug, Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, user: &User) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users
                (user_id, name, email, roles, password_hash, department, enabled, date_created, date_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(role_names(&user.roles))
        .bind(user.credential.as_hash())
        .bind(&user.department)
        .bind(user.enabled)
        .bind(user.date_created)
        .bind(user.date_updated)
        .execute(&self.db)
        .await
        .map_err(RepoError::from_sqlx)?;

        Ok(())
    }

    async fn update(&self, user: &User) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET
                name = $2,
                email = $3,
                roles = $4,
                password_hash = $5,
                department = $6,
                enabled = $7,
                date_updated = $8
            WHERE user_id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(role_names(&user.roles))
        .bind(user.credential.as_hash())
        .bind(&user.department)
        .bind(user.enabled)
        .bind(user.date_updated)
        .execute(&self.db)
        .await
        .map_err(RepoError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn query_by_id(&self, id: Uuid) -> RepoResult<User> {
        let sql = format!("{SELECT_USER} WHERE user_id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(RepoError::from_sqlx)?
            .ok_or(RepoError::NotFound)?;

        row.try_into()
    }

    async fn query_by_email(&self, email: &str) -> RepoResult<User> {
        let sql = format!("{SELECT_USER} WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(RepoError::from_sqlx)?
            .ok_or(RepoError::NotFound)?;

        row.try_into()
    }
}

/// Process-local store. Same contract as the Postgres repo, including the
/// unique email constraint.
#[derive(Debug, Default)]
pub struct MemoryUserRepo {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, user: &User) -> RepoResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || users.values().any(|u| u.email == user.email) {
            return Err(RepoError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> RepoResult<()> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(RepoError::Conflict);
        }
        let slot = users.get_mut(&user.id).ok_or(RepoError::NotFound)?;
        *slot = user.clone();
        Ok(())
    }

    async fn query_by_id(&self, id: Uuid) -> RepoResult<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn query_by_email(&self, email: &str) -> RepoResult<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepoError::NotFound)
    }
}
