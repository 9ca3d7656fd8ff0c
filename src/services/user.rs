/*
 * Responsibility
 * - User / Role のドメイン型
 * - create / update / query / authenticate (password hashing はここで行う)
 * - storage は UserRepo 越しに扱う
 */
use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::repos::{error::RepoError, user_repo::UserRepo};
use crate::services::auth::password::{Credential, HashingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

pub fn role_names(roles: &[Role]) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub credential: Credential,
    pub department: Option<String>,
    pub enabled: bool,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub department: Option<String>,
    pub password: String,
}

/// Partial update: `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<Role>>,
    pub department: Option<String>,
    pub password: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("email is already in use")]
    DuplicateEmail,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error(transparent)]
    Hashing(#[from] HashingError),
    #[error("hashing task: {0}")]
    Task(#[from] JoinError),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for UserError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => UserError::NotFound,
            RepoError::Conflict => UserError::DuplicateEmail,
            other => UserError::Repo(other),
        }
    }
}

pub struct UserService {
    repo: Arc<dyn UserRepo>,
    hash_cost: u32,
}

impl fmt::Debug for UserService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserService")
            .field("hash_cost", &self.hash_cost)
            .finish()
    }
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepo>, hash_cost: u32) -> Self {
        Self { repo, hash_cost }
    }

    pub async fn create(&self, new: NewUser) -> Result<User, UserError> {
        let credential = self.hash(new.password).await?;
        let now = Utc::now();

        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            roles: new.roles,
            credential,
            department: new.department,
            enabled: true,
            date_created: now,
            date_updated: now,
        };

        self.repo.create(&user).await?;
        Ok(user)
    }

    pub async fn update(&self, id: Uuid, update: UpdateUser) -> Result<User, UserError> {
        let mut user = self.repo.query_by_id(id).await?;

        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(roles) = update.roles {
            user.roles = roles;
        }
        if let Some(department) = update.department {
            user.department = Some(department);
        }
        if let Some(enabled) = update.enabled {
            user.enabled = enabled;
        }
        if let Some(password) = update.password {
            user.credential = self.hash(password).await?;
        }
        user.date_updated = Utc::now();

        self.repo.update(&user).await?;
        Ok(user)
    }

    pub async fn query_by_id(&self, id: Uuid) -> Result<User, UserError> {
        Ok(self.repo.query_by_id(id).await?)
    }

    pub async fn query_by_email(&self, email: &str) -> Result<User, UserError> {
        Ok(self.repo.query_by_email(email).await?)
    }

    /// Look up by email and check the password.
    ///
    /// Unknown email, disabled user and wrong password all come back as
    /// `AuthenticationFailed`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, UserError> {
        let user = match self.repo.query_by_email(email).await {
            Ok(user) => user,
            Err(RepoError::NotFound) => return Err(UserError::AuthenticationFailed),
            Err(e) => return Err(e.into()),
        };
        if !user.enabled {
            return Err(UserError::AuthenticationFailed);
        }

        let credential = user.credential.clone();
        let candidate = password.to_string();
        let matches =
            tokio::task::spawn_blocking(move || credential.matches(&candidate)).await??;

        if !matches {
            return Err(UserError::AuthenticationFailed);
        }
        Ok(user)
    }

    async fn hash(&self, password: String) -> Result<Credential, UserError> {
        let cost = self.hash_cost;
        let credential =
            tokio::task::spawn_blocking(move || Credential::set_with_cost(&password, cost))
                .await??;
        Ok(credential)
    }
}
