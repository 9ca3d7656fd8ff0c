/*
 * Responsibility
 * - Users の request/response DTO
 * - validation (形式チェック) は validator の derive で宣言する
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidateEmail, ValidationError, ValidationErrors};

use crate::services::user::{NewUser, Role, UpdateUser, User};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "at least one role is required"))]
    pub roles: Vec<Role>,
    pub department: Option<String>,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "does not match password"))]
    pub password_confirm: String,
}

impl From<CreateUserRequest> for NewUser {
    fn from(req: CreateUserRequest) -> Self {
        NewUser {
            name: req.name,
            email: req.email,
            roles: req.roles,
            department: req.department,
            password: req.password,
        }
    }
}

/// Partial update. Missing fields are left unchanged.
///
/// Every field is optional, so the checks are written out instead of derived.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<Role>>,
    pub department: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
    pub enabled: Option<bool>,
}

impl UpdateUserRequest {
    /// Roles and the enabled flag are account administration, not profile data.
    pub fn changes_access(&self) -> bool {
        self.roles.is_some() || self.enabled.is_some()
    }
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.name.as_deref().is_some_and(str::is_empty) {
            errors.add("name", invalid("length", "name cannot be empty"));
        }
        if self.email.as_ref().is_some_and(|e| !e.validate_email()) {
            errors.add("email", invalid("email", "must be a valid email"));
        }
        if self.roles.as_ref().is_some_and(Vec::is_empty) {
            errors.add("roles", invalid("length", "at least one role is required"));
        }
        if self
            .password
            .as_ref()
            .is_some_and(|p| p.chars().count() < 8)
        {
            errors.add("password", invalid("length", "must be at least 8 characters"));
        }
        if self.password_confirm != self.password {
            errors.add(
                "password_confirm",
                invalid("must_match", "does not match password"),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

impl From<UpdateUserRequest> for UpdateUser {
    fn from(req: UpdateUserRequest) -> Self {
        UpdateUser {
            name: req.name,
            email: req.email,
            roles: req.roles,
            department: req.department,
            password: req.password,
            enabled: req.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub department: Option<String>,
    pub enabled: bool,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            roles: u.roles,
            department: u.department,
            enabled: u.enabled,
            date_created: u.date_created,
            date_updated: u.date_updated,
        }
    }
}
