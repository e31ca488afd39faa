//! User entity model and DTOs.

use serde::{Deserialize, Serialize};
use tenantry_core::audit::{track_change, FieldChangeSummary};
use tenantry_core::types::{EntityId, Timestamp};
use validator::Validate;

use crate::rows::{Columns, Scan, ScanRow};

/// A row from the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: EntityId,
    pub username: String,
    pub avatar_src: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub requires_password_change: bool,
    pub password_last_changed_on: Option<Timestamp>,
    #[serde(skip_serializing)]
    pub two_factor_secret: String,
    pub two_factor_secret_verified_on: Option<Timestamp>,
    pub service_roles: Vec<String>,
    pub reputation: String,
    pub reputation_explanation: String,
    pub created_on: Timestamp,
    pub last_updated_on: Option<Timestamp>,
    pub archived_on: Option<Timestamp>,
}

impl Scan for User {
    const ENTITY: &'static str = "user";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: cols.text()?,
            username: cols.text()?,
            avatar_src: cols.opt_text()?,
            hashed_password: cols.text()?,
            requires_password_change: cols.bool()?,
            password_last_changed_on: cols.opt_timestamp()?,
            two_factor_secret: cols.text()?,
            two_factor_secret_verified_on: cols.opt_timestamp()?,
            service_roles: cols.delimited()?,
            reputation: cols.text()?,
            reputation_explanation: cols.text()?,
            created_on: cols.timestamp()?,
            last_updated_on: cols.opt_timestamp()?,
            archived_on: cols.opt_timestamp()?,
        })
    }
}

/// DTO for registering a new user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    #[validate(length(min = 1, max = 128))]
    pub username: String,
    #[validate(length(min = 1))]
    pub hashed_password: String,
    #[validate(length(min = 1))]
    pub two_factor_secret: String,
    pub avatar_src: Option<String>,
}

/// DTO for updating a user's profile. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUser {
    #[validate(length(min = 1, max = 128))]
    pub username: Option<String>,
    pub avatar_src: Option<String>,
}

impl User {
    /// Apply `input` in place and report what changed.
    pub fn apply_update(&mut self, input: &UpdateUser) -> Vec<FieldChangeSummary> {
        let mut changes = Vec::new();
        track_change(&mut changes, "username", &mut self.username, input.username.clone());
        track_change(
            &mut changes,
            "avatar_src",
            &mut self.avatar_src,
            input.avatar_src.clone().map(Some),
        );
        changes
    }

    pub fn has_verified_two_factor_secret(&self) -> bool {
        self.two_factor_secret_verified_on.is_some()
    }
}
