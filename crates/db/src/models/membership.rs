//! Account membership model and DTOs.

use serde::{Deserialize, Serialize};
use tenantry_core::roles::validate_delimited_entries;
use tenantry_core::types::{EntityId, Timestamp};
use validator::Validate;

use crate::rows::{Columns, Scan, ScanRow};

/// A row from the `account_user_memberships` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountUserMembership {
    pub id: EntityId,
    pub belongs_to_user: EntityId,
    pub belongs_to_account: EntityId,
    /// Stored comma-delimited.
    pub account_roles: Vec<String>,
    pub default_account: bool,
    pub created_on: Timestamp,
    pub last_updated_on: Option<Timestamp>,
    pub archived_on: Option<Timestamp>,
}

impl Scan for AccountUserMembership {
    const ENTITY: &'static str = "account membership";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: cols.text()?,
            belongs_to_user: cols.text()?,
            belongs_to_account: cols.text()?,
            account_roles: cols.delimited()?,
            default_account: cols.bool()?,
            created_on: cols.timestamp()?,
            last_updated_on: cols.opt_timestamp()?,
            archived_on: cols.opt_timestamp()?,
        })
    }
}

/// DTO for adding an existing user to an account.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddUserToAccount {
    #[validate(length(min = 1))]
    pub user_id: EntityId,
    #[validate(length(min = 1))]
    pub account_id: EntityId,
    #[validate(length(min = 1), custom(function = "validate_delimited_entries"))]
    pub account_roles: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// DTO for replacing a member's roles.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ModifyUserPermissions {
    #[validate(length(min = 1), custom(function = "validate_delimited_entries"))]
    pub new_roles: Vec<String>,
    #[validate(length(min = 1))]
    pub reason: String,
}

/// DTO for moving an account to a new owner.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferAccountOwnership {
    #[validate(length(min = 1))]
    pub current_owner: EntityId,
    #[validate(length(min = 1))]
    pub new_owner: EntityId,
    #[validate(length(min = 1))]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_containing_the_separator_are_rejected() {
        let add = AddUserToAccount {
            user_id: "u1".into(),
            account_id: "a1".into(),
            account_roles: vec!["account_admin,account_member".into()],
            reason: String::new(),
        };
        assert!(add.validate().is_err());

        let modify = ModifyUserPermissions {
            new_roles: vec!["account_member ".into()],
            reason: "demotion".into(),
        };
        assert!(modify.validate().is_err());

        let modify = ModifyUserPermissions {
            new_roles: vec!["account_member".into()],
            reason: "demotion".into(),
        };
        assert!(modify.validate().is_ok());
    }
}
