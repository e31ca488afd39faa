//! Audit event vocabulary.
//!
//! An [`AuditEvent`] is an opaque `(event_type, context)` pair. The repository
//! layer writes it in the same transaction as the mutation it describes and
//! never interprets the context; callers query it back by context key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Event type constants
// ---------------------------------------------------------------------------

/// Known event types for audit log entries.
pub mod event_types {
    pub const USER_CREATED: &str = "user_created";
    pub const USER_UPDATED: &str = "user_updated";
    pub const USER_ARCHIVED: &str = "user_archived";
    pub const USER_PASSWORD_UPDATED: &str = "user_password_updated";
    pub const USER_TWO_FACTOR_SECRET_CHANGED: &str = "user_two_factor_secret_changed";
    pub const USER_TWO_FACTOR_SECRET_VERIFIED: &str = "user_two_factor_secret_verified";

    pub const ACCOUNT_CREATED: &str = "account_created";
    pub const ACCOUNT_UPDATED: &str = "account_updated";
    pub const ACCOUNT_ARCHIVED: &str = "account_archived";
    pub const ACCOUNT_MARKED_AS_DEFAULT: &str = "account_marked_as_default";
    pub const ACCOUNT_TRANSFERRED: &str = "account_transferred";

    pub const USER_ADDED_TO_ACCOUNT: &str = "user_added_to_account";
    pub const USER_REMOVED_FROM_ACCOUNT: &str = "user_removed_from_account";
    pub const USER_ACCOUNT_PERMISSIONS_MODIFIED: &str = "user_account_permissions_modified";

    pub const ITEM_CREATED: &str = "item_created";
    pub const ITEM_UPDATED: &str = "item_updated";
    pub const ITEM_ARCHIVED: &str = "item_archived";

    pub const WEBHOOK_CREATED: &str = "webhook_created";
    pub const WEBHOOK_UPDATED: &str = "webhook_updated";
    pub const WEBHOOK_ARCHIVED: &str = "webhook_archived";
}

// ---------------------------------------------------------------------------
// Context key constants
// ---------------------------------------------------------------------------

/// Context keys. Per-entity audit lookups filter on `context->>'<key>'`.
pub mod keys {
    pub const USER_ID: &str = "user_id";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const ITEM_ID: &str = "item_id";
    pub const WEBHOOK_ID: &str = "webhook_id";
    pub const MEMBERSHIP_ID: &str = "membership_id";
    pub const PERFORMED_BY: &str = "performed_by";
    pub const ACCOUNT_ROLES: &str = "account_roles";
    pub const REASON: &str = "reason";
    pub const CHANGES: &str = "changes";
    pub const OLD_OWNER: &str = "old_owner";
    pub const NEW_OWNER: &str = "new_owner";
}

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

/// An audit event ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub context: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            context: Map::new(),
        }
    }

    /// Attach a context value.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Attach a list of field changes under [`keys::CHANGES`].
    pub fn with_changes(self, changes: &[FieldChangeSummary]) -> Self {
        let list: Vec<Value> = changes.iter().map(FieldChangeSummary::to_value).collect();
        self.with(keys::CHANGES, list)
    }

    /// Context value for `key` as a string, if present.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// FieldChangeSummary
// ---------------------------------------------------------------------------

/// One field's before/after values in an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChangeSummary {
    pub field_name: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl FieldChangeSummary {
    pub fn new(field_name: &str, old_value: impl Into<Value>, new_value: impl Into<Value>) -> Self {
        Self {
            field_name: field_name.to_string(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "field_name": self.field_name,
            "old_value": self.old_value,
            "new_value": self.new_value,
        })
    }
}

/// Record a change for `field` when `current` differs from `requested`,
/// then apply it.
pub fn track_change<T>(
    changes: &mut Vec<FieldChangeSummary>,
    field: &str,
    current: &mut T,
    requested: Option<T>,
) where
    T: PartialEq + Clone + Into<Value>,
{
    let Some(new_value) = requested else {
        return;
    };
    if *current != new_value {
        changes.push(FieldChangeSummary::new(field, current.clone(), new_value.clone()));
        *current = new_value;
    }
}
