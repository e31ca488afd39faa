//! Table metadata for the persisted schema.
//!
//! Column order here is the decode order of the matching model's `Scan`
//! implementation. These must match the migrations in `migrations/`.

use crate::query_builder::{ChildJoin, Owner, Table};

pub static USERS: Table = Table {
    name: "users",
    columns: &[
        "id",
        "username",
        "avatar_src",
        "hashed_password",
        "requires_password_change",
        "password_last_changed_on",
        "two_factor_secret",
        "two_factor_secret_verified_on",
        "service_roles",
        "reputation",
        "reputation_explanation",
        "created_on",
        "last_updated_on",
        "archived_on",
    ],
    id_field: "user_id",
    created_column: "created_on",
    updated_column: Some("last_updated_on"),
    archived_column: Some("archived_on"),
};

pub static ACCOUNTS: Table = Table {
    name: "accounts",
    columns: &[
        "id",
        "name",
        "billing_status",
        "contact_email",
        "contact_phone",
        "payment_processor_customer_id",
        "subscription_plan_id",
        "created_on",
        "last_updated_on",
        "archived_on",
        "belongs_to_user",
    ],
    id_field: "account_id",
    created_column: "created_on",
    updated_column: Some("last_updated_on"),
    archived_column: Some("archived_on"),
};

pub static MEMBERSHIPS: Table = Table {
    name: "account_user_memberships",
    columns: &[
        "id",
        "belongs_to_user",
        "belongs_to_account",
        "account_roles",
        "default_account",
        "created_on",
        "last_updated_on",
        "archived_on",
    ],
    id_field: "membership_id",
    created_column: "created_on",
    updated_column: Some("last_updated_on"),
    archived_column: Some("archived_on"),
};

pub static ITEMS: Table = Table {
    name: "items",
    columns: &[
        "id",
        "name",
        "details",
        "created_on",
        "last_updated_on",
        "archived_on",
        "belongs_to_account",
    ],
    id_field: "item_id",
    created_column: "created_on",
    updated_column: Some("last_updated_on"),
    archived_column: Some("archived_on"),
};

pub static WEBHOOKS: Table = Table {
    name: "webhooks",
    columns: &[
        "id",
        "name",
        "content_type",
        "url",
        "method",
        "events",
        "data_types",
        "topics",
        "created_on",
        "last_updated_on",
        "archived_on",
        "belongs_to_account",
    ],
    id_field: "webhook_id",
    created_column: "created_on",
    updated_column: Some("last_updated_on"),
    archived_column: Some("archived_on"),
};

pub static AUDIT_LOG: Table = Table {
    name: "audit_log",
    columns: &["id", "event_type", "context", "created_on"],
    id_field: "audit_log_entry_id",
    created_column: "created_on",
    updated_column: None,
    archived_column: None,
};

/// Accounts joined to their active memberships.
pub static ACCOUNT_MEMBERS: ChildJoin = ChildJoin {
    child: &MEMBERSHIPS,
    foreign_key: "belongs_to_account",
};

/// Rows owned by an account.
pub const OWNED_BY_ACCOUNT: Owner = Owner {
    column: "belongs_to_account",
    field: "account_id",
};

/// Rows owned by a user.
pub const OWNED_BY_USER: Owner = Owner {
    column: "belongs_to_user",
    field: "user_id",
};
