//! Entity structs and DTOs.
//!
//! Each submodule contains:
//! - A `Serialize` entity struct with a `Scan` implementation whose column
//!   order matches the table metadata in [`crate::schema`]
//! - A `Deserialize` create DTO, checked with `validator` before any write
//! - A `Deserialize` update DTO (all `Option` fields) applied in memory,
//!   producing the field changes recorded in the audit log

pub mod account;
pub mod audit_log;
pub mod item;
pub mod membership;
pub mod user;
pub mod webhook;
