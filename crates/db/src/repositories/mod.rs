//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async operations that
//! accept `&Querier<D>` as the first argument. Reads go through the query
//! builder and row scanner; every mutation is a [`TransactionPlan`] carrying
//! at least one audit event.
//!
//! [`TransactionPlan`]: crate::transaction::TransactionPlan

pub mod account_repo;
pub mod audit_log_repo;
pub mod item_repo;
pub mod membership_repo;
pub mod user_repo;
pub mod webhook_repo;

pub use account_repo::AccountRepo;
pub use audit_log_repo::AuditLogRepo;
pub use item_repo::ItemRepo;
pub use membership_repo::MembershipRepo;
pub use user_repo::UserRepo;
pub use webhook_repo::WebhookRepo;

use tenantry_core::error::ValidationError;
use validator::Validate;

use crate::error::RepoResult;

/// Run a DTO's `validator` rules, mapping failures to [`ValidationError`].
pub(crate) fn validate_input<T: Validate>(input: &T) -> RepoResult<()> {
    input.validate().map_err(ValidationError::from)?;
    Ok(())
}

/// Reject any empty identifier in `ids`, reporting the first offender.
pub(crate) fn require_ids(ids: &[(&'static str, &str)]) -> RepoResult<()> {
    for (field, value) in ids {
        ValidationError::require_id(field, value)?;
    }
    Ok(())
}
