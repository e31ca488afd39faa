//! Account aggregate model and DTOs.

use serde::{Deserialize, Serialize};
use tenantry_core::audit::{track_change, FieldChangeSummary};
use tenantry_core::types::{EntityId, Timestamp};
use validator::Validate;

use crate::models::membership::AccountUserMembership;
use crate::rows::{Aggregate, Columns, Scan, ScanRow};

pub const UNPAID_BILLING_STATUS: &str = "unpaid";

/// A row from the `accounts` table together with its active memberships.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: EntityId,
    pub name: String,
    pub billing_status: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub payment_processor_customer_id: String,
    pub subscription_plan_id: Option<String>,
    pub created_on: Timestamp,
    pub last_updated_on: Option<Timestamp>,
    pub archived_on: Option<Timestamp>,
    pub belongs_to_user: EntityId,
    pub members: Vec<AccountUserMembership>,
}

impl Scan for Account {
    const ENTITY: &'static str = "account";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: cols.text()?,
            name: cols.text()?,
            billing_status: cols.text()?,
            contact_email: cols.text()?,
            contact_phone: cols.text()?,
            payment_processor_customer_id: cols.text()?,
            subscription_plan_id: cols.opt_text()?,
            created_on: cols.timestamp()?,
            last_updated_on: cols.opt_timestamp()?,
            archived_on: cols.opt_timestamp()?,
            belongs_to_user: cols.text()?,
            members: Vec::new(),
        })
    }
}

impl Aggregate for Account {
    type Child = AccountUserMembership;

    fn identity(&self) -> &str {
        &self.id
    }

    fn push_child(&mut self, child: AccountUserMembership) {
        self.members.push(child);
    }
}

/// DTO for creating an account owned by the calling user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAccount {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[validate(email)]
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

/// DTO for updating an account. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAccount {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,
    #[validate(email)]
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

impl Account {
    /// Apply `input` in place and report what changed.
    pub fn apply_update(&mut self, input: &UpdateAccount) -> Vec<FieldChangeSummary> {
        let mut changes = Vec::new();
        track_change(&mut changes, "name", &mut self.name, input.name.clone());
        track_change(
            &mut changes,
            "contact_email",
            &mut self.contact_email,
            input.contact_email.clone(),
        );
        track_change(
            &mut changes,
            "contact_phone",
            &mut self.contact_phone,
            input.contact_phone.clone(),
        );
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_email_must_be_an_address() {
        let bad = CreateAccount {
            name: "acme".into(),
            contact_email: Some("not-an-email".into()),
            contact_phone: None,
        };
        assert!(bad.validate().is_err());

        let good = CreateAccount {
            name: "acme".into(),
            contact_email: Some("a@acme.io".into()),
            contact_phone: None,
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn missing_contact_email_is_allowed() {
        let input = CreateAccount {
            name: "acme".into(),
            contact_email: None,
            contact_phone: None,
        };
        assert!(input.validate().is_ok());
    }
}
