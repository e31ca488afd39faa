//! Item entity model and DTOs.

use serde::{Deserialize, Serialize};
use tenantry_core::audit::{track_change, FieldChangeSummary};
use tenantry_core::types::{EntityId, Timestamp};
use validator::Validate;

use crate::rows::{Columns, Scan, ScanRow};

/// A row from the `items` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: EntityId,
    pub name: String,
    pub details: String,
    pub created_on: Timestamp,
    pub last_updated_on: Option<Timestamp>,
    pub archived_on: Option<Timestamp>,
    pub belongs_to_account: EntityId,
}

impl Scan for Item {
    const ENTITY: &'static str = "item";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: cols.text()?,
            name: cols.text()?,
            details: cols.text()?,
            created_on: cols.timestamp()?,
            last_updated_on: cols.opt_timestamp()?,
            archived_on: cols.opt_timestamp()?,
            belongs_to_account: cols.text()?,
        })
    }
}

/// DTO for creating a new item.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateItem {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub details: String,
}

/// DTO for updating an item. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateItem {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub details: Option<String>,
}

impl Item {
    pub fn apply_update(&mut self, input: &UpdateItem) -> Vec<FieldChangeSummary> {
        let mut changes = Vec::new();
        track_change(&mut changes, "name", &mut self.name, input.name.clone());
        track_change(&mut changes, "details", &mut self.details, input.details.clone());
        changes
    }
}
