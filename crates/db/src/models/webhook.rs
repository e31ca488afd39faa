//! Webhook entity model and DTOs.

use serde::{Deserialize, Serialize};
use tenantry_core::audit::{track_change, FieldChangeSummary};
use tenantry_core::roles::validate_delimited_entries;
use tenantry_core::types::{EntityId, Timestamp};
use validator::Validate;

use crate::rows::{Columns, Scan, ScanRow};

/// A row from the `webhooks` table. List columns are stored comma-delimited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Webhook {
    pub id: EntityId,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub method: String,
    pub events: Vec<String>,
    pub data_types: Vec<String>,
    pub topics: Vec<String>,
    pub created_on: Timestamp,
    pub last_updated_on: Option<Timestamp>,
    pub archived_on: Option<Timestamp>,
    pub belongs_to_account: EntityId,
}

impl Scan for Webhook {
    const ENTITY: &'static str = "webhook";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: cols.text()?,
            name: cols.text()?,
            content_type: cols.text()?,
            url: cols.text()?,
            method: cols.text()?,
            events: cols.delimited()?,
            data_types: cols.delimited()?,
            topics: cols.delimited()?,
            created_on: cols.timestamp()?,
            last_updated_on: cols.opt_timestamp()?,
            archived_on: cols.opt_timestamp()?,
            belongs_to_account: cols.text()?,
        })
    }
}

/// DTO for registering a webhook.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateWebhook {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub content_type: String,
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 1))]
    pub method: String,
    #[validate(length(min = 1), custom(function = "validate_delimited_entries"))]
    pub events: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_delimited_entries"))]
    pub data_types: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_delimited_entries"))]
    pub topics: Vec<String>,
}

/// DTO for updating a webhook. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateWebhook {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub content_type: Option<String>,
    #[validate(url)]
    pub url: Option<String>,
    pub method: Option<String>,
    #[validate(custom(function = "validate_delimited_entries"))]
    pub events: Option<Vec<String>>,
    #[validate(custom(function = "validate_delimited_entries"))]
    pub data_types: Option<Vec<String>>,
    #[validate(custom(function = "validate_delimited_entries"))]
    pub topics: Option<Vec<String>>,
}

impl Webhook {
    pub fn apply_update(&mut self, input: &UpdateWebhook) -> Vec<FieldChangeSummary> {
        let mut changes = Vec::new();
        track_change(&mut changes, "name", &mut self.name, input.name.clone());
        track_change(
            &mut changes,
            "content_type",
            &mut self.content_type,
            input.content_type.clone(),
        );
        track_change(&mut changes, "url", &mut self.url, input.url.clone());
        track_change(&mut changes, "method", &mut self.method, input.method.clone());
        track_change(&mut changes, "events", &mut self.events, input.events.clone());
        track_change(
            &mut changes,
            "data_types",
            &mut self.data_types,
            input.data_types.clone(),
        );
        track_change(&mut changes, "topics", &mut self.topics, input.topics.clone());
        changes
    }
}
