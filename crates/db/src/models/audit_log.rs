//! Audit log entry model.

use serde::Serialize;
use serde_json::{Map, Value};
use tenantry_core::types::{AuditLogEntryId, Timestamp};

use crate::rows::{Columns, Scan, ScanRow};

/// A row from the append-only `audit_log` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    pub id: AuditLogEntryId,
    pub event_type: String,
    pub context: Map<String, Value>,
    pub created_on: Timestamp,
}

impl Scan for AuditLogEntry {
    const ENTITY: &'static str = "audit log entry";

    fn scan<R: ScanRow + ?Sized>(cols: &mut Columns<'_, R>) -> Result<Self, sqlx::Error> {
        let id = cols.int()?;
        let event_type = cols.text()?;
        let context = match cols.json()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            id,
            event_type,
            context,
            created_on: cols.timestamp()?,
        })
    }
}

impl AuditLogEntry {
    /// Context value for `key` as a string, if present.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}
