/// Entity identifiers are client-generated UUIDv7 strings.
pub type EntityId = String;

/// Audit log entries are keyed by a database-assigned BIGSERIAL.
pub type AuditLogEntryId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new time-ordered entity identifier.
pub fn new_id() -> EntityId {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique_hyphenated_uuids() {
        let first = new_id();
        let second = new_id();
        assert_ne!(first, second);
        assert_eq!(first.len(), 36);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }
}
