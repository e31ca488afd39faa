//! Well-known role name constants and the delimited list codec.
//!
//! Role lists (and webhook event/topic lists) are persisted as a single
//! comma-delimited column.

/// Separator used when persisting lists.
pub const LIST_SEPARATOR: char = ',';

pub const ACCOUNT_ADMIN: &str = "account_admin";
pub const ACCOUNT_MEMBER: &str = "account_member";

pub const SERVICE_ADMIN: &str = "service_admin";
pub const SERVICE_USER: &str = "service_user";

/// Reputation values a user row can carry.
pub mod reputation {
    pub const GOOD: &str = "good";
    pub const UNVERIFIED: &str = "unverified";
    pub const BANNED: &str = "banned";
    pub const TERMINATED: &str = "terminated";
}

/// Join values into their persisted form.
pub fn join_delimited<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

/// Split a persisted list. Empty segments are dropped.
pub fn split_delimited(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reject entries that would not survive [`join_delimited`] followed by
/// [`split_delimited`]: blanks, separators and surrounding whitespace.
pub fn validate_delimited_entries(values: &[String]) -> Result<(), validator::ValidationError> {
    for value in values {
        if value.trim().is_empty() || value.contains(LIST_SEPARATOR) || value.trim() != value {
            let mut err = validator::ValidationError::new("delimited_entry");
            err.message = Some(format!("{value:?} cannot be stored in a delimited list").into());
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uses_comma() {
        assert_eq!(join_delimited(&[ACCOUNT_ADMIN, ACCOUNT_MEMBER]), "account_admin,account_member");
        assert_eq!(join_delimited::<&str>(&[]), "");
    }

    #[test]
    fn split_drops_empty_segments() {
        assert_eq!(split_delimited("account_admin,,account_member,"), vec![
            "account_admin".to_string(),
            "account_member".to_string(),
        ]);
        assert!(split_delimited("").is_empty());
    }

    #[test]
    fn entries_that_would_split_or_trim_are_rejected() {
        let accepted = vec![ACCOUNT_ADMIN.to_string(), "item_created".to_string()];
        assert!(validate_delimited_entries(&accepted).is_ok());
        assert_eq!(split_delimited(&join_delimited(&accepted)), accepted);

        for bad in ["a,b", " padded", "padded ", "", "  "] {
            let err = validate_delimited_entries(&[bad.to_string()]).unwrap_err();
            assert_eq!(err.code, "delimited_entry", "{bad:?} should be rejected");
        }
    }
}
