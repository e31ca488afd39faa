/// Caller-supplied input that fails a precondition.
///
/// Raised before any I/O happens and never worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid ID provided for {field}")]
    InvalidId { field: &'static str },

    #[error("Empty input provided for {field}")]
    EmptyInput { field: &'static str },

    #[error("Invalid input: {0}")]
    Input(String),
}

impl ValidationError {
    /// Reject an empty identifier.
    pub fn require_id(field: &'static str, value: &str) -> Result<(), Self> {
        if value.is_empty() {
            return Err(Self::InvalidId { field });
        }
        Ok(())
    }

    /// Reject an empty non-identifier string.
    pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), Self> {
        if value.is_empty() {
            return Err(Self::EmptyInput { field });
        }
        Ok(())
    }
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Input(errors.to_string())
    }
}
