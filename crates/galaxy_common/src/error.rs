//! Error types for slot resolution and config validation.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("Invalid slot {0}: must be between 1 and 5")]
    OutOfRange(i64),

    #[error("Invalid slot '{0}': not a number")]
    NotANumber(String),
}

/// Rejected worker configuration. Every variant names the offending input key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("Missing field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    Malformed { field: String, reason: String },
}

impl InvalidConfig {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The input key that failed validation
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field } | Self::Malformed { field, .. } => field,
        }
    }
}
