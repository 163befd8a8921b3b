//! Error types shared across the Podium leaderboard service.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding and validating events.
#[derive(Error, Debug)]
pub enum Error {
    /// A required field is absent from the event payload.
    #[error("malformed event: missing field '{field}'")]
    MissingField {
        /// The name of the missing field.
        field: &'static str,
    },

    /// A field is present but its value is unusable.
    #[error("malformed event: invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The field this error refers to, for structured logging and metrics
    /// labels.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Error::MissingField { field } | Error::InvalidField { field, .. } => Some(field),
            Error::Json(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_display() {
        let err = Error::MissingField { field: "playerId" };
        let msg = err.to_string();
        assert!(msg.contains("missing field"));
        assert!(msg.contains("playerId"));
    }

    #[test]
    fn test_invalid_field_display() {
        let err = Error::InvalidField {
            field: "score",
            reason: "not a number".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("score"));
        assert!(msg.contains("not a number"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_field_accessor() {
        assert_eq!(Error::MissingField { field: "playerId" }.field(), Some("playerId"));
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(Error::Json(json_err).field(), None);
    }
}
