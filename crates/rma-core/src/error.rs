//! Domain-specific error types following panic-free policy.

use thiserror::Error;

use crate::ValueKind;

/// Errors produced while resolving an attribute path against a live graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// An intermediate hop resolved to nothing.
    #[error("path not found: '{segment}' resolved to nothing")]
    NotFound { segment: String },

    /// The leaf accessor or mutator does not exist on the target.
    #[error("no such attribute: {name}")]
    NoSuchAttribute { name: String },

    /// Sequence or array index is outside the populated range.
    #[error("index {index} out of range (len: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The supplied value could not be converted to the declared type.
    #[error("type mismatch: cannot convert {found} to {expected}")]
    TypeMismatch { expected: String, found: String },
}

impl ResolveError {
    /// Creates a `NoSuchAttribute` error for the given name.
    pub fn no_such_attribute(name: impl Into<String>) -> Self {
        Self::NoSuchAttribute { name: name.into() }
    }

    /// Creates a `TypeMismatch` error between two kinds.
    pub fn mismatch(expected: ValueKind, found: ValueKind) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Stable error code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NoSuchAttribute { .. } => "no_such_attribute",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }
}

/// Result type for resolver operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors raised when a root object cannot yield a usable identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The root does not expose a readable text attribute required by the agent.
    #[error("exposed object does not provide a readable '{attribute}' text attribute")]
    MissingAttribute { attribute: String },

    /// Name or instance does not follow the naming standard.
    #[error("{field} '{value}' does not follow the naming standard")]
    Malformed { field: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::no_such_attribute("Requests");
        assert_eq!(err.to_string(), "no such attribute: Requests");

        let err = ResolveError::IndexOutOfRange { index: 5, len: 2 };
        assert_eq!(err.to_string(), "index 5 out of range (len: 2)");

        let err = ResolveError::mismatch(ValueKind::Int, ValueKind::Text);
        assert_eq!(err.to_string(), "type mismatch: cannot convert text to int");
    }

    #[test]
    fn test_resolve_error_codes() {
        assert_eq!(
            ResolveError::NotFound {
                segment: "a".to_string()
            }
            .code(),
            "not_found"
        );
        assert_eq!(ResolveError::no_such_attribute("x").code(), "no_such_attribute");
        assert_eq!(
            ResolveError::IndexOutOfRange { index: 0, len: 0 }.code(),
            "index_out_of_range"
        );
        assert_eq!(
            ResolveError::mismatch(ValueKind::Long, ValueKind::Bool).code(),
            "type_mismatch"
        );
    }

    #[test]
    fn test_identity_error_display() {
        let err = IdentityError::Malformed {
            field: "name".to_string(),
            value: "a:b".to_string(),
        };
        assert_eq!(err.to_string(), "name 'a:b' does not follow the naming standard");
    }
}
