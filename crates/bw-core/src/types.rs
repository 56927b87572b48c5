//! Core identifier types with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated telemetry source identifier.
    ///
    /// Each participant device reports under a stable source string. Source IDs
    /// must be non-empty; uniqueness is a property of the study enrollment, not
    /// enforced here.
    SourceId, "source ID"
);

define_string_id!(
    /// A validated application package name (e.g. `com.example.app`).
    AppPackage, "app package"
);

define_string_id!(
    /// A validated participant identifier.
    ///
    /// In practice this matches the participant's telemetry [`SourceId`], but
    /// the two are kept distinct because phases are keyed by participant while
    /// telemetry is keyed by source.
    ParticipantId, "participant ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_rejects_empty() {
        assert!(SourceId::new("").is_err());
        assert!(SourceId::new("   ").is_err());
        assert!(SourceId::new("participant-012").is_ok());
    }

    #[test]
    fn app_package_rejects_empty() {
        assert!(AppPackage::new("").is_err());
        assert!(AppPackage::new("com.example.app").is_ok());
    }

    #[test]
    fn source_id_serde_roundtrip() {
        let id = SourceId::new("participant-012").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"participant-012\"");
        let parsed: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn source_id_serde_rejects_empty() {
        let result: Result<SourceId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn app_package_as_ref() {
        let app = AppPackage::new("com.example.app").unwrap();
        let s: &str = app.as_ref();
        assert_eq!(s, "com.example.app");
    }

    #[test]
    fn app_package_orders_lexicographically() {
        let a = AppPackage::new("com.a").unwrap();
        let b = AppPackage::new("com.b").unwrap();
        assert!(a < b);
    }
}
