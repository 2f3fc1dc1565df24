//! Result types returned by the engine's public operations
//!
//! These carry failures as displayable messages rather than errors, so
//! nothing but plain data crosses the engine boundary.

use serde::Serialize;

use crate::error::StoreError;
use crate::metrics::StorageMetrics;

/// Outcome of an operation that either succeeds or explains why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl From<Result<(), StoreError>> for OperationResult {
    fn from(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Outcome of `store_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFileResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreFileResult {
    pub fn stored(file_id: impl Into<String>) -> Self {
        Self {
            success: true,
            file_id: Some(file_id.into()),
            error: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            file_id: None,
            error: Some(message.into()),
        }
    }
}

/// Outcome of one optimizer pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeReport {
    pub before: StorageMetrics,
    pub after: StorageMetrics,
    /// Human-readable actions taken; empty when nothing changed
    pub improvements: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_from_error() {
        let result: OperationResult =
            Err(StoreError::InvalidBackup("unsupported version 2.0.0".into())).into();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Invalid backup: unsupported version 2.0.0")
        );
    }

    #[test]
    fn test_store_file_result_serialization() {
        let json = serde_json::to_value(StoreFileResult::stored("abc")).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["fileId"], "abc");
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(StoreFileResult::rejected("too big")).unwrap();
        assert_eq!(json["error"], "too big");
        assert!(json.get("fileId").is_none());
    }
}
