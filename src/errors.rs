//! Error taxonomy for cloud operations.
//!
//! Provider errors from S3, Glue, Athena, STS and CloudFormation are
//! classified into a small set of kinds so callers can decide whether a
//! failure is fatal, retryable, or simply means "not there yet".

use thiserror::Error;

/// Service error codes that mean the target resource does not exist.
const ABSENT_CODES: &[&str] = &[
    "NoSuchBucket",
    "NotFound",
    "NoSuchKey",
    "EntityNotFoundException",
    "ResourceNotFoundException",
];

/// Service error codes that mean the caller lacks permission.
const DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "AllAccessDisabled",
    "Forbidden",
    "InvalidAccessKeyId",
    "UnauthorizedOperation",
    "ExpiredToken",
];

/// Service error codes that are worth retrying.
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "RequestTimeout",
    "InternalError",
    "InternalServerException",
    "InternalServiceException",
    "ServiceUnavailable",
];

/// Errors surfaced by the cloud boundary and the workflows built on it.
#[derive(Debug, Error)]
pub enum OpsError {
    /// An expected resource was not found.
    #[error("{kind} not found: {name}")]
    ResourceAbsent { kind: String, name: String },

    /// Throttling or a temporary provider failure.
    #[error("transient provider error during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// The caller is not allowed to touch the resource.
    #[error("access denied on {resource} during {operation}: {message}")]
    PermissionDenied {
        operation: String,
        resource: String,
        message: String,
    },

    /// Any other provider-level error, carried verbatim.
    #[error("{operation} failed: {message}")]
    Provider {
        operation: String,
        code: Option<String>,
        message: String,
    },

    /// Invalid configuration or naming input.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OpsError {
    /// Shorthand for a missing resource.
    pub fn absent(kind: impl Into<String>, name: impl Into<String>) -> Self {
        OpsError::ResourceAbsent {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Classify a provider error from its service error code and message.
    ///
    /// Athena reports a missing workgroup as `InvalidRequestException`
    /// with a "not found" message, so the message is consulted as well.
    pub fn classify(operation: &str, resource: &str, code: Option<&str>, message: &str) -> Self {
        let code_str = code.unwrap_or("");
        if ABSENT_CODES.contains(&code_str)
            || (code_str == "InvalidRequestException"
                && message.to_ascii_lowercase().contains("not found"))
        {
            return OpsError::absent(operation_kind(operation), resource);
        }
        if DENIED_CODES.contains(&code_str) {
            return OpsError::PermissionDenied {
                operation: operation.to_string(),
                resource: resource.to_string(),
                message: message.to_string(),
            };
        }
        if TRANSIENT_CODES.contains(&code_str) {
            return OpsError::Transient {
                operation: operation.to_string(),
                message: format!("{code_str}: {message}"),
            };
        }
        OpsError::Provider {
            operation: operation.to_string(),
            code: code.map(str::to_string),
            message: message.to_string(),
        }
    }

    /// Short machine-readable code for reports.
    pub fn code(&self) -> &str {
        match self {
            OpsError::ResourceAbsent { .. } => "ResourceAbsent",
            OpsError::Transient { .. } => "TransientProviderError",
            OpsError::PermissionDenied { .. } => "PermissionDenied",
            OpsError::Provider { code, .. } => code.as_deref().unwrap_or("ProviderError"),
            OpsError::Config(_) => "InvalidConfiguration",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, OpsError::ResourceAbsent { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, OpsError::Transient { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, OpsError::PermissionDenied { .. })
    }
}

/// Best-effort resource kind for an operation name, used in absence messages.
fn operation_kind(operation: &str) -> &'static str {
    match operation {
        op if op.contains("database") => "database",
        op if op.contains("table") || op.contains("partitions") => "table",
        op if op.contains("work_group") || op.contains("workgroup") => "workgroup",
        op if op.contains("stack") => "stack",
        op if op.contains("query") => "query",
        _ => "bucket",
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_absent_bucket() {
        let err = OpsError::classify(
            "list_object_versions",
            "raw-bucket",
            Some("NoSuchBucket"),
            "The specified bucket does not exist",
        );
        assert!(err.is_absent());
        assert_eq!(err.to_string(), "bucket not found: raw-bucket");
    }

    #[test]
    fn test_classify_absent_glue_table() {
        let err = OpsError::classify(
            "get_table",
            "mobiltex_datalake.assets",
            Some("EntityNotFoundException"),
            "Table assets not found.",
        );
        assert!(err.is_absent());
        assert_eq!(err.to_string(), "table not found: mobiltex_datalake.assets");
    }

    #[test]
    fn test_classify_athena_missing_workgroup() {
        let err = OpsError::classify(
            "get_work_group",
            "mobiltex-analytics",
            Some("InvalidRequestException"),
            "WorkGroup mobiltex-analytics is not found.",
        );
        assert!(err.is_absent());
    }

    #[test]
    fn test_classify_other_invalid_request_is_provider() {
        let err = OpsError::classify(
            "start_query_execution",
            "readings",
            Some("InvalidRequestException"),
            "line 1:8: mismatched input",
        );
        assert!(!err.is_absent());
        assert_eq!(err.code(), "InvalidRequestException");
    }

    #[test]
    fn test_classify_access_denied() {
        let err = OpsError::classify("list_objects_v2", "curated", Some("AccessDenied"), "nope");
        assert!(err.is_permission_denied());
        assert_eq!(err.code(), "PermissionDenied");
        assert!(err.to_string().contains("curated"));
    }

    #[test]
    fn test_classify_throttling_is_transient() {
        for code in ["SlowDown", "ThrottlingException", "ServiceUnavailable"] {
            let err = OpsError::classify("delete_objects", "raw", Some(code), "busy");
            assert!(err.is_transient(), "{code} should be transient");
        }
    }

    #[test]
    fn test_classify_unknown_code_is_provider() {
        let err = OpsError::classify("delete_stack", "Stack", None, "boom");
        assert_eq!(err.code(), "ProviderError");
        assert_eq!(err.to_string(), "delete_stack failed: boom");
    }
}
