//! Error types and result aliases for the opbus library.
//!
//! Every variant of [`OpbusError`] describes a configuration or integration
//! mistake. The primary operation API treats them as fatal and panics with the
//! error's display text; the `try_*` twins hand them back as `Result<T>`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpbusError {
    #[error("unexpected operation: unknown operation argument type {args_type}")]
    UnknownOperation { args_type: &'static str },

    #[error("operation already registered with argument type {args_type} and result type {result_type}")]
    DuplicateOperation {
        args_type: &'static str,
        result_type: &'static str,
    },

    #[error("unexpected operation result: expecting type {expected} instead of {actual}")]
    UnexpectedResult {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{kind} listener watches unregistered type {payload_type}")]
    UnregisteredListener {
        kind: &'static str,
        payload_type: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OpbusError>;

/// Log a configuration error and abort the caller.
///
/// Used by the non-`try_*` API, where these errors indicate a broken
/// integration rather than a runtime condition.
#[track_caller]
pub(crate) fn fatal(err: OpbusError) -> ! {
    tracing::error!(error = %err, "fatal opbus configuration error");
    panic!("{}", err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_operation_display() {
        let err = OpbusError::UnknownOperation {
            args_type: "HttpRequestArgs",
        };
        assert_eq!(
            err.to_string(),
            "unexpected operation: unknown operation argument type HttpRequestArgs"
        );
    }

    #[test]
    fn test_duplicate_operation_display() {
        let err = OpbusError::DuplicateOperation {
            args_type: "SqlQueryArgs",
            result_type: "SqlQueryResult",
        };
        assert!(err.to_string().contains("SqlQueryArgs"));
        assert!(err.to_string().contains("SqlQueryResult"));
    }

    #[test]
    fn test_unexpected_result_display() {
        let err = OpbusError::UnexpectedResult {
            expected: "HttpResponse",
            actual: "String",
        };
        assert_eq!(
            err.to_string(),
            "unexpected operation result: expecting type HttpResponse instead of String"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = OpbusError::ConfigError("bad capacity".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad capacity");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OpbusError = json_err.into();
        assert!(matches!(err, OpbusError::SerializationError(_)));
    }

    #[test]
    #[should_panic(expected = "unknown operation argument type Foo")]
    fn test_fatal_panics_with_display_text() {
        fatal(OpbusError::UnknownOperation { args_type: "Foo" });
    }

    #[test]
    fn test_result_type() {
        let ok_result: Result<i32> = Ok(42);
        assert!(matches!(ok_result, Ok(42)));

        let err_result: Result<i32> = Err(OpbusError::ConfigError("x".to_string()));
        assert!(err_result.is_err());
    }
}
