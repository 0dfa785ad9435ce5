use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{borrow::Cow, error::Error as StdError};

/// Error report handed to collaborators (job queue, command line, logs).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub message: String,
    /// Error code is a string that specifies this error type.
    pub error_code: Cow<'static, str>,
    /// Detailed error metadata.
    /// The contents of this field is determined by `error_code`.
    pub details: JsonValue,
}

/// Error trait which engine errors implement so that they can be turned
/// into an [`ErrorResponse`].
pub trait DetailedError: StdError {
    /// Identifying name of the error.
    fn error_code(&self) -> Cow<'static, str>;

    /// Structured context of the error, such as the block or key that
    /// triggered it.
    fn details(&self) -> JsonValue {
        JsonValue::Null
    }

    /// Whether the error was caused by the user's input rather than by the
    /// engine.
    fn is_user_error(&self) -> bool {
        false
    }
}

impl<E> From<&E> for ErrorResponse
where
    E: DetailedError,
{
    fn from(error: &E) -> ErrorResponse {
        Self::from_error(error)
    }
}

impl ErrorResponse {
    /// Transforms the error into a response and logs it, at `info` level for
    /// user errors and at `error` level otherwise.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        let response = Self::from_error_nolog(error);
        if error.is_user_error() {
            info!("[user error] {}: {}", response.error_code, response.message);
        } else {
            error!("[engine error] {}: {}", response.error_code, response.message);
        }
        response
    }

    pub fn from_error_nolog<E>(error: &E) -> Self
    where
        E: DetailedError,
    {
        Self {
            message: error.to_string(),
            error_code: error.error_code(),
            details: error.details(),
        }
    }
}
