use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use reqwest::Error as ReqwestError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;

/// A structured error that travels through step reports and the CLI output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the operator.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    pub const MISSING_TOKEN: &'static str = "AUTH/MISSING_TOKEN";
    pub const UNAUTHORIZED: &'static str = "STORE/UNAUTHORIZED";
    pub const FORBIDDEN: &'static str = "STORE/FORBIDDEN";
    pub const NOT_FOUND: &'static str = "STORE/NOT_FOUND";
    pub const RATE_LIMITED: &'static str = "STORE/RATE_LIMITED";
    pub const INELIGIBLE: &'static str = "VALIDATION/INELIGIBLE";
    pub const TRANSFER_FILLED: &'static str = "TRANSFER/ALREADY_FILLED";
    pub const TRANSFER_INVALID: &'static str = "TRANSFER/INVALID";
    pub const RELATION_OVERFLOW: &'static str = "RELATION/OVERFLOW";
    pub const RELATION_NOT_SAVED: &'static str = "RELATION/NOT_SAVED";
    pub const OPERATOR_ABORTED: &'static str = "OPERATOR/ABORTED";

    /// Construct a new error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata associated with the error.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Credential problems abort the whole run instead of a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code.as_str(),
            Self::MISSING_TOKEN | Self::UNAUTHORIZED | Self::FORBIDDEN | Self::OPERATOR_ABORTED
        ) || self.code.starts_with("CONFIG/")
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Self::NOT_FOUND
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

impl From<ReqwestError> for AppError {
    fn from(error: ReqwestError) -> Self {
        let code = if error.is_timeout() {
            "STORE/TIMEOUT"
        } else if error.is_connect() || error.is_request() {
            "STORE/NETWORK"
        } else if error.is_decode() {
            "STORE/DECODE"
        } else {
            "STORE/HTTP"
        };
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(status) = error.status() {
            app_error = app_error.with_context("status", status.as_u16().to_string());
        }
        if let Some(url) = error.url() {
            app_error = app_error.with_context("url", url.path().to_string());
        }
        app_error
    }
}
