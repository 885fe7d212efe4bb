//! Error handling for the node core.

use std::error::Error;
use std::fmt::{self, Display};

use backtrace::Backtrace;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// The main error type.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub backtrace: Backtrace,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.kind)?;

        // Go down the chain of errors
        let mut error: &dyn Error = &self.kind;
        while let Some(source) = error.source() {
            write!(f, "\n\nCaused by: {}", source)?;
            error = source;
        }

        Ok(())
    }
}

// Forward From impls to ApiError from ApiErrorKind. Because From is reflexive,
// this impl also takes care of From<ApiErrorKind>.
impl<T> From<T> for ApiError
where
    ApiErrorKind: From<T>,
{
    fn from(item: T) -> Self {
        ApiError {
            kind: ApiErrorKind::from(item),
            backtrace: Backtrace::new(),
        }
    }
}

impl From<&str> for ApiError {
    fn from(message: &str) -> Self {
        ApiErrorKind::GeneralError(message.to_owned()).into()
    }
}

#[derive(Debug, Error)]
pub enum ApiErrorKind {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    MetricError(#[from] cadence::MetricError),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error("Database Error: {0}")]
    DatabaseError(#[from] crate::db::error::DbError),

    #[error("Key Error: {0}")]
    KeyError(#[from] crate::crypto::KeyError),

    #[error("malformed message")]
    MalformedMessage,

    #[error("channel name too long: {0} bytes")]
    ChannelNameTooLong(usize),

    #[error("unknown router type: {0}")]
    UnknownRouter(String),

    #[error("General Error: {0}")]
    GeneralError(String),
}

impl ApiErrorKind {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::MetricError(_) => "metric_error",
            Self::ConfigError(_) => "config_error",
            Self::DatabaseError(_) => "database_error",
            Self::KeyError(_) => "key_error",
            Self::MalformedMessage => "malformed_message",
            Self::ChannelNameTooLong(_) => "channel_name_too_long",
            Self::UnknownRouter(_) => "unknown_router",
            Self::GeneralError(_) => "general_error",
        }
    }
}
