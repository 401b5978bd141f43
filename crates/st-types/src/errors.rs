use thiserror::Error;

/// Main error type for spacetune.
///
/// Per-run failures (timeouts, crashed simulations, missing logs) are not
/// represented here; they are recovered into a tagged
/// [`RunResult`](crate::RunResult). A `TuneError` means the tooling itself
/// cannot continue.
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Study '{study}' unavailable: {reason}")]
    StudyUnavailable { study: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TuneError {
    pub fn study_unavailable(study: impl Into<String>, reason: impl ToString) -> Self {
        Self::StudyUnavailable {
            study: study.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for spacetune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}
