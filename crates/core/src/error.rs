use thiserror::Error;

use crate::types::ErrorType;

/// Top-level router error. Every variant maps to one `ErrorType` entry in the
/// executor's taxonomy (see `ErrorType`), used at the boundary that turns a
/// failure into an HTTP response.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("emergency stop engaged")]
    EmergencyStop,

    #[error("unknown webhook token")]
    UnknownToken,

    #[error("account inactive: {0}")]
    InactiveAccount(String),

    #[error("risk check failed: {0}")]
    Risk(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("internal error: {0}")]
    System(#[from] anyhow::Error),
}

impl RouterError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            RouterError::Validation(_) => ErrorType::Validation,
            RouterError::EmergencyStop => ErrorType::EmergencyStop,
            RouterError::UnknownToken | RouterError::InactiveAccount(_) => ErrorType::Validation,
            RouterError::Risk(_) => ErrorType::Risk,
            RouterError::Broker(_) => ErrorType::Broker,
            RouterError::System(_) => ErrorType::System,
        }
    }
}
