use lcg_backend::LcgError;
use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Lcg(#[from] LcgError),

    #[error("environment variable {name} is not set")]
    MissingSetting { name: &'static str },

    #[error("environment variable {name}={value:?} is invalid: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid protocol parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl ProtocolError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
