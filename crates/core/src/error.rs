use thiserror::Error;

/// Errors raised by the tier policy functions.
///
/// Every variant is a caller error (bad input), never an environmental
/// failure, so nothing here is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("unknown subscription tier `{0}`")]
    UnknownTier(String),
}

impl PolicyError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Both variants surface as `invalid_argument` on external boundaries.
    pub fn code(&self) -> &'static str {
        "invalid_argument"
    }
}

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
