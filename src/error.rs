use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    /// No active session for an action that needs one. Callers route the
    /// user to sign-in instead of showing this as an error.
    #[error("sign-in required")]
    SignInRequired,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl AppError {
    pub fn is_sign_in_required(&self) -> bool {
        matches!(self, AppError::SignInRequired)
    }
}

pub type AppResult<T> = Result<T, AppError>;
