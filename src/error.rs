//! Authentication failures raised by the user-session flow.
use thiserror::Error;

/// Closed set of reasons the interactive phone-code login can stop.
///
/// None of these are retried within a run: each needs the operator to act
/// (supply a code, wait out a flood limit, disable 2FA) before the next start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("login code requests are rate limited; retry in {seconds}s")]
    RateLimited { seconds: u32 },
    #[error("the login code is invalid; a new code will be requested on the next start")]
    CodeInvalid,
    #[error("the login code has expired; a new code will be requested on the next start")]
    CodeExpired,
    #[error("two-factor authentication is enabled; password login is not supported")]
    SecondFactorRequired,
    #[error("a login code was sent to {phone}; set TELEGRAM_AUTH_CODE and restart")]
    CodeMissing { phone: String },
    #[error("{phone} has no Telegram account; register it before signing in")]
    SignUpRequired { phone: String },
}

impl AuthError {
    /// Whether a pending code hash must be discarded after this failure.
    pub fn invalidates_pending_code(&self) -> bool {
        !matches!(self, AuthError::CodeMissing { .. })
    }
}

/// Find an [`AuthError`] anywhere in an `anyhow` error chain.
pub fn auth_error(err: &anyhow::Error) -> Option<&AuthError> {
    err.chain().find_map(|cause| cause.downcast_ref::<AuthError>())
}
