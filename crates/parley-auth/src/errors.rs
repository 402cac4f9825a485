//! Token minting errors.
//!
//! Validation failures use [`parley_core::AuthError`] so the relay sees a
//! single error type regardless of validator.

/// Errors raised while issuing a token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The subject was empty.
    #[error("token subject must not be empty")]
    EmptySubject,

    /// Signing failed.
    #[error("failed to sign token: {reason}")]
    Sign {
        /// Underlying error text.
        reason: String,
    },
}
