//! Error types for the external collaborators the analysis core talks to.
//!
//! None of these escape the pipeline: provider errors degrade the affected
//! stage to a neutral result and mail capability errors end up inside a
//! `MitigationResult`.

use std::time::Duration;

/// Failures reported by search, footprint and content-risk providers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not be reached or refused the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// A footprint lookup ran but produced no usable answer.
    #[error("lookup failed: {0}")]
    LookupFailed(String),

    /// The caller-supplied deadline elapsed.
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with something we could not interpret.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Failures reported by a mail capability while modifying labels.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MailCapabilityError {
    #[error("insufficient scope: {0}")]
    InsufficientScope(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("message not found: {0}")]
    NotFound(String),

    #[error("mail API error: {0}")]
    Api(String),

    #[error("label modification timed out after {0:?}")]
    Timeout(Duration),
}
