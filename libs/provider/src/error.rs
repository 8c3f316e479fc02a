//! Provider error types.

use thiserror::Error;

use crate::types::ErrorDetail;

/// Errors surfaced by a cloud provider call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider rejected the call with a typed error payload.
    #[error("provider error {code}: {message}")]
    Api { code: String, message: String },

    /// Transport-level failure before the provider produced a response.
    #[error("provider unreachable: {0}")]
    Unavailable(String),

    /// The operation id is unknown to the provider.
    #[error("unknown operation id: {0}")]
    UnknownOperation(String),
}

impl ProviderError {
    /// Error detail suitable for attaching to an instance, preserving the
    /// provider's code and message verbatim where they exist.
    pub fn error_detail(&self) -> ErrorDetail {
        match self {
            Self::Api { code, message } => ErrorDetail::new(code.clone(), message.clone()),
            Self::Unavailable(message) => ErrorDetail::new("provider.unavailable", message.clone()),
            Self::UnknownOperation(id) => {
                ErrorDetail::new("operation.unknown", format!("unknown operation id: {id}"))
            }
        }
    }
}
