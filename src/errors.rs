use thiserror::Error;

/// Classification for every failure surfaced by the resolver and adapters.
///
/// Equality is defined on the code alone; the message is diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed or missing provider configuration.
    InvalidProviderSpec,
    /// Referenced secret, its data map, or the required key is absent.
    NotFoundPrivateKey,
    /// The event is missing data a provider requires (e.g. routing annotations).
    FailedValidation,
    /// Delivery-time failure: transport, non-success response, protocol NACK.
    RuntimeError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::InvalidProviderSpec => "InvalidProviderSpec",
            ErrorCode::NotFoundPrivateKey => "NotFoundPrivateKey",
            ErrorCode::FailedValidation => "FailedValidation",
            ErrorCode::RuntimeError => "RuntimeError",
        };
        f.write_str(s)
    }
}

/// The only error type that crosses the provider boundary.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_provider_spec(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidProviderSpec, message)
    }

    pub fn not_found_private_key(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFoundPrivateKey, message)
    }

    pub fn failed_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedValidation, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RuntimeError, message)
    }
}
