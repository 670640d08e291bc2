use thiserror::Error;

/// Failures surfaced while describing or creating a convolution.
///
/// `Unimplemented` is the recoverable "unsupported configuration" outcome: the
/// caller is expected to try another implementation. `InvalidArguments` means
/// the request or a memory binding is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvError {
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ConvError {
    pub fn unimplemented(reason: impl Into<String>) -> Self { ConvError::Unimplemented(reason.into()) }
    pub fn invalid(reason: impl Into<String>) -> Self { ConvError::InvalidArguments(reason.into()) }
    pub fn is_unimplemented(&self) -> bool { matches!(self, ConvError::Unimplemented(_)) }
}

pub type Result<T> = std::result::Result<T, ConvError>;
