use crate::codec::EncodedValue;
use crate::error::RemoteError;

/// What a proxy sends: the encoded argument list plus the caller's current
/// CSRF token, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub args: EncodedValue,
    pub xsrf: Option<String>,
}

/// What a handler answers with. Every dispatched call produces exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(EncodedValue),
    Failure(RemoteError),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }
}
