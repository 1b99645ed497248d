use thiserror::Error;

/// Error taxonomy for webhook handling.
///
/// The split drives retry behavior: `Client` is rejected immediately and never
/// retried, `Transient` goes through the bounded backoff loop in the
/// dispatcher. Not-found is deliberately NOT an error — a missing record is a
/// successful no-op so upstream redelivery does not accumulate retries.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed event: {0}")]
    Client(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl EngineError {
    pub fn client(msg: impl Into<String>) -> Self {
        EngineError::Client(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        EngineError::Transient(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Store failures are treated as transient: the store being down is the
/// canonical retry case.
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Transient(err.to_string())
    }
}
