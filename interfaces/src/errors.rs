/// Failure of a single source. Recorded by the aggregator, never propagated past it.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("adapter could not be constructed: {0}")]
    Construct(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("summarizer backend error: {0}")]
    Backend(String),

    #[error("summarizer backend returned no text")]
    EmptyResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("transport error: {0}")]
    Transport(String),
}
