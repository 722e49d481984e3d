// Core data types are shared through the interfaces crate
pub use interfaces::defs::{
    BoardItem, CalendarItem, DeliveryGateway, FetchWindow, LlmBackend, SourceAdapter, SourceItems,
    Summarizer,
};
pub use interfaces::errors::{DeliveryError, SourceError, SummarizationError};

use crate::config::ConfigError;

/// Where a source failed inside the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Construct,
    Authenticate,
    Fetch,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureStage::Construct => "construct",
            FailureStage::Authenticate => "authenticate",
            FailureStage::Fetch => "fetch",
        };
        f.write_str(label)
    }
}

/// One failed source in an aggregation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_name: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// Everything one user's sources produced in one run.
///
/// Every attempted source shows up exactly once: as items (possibly zero) or
/// as an entry in `source_errors`.
#[derive(Debug, Clone, Default)]
pub struct AggregationResult {
    pub calendar_items: Vec<CalendarItem>,
    pub board_items: Vec<BoardItem>,
    pub source_errors: Vec<SourceFailure>,
    pub sources_attempted: usize,
}

impl AggregationResult {
    pub fn total_items(&self) -> usize {
        self.calendar_items.len() + self.board_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_items() == 0
    }

    pub fn has_errors(&self) -> bool {
        !self.source_errors.is_empty()
    }

    pub fn error_for(&self, source_name: &str) -> Option<&SourceFailure> {
        self.source_errors
            .iter()
            .find(|failure| failure.source_name == source_name)
    }

    /// Stable sort of calendar items by start so summaries are deterministic.
    pub fn sort_by_start(&mut self) {
        self.calendar_items.sort_by_key(|item| item.start);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("User not found: {name}")]
    UserNotFound { name: String },

    #[error("No source named '{source_name}' configured for user {user}")]
    SourceNotFound { user: String, source_name: String },

    #[error("Aggregation window of {days} days cannot be represented")]
    InvalidWindow { days: u32 },

    #[error("Pipeline setup failed: {0}")]
    Setup(String),

    #[error("Run worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DigestError>;
