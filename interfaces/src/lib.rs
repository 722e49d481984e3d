pub mod defs;
pub mod errors;

pub use defs::{
    BoardItem, CalendarItem, DeliveryGateway, FetchWindow, LlmBackend, SourceAdapter, SourceItems,
    Summarizer,
};
pub use errors::{DeliveryError, SourceError, SummarizationError};
