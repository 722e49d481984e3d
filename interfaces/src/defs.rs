use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{DeliveryError, SourceError, SummarizationError};

/// A time-bounded entry produced by a calendar-kind source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarItem {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub note: Option<String>,
}

impl CalendarItem {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            location: None,
            note: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Whether `[start, end]` intersects the half-open window `[window.start, window.end)`.
    /// Zero-length items count when their instant falls inside the window.
    pub fn intersects(&self, window: &FetchWindow) -> bool {
        self.start < window.end && self.end >= window.start
    }
}

impl fmt::Display for CalendarItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title: {}", self.title)?;
        writeln!(f, "Start: {}", self.start.format("%Y-%m-%d %H:%M"))?;
        writeln!(f, "End: {}", self.end.format("%Y-%m-%d %H:%M"))?;
        writeln!(f, "Location: {}", self.location.as_deref().unwrap_or("N/A"))?;
        writeln!(f, "Note: {}", self.note.as_deref().unwrap_or("N/A"))?;
        write!(f, "---")
    }
}

/// A card produced by a task-board source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardItem {
    pub title: String,
    pub note: Option<String>,
    pub link: Url,
}

impl BoardItem {
    pub fn new(title: impl Into<String>, link: Url) -> Self {
        Self {
            title: title.into(),
            note: None,
            link,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl fmt::Display for BoardItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title: {}", self.title)?;
        writeln!(f, "Note: {}", self.note.as_deref().unwrap_or("N/A"))?;
        writeln!(f, "Link: {}", self.link)?;
        write!(f, "---")
    }
}

/// The items one source returned, tagged by kind so the aggregator can route
/// them without knowing which backend produced them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceItems {
    Calendar(Vec<CalendarItem>),
    Board(Vec<BoardItem>),
}

impl SourceItems {
    pub fn len(&self) -> usize {
        match self {
            SourceItems::Calendar(items) => items.len(),
            SourceItems::Board(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Half-open aggregation window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[start, start + days)`, or `None` when the end overflows the calendar.
    pub fn starting_at(start: DateTime<Utc>, days: u32) -> Option<Self> {
        let end = start.checked_add_signed(Duration::try_days(i64::from(days))?)?;
        Some(Self { start, end })
    }

    pub fn from_now(days: u32) -> Option<Self> {
        Self::starting_at(Utc::now(), days)
    }
}

// Object style note:
// Adapters are constructed fresh for every run from a read-only descriptor and
// dropped when the run ends. Any session state they establish in
// `authenticate` lives only as long as the adapter value.

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Configured name of the source this adapter serves.
    fn source_name(&self) -> &str;

    /// Establish whatever session the backend needs. `Ok(false)` means the
    /// backend rejected the credentials.
    async fn authenticate(&mut self) -> Result<bool, SourceError>;

    /// All items intersecting `window`. Empty is a successful result.
    async fn fetch(&self, window: &FetchWindow) -> Result<SourceItems, SourceError>;
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn backend_name(&self) -> String;

    async fn generate(&self, prompt: &str) -> Result<String, SummarizationError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Never fails: backend problems surface as an empty string.
    async fn summarize(
        &self,
        calendar_items: &[CalendarItem],
        board_items: &[BoardItem],
        user_name: &str,
    ) -> String;
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    fn gateway_name(&self) -> String;

    async fn deliver(
        &self,
        destination: &str,
        subject: &str,
        rich_content: &str,
    ) -> Result<(), DeliveryError>;
}
