//! Summarizer gateway: turns aggregated items into one piece of prose.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::types::{BoardItem, CalendarItem, LlmBackend, SourceFailure, Summarizer};

/// Returned for an empty aggregation without calling the backend.
pub const EMPTY_SUMMARY_SENTINEL: &str = "No events or cards to summarize.";

pub const RAW_LISTING_HEADING: &str = "## Raw Items (summarizer not available)";

pub struct LlmSummarizer {
    backend: Arc<dyn LlmBackend>,
    preamble: String,
}

impl LlmSummarizer {
    pub fn new(backend: Arc<dyn LlmBackend>, preamble: impl Into<String>) -> Self {
        Self {
            backend,
            preamble: preamble.into(),
        }
    }

    /// Same as [`LlmSummarizer::new`] with the preamble read from `context_path`.
    pub async fn with_context_file(backend: Arc<dyn LlmBackend>, context_path: &Path) -> Self {
        let preamble = load_context(context_path).await;
        Self::new(backend, preamble)
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn build_prompt(
        &self,
        calendar_items: &[CalendarItem],
        board_items: &[BoardItem],
        user_name: &str,
    ) -> String {
        let mut prompt = String::new();
        if !self.preamble.trim().is_empty() {
            prompt.push_str(self.preamble.trim_end());
            prompt.push_str("\n\n");
        }

        let _ = write!(
            prompt,
            "Hello {user_name}, please summarize the following calendar events and task \
             board cards. Provide a concise overview, highlight key meetings or tasks, and \
             point out potential conflicts or anything else that would be useful to know."
        );

        if !calendar_items.is_empty() {
            let mut sorted: Vec<&CalendarItem> = calendar_items.iter().collect();
            sorted.sort_by_key(|item| item.start);

            prompt.push_str("\n\nCalendar Events:");
            for item in sorted {
                let _ = write!(prompt, "\n{}", item);
            }
        }

        if !board_items.is_empty() {
            prompt.push_str("\n\nBoard Cards:");
            for item in board_items {
                let _ = write!(prompt, "\n{}", item);
            }
        }

        prompt
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        calendar_items: &[CalendarItem],
        board_items: &[BoardItem],
        user_name: &str,
    ) -> String {
        if calendar_items.is_empty() && board_items.is_empty() {
            debug!(user = user_name, "Nothing to summarize");
            return EMPTY_SUMMARY_SENTINEL.to_string();
        }

        let prompt = self.build_prompt(calendar_items, board_items, user_name);
        info!(
            user = user_name,
            "Summarizing {} event(s) and {} card(s) with {}",
            calendar_items.len(),
            board_items.len(),
            self.backend.backend_name()
        );

        match self.backend.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(user = user_name, "Summarization failed: {}", e);
                String::new()
            }
        }
    }
}

/// Contents of the context document, or an empty preamble when it is missing
/// or unreadable.
pub async fn load_context(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            info!("Loaded summarizer context from {}", path.display());
            text
        }
        Err(e) => {
            info!("No summarizer context at {} ({}), using none", path.display(), e);
            String::new()
        }
    }
}

/// Plain bullet listing used when no summary text is available.
pub fn raw_item_listing(calendar_items: &[CalendarItem], board_items: &[BoardItem]) -> String {
    let mut out = String::from(RAW_LISTING_HEADING);
    out.push('\n');

    if !calendar_items.is_empty() {
        out.push_str("\n### Calendar Events\n\n");
        for item in calendar_items {
            let _ = writeln!(
                out,
                "- {} ({} - {})",
                item.title,
                item.start.format("%Y-%m-%d %H:%M"),
                item.end.format("%Y-%m-%d %H:%M")
            );
        }
    }

    if !board_items.is_empty() {
        out.push_str("\n### Board Cards\n\n");
        for item in board_items {
            let _ = writeln!(out, "- [{}]({})", item.title, item.link);
        }
    }

    out
}

/// Appended to partial reports so they read differently from complete ones.
pub fn unavailable_sources_section(failures: &[SourceFailure]) -> String {
    let mut out = String::from("\n\n## Unavailable sources\n\n");
    for failure in failures {
        let _ = writeln!(
            out,
            "- **{}** ({} failed): {}",
            failure.source_name, failure.stage, failure.reason
        );
    }
    out
}
