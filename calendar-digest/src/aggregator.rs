use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::UserProfile;
use crate::sources::AdapterFactory;
use crate::types::{AggregationResult, FailureStage, FetchWindow, SourceFailure, SourceItems};

/// Drives every selected source of one user through authenticate then fetch.
///
/// A source that fails at any step becomes one `SourceFailure` and the loop
/// moves on; nothing here returns an error to the caller.
pub struct Aggregator {
    factory: Arc<dyn AdapterFactory>,
}

impl Aggregator {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self { factory }
    }

    pub async fn aggregate(
        &self,
        user: &UserProfile,
        window: &FetchWindow,
        source_filter: Option<&str>,
    ) -> AggregationResult {
        let selected = user.select_sources(source_filter);
        info!(
            user = %user.name,
            "Aggregating {} source(s) from {} to {}",
            selected.len(),
            window.start,
            window.end
        );

        let mut result = AggregationResult {
            sources_attempted: selected.len(),
            ..Default::default()
        };

        for descriptor in selected {
            let name = descriptor.name().to_string();
            let fail = |stage: FailureStage, reason: String| {
                warn!(user = %user.name, source = %name, "Source failed at {}: {}", stage, reason);
                SourceFailure {
                    source_name: name.clone(),
                    stage,
                    reason,
                }
            };

            let mut adapter = match self.factory.build(descriptor) {
                Ok(adapter) => adapter,
                Err(e) => {
                    result.source_errors.push(fail(FailureStage::Construct, e.to_string()));
                    continue;
                }
            };

            match adapter.authenticate().await {
                Ok(true) => debug!(user = %user.name, source = %name, "Authenticated"),
                Ok(false) => {
                    result.source_errors.push(fail(
                        FailureStage::Authenticate,
                        "credentials were rejected".to_string(),
                    ));
                    continue;
                }
                Err(e) => {
                    result
                        .source_errors
                        .push(fail(FailureStage::Authenticate, e.to_string()));
                    continue;
                }
            }

            match adapter.fetch(window).await {
                Ok(SourceItems::Calendar(mut items)) => {
                    info!(user = %user.name, source = %name, "Fetched {} calendar item(s)", items.len());
                    result.calendar_items.append(&mut items);
                }
                Ok(SourceItems::Board(mut items)) => {
                    info!(user = %user.name, source = %name, "Fetched {} board item(s)", items.len());
                    result.board_items.append(&mut items);
                }
                Err(e) => {
                    result.source_errors.push(fail(FailureStage::Fetch, e.to_string()));
                }
            }
        }

        result.sort_by_start();
        info!(
            user = %user.name,
            "Aggregation finished: {} calendar item(s), {} board item(s), {} failed source(s)",
            result.calendar_items.len(),
            result.board_items.len(),
            result.source_errors.len()
        );
        result
    }
}
