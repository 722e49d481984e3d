use std::path::{Path, PathBuf};
use std::sync::Arc;

use email_delivery::SmtpDelivery;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::{AppConfig, UserProfile};
use crate::digest::{raw_item_listing, unavailable_sources_section, LlmSummarizer, EMPTY_SUMMARY_SENTINEL};
use crate::llm_adapter::{GeminiBackend, MockLlmBackend};
use crate::report::{clear_output_dir, ReportEmitter};
use crate::sources::{AdapterFactory, DefaultAdapterFactory};
use crate::state::{BatchReport, DeliveryOutcome, UserFailure, UserRunReport, UserRunState};
use crate::types::{
    AggregationResult, DeliveryGateway, DigestError, FetchWindow, LlmBackend, Result, Summarizer,
};

/// Filesystem locations used by a run. Not part of the config document.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub template_path: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            template_path: None,
        }
    }

    pub fn with_template(mut self, template_path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(template_path.into());
        self
    }
}

/// Top-level driver for batch and triggered runs.
///
/// Cloning is cheap: configuration and gateways are shared read-only, and
/// every run builds its own `Aggregator` and `ReportEmitter`.
#[derive(Clone)]
pub struct RunOrchestrator {
    config: Arc<AppConfig>,
    settings: Arc<PipelineSettings>,
    factory: Arc<dyn AdapterFactory>,
    summarizer: Option<Arc<dyn Summarizer>>,
    delivery: Option<Arc<dyn DeliveryGateway>>,
    // Write side: batch clean-slate reset. Read side: report emission.
    output_guard: Arc<RwLock<()>>,
}

impl RunOrchestrator {
    pub fn new(
        config: AppConfig,
        settings: PipelineSettings,
        factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            settings: Arc::new(settings),
            factory,
            summarizer: None,
            delivery: None,
            output_guard: Arc::new(RwLock::new(())),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn DeliveryGateway>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Wire the production adapters and gateways from configuration.
    ///
    /// A missing summarizer key or an incomplete email sender block only
    /// disables that stage.
    pub async fn from_config(
        config: AppConfig,
        settings: PipelineSettings,
        context_path: &Path,
        offline_summarizer: bool,
    ) -> Result<Self> {
        let factory = DefaultAdapterFactory::hosted()
            .map_err(|e| DigestError::Setup(e.to_string()))?;

        let backend: Option<Arc<dyn LlmBackend>> = if offline_summarizer {
            info!("Using the offline summarizer");
            Some(Arc::new(MockLlmBackend::new()))
        } else {
            match &config.summarizer_key {
                Some(key) => match GeminiBackend::new(key.clone()) {
                    Ok(backend) => Some(Arc::new(backend)),
                    Err(e) => {
                        warn!("Summarizer unavailable: {}", e);
                        None
                    }
                },
                None => {
                    info!("No summarizer key configured; reports will list raw items");
                    None
                }
            }
        };

        let delivery: Option<Arc<dyn DeliveryGateway>> =
            match config.email_sender.as_ref().and_then(|s| s.smtp_settings()) {
                Some(smtp) => match SmtpDelivery::new(smtp) {
                    Ok(gateway) => {
                        info!("Delivery enabled via {}", gateway.gateway_name());
                        Some(Arc::new(gateway))
                    }
                    Err(e) => {
                        warn!("Email delivery disabled: {}", e);
                        None
                    }
                },
                None => {
                    info!("Email sender not fully configured; delivery disabled");
                    None
                }
            };

        let mut orchestrator = Self::new(config, settings, Arc::new(factory));
        if let Some(backend) = backend {
            let summarizer = LlmSummarizer::with_context_file(backend, context_path).await;
            orchestrator = orchestrator.with_summarizer(Arc::new(summarizer));
        }
        if let Some(delivery) = delivery {
            orchestrator = orchestrator.with_delivery(delivery);
        }
        Ok(orchestrator)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Full pass over every configured user, starting from an empty output
    /// directory. Never fails as a whole.
    pub async fn run_batch(&self) -> BatchReport {
        let mut batch = BatchReport::default();

        {
            let _guard = self.output_guard.write().await;
            match clear_output_dir(&self.settings.output_dir).await {
                Ok(()) => batch.output_dir_reset = true,
                Err(e) => error!(
                    "Failed to reset report directory {}: {}",
                    self.settings.output_dir.display(),
                    e
                ),
            }
        }

        info!("Starting batch run for {} user(s)", self.config.users.len());
        for (index, user) in self.config.users.iter().enumerate() {
            let name = user.name.clone();
            let this = self.clone();
            // Awaited immediately: a panic stays inside this user's run.
            let handle = tokio::spawn(async move {
                let profile = &this.config.users[index];
                this.execute_profile(profile, None).await
            });

            match handle.await {
                Ok(Ok(report)) => batch.completed.push(report),
                Ok(Err(e)) => {
                    error!(user = %name, "Run failed: {}", e);
                    batch.failed.push(UserFailure {
                        user: name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(user = %name, "Run aborted: {}", e);
                    batch.failed.push(UserFailure {
                        user: name,
                        reason: format!("run aborted: {}", e),
                    });
                }
            }
        }

        info!(
            "Batch run finished: {} completed, {} failed",
            batch.completed.len(),
            batch.failed.len()
        );
        batch
    }

    /// Triggered run for one user, optionally narrowed to one source. Leaves
    /// existing artifacts in place. Returns the rendered rich report.
    pub async fn run_for_user(&self, user_name: &str, source_name: Option<&str>) -> Result<String> {
        let report = self.execute_user(user_name, source_name).await?;
        Ok(report.rendered_rich)
    }

    pub async fn execute_user(
        &self,
        user_name: &str,
        source_filter: Option<&str>,
    ) -> Result<UserRunReport> {
        let user = self
            .config
            .find_user(user_name)
            .ok_or_else(|| DigestError::UserNotFound {
                name: user_name.to_string(),
            })?;
        self.execute_profile(user, source_filter).await
    }

    /// Runs one configured profile through every stage.
    async fn execute_profile(
        &self,
        user: &UserProfile,
        source_filter: Option<&str>,
    ) -> Result<UserRunReport> {
        let mut report = UserRunReport::new(&user.name);

        if let Some(source_name) = source_filter {
            if user.select_sources(Some(source_name)).is_empty() {
                return Err(DigestError::SourceNotFound {
                    user: user.name.clone(),
                    source_name: source_name.to_string(),
                });
            }
        }
        report.advance(UserRunState::SourcesResolved);

        let window = FetchWindow::from_now(user.window_days).ok_or(DigestError::InvalidWindow {
            days: user.window_days,
        })?;
        let aggregation = Aggregator::new(self.factory.clone())
            .aggregate(user, &window, source_filter)
            .await;
        report.calendar_items = aggregation.calendar_items.len();
        report.board_items = aggregation.board_items.len();
        report.failed_sources = aggregation
            .source_errors
            .iter()
            .map(|failure| failure.source_name.clone())
            .collect();
        report.advance(UserRunState::Aggregated);

        let summary = self.compose_summary(user, &aggregation).await;
        report.advance(UserRunState::Summarized);

        let emitted = {
            let _guard = self.output_guard.read().await;
            let mut emitter = ReportEmitter::new(&self.settings.output_dir);
            if let Some(template) = &self.settings.template_path {
                emitter = emitter.with_template(template);
            }
            emitter.emit(&user.name, &summary).await
        };
        if !emitted.failures.is_empty() {
            warn!(
                user = %user.name,
                "{} report format(s) could not be written",
                emitted.failures.len()
            );
        }
        report.artifacts = emitted.paths();
        report.rendered_rich = emitted.rendered_rich;
        report.advance(UserRunState::Reported);

        let outcome = self.deliver(user, &aggregation, &report.rendered_rich).await;
        report.advance(match &outcome {
            DeliveryOutcome::Delivered { .. } => UserRunState::Delivered,
            DeliveryOutcome::Skipped { .. } => UserRunState::DeliverySkipped,
            DeliveryOutcome::Failed { .. } => UserRunState::DeliveryFailed,
        });
        report.delivery = Some(outcome);

        report.advance(UserRunState::Done);
        info!(user = %user.name, "Run complete");
        Ok(report)
    }

    async fn compose_summary(&self, user: &UserProfile, aggregation: &AggregationResult) -> String {
        let mut text = match &self.summarizer {
            Some(summarizer) => {
                let text = summarizer
                    .summarize(&aggregation.calendar_items, &aggregation.board_items, &user.name)
                    .await;
                if text.trim().is_empty() {
                    warn!(user = %user.name, "Summarizer returned nothing; using raw item listing");
                    raw_item_listing(&aggregation.calendar_items, &aggregation.board_items)
                } else {
                    text
                }
            }
            None if aggregation.is_empty() => EMPTY_SUMMARY_SENTINEL.to_string(),
            None => raw_item_listing(&aggregation.calendar_items, &aggregation.board_items),
        };

        if aggregation.has_errors() {
            text.push_str(&unavailable_sources_section(&aggregation.source_errors));
        }
        text
    }

    async fn deliver(
        &self,
        user: &UserProfile,
        aggregation: &AggregationResult,
        rich_content: &str,
    ) -> DeliveryOutcome {
        let skip = |reason: &str| {
            info!(user = %user.name, "Delivery skipped: {}", reason);
            DeliveryOutcome::Skipped {
                reason: reason.to_string(),
            }
        };

        if aggregation.is_empty() && !aggregation.has_errors() {
            return skip("nothing to deliver");
        }
        let Some(destination) = user.notify_address.as_deref() else {
            return skip("no notify address configured");
        };
        let Some(gateway) = &self.delivery else {
            return skip("delivery is not configured");
        };

        let subject = format!("Calendar Digest: Your Summary for {}", user.name);
        match gateway.deliver(destination, &subject, rich_content).await {
            Ok(()) => {
                info!(user = %user.name, "Report delivered to {}", destination);
                DeliveryOutcome::Delivered {
                    destination: destination.to_string(),
                }
            }
            Err(e) => {
                error!(user = %user.name, "Delivery to {} failed: {}", destination, e);
                DeliveryOutcome::Failed {
                    destination: destination.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}
