pub mod types;
pub mod config;
pub mod sources;
pub mod aggregator;
pub mod llm_adapter;
pub mod digest;
pub mod report;
pub mod state;
pub mod pipeline;
pub mod trigger;

pub use types::*;
pub use config::{AppConfig, ConfigError, SourceDescriptor, UserProfile};
pub use aggregator::Aggregator;
pub use digest::{LlmSummarizer, EMPTY_SUMMARY_SENTINEL};
pub use llm_adapter::{GeminiBackend, MockLlmBackend};
pub use report::{ReportArtifact, ReportEmitter, ReportFormat};
pub use state::{BatchReport, DeliveryOutcome, UserRunReport, UserRunState};
pub use pipeline::{PipelineSettings, RunOrchestrator};
pub use trigger::{JobHandle, RunQueue};
