use std::fmt;
use std::path::PathBuf;

/// Per-user pipeline states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRunState {
    Idle,
    SourcesResolved,
    Aggregated,
    Summarized,
    Reported,
    Delivered,
    DeliverySkipped,
    DeliveryFailed,
    Done,
}

impl fmt::Display for UserRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UserRunState::Idle => "idle",
            UserRunState::SourcesResolved => "sources-resolved",
            UserRunState::Aggregated => "aggregated",
            UserRunState::Summarized => "summarized",
            UserRunState::Reported => "reported",
            UserRunState::Delivered => "delivered",
            UserRunState::DeliverySkipped => "delivery-skipped",
            UserRunState::DeliveryFailed => "delivery-failed",
            UserRunState::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { destination: String },
    Skipped { reason: String },
    /// Attempted and failed; the artifacts stay on disk.
    Failed { destination: String, reason: String },
}

/// Everything observable about one user's run.
#[derive(Debug, Clone)]
pub struct UserRunReport {
    pub user: String,
    pub states: Vec<UserRunState>,
    pub calendar_items: usize,
    pub board_items: usize,
    pub failed_sources: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    pub rendered_rich: String,
    pub delivery: Option<DeliveryOutcome>,
}

impl UserRunReport {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            states: vec![UserRunState::Idle],
            calendar_items: 0,
            board_items: 0,
            failed_sources: Vec::new(),
            artifacts: Vec::new(),
            rendered_rich: String::new(),
            delivery: None,
        }
    }

    pub fn advance(&mut self, state: UserRunState) {
        self.states.push(state);
    }

    pub fn state(&self) -> UserRunState {
        self.states.last().copied().unwrap_or(UserRunState::Idle)
    }

    pub fn reached(&self, state: UserRunState) -> bool {
        self.states.contains(&state)
    }
}

/// A user whose run stopped before `Done`.
#[derive(Debug, Clone)]
pub struct UserFailure {
    pub user: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub completed: Vec<UserRunReport>,
    pub failed: Vec<UserFailure>,
    pub output_dir_reset: bool,
}

impl BatchReport {
    pub fn users_attempted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn user(&self, name: &str) -> Option<&UserRunReport> {
        self.completed.iter().find(|report| report.user == name)
    }
}
