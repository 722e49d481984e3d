#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calendar_digest::config::{
    AppConfig, BoardSource, CaldavSource, GoogleSource, Secret, SourceDescriptor, UserProfile,
};
use calendar_digest::sources::AdapterFactory;
use calendar_digest::types::{
    BoardItem, CalendarItem, DeliveryError, DeliveryGateway, FetchWindow, SourceAdapter,
    SourceError, SourceItems,
};
use chrono::{DateTime, Duration, Utc};
use url::Url;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// How a stub source behaves for one run.
#[derive(Clone, Debug)]
pub enum StubBehavior {
    Calendar(Vec<CalendarItem>),
    Board(Vec<BoardItem>),
    RejectCredentials,
    AuthError(String),
    FetchError(String),
    ConstructError(String),
    Panic,
}

pub struct StubAdapter {
    name: String,
    behavior: StubBehavior,
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&mut self) -> Result<bool, SourceError> {
        match &self.behavior {
            StubBehavior::RejectCredentials => Ok(false),
            StubBehavior::AuthError(reason) => Err(SourceError::Auth(reason.clone())),
            StubBehavior::Panic => panic!("stub source {} exploded", self.name),
            _ => Ok(true),
        }
    }

    async fn fetch(&self, _window: &FetchWindow) -> Result<SourceItems, SourceError> {
        match &self.behavior {
            StubBehavior::Calendar(items) => Ok(SourceItems::Calendar(items.clone())),
            StubBehavior::Board(items) => Ok(SourceItems::Board(items.clone())),
            StubBehavior::FetchError(reason) => Err(SourceError::Fetch(reason.clone())),
            _ => Ok(SourceItems::Calendar(Vec::new())),
        }
    }
}

/// Maps source names to stub behaviors and counts adapter constructions.
#[derive(Default)]
pub struct StubFactory {
    behaviors: HashMap<String, StubBehavior>,
    built: AtomicUsize,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source_name: &str, behavior: StubBehavior) -> Self {
        self.behaviors.insert(source_name.to_string(), behavior);
        self
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for StubFactory {
    fn build(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn SourceAdapter>, SourceError> {
        self.built.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .get(descriptor.name())
            .cloned()
            .unwrap_or(StubBehavior::Calendar(Vec::new()));
        if let StubBehavior::ConstructError(reason) = &behavior {
            return Err(SourceError::Construct(reason.clone()));
        }
        Ok(Box::new(StubAdapter {
            name: descriptor.name().to_string(),
            behavior,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub destination: String,
    pub subject: String,
    pub body: String,
}

/// Delivery gateway that records messages instead of sending them.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<SentMessage>>,
    fail_with: Option<String>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Some(reason.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryGateway for RecordingDelivery {
    fn gateway_name(&self) -> String {
        "Recording".to_string()
    }

    async fn deliver(
        &self,
        destination: &str,
        subject: &str,
        rich_content: &str,
    ) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(SentMessage {
            destination: destination.to_string(),
            subject: subject.to_string(),
            body: rich_content.to_string(),
        });
        match &self.fail_with {
            Some(reason) => Err(DeliveryError::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    let today = Utc::now().date_naive() + Duration::days(1);
    today.and_hms_opt(hour, minute, 0).unwrap().and_utc()
}

pub fn event(title: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CalendarItem {
    CalendarItem::new(title, start, end)
}

pub fn card(title: &str) -> BoardItem {
    let slug = title.to_lowercase().replace(' ', "-");
    BoardItem::new(
        title,
        Url::parse(&format!("https://boards.example.com/c/{}", slug)).unwrap(),
    )
}

pub fn google(name: &str) -> SourceDescriptor {
    SourceDescriptor::Google(GoogleSource {
        name: name.to_string(),
        credentials_path: "credentials.json".into(),
        token_path: "token.json".into(),
        calendar_ids: vec!["primary".to_string()],
    })
}

pub fn caldav(name: &str) -> SourceDescriptor {
    SourceDescriptor::Caldav(CaldavSource {
        name: name.to_string(),
        username: "user".to_string(),
        secret: Secret::new("secret"),
        server_url: None,
        target_calendar_name: None,
    })
}

pub fn board(name: &str) -> SourceDescriptor {
    SourceDescriptor::Board(BoardSource {
        name: name.to_string(),
        api_key: Secret::new("key"),
        api_token: Secret::new("token"),
        board_id: "b1".to_string(),
    })
}

pub fn user(name: &str, notify: Option<&str>, sources: Vec<SourceDescriptor>) -> UserProfile {
    UserProfile {
        name: name.to_string(),
        notify_address: notify.map(str::to_string),
        window_days: 7,
        sources,
    }
}

pub fn app_config(users: Vec<UserProfile>) -> AppConfig {
    AppConfig {
        email_sender: None,
        summarizer_key: None,
        users,
    }
}
