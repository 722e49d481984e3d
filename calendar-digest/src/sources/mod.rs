//! Concrete source adapters and the single place where a configured
//! [`SourceDescriptor`] becomes a live [`SourceAdapter`].

pub mod board;
pub mod caldav_calendar;
pub mod google_calendar;
pub mod ics;

pub use board::BoardAdapter;
pub use caldav_calendar::CaldavCalendarAdapter;
pub use google_calendar::GoogleCalendarAdapter;

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::config::SourceDescriptor;
use crate::types::{SourceAdapter, SourceError};

pub const DEFAULT_GOOGLE_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
pub const DEFAULT_GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_BOARD_API_BASE: &str = "https://api.trello.com/1/";
pub const DEFAULT_CALDAV_SERVER: &str = "https://caldav.icloud.com/";

const USER_AGENT: &str = concat!("calendar-digest/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Builds one adapter per descriptor. Swapped out in tests.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn SourceAdapter>, SourceError>;
}

/// Base URLs of the hosted backends. CalDAV servers come from each
/// descriptor instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoints {
    pub google_api_base: Url,
    pub google_token_uri: Url,
    pub board_api_base: Url,
}

impl SourceEndpoints {
    /// Production endpoints.
    pub fn hosted() -> Result<Self, url::ParseError> {
        Ok(Self {
            google_api_base: Url::parse(DEFAULT_GOOGLE_API_BASE)?,
            google_token_uri: Url::parse(DEFAULT_GOOGLE_TOKEN_URI)?,
            board_api_base: Url::parse(DEFAULT_BOARD_API_BASE)?,
        })
    }
}

pub struct DefaultAdapterFactory {
    client: Client,
    endpoints: SourceEndpoints,
}

impl DefaultAdapterFactory {
    pub fn new(endpoints: SourceEndpoints) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()
            .map_err(|e| SourceError::Construct(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, endpoints })
    }

    pub fn hosted() -> Result<Self, SourceError> {
        let endpoints = SourceEndpoints::hosted()
            .map_err(|e| SourceError::Construct(format!("invalid endpoint: {}", e)))?;
        Self::new(endpoints)
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn build(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn SourceAdapter>, SourceError> {
        let adapter: Box<dyn SourceAdapter> = match descriptor {
            SourceDescriptor::Google(source) => Box::new(GoogleCalendarAdapter::new(
                self.client.clone(),
                source.clone(),
                self.endpoints.google_api_base.clone(),
                self.endpoints.google_token_uri.clone(),
            )),
            SourceDescriptor::Caldav(source) => {
                Box::new(CaldavCalendarAdapter::new(self.client.clone(), source.clone())?)
            }
            SourceDescriptor::Board(source) => Box::new(BoardAdapter::new(
                self.client.clone(),
                source.clone(),
                self.endpoints.board_api_base.clone(),
            )),
        };
        Ok(adapter)
    }
}

/// `base` with `segments` appended as individually escaped path segments.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| format!("{} cannot be used as a base URL", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
