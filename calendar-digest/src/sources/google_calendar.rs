use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::endpoint;
use crate::config::GoogleSource;
use crate::types::{CalendarItem, FetchWindow, SourceAdapter, SourceError, SourceItems};

const EXPIRY_MARGIN_SECS: i64 = 60;
const PAGE_SIZE: &str = "250";
const UNTITLED_EVENT: &str = "No Summary";

/// Google Calendar over the v3 REST API, authorised with a cached
/// authorized-user token file.
pub struct GoogleCalendarAdapter {
    client: Client,
    source: GoogleSource,
    api_base: Url,
    token_uri: Url,
    access_token: Option<String>,
}

impl GoogleCalendarAdapter {
    pub fn new(client: Client, source: GoogleSource, api_base: Url, token_uri: Url) -> Self {
        Self {
            client,
            source,
            api_base,
            token_uri,
            access_token: None,
        }
    }

    async fn refresh(
        &self,
        token: &mut AuthorizedUserToken,
        refresh_token: &str,
    ) -> Result<bool, SourceError> {
        let client = match (&token.client_id, &token.client_secret) {
            (Some(id), Some(secret)) => ClientSecrets {
                client_id: id.clone(),
                client_secret: secret.clone(),
            },
            _ => read_client_secrets(&self.source.credentials_path).await?,
        };

        info!(source = %self.source.name, "Refreshing expired Google access token");
        let response = self
            .client
            .post(self.token_uri.clone())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Auth(format!("token refresh request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            warn!(source = %self.source.name, "Google rejected the refresh token ({})", status);
            return Ok(false);
        }
        if !status.is_success() {
            return Err(SourceError::Auth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("invalid token response: {}", e)))?;

        let expiry = match refreshed.expires_in {
            Some(secs) => Some(
                Duration::try_seconds(secs)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        SourceError::Auth(format!("token lifetime out of range: {}s", secs))
                    })?
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            None => None,
        };
        token.token = Some(refreshed.access_token);
        token.expiry = expiry;
        if token.client_id.is_none() {
            token.client_id = Some(client.client_id);
            token.client_secret = Some(client.client_secret);
        }

        let serialized = serde_json::to_string_pretty(&*token)
            .map_err(|e| SourceError::Auth(format!("failed to serialize token: {}", e)))?;
        if let Err(e) = tokio::fs::write(&self.source.token_path, serialized).await {
            // The refreshed token is still good for this run.
            warn!(
                source = %self.source.name,
                "Failed to save refreshed token to {}: {}",
                self.source.token_path.display(),
                e
            );
        }
        Ok(true)
    }

    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: &FetchWindow,
    ) -> Result<Vec<CalendarItem>, SourceError> {
        let url = endpoint(&self.api_base, &["calendars", calendar_id, "events"])
            .map_err(SourceError::Fetch)?;
        let time_min = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(url.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", PAGE_SIZE),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| SourceError::Fetch(format!("request failed: {}", e)))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Fetch(format!(
                    "calendar '{}' returned {}: {}",
                    calendar_id, status, body
                )));
            }

            let page: EventsPage = response
                .json()
                .await
                .map_err(|e| SourceError::Fetch(format!("invalid events response: {}", e)))?;

            for event in page.items {
                if event.status.as_deref() == Some("cancelled") {
                    continue;
                }
                match event.into_item() {
                    Some(item) => items.push(item),
                    None => debug!(calendar = calendar_id, "Skipping event without usable times"),
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for GoogleCalendarAdapter {
    fn source_name(&self) -> &str {
        &self.source.name
    }

    async fn authenticate(&mut self) -> Result<bool, SourceError> {
        let path = &self.source.token_path;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SourceError::Auth(format!(
                "cannot read token file {} ({}); complete the consent flow first",
                path.display(),
                e
            ))
        })?;
        let mut token: AuthorizedUserToken = serde_json::from_str(&content)
            .map_err(|e| SourceError::Auth(format!("invalid token file {}: {}", path.display(), e)))?;

        if let Some(access) = token.token.clone().filter(|t| !t.is_empty()) {
            if !token.expires_soon(Utc::now()) {
                debug!(source = %self.source.name, "Using cached Google access token");
                self.access_token = Some(access);
                return Ok(true);
            }
        }

        let refresh_token = match token.refresh_token.clone().filter(|t| !t.is_empty()) {
            Some(refresh_token) => refresh_token,
            None => {
                return Err(SourceError::Auth(
                    "access token expired and no refresh token is available".to_string(),
                ))
            }
        };

        if !self.refresh(&mut token, &refresh_token).await? {
            return Ok(false);
        }
        self.access_token = token.token;
        Ok(self.access_token.is_some())
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<SourceItems, SourceError> {
        let access_token = self
            .access_token
            .as_deref()
            .ok_or_else(|| SourceError::Fetch("not authenticated".to_string()))?;

        let mut items = Vec::new();
        let mut failures = Vec::new();

        for calendar_id in &self.source.calendar_ids {
            match self.list_events(access_token, calendar_id, window).await {
                Ok(mut events) => {
                    debug!(
                        source = %self.source.name,
                        calendar = %calendar_id,
                        "Fetched {} events",
                        events.len()
                    );
                    items.append(&mut events);
                }
                Err(e) => {
                    warn!(
                        source = %self.source.name,
                        calendar = %calendar_id,
                        "Skipping calendar: {}",
                        e
                    );
                    failures.push(e.to_string());
                }
            }
        }

        if !self.source.calendar_ids.is_empty() && failures.len() == self.source.calendar_ids.len() {
            return Err(SourceError::Fetch(failures.join("; ")));
        }
        Ok(SourceItems::Calendar(items))
    }
}

/// The authorized-user JSON written by Google's client libraries. Unknown
/// keys are carried through when the file is rewritten.
#[derive(Debug, Serialize, Deserialize)]
struct AuthorizedUserToken {
    #[serde(default, alias = "access_token", skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthorizedUserToken {
    /// No recorded expiry means the token is treated as valid.
    fn expires_soon(&self, now: DateTime<Utc>) -> bool {
        match self.expiry.as_deref().map(DateTime::parse_from_rfc3339) {
            None => false,
            Some(Ok(expiry)) => expiry.with_timezone(&Utc) <= now + Duration::seconds(EXPIRY_MARGIN_SECS),
            Some(Err(_)) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
}

async fn read_client_secrets(path: &Path) -> Result<ClientSecrets, SourceError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SourceError::Auth(format!("cannot read credentials file {}: {}", path.display(), e))
    })?;
    let file: ClientSecretsFile = serde_json::from_str(&content).map_err(|e| {
        SourceError::Auth(format!("invalid credentials file {}: {}", path.display(), e))
    })?;
    file.installed.or(file.web).ok_or_else(|| {
        SourceError::Auth(format!(
            "credentials file {} has no 'installed' or 'web' client",
            path.display()
        ))
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<RawEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<String>,
    date: Option<String>,
}

impl EventTime {
    /// Instant for timed events, midnight UTC for all-day dates. All-day end
    /// dates are exclusive, so the end is moved back one day.
    fn resolve(&self, is_end: bool) -> Option<DateTime<Utc>> {
        if let Some(ref value) = self.date_time {
            return DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        let date = if is_end { date.pred_opt()? } else { date };
        Some(date.and_hms_opt(0, 0, 0)?.and_utc())
    }
}

impl RawEvent {
    fn into_item(self) -> Option<CalendarItem> {
        let start = self.start.as_ref()?.resolve(false)?;
        let end = self
            .end
            .as_ref()
            .and_then(|end| end.resolve(true))
            .unwrap_or(start)
            .max(start);

        let title = self
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_EVENT.to_string());

        let mut item = CalendarItem::new(title, start, end);
        if let Some(location) = self.location.filter(|s| !s.trim().is_empty()) {
            item = item.with_location(location);
        }
        if let Some(note) = self.description.filter(|s| !s.trim().is_empty()) {
            item = item.with_note(note);
        }
        Some(item)
    }
}
