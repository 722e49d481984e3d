use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;
use url::Url;

use super::{ics, DEFAULT_CALDAV_SERVER};
use crate::config::CaldavSource;
use crate::types::{FetchWindow, SourceAdapter, SourceError, SourceItems};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:displayname/><d:resourcetype/></d:prop>
</d:propfind>"#;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// A calendar collection on a CalDAV server, using basic auth.
pub struct CaldavCalendarAdapter {
    client: Client,
    source: CaldavSource,
    collection_url: Url,
}

impl CaldavCalendarAdapter {
    pub fn new(client: Client, source: CaldavSource) -> Result<Self, SourceError> {
        let collection_url = collection_url(&source)?;
        Ok(Self {
            client,
            source,
            collection_url,
        })
    }

    pub fn collection_url(&self) -> &Url {
        &self.collection_url
    }

    fn request(&self, method: &[u8], depth: &'static str) -> Result<reqwest::RequestBuilder, String> {
        let method = Method::from_bytes(method).map_err(|e| e.to_string())?;
        Ok(self
            .client
            .request(method, self.collection_url.clone())
            .basic_auth(&self.source.username, Some(self.source.secret.expose()))
            .header("Depth", depth)
            .header(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE)))
    }
}

fn collection_url(source: &CaldavSource) -> Result<Url, SourceError> {
    let mut base = match &source.server_url {
        Some(url) => url.clone(),
        None => Url::parse(DEFAULT_CALDAV_SERVER)
            .map_err(|e| SourceError::Construct(e.to_string()))?,
    };
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    match source.target_calendar_name.as_deref() {
        Some(name) => base
            .join(&format!("{}/", name.trim_matches('/')))
            .map_err(|e| SourceError::Construct(format!("invalid calendar name '{}': {}", name, e))),
        None => Ok(base),
    }
}

fn calendar_query(window: &FetchWindow) -> String {
    let start = window.start.format("%Y%m%dT%H%M%SZ");
    let end = window.end.format("%Y%m%dT%H%M%SZ");
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data><c:expand start="{start}" end="{end}"/></c:calendar-data>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{start}" end="{end}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

#[async_trait]
impl SourceAdapter for CaldavCalendarAdapter {
    fn source_name(&self) -> &str {
        &self.source.name
    }

    async fn authenticate(&mut self) -> Result<bool, SourceError> {
        let response = self
            .request(b"PROPFIND", "0")
            .map_err(SourceError::Auth)?
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| SourceError::Auth(format!("PROPFIND failed: {}", e)))?;

        let status = response.status();
        debug!(source = %self.source.name, "PROPFIND {} -> {}", self.collection_url, status);
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            other => Err(SourceError::Auth(format!(
                "unexpected PROPFIND status {}",
                other
            ))),
        }
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<SourceItems, SourceError> {
        let response = self
            .request(b"REPORT", "1")
            .map_err(SourceError::Fetch)?
            .body(calendar_query(window))
            .send()
            .await
            .map_err(|e| SourceError::Fetch(format!("REPORT failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Fetch(format!("REPORT returned {}", status)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Fetch(format!("failed to read REPORT body: {}", e)))?;

        let items: Vec<_> = ics::events_from_multistatus(&body)
            .into_iter()
            .filter(|item| item.intersects(window))
            .collect();
        debug!(source = %self.source.name, "Parsed {} events in window", items.len());
        Ok(SourceItems::Calendar(items))
    }
}
