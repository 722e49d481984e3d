mod common;

use std::path::Path;

use calendar_digest::config::{BoardSource, CaldavSource, GoogleSource, Secret, SourceDescriptor};
use calendar_digest::sources::{AdapterFactory, DefaultAdapterFactory, SourceEndpoints};
use calendar_digest::types::{
    FetchWindow, LlmBackend, SourceAdapter, SourceError, SourceItems, SummarizationError,
};
use calendar_digest::GeminiBackend;
use chrono::{Duration, TimeZone, Utc};
use common::init_tracing;
use serde_json::json;
use url::Url;
use wiremock::matchers::{basic_auth, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints(server: &MockServer) -> SourceEndpoints {
    SourceEndpoints {
        google_api_base: Url::parse(&format!("{}/calendar/v3/", server.uri())).unwrap(),
        google_token_uri: Url::parse(&format!("{}/token", server.uri())).unwrap(),
        board_api_base: Url::parse(&format!("{}/1/", server.uri())).unwrap(),
    }
}

fn build(server: &MockServer, descriptor: &SourceDescriptor) -> Box<dyn SourceAdapter> {
    DefaultAdapterFactory::new(endpoints(server))
        .unwrap()
        .build(descriptor)
        .unwrap()
}

fn google_source(dir: &Path, calendar_ids: &[&str]) -> SourceDescriptor {
    SourceDescriptor::Google(GoogleSource {
        name: "Work".to_string(),
        credentials_path: dir.join("credentials.json"),
        token_path: dir.join("token.json"),
        calendar_ids: calendar_ids.iter().map(|id| id.to_string()).collect(),
    })
}

fn write_token(dir: &Path, token: serde_json::Value) {
    std::fs::write(dir.join("token.json"), token.to_string()).unwrap();
}

fn calendar(items: SourceItems) -> Vec<calendar_digest::types::CalendarItem> {
    match items {
        SourceItems::Calendar(items) => items,
        other => panic!("expected calendar items, got {:?}", other),
    }
}

#[tokio::test]
async fn test_google_fetch_pages_all_day_and_failing_calendar() {
    init_tracing();
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(
        dir.path(),
        json!({"token": "cached", "expiry": (Utc::now() + Duration::hours(1)).to_rfc3339()}),
    );

    Mock::given(method("GET"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .and(query_param("singleEvents", "true"))
        .and(query_param("orderBy", "startTime"))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"summary": "Standup", "location": "Zoom",
                 "start": {"dateTime": "2030-01-07T09:00:00+01:00"},
                 "end": {"dateTime": "2030-01-07T09:30:00+01:00"}},
                {"summary": "Offsite",
                 "start": {"date": "2030-01-08"}, "end": {"date": "2030-01-10"}},
                {"summary": "Cancelled", "status": "cancelled",
                 "start": {"dateTime": "2030-01-07T10:00:00Z"},
                 "end": {"dateTime": "2030-01-07T11:00:00Z"}}
            ],
            "nextPageToken": "p2"
        })))
        .with_priority(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendar/v3/calendars/primary/events"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"description": "Bring slides",
                       "start": {"dateTime": "2030-01-09T15:00:00Z"},
                       "end": {"dateTime": "2030-01-09T16:00:00Z"}}]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(10)
        .mount(&server)
        .await;

    let mut adapter = build(&server, &google_source(dir.path(), &["primary", "team"]));
    assert!(adapter.authenticate().await.unwrap());
    let items = calendar(adapter.fetch(&FetchWindow::from_now(7).unwrap()).await.unwrap());

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].title, "Standup");
    assert_eq!(items[0].start.to_rfc3339(), "2030-01-07T08:00:00+00:00");
    assert_eq!(items[0].location.as_deref(), Some("Zoom"));
    // All-day: exclusive end date moved back one day.
    assert_eq!(items[1].start.to_rfc3339(), "2030-01-08T00:00:00+00:00");
    assert_eq!(items[1].end.to_rfc3339(), "2030-01-09T00:00:00+00:00");
    assert_eq!(items[2].title, "No Summary");
    assert_eq!(items[2].note.as_deref(), Some("Bring slides"));
}

#[tokio::test]
async fn test_google_every_calendar_failing_fails_the_source() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(dir.path(), json!({"token": "cached"}));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut adapter = build(&server, &google_source(dir.path(), &["primary", "team"]));
    assert!(adapter.authenticate().await.unwrap());
    let result = adapter.fetch(&FetchWindow::from_now(7).unwrap()).await;
    assert!(matches!(result, Err(SourceError::Fetch(_))));
}

#[tokio::test]
async fn test_google_refreshes_expired_token() {
    init_tracing();
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(
        dir.path(),
        json!({
            "token": "stale",
            "refresh_token": "refresh-me",
            "expiry": "2020-01-01T00:00:00.000000Z",
            "scopes": ["https://www.googleapis.com/auth/calendar.readonly"]
        }),
    );
    std::fs::write(
        dir.path().join("credentials.json"),
        json!({"installed": {"client_id": "cid", "client_secret": "csecret"}}).to_string(),
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-me"))
        .and(body_string_contains("client_id=cid"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "expires_in": 3600})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut adapter = build(&server, &google_source(dir.path(), &["primary"]));
    assert!(adapter.authenticate().await.unwrap());

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("token.json")).unwrap())
            .unwrap();
    assert_eq!(saved["token"], "fresh");
    assert_eq!(saved["refresh_token"], "refresh-me");
    assert_eq!(saved["client_id"], "cid");
    assert!(saved["scopes"].is_array());
}

#[tokio::test]
async fn test_google_out_of_range_token_lifetime_fails_the_source() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    write_token(
        dir.path(),
        json!({"token": "stale", "refresh_token": "refresh-me", "client_id": "cid",
               "client_secret": "cs", "expiry": "2020-01-01T00:00:00Z"}),
    );
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fresh", "expires_in": i64::MAX})),
        )
        .mount(&server)
        .await;

    let mut adapter = build(&server, &google_source(dir.path(), &["primary"]));
    match adapter.authenticate().await {
        Err(SourceError::Auth(reason)) => assert!(reason.contains("out of range")),
        other => panic!("expected an auth error, got {:?}", other),
    }

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("token.json")).unwrap())
            .unwrap();
    assert_eq!(saved["token"], "stale");
}

#[tokio::test]
async fn test_google_auth_failures() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut adapter = build(&server, &google_source(dir.path(), &["primary"]));
    assert!(matches!(adapter.authenticate().await, Err(SourceError::Auth(_))));

    write_token(
        dir.path(),
        json!({"token": "stale", "refresh_token": "revoked", "client_id": "cid",
               "client_secret": "cs", "expiry": "2020-01-01T00:00:00Z"}),
    );
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;
    assert!(!adapter.authenticate().await.unwrap());

    write_token(dir.path(), json!({"token": "stale", "expiry": "2020-01-01T00:00:00Z"}));
    assert!(matches!(adapter.authenticate().await, Err(SourceError::Auth(_))));
}

fn caldav_source(server: &MockServer, secret: &str) -> SourceDescriptor {
    SourceDescriptor::Caldav(CaldavSource {
        name: "Home".to_string(),
        username: "ada".to_string(),
        secret: Secret::new(secret),
        server_url: Some(Url::parse(&format!("{}/dav", server.uri())).unwrap()),
        target_calendar_name: Some("work".to_string()),
    })
}

#[tokio::test]
async fn test_caldav_authenticate_and_fetch() {
    init_tracing();
    let server = MockServer::start().await;
    let tomorrow = Utc::now() + Duration::days(1);
    let start = tomorrow.format("%Y%m%dT090000Z");
    let end = tomorrow.format("%Y%m%dT100000Z");
    let multistatus = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/dav/work/1.ics</d:href>
    <d:propstat><d:prop><c:calendar-data>BEGIN:VCALENDAR&#13;
BEGIN:VEVENT&#13;
SUMMARY:Dinner &amp; drinks&#13;
DTSTART:{start}&#13;
DTEND:{end}&#13;
DESCRIPTION:Table for &lt;4&gt;&#13;
END:VEVENT&#13;
END:VCALENDAR</c:calendar-data></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/work/2.ics</d:href>
    <d:propstat><d:prop><c:calendar-data>BEGIN:VCALENDAR
BEGIN:VEVENT
SUMMARY:Ancient history
DTSTART:20000101T090000Z
DTEND:20000101T100000Z
END:VEVENT
END:VCALENDAR</c:calendar-data></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#
    );

    Mock::given(method("PROPFIND"))
        .and(path("/dav/work/"))
        .and(header("Depth", "0"))
        .and(basic_auth("ada", "app-pw"))
        .respond_with(ResponseTemplate::new(207))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(5)
        .mount(&server)
        .await;
    Mock::given(method("REPORT"))
        .and(path("/dav/work/"))
        .and(header("Depth", "1"))
        .and(body_string_contains("time-range"))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus))
        .mount(&server)
        .await;

    let mut rejected = build(&server, &caldav_source(&server, "wrong"));
    assert!(!rejected.authenticate().await.unwrap());

    let mut adapter = build(&server, &caldav_source(&server, "app-pw"));
    assert!(adapter.authenticate().await.unwrap());
    let items = calendar(adapter.fetch(&FetchWindow::from_now(7).unwrap()).await.unwrap());

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Dinner & drinks");
    assert_eq!(items[0].note.as_deref(), Some("Table for <4>"));
    assert_eq!(items[0].end - items[0].start, Duration::hours(1));
}

#[tokio::test]
async fn test_caldav_asks_server_to_expand_recurring_events() {
    let server = MockServer::start().await;
    let window_start = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap();
    let window = FetchWindow::starting_at(window_start, 30).unwrap();
    let multistatus = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/dav/work/standup.ics</d:href>
    <d:propstat><d:prop><c:calendar-data>BEGIN:VCALENDAR
BEGIN:VEVENT
SUMMARY:Weekly standup
RECURRENCE-ID:20261019T090000Z
DTSTART:20261019T090000Z
DTEND:20261019T091500Z
END:VEVENT
BEGIN:VEVENT
SUMMARY:Weekly standup
RECURRENCE-ID:20261026T090000Z
DTSTART:20261026T090000Z
DTEND:20261026T091500Z
END:VEVENT
END:VCALENDAR</c:calendar-data></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

    Mock::given(method("REPORT"))
        .and(path("/dav/work/"))
        .and(body_string_contains(
            r#"<c:calendar-data><c:expand start="20261016T000000Z" end="20261115T000000Z"/></c:calendar-data>"#,
        ))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = build(&server, &caldav_source(&server, "app-pw"));
    let items = calendar(adapter.fetch(&window).await.unwrap());

    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.title == "Weekly standup"));
    assert!(items.iter().all(|item| item.intersects(&window)));
}

#[tokio::test]
async fn test_caldav_server_error_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut adapter = build(&server, &caldav_source(&server, "app-pw"));
    assert!(matches!(adapter.authenticate().await, Err(SourceError::Auth(_))));
}

fn board_source() -> SourceDescriptor {
    SourceDescriptor::Board(BoardSource {
        name: "Tasks".to_string(),
        api_key: Secret::new("k"),
        api_token: Secret::new("t"),
        board_id: "b1".to_string(),
    })
}

#[tokio::test]
async fn test_board_authenticate_and_fetch_open_cards() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/members/me"))
        .and(query_param("key", "k"))
        .and(query_param("token", "t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "me"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/boards/b1/cards/open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "Fix login", "desc": "", "url": "https://trello.com/c/abc"},
            {"name": "Broken link", "desc": "x", "url": "not a url"},
            {"name": "Write docs", "desc": "Getting started", "url": "https://trello.com/c/def"}
        ])))
        .mount(&server)
        .await;

    let mut adapter = build(&server, &board_source());
    assert!(adapter.authenticate().await.unwrap());
    // Cards have no dates; a window in the past still returns them.
    let past = FetchWindow::starting_at(Utc::now() - Duration::days(400), 1).unwrap();
    let items = match adapter.fetch(&past).await.unwrap() {
        SourceItems::Board(items) => items,
        other => panic!("expected board items, got {:?}", other),
    };

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "Fix login");
    assert!(items[0].note.is_none());
    assert_eq!(items[1].note.as_deref(), Some("Getting started"));
    assert_eq!(items[1].link.as_str(), "https://trello.com/c/def");
}

#[tokio::test]
async fn test_board_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/members/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut adapter = build(&server, &board_source());
    assert!(!adapter.authenticate().await.unwrap());
}

#[tokio::test]
async fn test_gemini_backend() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro-latest:generateContent"))
        .and(query_param("key", "gk"))
        .and(body_string_contains("Hello Ada"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "## Week\n"}, {"text": "Busy."}]}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/empty-model:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/broken-model:generateContent"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let backend = GeminiBackend::with_base_url(Secret::new("gk"), base.clone()).unwrap();
    assert_eq!(backend.generate("Hello Ada").await.unwrap(), "## Week\nBusy.");

    let empty = GeminiBackend::with_base_url(Secret::new("gk"), base.clone())
        .unwrap()
        .with_model("empty-model");
    assert!(matches!(
        empty.generate("Hello").await,
        Err(SummarizationError::EmptyResponse)
    ));

    let broken = GeminiBackend::with_base_url(Secret::new("gk"), base)
        .unwrap()
        .with_model("broken-model");
    assert!(matches!(
        broken.generate("Hello").await,
        Err(SummarizationError::Backend(_))
    ));
}
