use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::endpoint;
use crate::config::BoardSource;
use crate::types::{BoardItem, FetchWindow, SourceAdapter, SourceError, SourceItems};

/// Open cards of one task board. Cards carry no time interval, so the fetch
/// window does not narrow them.
pub struct BoardAdapter {
    client: Client,
    source: BoardSource,
    api_base: Url,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    #[serde(default)]
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl BoardAdapter {
    pub fn new(client: Client, source: BoardSource, api_base: Url) -> Self {
        Self {
            client,
            source,
            api_base,
        }
    }

    fn get(&self, segments: &[&str]) -> Result<reqwest::RequestBuilder, String> {
        let url = endpoint(&self.api_base, segments)?;
        Ok(self.client.get(url).query(&[
            ("key", self.source.api_key.expose()),
            ("token", self.source.api_token.expose()),
        ]))
    }
}

#[async_trait]
impl SourceAdapter for BoardAdapter {
    fn source_name(&self) -> &str {
        &self.source.name
    }

    async fn authenticate(&mut self) -> Result<bool, SourceError> {
        let response = self
            .get(&["members", "me"])
            .map_err(SourceError::Auth)?
            .send()
            .await
            .map_err(|e| SourceError::Auth(format!("request failed: {}", e)))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            other => Err(SourceError::Auth(format!("board API returned {}", other))),
        }
    }

    async fn fetch(&self, _window: &FetchWindow) -> Result<SourceItems, SourceError> {
        let response = self
            .get(&["boards", self.source.board_id.as_str(), "cards", "open"])
            .map_err(SourceError::Fetch)?
            .query(&[("fields", "name,desc,url")])
            .send()
            .await
            .map_err(|e| SourceError::Fetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Fetch(format!(
                "board '{}' returned {}",
                self.source.board_id, status
            )));
        }

        let cards: Vec<RawCard> = response
            .json()
            .await
            .map_err(|e| SourceError::Fetch(format!("invalid cards response: {}", e)))?;

        let mut items = Vec::with_capacity(cards.len());
        for card in cards {
            let link = match card.url.as_deref().map(Url::parse) {
                Some(Ok(link)) => link,
                _ => {
                    warn!(source = %self.source.name, card = %card.name, "Skipping card without a valid link");
                    continue;
                }
            };
            let mut item = BoardItem::new(card.name, link);
            if let Some(desc) = card.desc.filter(|d| !d.trim().is_empty()) {
                item = item.with_note(desc);
            }
            items.push(item);
        }

        debug!(source = %self.source.name, "Fetched {} open cards", items.len());
        Ok(SourceItems::Board(items))
    }
}
