use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use tally_engine::{ChannelDirectory, FetchError, HistoryFetcher};
use tally_types::models::{ChannelId, Message};

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    id: ChannelId,
    #[serde(default)]
    can_read_history: bool,
}

/// Message source reached over HTTP.
///
/// `GET {base}/channels` lists channels along with whether their history
/// is readable; the flags are kept until the next listing.
/// `GET {base}/channels/{id}/messages?before=..&limit=..` returns a page,
/// newest first. `before` carries every fractional digit the timestamp has.
pub struct HttpSource {
    client: Client,
    base_url: String,
    token: Option<String>,
    readable: RwLock<HashMap<ChannelId, bool>>,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            readable: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let req = self.client.get(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.header("Authorization", format!("Bearer {}", token)),
            None => req,
        }
    }
}

/// Map a non-success status to the error the crawler acts on.
fn classify(status: StatusCode, channel_id: Option<ChannelId>) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => match channel_id {
            Some(channel_id) => FetchError::Forbidden(channel_id),
            // A listing we may not read is an operator problem, not a channel's
            None => FetchError::Transient(format!("channel listing refused ({})", status)),
        },
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            FetchError::Transient(format!("source returned {}", status))
        }
        _ => FetchError::Decode(format!("unexpected status {}", status)),
    }
}

fn transport(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::Decode(err.to_string())
    } else {
        FetchError::Transient(err.to_string())
    }
}

#[async_trait]
impl HistoryFetcher for HttpSource {
    async fn fetch_page(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, FetchError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        }

        let resp = self
            .get(&format!("/channels/{}/messages", channel_id))
            .query(&query)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(classify(resp.status(), Some(channel_id)));
        }

        let page: Vec<Message> = resp.json().await.map_err(transport)?;
        if let Some(stray) = page.iter().find(|m| m.channel_id != channel_id) {
            return Err(FetchError::Decode(format!(
                "message {} belongs to channel {}",
                stray.id, stray.channel_id
            )));
        }
        debug!(%channel_id, fetched = page.len(), "Fetched history page");
        Ok(page)
    }
}

#[async_trait]
impl ChannelDirectory for HttpSource {
    async fn list_channels(&self) -> Result<Vec<ChannelId>, FetchError> {
        let resp = self.get("/channels").send().await.map_err(transport)?;
        if !resp.status().is_success() {
            return Err(classify(resp.status(), None));
        }

        let entries: Vec<ChannelEntry> = resp.json().await.map_err(transport)?;
        let ids = entries.iter().map(|e| e.id).collect();
        *self.readable.write().await = entries
            .into_iter()
            .map(|e| (e.id, e.can_read_history))
            .collect();
        Ok(ids)
    }

    async fn can_read_history(&self, channel_id: ChannelId) -> bool {
        self.readable
            .read()
            .await
            .get(&channel_id)
            .copied()
            .unwrap_or(false)
    }
}
