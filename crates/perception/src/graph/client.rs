//! Microsoft Graph HTTP client
//!
//! Fetches mailbox messages received since a watermark.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use std::time::Duration;

use super::api::ListMessagesResponse;
use super::normalize_message;
use crate::error::FetchError;
use crate::models::PerceivedItem;
use crate::poller::Fetcher;

/// Graph client that lists `/me/messages` oldest-first
pub struct GraphFetcher {
    agent: ureq::Agent,
    base_url: String,
    page_size: usize,
    max_pages: usize,
}

impl GraphFetcher {
    /// Graph API base URL
    const BASE_URL: &'static str = "https://graph.microsoft.com/v1.0";

    const DEFAULT_PAGE_SIZE: usize = 50;
    const DEFAULT_MAX_PAGES: usize = 10;
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            agent,
            base_url: Self::BASE_URL.to_string(),
            page_size: Self::DEFAULT_PAGE_SIZE,
            max_pages: Self::DEFAULT_MAX_PAGES,
        }
    }

    /// Point at a different Graph deployment (national clouds, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Messages per page (1-1000)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    /// Stop following `@odata.nextLink` after this many pages
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// URL of the first page for messages received at or after `watermark`
    pub fn messages_url(&self, watermark: DateTime<Utc>) -> Result<url::Url, url::ParseError> {
        let filter = format!(
            "receivedDateTime ge {}",
            watermark.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let top = self.page_size.to_string();
        url::Url::parse_with_params(
            &format!("{}/me/messages", self.base_url),
            [
                ("$filter", filter.as_str()),
                ("$orderby", "receivedDateTime asc"),
                ("$select", "id,receivedDateTime,subject,bodyPreview,from"),
                ("$top", top.as_str()),
            ],
        )
    }

    /// GET one page
    fn get_page(&self, url: &str, access_token: &str) -> Result<ListMessagesResponse, FetchError> {
        let result = self
            .agent
            .get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .header("Accept", "application/json")
            .call();

        let mut response = match result {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(401)) => return Err(FetchError::Unauthorized),
            Err(e) => {
                return Err(FetchError::Request(
                    anyhow::Error::new(e).context("Failed to send list messages request"),
                ));
            }
        };

        response
            .body_mut()
            .read_json::<ListMessagesResponse>()
            .context("Failed to parse list messages response")
            .map_err(FetchError::Request)
    }
}

impl Default for GraphFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for GraphFetcher {
    fn fetch_since(
        &self,
        access_token: &str,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<PerceivedItem>, FetchError> {
        let first = self
            .messages_url(watermark)
            .context("Invalid Graph base URL")
            .map_err(FetchError::Request)?;

        let mut items = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages == self.max_pages {
                warn!(
                    "Stopped after {} pages of messages since {}; the rest are fetched next tick",
                    pages, watermark
                );
                break;
            }
            let page = self.get_page(&url, access_token)?;
            pages += 1;

            for message in page.value {
                let id = message.id.clone();
                match normalize_message(message) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!("Skipping message {}: {:#}", id, e),
                }
            }
            next = page.next_link;
        }

        debug!("Fetched {} messages in {} pages", items.len(), pages);
        Ok(items)
    }
}
