use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use freightdesk_core::{ApiError, StopReason, SyncEntityType};

use crate::client::CrmApiClient;

/// Pagination settings for one entity loop, already resolved from the
/// configuration defaults and any per-request overrides.
#[derive(Clone, Copy, Debug)]
pub struct FetchSettings {
    pub page_size: u32,
    pub max_pages: u32,
    pub page_delay_ms: u64,
}

/// One fetched page with its absolute page number.
#[derive(Debug)]
pub struct Page {
    pub number: u32,
    pub records: Vec<Value>,
}

/// Pulls pages for one entity type until the collection is exhausted or the
/// per-run page ceiling is hit. The ceiling counts pages fetched by this
/// fetcher, so a resumed loop gets a full allowance of its own.
pub struct PageFetcher<'a, C> {
    client: &'a C,
    access_token: &'a str,
    entity: SyncEntityType,
    settings: FetchSettings,
    next_number: u32,
    pages_fetched: u32,
    stop: Option<StopReason>,
}

impl<'a, C: CrmApiClient> PageFetcher<'a, C> {
    pub fn new(
        client: &'a C,
        access_token: &'a str,
        entity: SyncEntityType,
        settings: FetchSettings,
        start_page: u32,
    ) -> Self {
        Self {
            client,
            access_token,
            entity,
            settings,
            next_number: start_page.max(1),
            pages_fetched: 0,
            stop: None,
        }
    }

    /// Fetches the next page, or `None` once the loop is over. Empty pages
    /// are swallowed; a short page is returned and ends the loop. The
    /// politeness delay runs before every request after the first, so the
    /// final page never pays for a delay nobody needs.
    pub async fn next_page(&mut self) -> Result<Option<Page>, ApiError> {
        if self.stop.is_some() {
            return Ok(None);
        }
        if self.pages_fetched >= self.settings.max_pages {
            self.stop = Some(StopReason::CeilingReached);
            debug!(entity = %self.entity, pages = self.pages_fetched, "page ceiling reached");
            return Ok(None);
        }

        if self.pages_fetched > 0 && self.settings.page_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.page_delay_ms)).await;
        }

        let number = self.next_number;
        let records = self
            .client
            .fetch_page(self.access_token, self.entity, number, self.settings.page_size)
            .await?;
        self.pages_fetched += 1;
        self.next_number += 1;

        if records.is_empty() {
            self.stop = Some(StopReason::Exhausted);
            return Ok(None);
        }
        if (records.len() as u32) < self.settings.page_size {
            self.stop = Some(StopReason::Exhausted);
        }
        Ok(Some(Page { number, records }))
    }

    /// Why the loop stopped; `None` while pages remain.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }
}
