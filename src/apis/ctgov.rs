use crate::config::CtGovConfig;
use crate::error::{EtlError, Result};
use crate::types::{RawStudy, StudyPage};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Anything that can serve one page of studies for a page token.
#[async_trait]
pub trait StudyPageSource: Send + Sync {
    /// Fetch the page identified by `page_token`, or the first page when `None`.
    async fn fetch_page(&self, page_token: Option<&str>) -> Result<StudyPage>;
}

/// ClinicalTrials.gov v2 `/studies` client.
pub struct CtGovClient {
    client: reqwest::Client,
    api_url: String,
    filter_advanced: String,
    page_size: u32,
}

impl CtGovClient {
    pub fn new(config: &CtGovConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            filter_advanced: config.filter_advanced.joined(),
            page_size: config.page_size,
        })
    }

    /// Query parameters for one request. Every request carries the full filter.
    pub fn query_params(&self, page_token: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("pageSize", self.page_size.to_string()),
            ("filter.advanced", self.filter_advanced.clone()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        params
    }
}

#[async_trait]
impl StudyPageSource for CtGovClient {
    #[instrument(skip(self))]
    async fn fetch_page(&self, page_token: Option<&str>) -> Result<StudyPage> {
        let params = self.query_params(page_token);
        if let Ok(url) = reqwest::Url::parse_with_params(&self.api_url, &params) {
            debug!(%url, "Requesting registry page");
        }

        let resp = self.client.get(&self.api_url).query(&params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let snippet: String = body.chars().take(500).collect();
            return Err(EtlError::Api {
                status: status.as_u16(),
                message: snippet,
            });
        }

        let page: StudyPage = serde_json::from_str(&body)?;
        Ok(page)
    }
}

/// Lazy cursor over the registry's pages, consumed strictly in token order.
pub struct StudyPager<'a> {
    source: &'a dyn StudyPageSource,
    next_token: Option<String>,
    seen_tokens: HashSet<String>,
    pages_fetched: usize,
    max_pages: Option<usize>,
    done: bool,
}

impl<'a> StudyPager<'a> {
    pub fn new(source: &'a dyn StudyPageSource, max_pages: Option<usize>) -> Self {
        Self {
            source,
            next_token: None,
            seen_tokens: HashSet::new(),
            pages_fetched: 0,
            max_pages,
            done: false,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page of studies.
    ///
    /// Returns `None` once the registry stops returning a page token. An error
    /// ends the sequence; pages returned before it are unaffected.
    pub async fn next_page(&mut self) -> Option<Result<Vec<RawStudy>>> {
        if self.done {
            return None;
        }
        if let Some(limit) = self.max_pages {
            if self.pages_fetched >= limit {
                warn!("Reached configured page limit ({} pages)", limit);
                self.done = true;
                return None;
            }
        }

        let page_index = self.pages_fetched + 1;
        let token = self.next_token.take();
        info!(page = page_index, token = token.as_deref().unwrap_or(""), "Fetching page");

        let page = match self.source.fetch_page(token.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                warn!(
                    page = page_index,
                    token = token.as_deref().unwrap_or(""),
                    error = %e,
                    "Page fetch failed"
                );
                return Some(Err(e.at_page(page_index, token.as_deref())));
            }
        };
        self.pages_fetched = page_index;

        if page_index == 1 {
            if let Some(total) = page.total_count {
                info!("Total studies matching filters: {}", total);
            }
        }
        info!(page = page_index, studies = page.studies.len(), "Retrieved page");

        match page.next_token() {
            Some(next) if self.seen_tokens.contains(next) => {
                warn!(page = page_index, token = next, "Registry returned a page token already followed; stopping");
                self.done = true;
            }
            Some(next) => {
                self.seen_tokens.insert(next.to_string());
                self.next_token = Some(next.to_string());
            }
            None => {
                debug!("No more pages available");
                self.done = true;
            }
        }

        Some(Ok(page.studies))
    }
}
