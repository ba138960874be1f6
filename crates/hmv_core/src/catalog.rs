//! Catalog aggregation: pagination probing, bounded page fetching, merge/dedup,
//! filtering and completion-status reconciliation.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::model::{Category, PageResult, Platform, Record, Status, normalize_name};

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const FULL_CATALOG_SELECTOR: &str = "all";
pub const STATUS_VIEW_SELECTOR: &str = "hacked";

/// Source of catalog pages. `selector` is the server-side view (difficulty,
/// platform, status view, ...) or `None` for the default listing.
pub trait PageFetcher {
    fn fetch_page(&self, page: u32, selector: Option<&str>)
    -> impl Future<Output = Result<PageResult>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub concurrency_limit: usize,
    pub page_size: usize,
    pub reconcile_status: bool,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            reconcile_status: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogFilter {
    Difficulty(Category),
    Platform(Platform),
    Size,
    Completed,
    All,
    Other(String),
}

impl CatalogFilter {
    /// Blank input selects no filter.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if let Some(category) = Category::parse(&lowered) {
            return Some(Self::Difficulty(category));
        }
        if let Some(platform) = Platform::parse(&lowered) {
            return Some(Self::Platform(platform));
        }
        Some(match lowered.as_str() {
            "size" => Self::Size,
            STATUS_VIEW_SELECTOR => Self::Completed,
            FULL_CATALOG_SELECTOR => Self::All,
            _ => Self::Other(trimmed.to_string()),
        })
    }

    /// Value sent to the listing endpoint when this filter selects the view.
    pub fn selector(&self) -> String {
        match self {
            Self::Difficulty(category) => category.as_str().to_string(),
            Self::Platform(platform) => platform.as_str().to_string(),
            Self::Size => "size".to_string(),
            Self::Completed => STATUS_VIEW_SELECTOR.to_string(),
            Self::All => FULL_CATALOG_SELECTOR.to_string(),
            Self::Other(raw) => raw.clone(),
        }
    }

    fn needs_full_listing(&self) -> bool {
        matches!(
            self,
            Self::Difficulty(_) | Self::Platform(_) | Self::Size | Self::All
        )
    }
}

#[derive(Debug, Clone)]
pub struct AggregationRequest {
    pub filter: Option<CatalogFilter>,
    pub search: Option<String>,
    pub page: u32,
    pub fetch_all: bool,
}

impl Default for AggregationRequest {
    fn default() -> Self {
        Self {
            filter: None,
            search: None,
            page: 1,
            fetch_all: false,
        }
    }
}

impl AggregationRequest {
    fn search_text(&self) -> Option<&str> {
        self.search.as_deref().filter(|value| !value.is_empty())
    }

    pub fn is_full_catalog(&self) -> bool {
        self.fetch_all || self.filter == Some(CatalogFilter::All) || self.search_text().is_some()
    }

    /// Listing view fetched in full-catalog mode.
    fn full_catalog_selector(&self) -> String {
        if self.search_text().is_some() {
            return FULL_CATALOG_SELECTOR.to_string();
        }
        match &self.filter {
            Some(filter) if filter.needs_full_listing() => FULL_CATALOG_SELECTOR.to_string(),
            Some(filter) => filter.selector(),
            None => FULL_CATALOG_SELECTOR.to_string(),
        }
    }

    fn reconciles_status(&self) -> bool {
        self.filter != Some(CatalogFilter::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    SinglePage,
    FullCatalog,
}

#[derive(Debug, Clone)]
pub struct CatalogListing {
    pub records: Vec<Record>,
    pub label: String,
    pub mode: AggregationMode,
}

#[derive(Debug, Clone)]
pub enum CatalogOutcome {
    Found(CatalogListing),
    NoMatches,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageWindow {
    pub records: Vec<Record>,
    pub page: usize,
    pub total_pages: usize,
}

pub struct CatalogEngine<'a, F> {
    fetcher: &'a F,
    settings: CatalogSettings,
    permits: Semaphore,
}

impl<'a, F: PageFetcher> CatalogEngine<'a, F> {
    pub fn new(fetcher: &'a F, settings: CatalogSettings) -> Self {
        let permits = Semaphore::new(settings.concurrency_limit.max(1));
        Self {
            fetcher,
            settings,
            permits,
        }
    }

    pub async fn aggregate(&self, request: &AggregationRequest) -> Result<CatalogOutcome> {
        let mut listing = self.primary_listing(request).await?;
        if listing.records.is_empty() {
            info!("catalog aggregation found no matching records");
            return Ok(CatalogOutcome::NoMatches);
        }

        if self.settings.reconcile_status && request.reconciles_status() {
            let lookup = self.status_lookup().await?;
            let updated = overlay_status(&mut listing.records, &lookup);
            debug!(updated, lookup = lookup.len(), "reconciled completion status");
        }
        Ok(CatalogOutcome::Found(listing))
    }

    async fn primary_listing(&self, request: &AggregationRequest) -> Result<CatalogListing> {
        if request.is_full_catalog() {
            let selector = request.full_catalog_selector();
            let merged = self.collect(Some(&selector)).await?;
            let records = refine(merged, request);
            info!(
                selector = %selector,
                records = records.len(),
                "aggregated full catalog"
            );
            return Ok(CatalogListing {
                label: format!("Total Found: {}", records.len()),
                records,
                mode: AggregationMode::FullCatalog,
            });
        }

        let selector = request.filter.as_ref().map(CatalogFilter::selector);
        let page = request.page.max(1);
        let result = self.fetcher.fetch_page(page, selector.as_deref()).await?;
        debug!(page, records = result.records.len(), "fetched single catalog page");

        let page_size = self.settings.page_size.max(1);
        if request.filter.is_some() && result.records.len() > page_size {
            let window = paginate(&result.records, page as usize, page_size);
            return Ok(CatalogListing {
                label: format!("{}/{}", window.page, window.total_pages),
                records: window.records,
                mode: AggregationMode::SinglePage,
            });
        }
        Ok(CatalogListing {
            label: result.marker.to_string(),
            records: result.records,
            mode: AggregationMode::SinglePage,
        })
    }

    /// Probe, fetch the remaining pages and merge: the full record set of one view.
    pub async fn collect(&self, selector: Option<&str>) -> Result<Vec<Record>> {
        let (first_page, total_pages) = self.probe(selector).await?;
        let remaining = self.fetch_remaining(selector, total_pages).await?;
        Ok(merge_records(first_page, remaining))
    }

    pub async fn probe(&self, selector: Option<&str>) -> Result<(Vec<Record>, u32)> {
        let first = self.fetch_bounded(1, selector).await?;
        let total_pages = first.marker.total_pages();
        debug!(
            selector = selector.unwrap_or("<none>"),
            marker = %first.marker,
            total_pages,
            "probed pagination"
        );
        Ok((first.records, total_pages))
    }

    /// Fetch pages `2..=total_pages`. Every fetch runs to completion before the
    /// first failure, if any, is returned.
    pub async fn fetch_remaining(
        &self,
        selector: Option<&str>,
        total_pages: u32,
    ) -> Result<Vec<PageResult>> {
        if total_pages <= 1 {
            return Ok(Vec::new());
        }
        let tasks = (2..=total_pages).map(|page| self.fetch_bounded(page, selector));
        join_all(tasks).await.into_iter().collect()
    }

    pub async fn status_lookup(&self) -> Result<HashMap<String, Status>> {
        let records = self.collect(Some(STATUS_VIEW_SELECTOR)).await?;
        Ok(status_lookup(&records))
    }

    async fn fetch_bounded(&self, page: u32, selector: Option<&str>) -> Result<PageResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("catalog fetch permits were closed")?;
        debug!(page, selector = selector.unwrap_or("<none>"), "fetching page");
        self.fetcher.fetch_page(page, selector).await
    }
}

/// First page first, then the remaining batches in submission order; the first
/// record seen for each normalized name wins.
pub fn merge_records(first_page: Vec<Record>, remaining: Vec<PageResult>) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(first_page.len());
    let batches = std::iter::once(first_page).chain(remaining.into_iter().map(|page| page.records));
    for record in batches.flatten() {
        if seen.insert(record.normalized_name()) {
            merged.push(record);
        }
    }
    merged
}

pub fn refine(mut records: Vec<Record>, request: &AggregationRequest) -> Vec<Record> {
    match &request.filter {
        Some(CatalogFilter::Platform(platform)) => {
            records.retain(|record| record.platform == *platform);
        }
        Some(CatalogFilter::Difficulty(category)) => {
            records.retain(|record| record.category == *category);
        }
        Some(CatalogFilter::Size) => {
            records.sort_by(|left, right| left.size_magnitude().total_cmp(&right.size_magnitude()));
        }
        _ => {}
    }

    if let Some(search) = request.search_text() {
        let needle = search.to_lowercase();
        records.retain(|record| record.name.to_lowercase().contains(&needle));
    }
    records
}

pub fn status_lookup(records: &[Record]) -> HashMap<String, Status> {
    let mut lookup = HashMap::with_capacity(records.len());
    for record in records {
        lookup
            .entry(record.normalized_name())
            .or_insert(record.status);
    }
    lookup
}

/// Overwrite the status of every record present in `lookup`; returns how many matched.
pub fn overlay_status(records: &mut [Record], lookup: &HashMap<String, Status>) -> usize {
    let mut matched = 0;
    for record in records.iter_mut() {
        if let Some(status) = lookup.get(&normalize_name(&record.name)) {
            record.status = *status;
            matched += 1;
        }
    }
    matched
}

/// 1-based window of `page_size` records. Pages past the end are empty.
pub fn paginate(records: &[Record], page: usize, page_size: usize) -> PageWindow {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let total_pages = records.len().div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size).min(records.len());
    let end = start.saturating_add(page_size).min(records.len());
    PageWindow {
        records: records[start..end].to_vec(),
        page,
        total_pages,
    }
}
