//! Bounded listing traversal and detail dispatch

use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::crawler::content_extraction::{ListingPage, RecordExtractor};
use crate::crawler::error::{CrawlError, ExtractionError};
use crate::crawler::{AssetPolicy, CrawlerConfig, Fetcher, Record};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};

/// Why a seed's traversal stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No further "previous page" link
    Exhausted,

    /// `max_pages` listing pages were visited
    BudgetReached,

    /// Shutdown was requested before the lineage finished
    Cancelled,
}

/// Traversal state for one seed lineage.
///
/// Owned by the traversal task only; discarded when the lineage ends.
#[derive(Debug, Clone)]
pub struct CrawlCursor {
    pages_visited: u32,
    max_pages: u32,
    current_listing_url: Url,
}

impl CrawlCursor {
    pub fn new(seed: Url, max_pages: u32) -> Self {
        Self {
            pages_visited: 0,
            max_pages,
            current_listing_url: seed,
        }
    }

    pub fn pages_visited(&self) -> u32 {
        self.pages_visited
    }

    pub fn current_listing_url(&self) -> &Url {
        &self.current_listing_url
    }

    pub fn budget_exhausted(&self) -> bool {
        self.pages_visited >= self.max_pages
    }

    /// Count the current listing page as visited and move to `previous_page`.
    ///
    /// Returns the termination reason when traversal must stop; `None` means
    /// the cursor now points at the next listing page.
    pub fn advance(&mut self, previous_page: Option<Url>) -> Option<Termination> {
        self.pages_visited += 1;
        if self.budget_exhausted() {
            return Some(Termination::BudgetReached);
        }
        match previous_page {
            Some(url) => {
                self.current_listing_url = url;
                None
            }
            None => Some(Termination::Exhausted),
        }
    }
}

/// Outcome of one seed's traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageReport {
    pub seed: Url,
    pub pages_visited: u32,
    pub termination: Termination,
}

/// Item produced by [`CrawlController::events`]
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// A record extracted from a detail page
    Record(Record),

    /// A seed lineage stopped
    LineageFinished(LineageReport),
}

/// Drives the listing traversal and detail page extraction
pub struct CrawlController {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<RecordExtractor>,
    config: CrawlerConfig,
    shutdown: SharedShutdown,
}

impl CrawlController {
    /// Create a controller fetching pages through `fetcher`
    pub fn new(fetcher: Arc<dyn Fetcher>, config: CrawlerConfig) -> Result<Self, CrawlError> {
        let extractor = Arc::new(RecordExtractor::new(&config)?);
        Ok(Self {
            fetcher,
            extractor,
            config,
            shutdown: ShutdownCoordinator::shared(),
        })
    }

    /// Stop dispatching new work once `shutdown` is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Crawl every seed and yield the extracted records.
    ///
    /// Records arrive in completion order, not listing order.
    pub fn run(&self, seeds: Vec<Url>) -> impl Stream<Item = Record> + Send + 'static {
        self.events(seeds).filter_map(|event| async move {
            match event {
                CrawlEvent::Record(record) => Some(record),
                CrawlEvent::LineageFinished(_) => None,
            }
        })
    }

    /// Crawl every seed, yielding records and one report per seed.
    ///
    /// Each seed gets a fresh [`CrawlCursor`]. Detail pages are fetched on
    /// spawned tasks, at most `detail_concurrency` at a time; dispatch waits
    /// for a free slot. A detail URL is dispatched at most once per run.
    pub fn events(&self, seeds: Vec<Url>) -> impl Stream<Item = CrawlEvent> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        let extractor = Arc::clone(&self.extractor);
        let shutdown = Arc::clone(&self.shutdown);
        let max_pages = self.config.max_pages;
        let policy = self.config.asset_policy;
        let permits = Arc::new(Semaphore::new(self.config.detail_concurrency.max(1)));

        stream! {
            let mut in_flight: JoinSet<Option<Record>> = JoinSet::new();
            let mut dispatched: HashSet<Url> = HashSet::new();

            for seed in seeds {
                let mut cursor = CrawlCursor::new(seed.clone(), max_pages);
                let mut visited: HashSet<Url> = HashSet::new();

                let termination = loop {
                    if shutdown.is_shutdown_requested() {
                        break Termination::Cancelled;
                    }
                    if cursor.budget_exhausted() {
                        break Termination::BudgetReached;
                    }

                    let listing_url = cursor.current_listing_url().clone();
                    visited.insert(listing_url.clone());
                    let listing = match fetch_listing(fetcher.as_ref(), &extractor, &listing_url).await {
                        Ok(listing) => listing,
                        Err(e) => {
                            warn!(url = %listing_url, "Listing page failed, ending lineage: {}", e);
                            break Termination::Exhausted;
                        }
                    };
                    info!(
                        url = %listing_url,
                        details = listing.detail_urls.len(),
                        "Visited listing page"
                    );

                    for detail_url in listing.detail_urls {
                        if shutdown.is_shutdown_requested() {
                            break;
                        }
                        if !dispatched.insert(detail_url.clone()) {
                            debug!(url = %detail_url, "Detail page already dispatched");
                            continue;
                        }

                        while let Some(done) = in_flight.try_join_next() {
                            if let Some(record) = finished(done) {
                                yield CrawlEvent::Record(record);
                            }
                        }

                        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                            break;
                        };
                        let fetcher = Arc::clone(&fetcher);
                        let extractor = Arc::clone(&extractor);
                        in_flight.spawn(async move {
                            let _permit = permit;
                            fetch_record(fetcher.as_ref(), &extractor, detail_url, policy).await
                        });
                    }

                    let previous_page = listing
                        .previous_page
                        .filter(|url| !visited.contains(url));
                    if let Some(termination) = cursor.advance(previous_page) {
                        break termination;
                    }
                };

                info!(
                    seed = %seed,
                    pages_visited = cursor.pages_visited(),
                    ?termination,
                    "Lineage finished"
                );
                yield CrawlEvent::LineageFinished(LineageReport {
                    seed,
                    pages_visited: cursor.pages_visited(),
                    termination,
                });
            }

            while let Some(done) = in_flight.join_next().await {
                if let Some(record) = finished(done) {
                    yield CrawlEvent::Record(record);
                }
            }
        }
    }
}

fn finished(done: Result<Option<Record>, JoinError>) -> Option<Record> {
    match done {
        Ok(record) => record,
        Err(e) => {
            error!("Detail task failed: {}", e);
            None
        }
    }
}

async fn fetch_listing(
    fetcher: &dyn Fetcher,
    extractor: &RecordExtractor,
    url: &Url,
) -> Result<ListingPage, CrawlError> {
    let body = fetcher.fetch(url.as_str()).await?;
    let html = String::from_utf8_lossy(&body);
    Ok(extractor.extract_listing(url, &html))
}

#[instrument(skip(fetcher, extractor), fields(url = %url))]
async fn fetch_record(
    fetcher: &dyn Fetcher,
    extractor: &RecordExtractor,
    url: Url,
    policy: AssetPolicy,
) -> Option<Record> {
    let body = match fetcher.fetch(url.as_str()).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Detail page fetch failed: {}", e);
            return None;
        }
    };
    let Ok(html) = String::from_utf8(body) else {
        warn!("Skipping detail page: {}", ExtractionError::Encoding);
        return None;
    };

    match extractor.extract(&url, &html) {
        Ok(record) if policy == AssetPolicy::RequireAssets && !record.has_assets() => {
            debug!("Dropping record without qualifying assets");
            None
        }
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping detail page: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::mock_fetcher::MockFetcher;

    const BOARD: &str = "https://www.ptt.cc/bbs/Test";

    fn listing_url(page: usize) -> String {
        format!("{}/index{}.html", BOARD, page)
    }

    fn detail_url(page: usize, post: usize) -> String {
        format!("{}/M.{}.{}.html", BOARD, page, post)
    }

    fn listing_html(page: usize, posts: usize) -> String {
        let previous = if page > 1 {
            format!(r#"<a class="btn wide" href="/bbs/Test/index{}.html">‹ 上頁</a>"#, page - 1)
        } else {
            r#"<a class="btn wide disabled">‹ 上頁</a>"#.to_string()
        };
        let entries: String = (0..posts)
            .map(|post| {
                format!(
                    r#"<div class="r-ent"><div class="title"><a href="/bbs/Test/M.{}.{}.html">post</a></div></div>"#,
                    page, post
                )
            })
            .collect();
        format!(
            r#"<html><body><div id="action-bar-container">{}</div>{}</body></html>"#,
            previous, entries
        )
    }

    fn detail_html(title: &str, with_asset: bool) -> String {
        let asset = if with_asset {
            r#"<a href="https://i.imgur.com/x.jpg">img</a>"#
        } else {
            ""
        };
        format!(
            r#"<html><head><meta property="og:title" content="{}"></head><body><div id="main-content">
<div class="article-metaline"><span class="article-meta-tag">作者</span><span class="article-meta-value">poster (P)</span></div>
<div class="article-metaline"><span class="article-meta-tag">時間</span><span class="article-meta-value">Sun Oct 18 09:58:01 2026</span></div>
text {}
<div class="push"><span class="push-tag">推 </span><span class="push-userid">fan</span><span class="push-content">: +1</span></div>
</div></body></html>"#,
            title, asset
        )
    }

    /// Board whose newest page is `index{pages}` and oldest `index1`
    fn board(pages: usize, posts: usize) -> MockFetcher {
        let fetcher = MockFetcher::new();
        for page in 1..=pages {
            fetcher.insert(listing_url(page), listing_html(page, posts));
            for post in 0..posts {
                fetcher.insert(
                    detail_url(page, post),
                    detail_html(&format!("{}-{}", page, post), true),
                );
            }
        }
        fetcher
    }

    fn controller(fetcher: &MockFetcher, config: CrawlerConfig) -> CrawlController {
        CrawlController::new(Arc::new(fetcher.clone()), config).unwrap()
    }

    fn listing_requests(fetcher: &MockFetcher) -> usize {
        fetcher
            .requests()
            .iter()
            .filter(|url| url.contains("/index"))
            .count()
    }

    async fn collect(controller: &CrawlController, seed: String) -> (Vec<Record>, Vec<LineageReport>) {
        let events: Vec<CrawlEvent> = controller
            .events(vec![Url::parse(&seed).unwrap()])
            .collect()
            .await;
        let mut records = Vec::new();
        let mut reports = Vec::new();
        for event in events {
            match event {
                CrawlEvent::Record(record) => records.push(record),
                CrawlEvent::LineageFinished(report) => reports.push(report),
            }
        }
        (records, reports)
    }

    #[test]
    fn test_cursor_advance() {
        let seed = Url::parse(&listing_url(3)).unwrap();
        let mut cursor = CrawlCursor::new(seed, 2);
        let next = Url::parse(&listing_url(2)).unwrap();

        assert_eq!(cursor.advance(Some(next.clone())), None);
        assert_eq!(cursor.current_listing_url(), &next);
        assert_eq!(
            cursor.advance(Some(Url::parse(&listing_url(1)).unwrap())),
            Some(Termination::BudgetReached)
        );
        assert_eq!(cursor.pages_visited(), 2);
    }

    #[tokio::test]
    async fn test_budget_limits_listing_pages() {
        let fetcher = board(100, 1);
        let controller = controller(&fetcher, CrawlerConfig::builder().max_pages(3).build());

        let (records, reports) = collect(&controller, listing_url(100)).await;

        assert_eq!(listing_requests(&fetcher), 3);
        assert_eq!(records.len(), 3);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].pages_visited, 3);
        assert_eq!(reports[0].termination, Termination::BudgetReached);
    }

    #[tokio::test]
    async fn test_structural_exhaustion_before_budget() {
        let fetcher = board(2, 1);
        let controller = controller(&fetcher, CrawlerConfig::builder().max_pages(10).build());

        let (_, reports) = collect(&controller, listing_url(2)).await;

        assert_eq!(listing_requests(&fetcher), 2);
        assert_eq!(reports[0].pages_visited, 2);
        assert_eq!(reports[0].termination, Termination::Exhausted);
    }

    #[tokio::test]
    async fn test_previous_page_cycle_ends_lineage() {
        let fetcher = board(2, 1);
        // page 1 points back at page 2
        let html = listing_html(1, 1).replace(
            r#"<a class="btn wide disabled">‹ 上頁</a>"#,
            r#"<a class="btn wide" href="/bbs/Test/index2.html">‹ 上頁</a>"#,
        );
        fetcher.insert(listing_url(1), html);
        let controller = controller(&fetcher, CrawlerConfig::builder().max_pages(10).build());

        let (records, reports) = collect(&controller, listing_url(2)).await;

        assert_eq!(listing_requests(&fetcher), 2);
        assert_eq!(fetcher.request_count(&listing_url(2)), 1);
        assert_eq!(records.len(), 2);
        assert_eq!(reports[0].pages_visited, 2);
        assert_eq!(reports[0].termination, Termination::Exhausted);
    }

    #[tokio::test]
    async fn test_end_to_end_three_pages() {
        let fetcher = board(3, 2);
        let controller = controller(
            &fetcher,
            CrawlerConfig::builder().max_pages(5).detail_concurrency(2).build(),
        );

        let (records, reports) = collect(&controller, listing_url(3)).await;

        assert_eq!(records.len(), 6);
        assert_eq!(reports[0].pages_visited, 3);
        assert_eq!(reports[0].termination, Termination::Exhausted);
        for record in &records {
            assert_eq!(record.author(), "poster");
            assert_eq!(record.score(), 1);
            assert_eq!(
                record.score(),
                record.comments().iter().map(|c| c.score).sum::<i32>()
            );
        }
    }

    #[tokio::test]
    async fn test_asset_policy() {
        let fetcher = board(1, 2);
        fetcher.insert(detail_url(1, 1), detail_html("no images", false));

        let strict = controller(&fetcher, CrawlerConfig::default());
        let records: Vec<Record> = strict
            .run(vec![Url::parse(&listing_url(1)).unwrap()])
            .collect()
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "1-0");

        let relaxed = controller(
            &fetcher,
            CrawlerConfig::builder().asset_policy(AssetPolicy::EmitAll).build(),
        );
        let records: Vec<Record> = relaxed
            .run(vec![Url::parse(&listing_url(1)).unwrap()])
            .collect()
            .await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_details_are_skipped() {
        let fetcher = MockFetcher::new();
        fetcher.insert(listing_url(1), listing_html(1, 3));
        fetcher.insert(detail_url(1, 0), detail_html("good", true));
        fetcher.insert(detail_url(1, 1), "<html><body>no metadata</body></html>");
        // detail 2 is never served

        let controller = controller(&fetcher, CrawlerConfig::default());
        let (records, reports) = collect(&controller, listing_url(1)).await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "good");
        assert_eq!(reports[0].termination, Termination::Exhausted);
        assert_eq!(fetcher.request_count(&detail_url(1, 2)), 1);
    }

    #[tokio::test]
    async fn test_duplicate_details_fetched_once() {
        let fetcher = board(2, 1);
        // page 1 also links to page 2's post
        let html = listing_html(1, 1).replace(
            "</body>",
            r#"<div class="r-ent"><div class="title"><a href="/bbs/Test/M.2.0.html">dup</a></div></div></body>"#,
        );
        fetcher.insert(listing_url(1), html);

        let controller = controller(&fetcher, CrawlerConfig::default());
        let (records, _) = collect(&controller, listing_url(2)).await;

        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.request_count(&detail_url(2, 0)), 1);
    }

    #[tokio::test]
    async fn test_each_seed_gets_its_own_budget() {
        let fetcher = board(5, 1);
        let controller = controller(&fetcher, CrawlerConfig::builder().max_pages(2).build());

        let events: Vec<CrawlEvent> = controller
            .events(vec![
                Url::parse(&listing_url(5)).unwrap(),
                Url::parse(&listing_url(3)).unwrap(),
            ])
            .collect()
            .await;
        let reports: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                CrawlEvent::LineageFinished(report) => Some(report.clone()),
                CrawlEvent::Record(_) => None,
            })
            .collect();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.pages_visited == 2));
        assert_eq!(listing_requests(&fetcher), 4);
    }

    #[tokio::test]
    async fn test_shutdown_stops_traversal() {
        let fetcher = board(3, 1);
        let shutdown = ShutdownCoordinator::shared();
        shutdown.request_shutdown();
        let controller =
            controller(&fetcher, CrawlerConfig::default()).with_shutdown(Arc::clone(&shutdown));

        let (records, reports) = collect(&controller, listing_url(3)).await;

        assert!(records.is_empty());
        assert_eq!(reports[0].pages_visited, 0);
        assert_eq!(reports[0].termination, Termination::Cancelled);
        assert!(fetcher.requests().is_empty());
    }
}
