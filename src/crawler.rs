use std::time::Duration;

use chrono::NaiveDate;
use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::CrawlConfig;
use crate::error::{CardError, CrawlError};
use crate::model::JobRecord;
use crate::parser::{self, fields};
use crate::renderer::{Launcher, Renderer};
use crate::site;

const MAX_RETRY_DOUBLINGS: u32 = 6;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last page had no next-page link.
    Exhausted,
    PageLimit,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFailure {
    /// Position of the card on its page.
    pub index: usize,
    pub error: CardError,
}

#[derive(Debug, Clone)]
pub struct PageReport {
    pub page: usize,
    pub url: String,
    pub n_ok: usize,
    pub failures: Vec<CardFailure>,
}

impl PageReport {
    pub fn n_failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug)]
pub struct CrawlOutcome {
    pub records: Vec<JobRecord>,
    pub pages_visited: usize,
    pub pages: Vec<PageReport>,
    pub stop: StopReason,
    pub extracted_at: NaiveDate,
}

enum State {
    Fetching { url: String },
    Parsed { next: Option<String> },
    Paginating { url: String },
    Done(StopReason),
    Aborted(StopReason),
}

/// Follows next-page links one page at a time through a single renderer session.
pub struct Crawler<L> {
    launcher: L,
    config: CrawlConfig,
}

impl<L: Launcher> Crawler<L> {
    pub fn new(launcher: L, config: CrawlConfig) -> Self {
        Self { launcher, config }
    }

    /// Crawl every result page for a search. The renderer is closed whatever the outcome.
    pub async fn crawl(&self, query: &str, location: &str) -> Result<CrawlOutcome, CrawlError> {
        let url = site::search_url(query, location);
        info!("Crawling {}", url);

        let mut renderer = self.launcher.launch().await.map_err(CrawlError::Launch)?;
        let result = Traversal::new(&self.config, &mut *renderer).run(url).await;
        if let Err(e) = renderer.close().await {
            warn!("Renderer did not close cleanly: {}", e);
        }

        if let Ok(outcome) = &result {
            info!(
                "Crawl finished: {} records from {} pages ({:?})",
                outcome.records.len(),
                outcome.pages_visited,
                outcome.stop
            );
        }
        result
    }
}

struct Traversal<'a> {
    config: &'a CrawlConfig,
    renderer: &'a mut dyn Renderer,
    started: Instant,
    extracted_at: NaiveDate,
    records: Vec<JobRecord>,
    pages: Vec<PageReport>,
}

impl<'a> Traversal<'a> {
    fn new(config: &'a CrawlConfig, renderer: &'a mut dyn Renderer) -> Self {
        Self {
            config,
            renderer,
            started: Instant::now(),
            extracted_at: chrono::Local::now().date_naive(),
            records: Vec::new(),
            pages: Vec::new(),
        }
    }

    async fn run(mut self, start_url: String) -> Result<CrawlOutcome, CrawlError> {
        let mut state = self.enter_fetching(start_url);
        loop {
            state = match state {
                State::Fetching { url } => self.fetch_and_parse(url).await?,
                State::Parsed { next: Some(url) } => State::Paginating { url },
                State::Parsed { next: None } => State::Done(StopReason::Exhausted),
                State::Paginating { url } => self.enter_fetching(url),
                State::Done(stop) => return Ok(self.finish(stop)),
                State::Aborted(stop) => {
                    warn!(
                        "Crawl aborted after {} pages ({:?})",
                        self.pages.len(),
                        stop
                    );
                    return Ok(self.finish(stop));
                }
            };
        }
    }

    /// Bounds are checked on every transition into `Fetching`.
    fn enter_fetching(&self, url: String) -> State {
        if let Some(max) = self.config.max_pages {
            if self.pages.len() >= max {
                info!("Page limit {} reached", max);
                return State::Done(StopReason::PageLimit);
            }
        }
        if let Some(deadline) = self.config.deadline {
            if self.started.elapsed() >= deadline {
                return State::Aborted(StopReason::Deadline);
            }
        }
        State::Fetching { url }
    }

    async fn fetch_and_parse(&mut self, url: String) -> Result<State, CrawlError> {
        let page = self.pages.len() + 1;
        self.navigate(&url, page).await?;

        if page == 1 {
            self.pause(self.config.settle_delay).await;
            self.scroll(page).await?;
            self.pause(self.config.scroll_delay).await;
        } else {
            let backoff = random_backoff(self.config);
            self.pause(backoff).await;
            self.scroll(page).await?;
        }

        let markup = self
            .renderer
            .current_markup()
            .await
            .map_err(|source| CrawlError::Render { page, source })?;
        let parsed = parser::parse_page(&markup);

        let mut report = PageReport {
            page,
            url,
            n_ok: 0,
            failures: Vec::new(),
        };
        for (index, card) in parsed.cards.iter().enumerate() {
            match fields::extract(&card.0, self.extracted_at) {
                Ok(record) => {
                    report.n_ok += 1;
                    self.records.push(record);
                }
                Err(error) => {
                    warn!("Page {} card {} skipped: {}", page, index, error);
                    report.failures.push(CardFailure { index, error });
                }
            }
        }
        info!(
            "Page {}: {} cards ({} ok, {} failed)",
            page,
            parsed.cards.len(),
            report.n_ok,
            report.n_failed()
        );
        self.pages.push(report);

        Ok(State::Parsed {
            next: parsed.next_page,
        })
    }

    async fn navigate(&mut self, url: &str, page: usize) -> Result<(), CrawlError> {
        let mut attempt = 0;
        loop {
            match self.renderer.navigate(url).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.nav_retries => {
                    let backoff = retry_delay(self.config, attempt);
                    warn!(
                        "Navigation to {} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        url,
                        attempt + 1,
                        self.config.nav_retries + 1,
                        backoff.as_secs_f64(),
                        e
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(source) => return Err(CrawlError::Navigation { page, source }),
            }
        }
    }

    async fn scroll(&mut self, page: usize) -> Result<(), CrawlError> {
        self.renderer
            .scroll_to(self.config.scroll_fraction)
            .await
            .map_err(|source| CrawlError::Render { page, source })
    }

    async fn pause(&self, d: Duration) {
        debug!("Waiting {:.1}s", d.as_secs_f64());
        sleep(d).await;
    }

    fn finish(self, stop: StopReason) -> CrawlOutcome {
        CrawlOutcome {
            pages_visited: self.pages.len(),
            records: self.records,
            pages: self.pages,
            stop,
            extracted_at: self.extracted_at,
        }
    }
}

/// Exponential retry delay. The doubling stops at `MAX_RETRY_DOUBLINGS` and the
/// result never exceeds `MAX_RETRY_DELAY`, whatever `nav_retries` is set to.
fn retry_delay(config: &CrawlConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(MAX_RETRY_DOUBLINGS));
    config.retry_base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Uniform inter-page delay within the configured range.
fn random_backoff(config: &CrawlConfig) -> Duration {
    let min = config.backoff_min.as_millis() as u64;
    let max = config.backoff_max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::db;
    use crate::dedup;
    use crate::error::RenderError;

    const START: &str = "https://in.indeed.com/jobs?q=rust+developer&l=Pune";

    /// Canned site: URL → markup. Records every navigation attempt and close.
    #[derive(Default)]
    struct FakeSite {
        pages: HashMap<String, String>,
        failures: Mutex<HashMap<String, usize>>,
        navigations: Mutex<Vec<String>>,
        scrolls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FakeSite {
        fn with_pages(pages: Vec<(&str, String)>) -> Arc<Self> {
            Arc::new(Self {
                pages: pages.into_iter().map(|(u, m)| (u.to_string(), m)).collect(),
                ..Default::default()
            })
        }

        fn fail_next(&self, url: &str, times: usize) {
            self.failures.lock().unwrap().insert(url.to_string(), times);
        }

        fn navigations(&self) -> Vec<String> {
            self.navigations.lock().unwrap().clone()
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    struct FakeLauncher(Arc<FakeSite>);

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn Renderer>, RenderError> {
            Ok(Box::new(FakeRenderer {
                site: Arc::clone(&self.0),
                current: None,
            }))
        }
    }

    struct BrokenLauncher;

    #[async_trait]
    impl Launcher for BrokenLauncher {
        async fn launch(&self) -> Result<Box<dyn Renderer>, RenderError> {
            Err(RenderError::Launch("no chrome".into()))
        }
    }

    struct FakeRenderer {
        site: Arc<FakeSite>,
        current: Option<String>,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
            self.site.navigations.lock().unwrap().push(url.to_string());
            let fail = {
                let mut failures = self.site.failures.lock().unwrap();
                match failures.get_mut(url) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if fail || !self.site.pages.contains_key(url) {
                return Err(RenderError::Navigate {
                    url: url.to_string(),
                    reason: "net::ERR_CONNECTION_RESET".into(),
                });
            }
            self.current = Some(url.to_string());
            Ok(())
        }

        async fn scroll_to(&mut self, _fraction: f64) -> Result<(), RenderError> {
            self.site.scrolls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn current_markup(&mut self) -> Result<String, RenderError> {
            self.current
                .as_ref()
                .and_then(|u| self.site.pages.get(u))
                .cloned()
                .ok_or_else(|| RenderError::Markup("nothing loaded".into()))
        }

        async fn close(&mut self) -> Result<(), RenderError> {
            self.site.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn card(title: &str, company: &str, jk: &str) -> String {
        format!(
            r#"<a class="tapItem" href="/rc/clk?jk={jk}">
                 <h2 class="jobTitle">{title}</h2>
                 <span data-testid="company-name">{company}</span>
                 <div data-testid="text-location">Pune, Maharashtra</div>
                 <span data-testid="myJobsStateDate">Posted 1 day ago</span>
                 <div class="job-snippet">Write
                   Rust.</div>
                 <div data-testid="attribute_snippet_testid-salary">₹50,000 a month</div>
               </a>"#
        )
    }

    fn results_page(cards: &[String], next: Option<&str>) -> String {
        let next = next
            .map(|href| format!(r#"<a data-testid="pagination-page-next" href="{href}">Next</a>"#))
            .unwrap_or_default();
        format!(
            "<html><body><div id=\"mosaic-provider-jobcards\">{}</div><nav>{}</nav></body></html>",
            cards.concat(),
            next
        )
    }

    fn chain(n: usize) -> Arc<FakeSite> {
        let mut pages = Vec::new();
        for i in 0..n {
            let url = page_url(i);
            let next = (i + 1 < n).then(|| format!("/jobs?q=rust+developer&l=Pune&start={}", (i + 1) * 10));
            let markup = results_page(
                &[card(&format!("Engineer {}", i + 1), "Acme", &format!("p{i}"))],
                next.as_deref(),
            );
            pages.push((url, markup));
        }
        Arc::new(FakeSite {
            pages: pages.into_iter().collect(),
            ..Default::default()
        })
    }

    fn page_url(i: usize) -> String {
        if i == 0 {
            START.to_string()
        } else {
            format!("{}&start={}", START, i * 10)
        }
    }

    fn crawler(site: &Arc<FakeSite>, config: CrawlConfig) -> Crawler<FakeLauncher> {
        Crawler::new(FakeLauncher(Arc::clone(site)), config)
    }

    #[tokio::test(start_paused = true)]
    async fn single_page_two_cards() {
        let site = FakeSite::with_pages(vec![(
            START,
            results_page(&[card("Rust Developer", "Ferrous", "a"), card("SRE", "Tokio Works", "b")], None),
        )]);
        let out = crawler(&site, CrawlConfig::default())
            .crawl("rust developer", "Pune")
            .await
            .unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.pages_visited, 1);
        assert_eq!(out.stop, StopReason::Exhausted);
        assert_eq!(site.navigations(), [START]);
        assert_eq!(site.closes(), 1);
        assert_eq!(out.records[0].summary, "Write Rust.");
        assert_eq!(out.records[1].source_url, "https://in.indeed.com/rc/clk?jk=b");

        let store = db::open_in_memory().unwrap();
        let novel = dedup::commit(&store, &out.records).unwrap();
        assert_eq!(novel, out.records);
    }

    #[tokio::test(start_paused = true)]
    async fn no_next_link_stops_after_one_page() {
        let site = FakeSite::with_pages(vec![(START, results_page(&[], None))]);
        let out = crawler(&site, CrawlConfig::default())
            .crawl("rust developer", "Pune")
            .await
            .unwrap();
        assert_eq!(out.pages_visited, 1);
        assert!(out.records.is_empty());
        assert_eq!(site.navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn follows_three_pages() {
        let site = chain(3);
        let out = crawler(&site, CrawlConfig::default())
            .crawl("rust developer", "Pune")
            .await
            .unwrap();

        assert_eq!(out.records.len(), 3);
        assert_eq!(out.pages_visited, 3);
        assert_eq!(site.navigations(), [page_url(0), page_url(1), page_url(2)]);
        assert_eq!(site.scrolls.load(Ordering::SeqCst), 3);
        let titles: Vec<_> = out.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Engineer 1", "Engineer 2", "Engineer 3"]);
        assert!(out.records.iter().all(|r| r.extracted_at == out.extracted_at));
    }

    #[tokio::test(start_paused = true)]
    async fn page_limit_stops_early() {
        let site = chain(5);
        let config = CrawlConfig {
            max_pages: Some(2),
            ..Default::default()
        };
        let out = crawler(&site, config).crawl("rust developer", "Pune").await.unwrap();
        assert_eq!(out.pages_visited, 2);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.stop, StopReason::PageLimit);
        assert_eq!(site.navigations().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_before_next_fetch() {
        let site = chain(5);
        // Page 1 takes 5s + 2s of delays, page 2 adds at least 3s of backoff.
        let config = CrawlConfig {
            deadline: Some(Duration::from_secs(9)),
            ..Default::default()
        };
        let out = crawler(&site, config).crawl("rust developer", "Pune").await.unwrap();
        assert_eq!(out.stop, StopReason::Deadline);
        assert_eq!(out.pages_visited, 2);
        assert_eq!(out.records.len(), 2);
        assert_eq!(site.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_card_is_reported_not_fatal() {
        let site = FakeSite::with_pages(vec![(
            START,
            results_page(
                &[
                    card("Rust Developer", "Ferrous", "a"),
                    r#"<div class="job_seen_beacon"><img src="ad.png"></div>"#.to_string(),
                    card("SRE", "Tokio Works", "b"),
                ],
                None,
            ),
        )]);
        let out = crawler(&site, CrawlConfig::default())
            .crawl("rust developer", "Pune")
            .await
            .unwrap();

        assert_eq!(out.records.len(), 2);
        let report = &out.pages[0];
        assert_eq!(report.n_ok, 2);
        assert_eq!(
            report.failures,
            [CardFailure {
                index: 1,
                error: CardError::NoFields
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_retried_then_succeeds() {
        let site = chain(2);
        site.fail_next(&page_url(1), 1);
        let out = crawler(&site, CrawlConfig::default())
            .crawl("rust developer", "Pune")
            .await
            .unwrap();
        assert_eq!(out.pages_visited, 2);
        assert_eq!(site.navigations(), [page_url(0), page_url(1), page_url(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_failure_aborts_and_closes() {
        let site = chain(3);
        site.fail_next(&page_url(1), 10);
        let config = CrawlConfig {
            nav_retries: 1,
            ..Default::default()
        };
        let err = crawler(&site, config)
            .crawl("rust developer", "Pune")
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Navigation { page: 2, .. }));
        assert_eq!(site.navigations().len(), 3);
        assert_eq!(site.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn self_linking_page_stops_at_default_cap() {
        let site = FakeSite::with_pages(vec![(
            START,
            results_page(
                &[card("Rust Developer", "Ferrous", "a")],
                Some("/jobs?q=rust+developer&l=Pune"),
            ),
        )]);
        let driver = crawler(&site, CrawlConfig::default());
        let crawl = driver.crawl("rust developer", "Pune");
        let out = tokio::time::timeout(Duration::from_secs(7 * 24 * 3600), crawl)
            .await
            .expect("default crawl must terminate")
            .unwrap();

        assert_eq!(out.stop, StopReason::PageLimit);
        assert_eq!(out.pages_visited, crate::config::DEFAULT_MAX_PAGES);
        assert!(site.navigations().iter().all(|u| u == START));
        assert_eq!(site.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn many_retries_against_dead_host_fail_and_close() {
        // Built directly so `validate` does not cap the retries.
        let site = FakeSite::with_pages(vec![]);
        let config = CrawlConfig {
            nav_retries: 40,
            ..Default::default()
        };
        let started = Instant::now();
        let err = crawler(&site, config)
            .crawl("rust developer", "Pune")
            .await
            .unwrap_err();

        assert!(matches!(err, CrawlError::Navigation { page: 1, .. }));
        assert_eq!(site.navigations().len(), 41);
        assert_eq!(site.closes(), 1);
        assert!(started.elapsed() <= MAX_RETRY_DELAY * 40);
    }

    #[test]
    fn retry_delay_doubles_then_caps() {
        let config = CrawlConfig::default();
        assert_eq!(retry_delay(&config, 0), Duration::from_secs(2));
        assert_eq!(retry_delay(&config, 1), Duration::from_secs(4));
        assert_eq!(retry_delay(&config, 5), Duration::from_secs(64));
        assert_eq!(retry_delay(&config, 6), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(&config, 40), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(&config, u32::MAX), MAX_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_failure_surfaces() {
        let err = Crawler::new(BrokenLauncher, CrawlConfig::default())
            .crawl("rust", "Pune")
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Launch(_)));
    }

    #[test]
    fn backoff_stays_in_range() {
        let config = CrawlConfig::default();
        for _ in 0..200 {
            let d = random_backoff(&config);
            assert!(d >= config.backoff_min && d <= config.backoff_max);
        }
    }
}
