//! Poster resolution: seed, cheap rewrites, page scraping, then web search.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::asset_store::AssetStore;
use crate::cascade::{CandidateStrategy, Cascade};
use crate::config::CascadeConfig;
use crate::extractors::{Extractor, PageImageExtractor, SearchResultExtractor};
use crate::http_client::{FetchError, HttpClient};
use crate::validator::{is_acceptable_image, FetchedImage};

const SEARCH_RATE_LIMIT_WAIT_LIMIT: Duration = Duration::from_secs(5);
const NUMBERED_HOST_VARIANTS: std::ops::RangeInclusive<u32> = 1..=9;

static NUMBERED_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://[A-Za-z]+)(\d)(\.[^/]+/.+)$").expect("numbered host regex should compile")
});

type SearchLimiter =
    RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// What a poster is being looked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosterSubject {
    pub title: String,
    /// Item page whose markup may advertise a poster.
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPoster {
    pub source_locator: String,
    pub local_ref: String,
    /// False when the store already held this object.
    pub written: bool,
    pub tried: usize,
}

/// Alternate extensions and numbered-host variants of each seed.
pub fn rewrite_candidates(url: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(stem) = url.strip_suffix(".webp") {
        for extension in [".jpg", ".jpeg", ".png"] {
            candidates.push(format!("{stem}{extension}"));
        }
    }

    if let Some(captures) = NUMBERED_HOST.captures(url) {
        let (prefix, suffix) = (&captures[1], &captures[3]);
        for index in NUMBERED_HOST_VARIANTS {
            let host_url = format!("{prefix}{index}{suffix}");
            if let Some(stem) = host_url.strip_suffix(".webp") {
                let jpg = format!("{stem}.jpg");
                candidates.push(host_url);
                candidates.push(jpg);
            } else {
                candidates.push(host_url);
            }
        }
    }

    let mut unique = Vec::new();
    for candidate in candidates {
        if candidate != url && !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

pub struct RewriteStrategy;

impl CandidateStrategy<PosterSubject, String> for RewriteStrategy {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    fn candidates(&self, _subject: &PosterSubject, seeds: &[String]) -> Vec<String> {
        seeds.iter().flat_map(|seed| rewrite_candidates(seed)).collect()
    }
}

pub struct PageScrapeStrategy {
    client: HttpClient,
    extractor: PageImageExtractor,
}

impl PageScrapeStrategy {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            extractor: PageImageExtractor,
        }
    }
}

impl CandidateStrategy<PosterSubject, String> for PageScrapeStrategy {
    fn name(&self) -> &'static str {
        "page-scrape"
    }

    fn candidates(&self, subject: &PosterSubject, _seeds: &[String]) -> Vec<String> {
        let link = subject.link.trim();
        if link.is_empty() {
            return Vec::new();
        }
        match self.client.get_text(link, self.client.page_referer()) {
            Ok(page) => self.extractor.extract(&page),
            Err(error) => {
                warn!("Poster page scrape failed for {link}: {error}");
                Vec::new()
            }
        }
    }
}

pub struct WebSearchStrategy {
    client: HttpClient,
    extractor: SearchResultExtractor,
    url_template: String,
    query_suffix: String,
    max_candidates: usize,
    limiter: Arc<SearchLimiter>,
}

impl WebSearchStrategy {
    pub fn new(client: HttpClient, config: &CascadeConfig) -> Self {
        let per_minute =
            NonZeroU32::new(config.search_requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            extractor: SearchResultExtractor,
            url_template: config.search_url_template.clone(),
            query_suffix: config.search_query_suffix.clone(),
            max_candidates: config.max_search_candidates,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    pub fn search_url(&self, title: &str) -> String {
        let query = format!("{} {}", title.trim(), self.query_suffix.trim());
        self.url_template
            .replace("{query}", urlencoding::encode(query.trim()).as_ref())
    }

    fn wait_for_rate_limit_slot(&self) -> bool {
        if self.limiter.check().is_ok() {
            return true;
        }
        let deadline = Instant::now() + SEARCH_RATE_LIMIT_WAIT_LIMIT;
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
            if self.limiter.check().is_ok() {
                return true;
            }
        }
        false
    }
}

impl CandidateStrategy<PosterSubject, String> for WebSearchStrategy {
    fn name(&self) -> &'static str {
        "web-search"
    }

    fn candidates(&self, subject: &PosterSubject, _seeds: &[String]) -> Vec<String> {
        if subject.title.trim().is_empty() || self.max_candidates == 0 {
            return Vec::new();
        }
        if !self.wait_for_rate_limit_slot() {
            info!(
                "Poster search for '{}' skipped: search rate limit saturated",
                subject.title
            );
            return Vec::new();
        }
        let url = self.search_url(&subject.title);
        match self.client.get_text(&url, self.client.page_referer()) {
            Ok(page) => {
                let mut found = self.extractor.extract(&page);
                found.truncate(self.max_candidates);
                found
            }
            Err(error) => {
                warn!("Poster search failed for '{}': {error}", subject.title);
                Vec::new()
            }
        }
    }
}

/// Finds a usable poster for an item and stores it content-addressed.
pub struct PosterResolver {
    client: HttpClient,
    store: AssetStore,
    cascade: Cascade<PosterSubject, String>,
}

impl PosterResolver {
    /// Default tier order: rewrites, page scrape, web search.
    pub fn new(client: HttpClient, store: AssetStore, config: &CascadeConfig) -> Self {
        let cascade = Cascade::new("poster")
            .with_strategy(RewriteStrategy)
            .with_strategy(PageScrapeStrategy::new(client.clone()))
            .with_strategy(WebSearchStrategy::new(client.clone(), config));
        Self::with_cascade(client, store, cascade)
    }

    pub fn with_cascade(
        client: HttpClient,
        store: AssetStore,
        cascade: Cascade<PosterSubject, String>,
    ) -> Self {
        debug!(
            "Poster tiers {:?}, storing under {}",
            cascade.strategy_names(),
            store.root().display()
        );
        Self {
            client,
            store,
            cascade,
        }
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    fn fetch_candidate(&self, locator: &str) -> Result<FetchedImage, FetchError> {
        let response = self.client.get_image(locator)?;
        let needs_probe = response.content_type.is_empty()
            && (200..400).contains(&response.status)
            && !response.body.is_empty();
        let probe_ok = needs_probe && self.client.probe(locator);
        Ok(FetchedImage {
            locator: locator.to_string(),
            status: response.status,
            content_type: response.content_type,
            bytes: response.body,
            probe_ok,
        })
    }

    /// Runs the cascade. `seed` is the known poster link, `excluded` locators
    /// are never tried. Absence is a normal outcome.
    pub fn resolve(
        &self,
        subject: &PosterSubject,
        seed: Option<&str>,
        excluded: &[String],
    ) -> Option<ResolvedPoster> {
        let seeds: Vec<String> = seed
            .map(str::trim)
            .filter(|seed| !seed.is_empty())
            .map(str::to_string)
            .into_iter()
            .collect();
        let resolution = self.cascade.resolve(
            subject,
            &seeds,
            excluded,
            |locator: &String| self.fetch_candidate(locator),
            is_acceptable_image,
        )?;

        let image = resolution.artifact;
        match self
            .store
            .persist(&image.locator, &image.bytes, &image.content_type)
        {
            Ok(stored) => Some(ResolvedPoster {
                source_locator: image.locator,
                local_ref: stored.local_ref,
                written: stored.written,
                tried: resolution.tried,
            }),
            Err(error) => {
                warn!("Poster for '{}' could not be stored: {error}", subject.title);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{rewrite_candidates, PosterResolver, PosterSubject, WebSearchStrategy};
    use crate::asset_store::AssetStore;
    use crate::cascade::CandidateStrategy;
    use crate::config::CascadeConfig;
    use crate::http_client::testing::{client_for, FakeFetcher};
    use crate::http_client::Method;

    const SEED: &str = "https://img3.doubanio.com/view/photo/p123.webp";

    fn subject() -> PosterSubject {
        PosterSubject {
            title: "Example Film".to_string(),
            link: "https://movie.douban.com/subject/1/".to_string(),
        }
    }

    fn stored_files(dir: &TempDir) -> usize {
        fs::read_dir(dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_rewrite_candidates_try_extensions_before_hosts() {
        let candidates = rewrite_candidates(SEED);
        assert_eq!(
            &candidates[..4],
            &[
                "https://img3.doubanio.com/view/photo/p123.jpg".to_string(),
                "https://img3.doubanio.com/view/photo/p123.jpeg".to_string(),
                "https://img3.doubanio.com/view/photo/p123.png".to_string(),
                "https://img1.doubanio.com/view/photo/p123.webp".to_string(),
            ]
        );
        assert!(!candidates.contains(&SEED.to_string()));
        let jpg = "https://img3.doubanio.com/view/photo/p123.jpg".to_string();
        assert_eq!(candidates.iter().filter(|value| **value == jpg).count(), 1);
    }

    #[test]
    fn test_rewrite_candidates_empty_for_plain_locator() {
        assert!(rewrite_candidates("https://cdn.example.com/poster.jpg").is_empty());
    }

    #[test]
    fn test_webp_seed_404_falls_back_to_jpg_rewrite_and_writes_once() {
        let fake = FakeFetcher::new();
        fake.get(SEED, 404, "text/html", b"not found");
        fake.get(
            "https://img3.doubanio.com/view/photo/p123.jpg",
            200,
            "image/jpeg",
            b"\xff\xd8\xff\xe0jpeg",
        );
        let dir = TempDir::new().expect("temp dir should be created");
        let resolver = PosterResolver::new(
            client_for(fake.clone()),
            AssetStore::new(dir.path(), "/posters"),
            &CascadeConfig::default(),
        );

        let poster = resolver
            .resolve(&subject(), Some(SEED), &[])
            .expect("rewrite should resolve");

        assert_eq!(poster.source_locator, "https://img3.doubanio.com/view/photo/p123.jpg");
        assert!(poster.written);
        assert_eq!(poster.tried, 2);
        assert!(poster.local_ref.starts_with("/posters/") && poster.local_ref.ends_with(".jpg"));
        assert_eq!(stored_files(&dir), 1);
        assert!(fake
            .requested_urls(Method::Get)
            .iter()
            .all(|url| url.contains("doubanio.com")));
    }

    #[test]
    fn test_missing_content_type_is_accepted_only_after_probe() {
        let fake = FakeFetcher::new();
        let url = "https://cdn.example.com/poster.jpg";
        fake.get(url, 200, "", b"bytes");
        fake.head(url, 200);
        let dir = TempDir::new().expect("temp dir should be created");
        let resolver = PosterResolver::new(
            client_for(fake.clone()),
            AssetStore::new(dir.path(), "/posters"),
            &CascadeConfig::default(),
        );

        let poster = resolver
            .resolve(&subject(), Some(url), &[])
            .expect("probe should confirm the image");
        assert_eq!(poster.source_locator, url);
        assert_eq!(fake.requested_urls(Method::Head), vec![url.to_string()]);
    }

    #[test]
    fn test_page_scrape_supplies_candidate_when_seed_fails() {
        let fake = FakeFetcher::new();
        fake.get(
            "https://movie.douban.com/subject/1/",
            200,
            "text/html",
            br#"<meta property="og:image" content="https://cdn.example.com/og.png">"#,
        );
        fake.get("https://cdn.example.com/og.png", 200, "image/png", b"\x89PNG");
        let dir = TempDir::new().expect("temp dir should be created");
        let resolver = PosterResolver::new(
            client_for(fake.clone()),
            AssetStore::new(dir.path(), "/posters"),
            &CascadeConfig::default(),
        );

        let poster = resolver
            .resolve(&subject(), Some("https://cdn.example.com/gone.jpg"), &[])
            .expect("page candidate should resolve");
        assert_eq!(poster.source_locator, "https://cdn.example.com/og.png");
        assert!(poster.local_ref.ends_with(".png"));
    }

    #[test]
    fn test_excluded_locator_is_never_fetched() {
        let fake = FakeFetcher::new();
        let bad = "https://cdn.example.com/bad.jpg";
        fake.get(bad, 200, "image/jpeg", b"stale");
        let dir = TempDir::new().expect("temp dir should be created");
        let resolver = PosterResolver::new(
            client_for(fake.clone()),
            AssetStore::new(dir.path(), "/posters"),
            &CascadeConfig::default(),
        );

        assert!(resolver
            .resolve(&subject(), Some(bad), &[bad.to_string()])
            .is_none());
        assert!(!fake.requested_urls(Method::Get).contains(&bad.to_string()));
        assert_eq!(stored_files(&dir), 0);
    }

    #[test]
    fn test_web_search_caps_candidates() {
        let fake = FakeFetcher::new();
        let config = CascadeConfig {
            max_search_candidates: 2,
            ..CascadeConfig::default()
        };
        let strategy = WebSearchStrategy::new(client_for(fake.clone()), &config);
        let url = strategy.search_url("Example Film");
        assert_eq!(
            url,
            "https://www.bing.com/images/search?q=Example%20Film%20movie%20poster"
        );
        fake.get(
            &url,
            200,
            "text/html",
            br#"<img src="https://a.example.com/1.jpg"><img src="https://a.example.com/2.jpg"><img src="https://a.example.com/3.jpg">"#,
        );

        let found = strategy.candidates(&subject(), &[]);
        assert_eq!(
            found,
            vec![
                "https://a.example.com/1.jpg".to_string(),
                "https://a.example.com/2.jpg".to_string(),
            ]
        );
    }
}
