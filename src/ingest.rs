//! Feed ingest: dedupe records, resolve posters and details, finalise and enqueue.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config_persistence::write_json_atomic;
use crate::dedup_index::DedupIndex;
use crate::detail_resolver::{DetailCompleteness, DetailResolver, DetailSubject};
use crate::extractors::first_image_src;
use crate::http_client::HttpClient;
use crate::index_push::submit_new_urls;
use crate::manifest::{load_manifests, ItemFinalizer};
use crate::poster_resolver::{PosterResolver, PosterSubject};
use crate::protocol::{FeedRecord, ItemManifest, QueueItem};
use crate::publish_queue::{enqueue, MergeReport};

/// Records from one feed source, or why they could not be read.
#[derive(Debug, Clone)]
pub struct FeedBatch {
    pub source: String,
    pub records: Result<Vec<FeedRecord>, String>,
}

/// Reads a JSON array of records; the file stem names the source.
pub fn read_feed_batch(path: &Path) -> FeedBatch {
    let source = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let records = fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))
        .and_then(|text| {
            serde_json::from_str::<Vec<FeedRecord>>(&text)
                .map_err(|err| format!("failed to parse {}: {err}", path.display()))
        });
    FeedBatch { source, records }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub total_sources: usize,
    pub failed_sources: usize,
    pub new_items: usize,
    pub skipped: usize,
    pub detail_complete: usize,
    pub detail_partial: usize,
    pub detail_missing: usize,
    pub poster_resolved: usize,
    pub poster_missing: usize,
    pub new_urls: Vec<String>,
    pub queue: Option<MergeReport>,
}

impl IngestReport {
    pub fn all_sources_failed(&self) -> bool {
        self.total_sources > 0 && self.failed_sources == self.total_sources
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub checked: usize,
    pub repaired: usize,
    pub still_missing: usize,
}

pub struct IngestPipeline {
    posters: PosterResolver,
    details: DetailResolver,
    finalizer: Box<dyn ItemFinalizer>,
    queue_path: PathBuf,
    index_client: HttpClient,
    index_endpoint: Option<String>,
    date: String,
}

impl IngestPipeline {
    pub fn new(
        posters: PosterResolver,
        details: DetailResolver,
        finalizer: Box<dyn ItemFinalizer>,
        queue_path: PathBuf,
        index_client: HttpClient,
        index_endpoint: Option<String>,
        date: String,
    ) -> Self {
        Self {
            posters,
            details,
            finalizer,
            queue_path,
            index_client,
            index_endpoint,
            date,
        }
    }

    /// Stored poster reference for the record: a still-present local poster
    /// from the description, else whatever the cascade finds.
    fn poster_for(&self, record: &FeedRecord) -> (Option<String>, Option<String>) {
        let subject = PosterSubject {
            title: record.title.trim().to_string(),
            link: record.link.trim().to_string(),
        };
        let seed = first_image_src(&record.description);
        let remote_seed = match seed.as_deref() {
            Some(seed) if seed.starts_with("http://") || seed.starts_with("https://") => Some(seed),
            Some(local) if self.posters.store().contains(local) => {
                return (Some(local.to_string()), None);
            }
            _ => None,
        };
        match self.posters.resolve(&subject, remote_seed, &[]) {
            Some(poster) => {
                debug!(
                    "[{}] poster {} from {} after {} candidates (new file: {})",
                    subject.title, poster.local_ref, poster.source_locator, poster.tried, poster.written
                );
                (Some(poster.local_ref), Some(poster.source_locator))
            }
            None => (None, None),
        }
    }

    fn ingest_record(
        &self,
        source: &str,
        record: &FeedRecord,
        report: &mut IngestReport,
    ) -> Result<QueueItem, String> {
        let title = record.title.trim();
        let details = self.details.resolve(&DetailSubject {
            title: title.to_string(),
            link: record.link.trim().to_string(),
        });
        match details.completeness() {
            DetailCompleteness::Complete => report.detail_complete += 1,
            DetailCompleteness::Partial => {
                report.detail_partial += 1;
                warn!(
                    "[{title}] details partial: cast={} summary={}",
                    details.cast.is_some(),
                    details.summary.is_some()
                );
            }
            DetailCompleteness::Missing => {
                report.detail_missing += 1;
                warn!("[{title}] details missing entirely: {}", record.link.trim());
            }
        }

        let (poster, poster_source) = self.poster_for(record);
        if poster.is_some() {
            report.poster_resolved += 1;
        } else {
            report.poster_missing += 1;
        }

        let manifest = ItemManifest {
            title: title.to_string(),
            link: record.link.trim().to_string(),
            guid: record.guid_or_link().to_string(),
            source: source.to_string(),
            date: self.date.clone(),
            poster,
            poster_source,
            cast: details.cast,
            summary: details.summary,
            description: record.description.clone(),
        };
        let finalized = self.finalizer.finalize(&manifest)?;
        info!("[{source}] new item: {} ({})", finalized.file, finalized.path.display());
        Ok(QueueItem::new(
            title,
            finalized.url,
            source,
            self.date.as_str(),
            finalized.file,
        ))
    }

    /// Processes every batch, then enqueues and announces the new items.
    ///
    /// Only the loss of every feed source is an error; everything else is
    /// counted in the report.
    pub fn run(&self, batches: &[FeedBatch], index: &mut DedupIndex) -> Result<IngestReport, String> {
        let mut report = IngestReport {
            total_sources: batches.len(),
            ..IngestReport::default()
        };
        let mut queue_items = Vec::new();

        for batch in batches {
            let records = match &batch.records {
                Ok(records) if !records.is_empty() => records,
                Ok(_) => {
                    warn!("[{}] returned no records", batch.source);
                    report.failed_sources += 1;
                    continue;
                }
                Err(err) => {
                    warn!("[{}] {err}", batch.source);
                    report.failed_sources += 1;
                    continue;
                }
            };
            info!("[{}] {} records", batch.source, records.len());

            for record in records {
                if let Some(reason) = index.check(record) {
                    debug!("Skipping '{}': {}", record.title.trim(), reason.as_str());
                    report.skipped += 1;
                    continue;
                }
                match self.ingest_record(&batch.source, record, &mut report) {
                    Ok(item) => {
                        index.remember(record);
                        report.new_items += 1;
                        report.new_urls.push(item.url.clone());
                        queue_items.push(item);
                    }
                    Err(err) => warn!("[{}] could not finalise '{}': {err}", batch.source, record.title.trim()),
                }
            }
        }

        info!(
            "Ingest finished: new={} skipped={} details complete={} partial={} missing={} posters resolved={} missing={} failed sources={}/{}",
            report.new_items,
            report.skipped,
            report.detail_complete,
            report.detail_partial,
            report.detail_missing,
            report.poster_resolved,
            report.poster_missing,
            report.failed_sources,
            report.total_sources
        );

        if !queue_items.is_empty() {
            report.queue = Some(enqueue(&self.queue_path, &queue_items)?);
            submit_new_urls(
                &self.index_client,
                self.index_endpoint.as_deref(),
                &report.new_urls,
            );
        }

        if report.all_sources_failed() {
            log::error!("All {} feed sources failed", report.total_sources);
            return Err(format!("all {} feed sources failed", report.total_sources));
        }
        Ok(report)
    }
}

/// Re-resolves posters whose stored file has disappeared and rewrites their manifests.
pub fn repair_missing_posters(
    manifest_dir: &Path,
    posters: &PosterResolver,
) -> Result<RepairReport, String> {
    let mut report = RepairReport::default();
    for (path, mut manifest) in load_manifests(manifest_dir) {
        let Some(current) = manifest.poster.clone() else {
            continue;
        };
        report.checked += 1;
        if posters.store().contains(&current) {
            continue;
        }
        let subject = PosterSubject {
            title: manifest.title.clone(),
            link: manifest.link.clone(),
        };
        match posters.resolve(&subject, None, &[]) {
            Some(replacement) => {
                warn!(
                    "Poster file missing, replaced: {current} -> {}",
                    replacement.local_ref
                );
                manifest.poster = Some(replacement.local_ref);
                manifest.poster_source = Some(replacement.source_locator);
                write_json_atomic(&path, &manifest)?;
                report.repaired += 1;
            }
            None => {
                warn!("Poster file missing and no replacement found: {current}");
                report.still_missing += 1;
            }
        }
    }
    info!(
        "Poster repair: checked={} repaired={} still missing={}",
        report.checked, report.repaired, report.still_missing
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::{read_feed_batch, repair_missing_posters, FeedBatch, IngestPipeline};
    use crate::asset_store::AssetStore;
    use crate::config::CascadeConfig;
    use crate::config_persistence::write_json_atomic;
    use crate::dedup_index::DedupIndex;
    use crate::detail_resolver::DetailResolver;
    use crate::http_client::testing::{client_for, FakeFetcher};
    use crate::manifest::{load_manifests, ManifestWriter};
    use crate::poster_resolver::PosterResolver;
    use crate::protocol::{FeedRecord, ItemManifest};
    use crate::publish_queue::load_queue;

    const LINK: &str = "https://movie.douban.com/subject/42/";
    const POSTER: &str = "https://img9.doubanio.com/view/photo/p42.jpg";
    const MOBILE: &str = "https://m.douban.com/rexxar/api/v2/movie/42?for_mobile=1";

    struct Fixture {
        dir: TempDir,
        fake: Arc<FakeFetcher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().expect("temp dir should be created"),
                fake: FakeFetcher::new(),
            }
        }

        fn posters(&self) -> PosterResolver {
            PosterResolver::new(
                client_for(self.fake.clone()),
                AssetStore::new(self.dir.path().join("posters"), "/posters"),
                &CascadeConfig::default(),
            )
        }

        fn pipeline(&self) -> IngestPipeline {
            IngestPipeline::new(
                self.posters(),
                DetailResolver::new(client_for(self.fake.clone()), &CascadeConfig::default()),
                Box::new(ManifestWriter::new(
                    self.dir.path().join("items"),
                    "https://site.example.com",
                )),
                self.dir.path().join("automation").join("publish_queue.json"),
                client_for(self.fake.clone()),
                None,
                "2024-05-01".to_string(),
            )
        }
    }

    fn record(title: &str, link: &str, description: &str) -> FeedRecord {
        FeedRecord {
            title: title.to_string(),
            link: link.to_string(),
            guid: link.to_string(),
            description: description.to_string(),
        }
    }

    fn batch(source: &str, records: Vec<FeedRecord>) -> FeedBatch {
        FeedBatch {
            source: source.to_string(),
            records: Ok(records),
        }
    }

    #[test]
    fn test_new_record_is_resolved_finalised_and_enqueued() {
        let fixture = Fixture::new();
        fixture.fake.get(POSTER, 200, "image/jpeg", b"\xff\xd8jpeg");
        fixture.fake.get(
            MOBILE,
            200,
            "application/json",
            r#"{"actors":[{"name":"Actor"}],"intro":"Plot."}"#.as_bytes(),
        );
        let batches = vec![
            batch(
                "weekly",
                vec![record("Film", LINK, &format!(r#"<p><img src="{POSTER}"></p>"#))],
            ),
            FeedBatch {
                source: "broken".to_string(),
                records: Err("timed out".to_string()),
            },
        ];

        let report = fixture
            .pipeline()
            .run(&batches, &mut DedupIndex::default())
            .expect("one healthy source is enough");

        assert_eq!(report.new_items, 1);
        assert_eq!((report.failed_sources, report.total_sources), (1, 2));
        assert_eq!((report.detail_complete, report.poster_resolved), (1, 1));
        assert_eq!(report.new_urls, vec!["https://site.example.com/posts/2024-05-01-film/"]);

        let queue = load_queue(&fixture.dir.path().join("automation").join("publish_queue.json"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].file, "2024-05-01-film.json");
        assert_eq!(queue[0].source, "weekly");

        let manifests = load_manifests(&fixture.dir.path().join("items"));
        let manifest = &manifests[0].1;
        assert_eq!(manifest.cast.as_deref(), Some("Actor"));
        assert_eq!(manifest.poster_source.as_deref(), Some(POSTER));
        assert!(manifest
            .poster
            .as_deref()
            .is_some_and(|poster| poster.starts_with("/posters/")));
    }

    #[test]
    fn test_duplicates_and_published_items_are_skipped() {
        let fixture = Fixture::new();
        let mut index = DedupIndex::default();
        index.remember(&record("Seen", "https://movie.douban.com/subject/1/", ""));
        let batches = vec![batch(
            "weekly",
            vec![
                record("Seen", "https://movie.douban.com/subject/2/", ""),
                record("Fresh", LINK, ""),
                record("Fresh again", LINK, ""),
                record("", "https://movie.douban.com/subject/3/", ""),
            ],
        )];

        let report = fixture.pipeline().run(&batches, &mut index).expect("run should succeed");
        assert_eq!(report.new_items, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.detail_missing, 1);
        assert_eq!(report.poster_missing, 1);
    }

    #[test]
    fn test_all_sources_failing_is_fatal() {
        let fixture = Fixture::new();
        let batches = vec![
            batch("empty", Vec::new()),
            FeedBatch {
                source: "down".to_string(),
                records: Err("connection refused".to_string()),
            },
        ];
        let error = fixture
            .pipeline()
            .run(&batches, &mut DedupIndex::default())
            .expect_err("all sources failed");
        assert!(error.contains("all 2 feed sources failed"));
        assert!(!fixture.dir.path().join("automation").exists());
    }

    #[test]
    fn test_read_feed_batch_names_source_after_file_stem() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("weekly.json");
        fs::write(&path, r#"[{"title":"Film","link":"https://a/"}]"#).expect("fixture should be written");

        let batch = read_feed_batch(&path);
        assert_eq!(batch.source, "weekly");
        assert_eq!(batch.records.expect("records should parse").len(), 1);
        assert!(read_feed_batch(&dir.path().join("missing.json")).records.is_err());
    }

    #[test]
    fn test_repair_replaces_vanished_poster_from_item_page() {
        let fixture = Fixture::new();
        let items = fixture.dir.path().join("items");
        let manifest = ItemManifest {
            title: "Film".to_string(),
            link: LINK.to_string(),
            poster: Some("/posters/0000000000deadbeef00.jpg".to_string()),
            ..ItemManifest::default()
        };
        write_json_atomic(&items.join("2024-05-01-film.json"), &manifest)
            .expect("manifest fixture should be written");
        fixture.fake.get(
            LINK,
            200,
            "text/html",
            format!(r#"<meta property="og:image" content="{POSTER}">"#).as_bytes(),
        );
        fixture.fake.get(POSTER, 200, "image/jpeg", b"\xff\xd8jpeg");
        let posters = fixture.posters();

        let report = repair_missing_posters(&items, &posters).expect("repair should succeed");
        assert_eq!((report.checked, report.repaired, report.still_missing), (1, 1, 0));

        let repaired = &load_manifests(&items)[0].1;
        let poster = repaired.poster.clone().expect("poster should be replaced");
        assert!(posters.store().contains(&poster));
        assert_eq!(repaired.poster_source.as_deref(), Some(POSTER));
    }
}
