//! Seen titles, links and guids, loaded from existing manifests.

use std::collections::HashSet;
use std::path::Path;

use crate::manifest::load_manifests;
use crate::protocol::FeedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTitle,
    GuidSeenThisRun,
    LinkPublished,
    TitlePublished,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::EmptyTitle => "empty title",
            SkipReason::GuidSeenThisRun => "guid already seen this run",
            SkipReason::LinkPublished => "link already published",
            SkipReason::TitlePublished => "title already published",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    titles: HashSet<String>,
    links: HashSet<String>,
    guids: HashSet<String>,
}

/// Builds the index from every manifest in `manifest_dir`.
pub fn load_existing_index(manifest_dir: &Path) -> DedupIndex {
    let mut index = DedupIndex::default();
    for (_, manifest) in load_manifests(manifest_dir) {
        index.insert_published(&manifest.title, &manifest.link);
    }
    index
}

impl DedupIndex {
    fn insert_published(&mut self, title: &str, link: &str) {
        let title = title.trim();
        if !title.is_empty() {
            self.titles.insert(title.to_string());
        }
        let link = link.trim();
        if !link.is_empty() {
            self.links.insert(link.to_string());
        }
    }

    /// Why `record` must be skipped, or `None` when it is new.
    pub fn check(&self, record: &FeedRecord) -> Option<SkipReason> {
        let title = record.title.trim();
        if title.is_empty() {
            return Some(SkipReason::EmptyTitle);
        }
        let guid = record.guid_or_link();
        if !guid.is_empty() && self.guids.contains(guid) {
            return Some(SkipReason::GuidSeenThisRun);
        }
        if self.links.contains(record.link.trim()) {
            return Some(SkipReason::LinkPublished);
        }
        if self.titles.contains(title) {
            return Some(SkipReason::TitlePublished);
        }
        None
    }

    /// Records a finalised item so later records in the run dedupe against it.
    pub fn remember(&mut self, record: &FeedRecord) {
        let guid = record.guid_or_link();
        if !guid.is_empty() {
            self.guids.insert(guid.to_string());
        }
        self.insert_published(&record.title, &record.link);
    }

    pub fn published_titles(&self) -> usize {
        self.titles.len()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{load_existing_index, DedupIndex, SkipReason};
    use crate::config_persistence::write_json_atomic;
    use crate::protocol::{FeedRecord, ItemManifest};

    fn record(title: &str, link: &str, guid: &str) -> FeedRecord {
        FeedRecord {
            title: title.to_string(),
            link: link.to_string(),
            guid: guid.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_index_loads_published_titles_and_links() {
        let dir = TempDir::new().expect("temp dir should be created");
        let manifest = ItemManifest {
            title: "Old".to_string(),
            link: "https://movie.douban.com/subject/1/".to_string(),
            ..ItemManifest::default()
        };
        write_json_atomic(&dir.path().join("2024-01-01-old.json"), &manifest)
            .expect("manifest fixture should be written");

        let index = load_existing_index(dir.path());
        assert_eq!(index.published_titles(), 1);
        assert_eq!(
            index.check(&record("Other", "https://movie.douban.com/subject/1/", "g")),
            Some(SkipReason::LinkPublished)
        );
        assert_eq!(
            index.check(&record("Old", "https://movie.douban.com/subject/2/", "g")),
            Some(SkipReason::TitlePublished)
        );
        assert_eq!(index.check(&record("New", "https://movie.douban.com/subject/3/", "g")), None);
    }

    #[test]
    fn test_remember_dedupes_guid_within_run() {
        let mut index = DedupIndex::default();
        let first = record("A", "https://a/", "guid-1");
        assert_eq!(index.check(&first), None);
        index.remember(&first);
        assert_eq!(
            index.check(&record("B", "https://b/", "guid-1")),
            Some(SkipReason::GuidSeenThisRun)
        );
    }

    #[test]
    fn test_blank_title_is_skipped() {
        let index = DedupIndex::default();
        assert_eq!(index.check(&record("  ", "https://a/", "")), Some(SkipReason::EmptyTitle));
    }

    #[test]
    fn test_missing_manifest_dir_yields_empty_index() {
        let dir = TempDir::new().expect("temp dir should be created");
        let index = load_existing_index(&dir.path().join("missing"));
        assert_eq!(index.published_titles(), 0);
    }
}
