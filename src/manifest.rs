//! Item manifests: the finalised record of one ingested item on disk.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::config_persistence::write_json_atomic;
use crate::protocol::ItemManifest;
use crate::protocol_utils::slugify;

/// Where a finalised item landed and the URL it will be published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedItem {
    pub file: String,
    pub url: String,
    pub path: PathBuf,
}

/// Turns resolved item data into a published document.
pub trait ItemFinalizer {
    fn finalize(&self, manifest: &ItemManifest) -> Result<FinalizedItem, String>;
}

/// Writes `<date>-<slug>.json` manifests and derives `<site>/posts/<stem>/` URLs.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    manifest_dir: PathBuf,
    site_base_url: String,
}

impl ManifestWriter {
    pub fn new(manifest_dir: impl Into<PathBuf>, site_base_url: &str) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            site_base_url: site_base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn published_url(&self, stem: &str) -> String {
        format!("{}/posts/{}/", self.site_base_url, urlencoding::encode(stem))
    }

    fn stem_for(&self, manifest: &ItemManifest) -> String {
        let stem = format!("{}-{}", manifest.date, slugify(&manifest.title));
        let taken_by_other = read_manifest(&self.manifest_dir.join(format!("{stem}.json")))
            .is_some_and(|existing| existing.link != manifest.link);
        if taken_by_other {
            format!("{stem}-{}", slugify(&manifest.source))
        } else {
            stem
        }
    }
}

impl ItemFinalizer for ManifestWriter {
    fn finalize(&self, manifest: &ItemManifest) -> Result<FinalizedItem, String> {
        let stem = self.stem_for(manifest);
        let file = format!("{stem}.json");
        let path = self.manifest_dir.join(&file);
        write_json_atomic(&path, manifest)?;
        Ok(FinalizedItem {
            url: self.published_url(&stem),
            file,
            path,
        })
    }
}

pub fn read_manifest(path: &Path) -> Option<ItemManifest> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!("Ignoring malformed manifest {}: {err}", path.display());
            None
        }
    }
}

/// Every readable manifest in `dir`, sorted by file name.
pub fn load_manifests(dir: &Path) -> Vec<(PathBuf, ItemManifest)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|extension| extension == "json"))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .filter_map(|path| read_manifest(&path).map(|manifest| (path, manifest)))
        .collect()
}

/// Plain-text excerpt lines: the starring line, then summary lines.
pub fn excerpt_lines(manifest: &ItemManifest, max_lines: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cast) = manifest.cast.as_deref().filter(|cast| !cast.trim().is_empty()) {
        lines.push(format!("主演：{}", cast.trim()));
    }
    if let Some(summary) = manifest.summary.as_deref() {
        lines.extend(
            summary
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    lines.truncate(max_lines);
    lines
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{excerpt_lines, load_manifests, read_manifest, ItemFinalizer, ManifestWriter};
    use crate::protocol::ItemManifest;

    fn manifest(title: &str, link: &str) -> ItemManifest {
        ItemManifest {
            title: title.to_string(),
            link: link.to_string(),
            source: "douban weekly".to_string(),
            date: "2024-03-01".to_string(),
            ..ItemManifest::default()
        }
    }

    #[test]
    fn test_finalize_writes_manifest_and_derives_url() {
        let dir = TempDir::new().expect("temp dir should be created");
        let writer = ManifestWriter::new(dir.path(), "https://site.example.com/");

        let item = writer
            .finalize(&manifest("Perfect Days", "https://movie.douban.com/subject/1/"))
            .expect("finalize should succeed");
        assert_eq!(item.file, "2024-03-01-perfect-days.json");
        assert_eq!(item.url, "https://site.example.com/posts/2024-03-01-perfect-days/");
        let stored = read_manifest(&item.path).expect("manifest should be readable");
        assert_eq!(stored.title, "Perfect Days");
    }

    #[test]
    fn test_colliding_slug_from_other_item_gets_source_suffix() {
        let dir = TempDir::new().expect("temp dir should be created");
        let writer = ManifestWriter::new(dir.path(), "https://site.example.com");
        writer
            .finalize(&manifest("Dune", "https://movie.douban.com/subject/1/"))
            .expect("first finalize should succeed");

        let second = writer
            .finalize(&manifest("Dune", "https://movie.douban.com/subject/2/"))
            .expect("second finalize should succeed");
        assert_eq!(second.file, "2024-03-01-dune-douban-weekly.json");

        let again = writer
            .finalize(&manifest("Dune", "https://movie.douban.com/subject/1/"))
            .expect("same item should reuse its file");
        assert_eq!(again.file, "2024-03-01-dune.json");
        assert_eq!(load_manifests(dir.path()).len(), 2);
    }

    #[test]
    fn test_cjk_stem_is_percent_encoded_in_url() {
        let writer = ManifestWriter::new("unused", "https://site.example.com");
        assert_eq!(
            writer.published_url("2024-03-01-沙丘"),
            "https://site.example.com/posts/2024-03-01-%E6%B2%99%E4%B8%98/"
        );
    }

    #[test]
    fn test_excerpt_lines_start_with_cast_and_are_capped() {
        let mut item = manifest("Dune", "l");
        item.cast = Some("Timothée Chalamet / Zendaya".to_string());
        item.summary = Some("one\n\n two \nthree".to_string());
        assert_eq!(
            excerpt_lines(&item, 3),
            vec!["主演：Timothée Chalamet / Zendaya", "one", "two"]
        );
    }
}
