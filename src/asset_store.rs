//! Content-addressed poster storage keyed by a hash of the source locator.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

const KEY_LEN: usize = 20;
const KNOWN_IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".webp", ".gif", ".avif"];
const DEFAULT_EXTENSION: &str = ".jpg";

/// Result of a persist call. `written` is false when the object already existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub file_name: String,
    /// Canonical local reference, e.g. `/posters/<key>.jpg`.
    pub local_ref: String,
    pub path: PathBuf,
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
    url_prefix: String,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable identifier for `locator` with an inferred extension.
    pub fn file_name_for(locator: &str, content_type: &str) -> String {
        format!(
            "{}{}",
            content_key(locator),
            guess_image_extension(locator, content_type)
        )
    }

    /// Persists `bytes` fetched from `locator` unless an object with the same
    /// identifier exists. Empty payloads are refused.
    pub fn persist(
        &self,
        locator: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredAsset, String> {
        if bytes.is_empty() {
            return Err(format!("refusing to store empty payload from {locator}"));
        }
        let file_name = Self::file_name_for(locator, content_type);
        let path = self.root.join(&file_name);
        let local_ref = format!("{}/{}", self.url_prefix, file_name);

        if path.exists() {
            debug!("asset {} already stored, skipping write", file_name);
            return Ok(StoredAsset {
                file_name,
                local_ref,
                path,
                written: false,
            });
        }

        fs::create_dir_all(&self.root).map_err(|err| {
            format!("failed to create asset directory {}: {err}", self.root.display())
        })?;
        let temp_path = path.with_extension("part");
        fs::write(&temp_path, bytes)
            .map_err(|err| format!("failed to write {}: {err}", temp_path.display()))?;
        fs::rename(&temp_path, &path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            format!("failed to move asset into {}: {err}", path.display())
        })?;

        Ok(StoredAsset {
            file_name,
            local_ref,
            path,
            written: true,
        })
    }

    /// Returns `true` when the object behind a local reference is on disk.
    pub fn contains(&self, local_ref: &str) -> bool {
        let file_name = local_ref.rsplit('/').next().unwrap_or_default();
        !file_name.is_empty() && self.root.join(file_name).is_file()
    }
}

/// First [`KEY_LEN`] hex characters of the locator's MD5 digest.
pub fn content_key(locator: &str) -> String {
    let digest = format!("{:x}", md5::compute(locator.as_bytes()));
    digest[..KEY_LEN].to_string()
}

/// Known extension in the locator, else the content-type family, else `.jpg`.
pub fn guess_image_extension(locator: &str, content_type: &str) -> &'static str {
    let lower_locator = locator.to_ascii_lowercase();
    if let Some(extension) = KNOWN_IMAGE_EXTENSIONS
        .iter()
        .copied()
        .find(|extension| lower_locator.contains(extension))
    {
        return extension;
    }

    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("png") {
        ".png"
    } else if content_type.contains("webp") {
        ".webp"
    } else if content_type.contains("gif") {
        ".gif"
    } else if content_type.contains("avif") {
        ".avif"
    } else {
        DEFAULT_EXTENSION
    }
}
