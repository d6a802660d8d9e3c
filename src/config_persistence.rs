use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;

/// Default config location: `<config dir>/marquee/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|path| path.join("marquee").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("marquee.toml"))
}

pub fn load_config_file(path: &Path) -> Config {
    let config_content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            return Config::default();
        }
    };

    match toml::from_str::<Config>(&config_content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            Config::default()
        }
    }
}

/// Writes the default config unless a file already exists. Returns whether a file was written.
pub fn write_default_config(path: &Path) -> Result<bool, String> {
    if path.exists() {
        return Ok(false);
    }
    let text = toml::to_string(&Config::default())
        .map_err(|err| format!("failed to serialize default config: {err}"))?;
    ensure_parent_dir(path)?;
    fs::write(path, text)
        .map_err(|err| format!("failed to write config to {}: {err}", path.display()))?;
    Ok(true)
}

/// Reads a JSON document, substituting `default` when the file is missing or malformed.
pub fn load_json_or_default<T: DeserializeOwned>(path: &Path, default: T) -> T {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} does not exist yet, starting empty", path.display());
            return default;
        }
        Err(err) => {
            warn!(
                "Failed to read {}. Starting from empty default. error={}",
                path.display(),
                err
            );
            return default;
        }
    };

    match serde_json::from_str::<T>(&text) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "Failed to parse {}. Starting from empty default. error={}",
                path.display(),
                err
            );
            default
        }
    }
}

/// Pretty-prints `value` to `path` through a temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| format!("failed to serialize {}: {err}", path.display()))?;
    ensure_parent_dir(path)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, text)
        .map_err(|err| format!("failed to write {}: {err}", temp_path.display()))?;
    fs::rename(&temp_path, path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        format!("failed to move {} into place: {err}", path.display())
    })
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }
    fs::create_dir_all(parent)
        .map_err(|err| format!("failed to create directory {}: {err}", parent.display()))
}
