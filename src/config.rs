//! Persistent application configuration model and defaults.

use std::path::PathBuf;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Where queue, state, posters and manifests live.
    pub paths: PathsConfig,
    #[serde(default)]
    /// Outbound request behavior.
    pub http: HttpConfig,
    #[serde(default)]
    /// Candidate cascade tuning for poster and detail resolution.
    pub cascade: CascadeConfig,
    #[serde(default)]
    /// Publishing destinations and retry policy.
    pub dispatch: DispatchConfig,
    #[serde(default)]
    /// Public site the published items live under.
    pub site: SiteConfig,
    #[serde(default)]
    /// Optional search-index URL push.
    pub index_push: IndexPushConfig,
}

/// Filesystem layout. Relative paths resolve against the working directory.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_automation_dir")]
    pub automation_dir: PathBuf,
    #[serde(default = "default_queue_file")]
    pub queue_file: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_poster_dir")]
    pub poster_dir: PathBuf,
    /// Prefix of the local reference returned for stored posters.
    #[serde(default = "default_poster_url_prefix")]
    pub poster_url_prefix: String,
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
}

impl PathsConfig {
    pub fn queue_path(&self) -> PathBuf {
        self.automation_dir.join(&self.queue_file)
    }

    pub fn state_path(&self) -> PathBuf {
        self.automation_dir.join(&self.state_file)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts for page/API/search fetches on retryable failures.
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_image_referer")]
    pub image_referer: String,
    #[serde(default = "default_page_referer")]
    pub page_referer: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CascadeConfig {
    /// Cap on candidates taken from one web-search page.
    #[serde(default = "default_max_search_candidates")]
    pub max_search_candidates: usize,
    /// `{query}` is replaced with the URL-encoded search text.
    #[serde(default = "default_search_url_template")]
    pub search_url_template: String,
    #[serde(default = "default_search_query_suffix")]
    pub search_query_suffix: String,
    #[serde(default = "default_search_requests_per_minute")]
    pub search_requests_per_minute: u32,
    /// `{id}` is replaced with the subject identifier taken from the item link.
    #[serde(default = "default_detail_api_template")]
    pub detail_api_template: String,
    #[serde(default = "default_detail_api_referer_template")]
    pub detail_api_referer_template: String,
    #[serde(default = "default_abstract_api_template")]
    pub abstract_api_template: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_attempt_cap")]
    pub attempt_cap: u32,
    /// Adapter diagnostics are truncated to this many characters.
    #[serde(default = "default_message_max_chars")]
    pub message_max_chars: usize,
    #[serde(default = "default_platforms")]
    pub platforms: Vec<PlatformConfig>,
}

impl DispatchConfig {
    pub fn platform_names(&self) -> Vec<String> {
        self.platforms
            .iter()
            .map(|platform| platform.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Persisted platform metadata (non-secret fields only).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct IndexPushConfig {
    /// Empty disables the push.
    #[serde(default)]
    pub endpoint: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            automation_dir: default_automation_dir(),
            queue_file: default_queue_file(),
            state_file: default_state_file(),
            poster_dir: default_poster_dir(),
            poster_url_prefix: default_poster_url_prefix(),
            manifest_dir: default_manifest_dir(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_retries: default_request_retries(),
            user_agent: default_user_agent(),
            image_referer: default_image_referer(),
            page_referer: default_page_referer(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_search_candidates: default_max_search_candidates(),
            search_url_template: default_search_url_template(),
            search_query_suffix: default_search_query_suffix(),
            search_requests_per_minute: default_search_requests_per_minute(),
            detail_api_template: default_detail_api_template(),
            detail_api_referer_template: default_detail_api_referer_template(),
            abstract_api_template: default_abstract_api_template(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_cap: default_attempt_cap(),
            message_max_chars: default_message_max_chars(),
            platforms: default_platforms(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_site_base_url(),
        }
    }
}

fn default_automation_dir() -> PathBuf {
    PathBuf::from("automation")
}

fn default_queue_file() -> String {
    "publish_queue.json".to_string()
}

fn default_state_file() -> String {
    "publish_status.json".to_string()
}

fn default_poster_dir() -> PathBuf {
    PathBuf::from("static/posters")
}

fn default_poster_url_prefix() -> String {
    "/posters".to_string()
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from("content/items")
}

fn default_timeout_secs() -> u64 {
    8
}

fn default_request_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_image_referer() -> String {
    "https://movie.douban.com/".to_string()
}

fn default_page_referer() -> String {
    "https://www.bing.com/".to_string()
}

fn default_max_body_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_max_search_candidates() -> usize {
    15
}

fn default_search_url_template() -> String {
    "https://www.bing.com/images/search?q={query}".to_string()
}

fn default_search_query_suffix() -> String {
    "movie poster".to_string()
}

fn default_search_requests_per_minute() -> u32 {
    20
}

fn default_detail_api_template() -> String {
    "https://m.douban.com/rexxar/api/v2/movie/{id}?for_mobile=1".to_string()
}

fn default_detail_api_referer_template() -> String {
    "https://m.douban.com/movie/subject/{id}/".to_string()
}

fn default_abstract_api_template() -> String {
    "https://movie.douban.com/j/subject_abstract?subject_id={id}".to_string()
}

fn default_attempt_cap() -> u32 {
    3
}

fn default_message_max_chars() -> usize {
    500
}

fn default_platforms() -> Vec<PlatformConfig> {
    vec![
        PlatformConfig {
            name: "baijiahao".to_string(),
            endpoint: String::new(),
        },
        PlatformConfig {
            name: "toutiao".to_string(),
            endpoint: String::new(),
        },
    ]
}

fn default_site_base_url() -> String {
    "https://example.com".to_string()
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.http.timeout_secs, 8);
        assert_eq!(config.http.request_retries, 3);
        assert_eq!(config.cascade.max_search_candidates, 15);
        assert_eq!(config.dispatch.attempt_cap, 3);
        assert_eq!(
            config.dispatch.platform_names(),
            vec!["baijiahao".to_string(), "toutiao".to_string()]
        );
        assert!(config.index_push.endpoint.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_missing_fields_with_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [dispatch]
            attempt_cap = 5

            [[dispatch.platforms]]
            name = "webhook"
            endpoint = "https://hooks.example.com/publish"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(parsed.dispatch.attempt_cap, 5);
        assert_eq!(parsed.dispatch.message_max_chars, 500);
        assert_eq!(parsed.dispatch.platform_names(), vec!["webhook".to_string()]);
        assert_eq!(parsed.paths.queue_file, "publish_queue.json");
        assert_eq!(parsed.http.timeout_secs, 8);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("config should serialize");
        let parsed: Config = toml::from_str(&text).expect("serialized config should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_platform_names_skip_blank_entries() {
        let mut config = Config::default();
        config.dispatch.platforms[0].name = "  ".to_string();
        assert_eq!(config.dispatch.platform_names(), vec!["toutiao".to_string()]);
    }

    #[test]
    fn test_paths_join_automation_dir() {
        let config = Config::default();
        assert_eq!(
            config.paths.queue_path(),
            std::path::PathBuf::from("automation/publish_queue.json")
        );
        assert_eq!(
            config.paths.state_path(),
            std::path::PathBuf::from("automation/publish_status.json")
        );
    }
}
