//! Application configuration for Folio.
//!
//! User config lives at `~/.folio/folio.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FolioError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "folio.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".folio";

// ---------------------------------------------------------------------------
// Config structs (matching folio.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Content backend connection.
    #[serde(default)]
    pub source: SourceConfig,

    /// Response cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Site-level rendering settings.
    #[serde(default)]
    pub site: SiteSettings,
}

/// Which backend flavour the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generic REST document API (`{docs: [...]}` lists, direct-object documents).
    Rest,
    /// Query-language document store (`{result: ...}` envelopes).
    Query,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Backend flavour.
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    /// Base URL of the content API.
    #[serde(default)]
    pub base_url: String,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Dataset name (query-language backend only).
    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// API version segment (query-language backend only).
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            base_url: String::new(),
            token_env: None,
            dataset: default_dataset(),
            api_version: default_api_version(),
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::Rest
}
fn default_dataset() -> String {
    "production".into()
}
fn default_api_version() -> String {
    "2023-05-03".into()
}
fn default_source_timeout() -> u64 {
    10
}

impl SourceConfig {
    /// Read the bearer token from the configured env var, if any.
    pub fn token(&self) -> Option<String> {
        let var = self.token_env.as_deref()?;
        match std::env::var(var) {
            Ok(val) if !val.is_empty() => Some(val),
            _ => {
                tracing::debug!(var, "token env var not set, sending unauthenticated requests");
                None
            }
        }
    }

    /// HTTP timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse and check the base URL.
    pub fn parsed_base_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(FolioError::config("source.base_url is not set"));
        }
        let url = Url::parse(self.base_url.trim()).map_err(|e| {
            FolioError::config(format!("source.base_url {:?} is invalid: {e}", self.base_url))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(FolioError::config(format!(
                "source.base_url must be http or https, got {other}"
            ))),
        }
    }
}

/// Where cache entries are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// libSQL database file, survives restarts.
    Sqlite,
    /// Process-local map.
    Memory,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Storage backend.
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    /// Database file path for the sqlite backend.
    #[serde(default = "default_cache_path")]
    pub path: String,

    /// Default entry lifetime.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Prefix for every cache key.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            path: default_cache_path(),
            ttl_secs: default_ttl(),
            namespace: default_namespace(),
        }
    }
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Sqlite
}
fn default_cache_path() -> String {
    "~/.folio/cache.db".into()
}
fn default_ttl() -> u64 {
    3600
}
fn default_namespace() -> String {
    "folio".into()
}

impl CacheConfig {
    /// Cache file path with a leading `~` expanded.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

/// How block content is emitted by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockOutput {
    /// Typed submodules, text runs coalesced.
    Submodules,
    /// One flat HTML string.
    Html,
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettings {
    /// Directory with routes/globals/references/translations/og TOML files.
    #[serde(default = "default_site_dir")]
    pub config_dir: String,

    /// Language used when a request carries none, and as localization fallback.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Languages the site publishes in.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// ISO language code to backend locale tag.
    #[serde(default = "default_locales")]
    pub locales: BTreeMap<String, String>,

    /// Upper bound for each orchestrated fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// CDN base for image assets, e.g. `https://cdn.example.com/images/<project>/<dataset>`.
    #[serde(default = "default_image_cdn")]
    pub image_cdn: String,

    /// Identifier prefix marking an image asset.
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Block content output shape.
    #[serde(default = "default_block_output")]
    pub block_output: BlockOutput,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            config_dir: default_site_dir(),
            default_language: default_language(),
            languages: default_languages(),
            locales: default_locales(),
            fetch_timeout_secs: default_fetch_timeout(),
            image_cdn: default_image_cdn(),
            image_prefix: default_image_prefix(),
            block_output: default_block_output(),
        }
    }
}

fn default_site_dir() -> String {
    "~/.folio/site".into()
}
fn default_language() -> String {
    "en".into()
}
fn default_languages() -> Vec<String> {
    vec!["en".into(), "pl".into()]
}
fn default_locales() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("en".to_string(), "en-US".to_string()),
        ("pl".to_string(), "pl-PL".to_string()),
    ])
}
fn default_fetch_timeout() -> u64 {
    8
}
fn default_image_cdn() -> String {
    "https://cdn.example.com/images".into()
}
fn default_image_prefix() -> String {
    "image-".into()
}
fn default_block_output() -> BlockOutput {
    BlockOutput::Submodules
}

impl SiteSettings {
    /// Whether `code` is one of the site's languages.
    pub fn is_language(&self, code: &str) -> bool {
        self.languages.iter().any(|l| l == code)
    }

    /// Map an ISO language code to the backend locale tag.
    ///
    /// Unknown codes fall back to the default language's locale, then to the
    /// default language code itself.
    pub fn locale_for(&self, language: Option<&str>) -> String {
        language
            .and_then(|code| self.locales.get(code))
            .or_else(|| self.locales.get(&self.default_language))
            .cloned()
            .unwrap_or_else(|| self.default_language.clone())
    }

    /// Orchestrator per-task bound as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Static config directory with a leading `~` expanded.
    pub fn resolved_config_dir(&self) -> Result<PathBuf> {
        expand_home(&self.config_dir)
    }
}

impl AppConfig {
    /// Reject configurations that cannot serve any request.
    pub fn validate(&self) -> Result<()> {
        self.source.parsed_base_url()?;
        if !self.site.is_language(&self.site.default_language) {
            return Err(FolioError::config(format!(
                "site.default_language {:?} is not listed in site.languages",
                self.site.default_language
            )));
        }
        if self.cache.namespace.is_empty() {
            return Err(FolioError::config("cache.namespace must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.folio/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| FolioError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.folio/folio.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FolioError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FolioError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FolioError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FolioError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FolioError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| FolioError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}
