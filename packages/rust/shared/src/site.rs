//! Static site configuration: routes, globals, reference expansions,
//! translations, and OpenGraph tags.
//!
//! These files are read once at startup and are read-only at render time.
//! Each file is optional; a missing file yields an empty section.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SiteSettings;
use crate::error::{FolioError, Result};
use crate::node::{ID_FIELD, TYPE_FIELD};

/// Route placeholder that captures the document slug.
const SLUG_PLACEHOLDER: &str = ":slug";

/// Top-level route whose type also applies to the site root.
const ROOT_PATTERN: &str = "/:slug";

/// Slug used for the site root.
pub const HOME_SLUG: &str = "home";

/// One `[[routes]]` entry in `routes.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Path pattern, e.g. `/blog/:slug`.
    pub pattern: String,
    /// Content type served under this pattern.
    #[serde(rename = "type")]
    pub doc_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct RoutesFile {
    #[serde(default)]
    routes: Vec<RouteEntry>,
}

/// A named site-wide scaffold fetched with every page (`globals.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSpec {
    /// Singleton document type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Raw backend query, overrides `type` on the query-language backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Endpoint slug on the REST backend (defaults to the global's name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// How a field of a referenced type is inlined during batch fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandField {
    /// The field holds a sequence of references rather than one.
    #[serde(default)]
    pub is_array: bool,
    /// Fields of the target to inline.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// `references.toml`: batch projection defaults and nested expansions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default = "default_reference_fields")]
    pub default_fields: Vec<String>,
    /// type → field → expansion.
    #[serde(default)]
    pub expand: BTreeMap<String, BTreeMap<String, ExpandField>>,
}

impl ReferenceConfig {
    /// Fields requested per batch document: identity fields first, then the
    /// configured defaults. Without `_id` fetched documents cannot be matched
    /// back to their references.
    pub fn projected_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = [ID_FIELD, TYPE_FIELD]
            .into_iter()
            .filter(|f| !self.default_fields.iter().any(|d| d == f))
            .map(String::from)
            .collect();
        fields.extend(self.default_fields.iter().cloned());
        fields
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            default_fields: default_reference_fields(),
            expand: BTreeMap::new(),
        }
    }
}

fn default_reference_fields() -> Vec<String> {
    ["_id", "_type", "slug", "title"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// key → language → text.
pub type Translations = BTreeMap<String, BTreeMap<String, String>>;

/// language → tag → value.
pub type OgTags = BTreeMap<String, BTreeMap<String, String>>;

/// All static site configuration.
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub routes: Vec<RouteEntry>,
    pub globals: BTreeMap<String, GlobalSpec>,
    pub references: ReferenceConfig,
    pub translations: Translations,
    pub og: OgTags,
}

/// Result of matching a request path against the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Language prefix found in the path, if any.
    pub language: Option<String>,
    /// Content type of the matched route (`None` for the catch-all).
    pub doc_type: Option<String>,
    /// Document slug.
    pub slug: String,
}

impl SiteConfig {
    /// Load every known file from `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let routes: RoutesFile = load_optional(&dir.join("routes.toml"))?.unwrap_or_default();
        let config = Self {
            routes: routes.routes,
            globals: load_optional(&dir.join("globals.toml"))?.unwrap_or_default(),
            references: load_optional(&dir.join("references.toml"))?.unwrap_or_default(),
            translations: load_optional(&dir.join("translations.toml"))?.unwrap_or_default(),
            og: load_optional(&dir.join("og.toml"))?.unwrap_or_default(),
        };
        config.validate()?;
        tracing::debug!(
            ?dir,
            routes = config.routes.len(),
            globals = config.globals.len(),
            translations = config.translations.len(),
            "loaded site config"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for route in &self.routes {
            if !route.pattern.starts_with('/') || !route.pattern.ends_with(SLUG_PLACEHOLDER) {
                return Err(FolioError::validation(format!(
                    "route pattern {:?} must start with '/' and end with {SLUG_PLACEHOLDER}",
                    route.pattern
                )));
            }
        }
        Ok(())
    }

    /// URL path prefix for a collection type: `/blog/:slug` → `/blog`.
    pub fn collection_path(&self, doc_type: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.doc_type == doc_type)
            .map(|r| {
                r.pattern
                    .trim_end_matches(SLUG_PLACEHOLDER)
                    .trim_end_matches('/')
            })
    }

    /// Split a request path into language, content type, and slug.
    ///
    /// A leading segment naming a site language is taken as the language.
    /// The longest matching route prefix wins; unmatched paths are treated
    /// as untyped documents whose slug is the remaining path. The root maps
    /// to [`HOME_SLUG`] with the type of the `/:slug` route, if there is one.
    pub fn resolve_route(&self, path: &str, settings: &SiteSettings) -> RouteMatch {
        let trimmed = path.trim_matches('/');
        let (language, rest) = match trimmed.split_once('/') {
            Some((first, rest)) if settings.is_language(first) => (Some(first.to_string()), rest),
            None if settings.is_language(trimmed) => (Some(trimmed.to_string()), ""),
            _ => (None, trimmed),
        };
        let rest = format!("/{rest}");

        let mut best: Option<(&RouteEntry, &str)> = None;
        for route in &self.routes {
            let prefix = route.pattern.trim_end_matches(SLUG_PLACEHOLDER);
            if let Some(slug) = rest.strip_prefix(prefix) {
                let longer = best.is_none_or(|(b, _)| b.pattern.len() < route.pattern.len());
                if !slug.is_empty() && !slug.contains('/') && longer {
                    best = Some((route, slug));
                }
            }
        }

        match best {
            Some((route, slug)) => RouteMatch {
                language,
                doc_type: Some(route.doc_type.clone()),
                slug: slug.to_string(),
            },
            // The site root is the home document of the top-level route.
            None if rest == "/" => RouteMatch {
                language,
                doc_type: self
                    .routes
                    .iter()
                    .find(|r| r.pattern == ROOT_PATTERN)
                    .map(|r| r.doc_type.clone()),
                slug: HOME_SLUG.to_string(),
            },
            None => RouteMatch {
                language,
                doc_type: None,
                slug: rest.trim_matches('/').to_string(),
            },
        }
    }

    /// Translations for `language`, falling back per key to `default_language`.
    pub fn translations_for(
        &self,
        language: &str,
        default_language: &str,
    ) -> BTreeMap<String, String> {
        self.translations
            .iter()
            .filter_map(|(key, by_lang)| {
                by_lang
                    .get(language)
                    .or_else(|| by_lang.get(default_language))
                    .map(|text| (key.clone(), text.clone()))
            })
            .collect()
    }

    /// OpenGraph tags for `language`, else the default language's set.
    pub fn og_for(&self, language: &str, default_language: &str) -> BTreeMap<String, String> {
        self.og
            .get(language)
            .or_else(|| self.og.get(default_language))
            .cloned()
            .unwrap_or_default()
    }
}

fn load_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        tracing::debug!(?path, "site config file not found, using empty section");
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| FolioError::io(path, e))?;
    toml::from_str(&content)
        .map(Some)
        .map_err(|e| FolioError::config(format!("failed to parse {}: {e}", path.display())))
}
