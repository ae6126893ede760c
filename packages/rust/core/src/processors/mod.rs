//! Module and page processors.
//!
//! A processor optionally declares remote data it needs ([`FetchDescriptor`]s)
//! and rewrites its module once that data has been normalized and resolved.
//! Processors are registered explicitly per module `type` or page `_type`.

mod hero;
mod post_list;
mod related;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use folio_shared::{Module, RequestContext};
use folio_source::FetchRequest;

pub use hero::HeroProcessor;
pub use post_list::PostListProcessor;
pub use related::RelatedPostsProcessor;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One named remote call a processor needs before it can run.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchDescriptor {
    /// Key the result is stored under in the processor's data map.
    pub name: String,
    pub request: FetchRequest,
}

impl FetchDescriptor {
    pub fn new(name: impl Into<String>, request: FetchRequest) -> Self {
        Self {
            name: name.into(),
            request,
        }
    }
}

/// Post-processing for one module type.
pub trait ModuleProcessor: Send + Sync {
    /// Human-readable processor name for tracing.
    fn name(&self) -> &str;

    /// Remote data this module needs. Defaults to none.
    ///
    /// `module` is already localized; draft modules are never planned.
    /// References inside it are still unresolved markers.
    fn fetch_data(&self, _module: &Module, _ctx: &RequestContext) -> Vec<FetchDescriptor> {
        Vec::new()
    }

    /// Rewrite the module. `data` holds the resolved results by descriptor
    /// name; failed fetches are absent.
    fn process(&self, module: Module, data: &Map<String, Value>, ctx: &RequestContext) -> Module;
}

/// Post-processing for one page document type.
pub trait PageProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_data(&self, _page: &Value, _ctx: &RequestContext) -> Vec<FetchDescriptor> {
        Vec::new()
    }

    fn process(&self, page: Value, data: &Map<String, Value>, ctx: &RequestContext) -> Value;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Processors keyed by module `type` and by page document type.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    modules: HashMap<String, Arc<dyn ModuleProcessor>>,
    pages: HashMap<String, Arc<dyn PageProcessor>>,
}

impl ProcessorRegistry {
    /// An empty registry: every module passes through unprocessed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in processors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_module("hero", Arc::new(HeroProcessor));
        registry.register_module("post-list", Arc::new(PostListProcessor::default()));
        registry.register_page("post", Arc::new(RelatedPostsProcessor::default()));
        registry
    }

    pub fn register_module(&mut self, kind: impl Into<String>, processor: Arc<dyn ModuleProcessor>) {
        self.modules.insert(kind.into(), processor);
    }

    pub fn register_page(&mut self, doc_type: impl Into<String>, processor: Arc<dyn PageProcessor>) {
        self.pages.insert(doc_type.into(), processor);
    }

    pub fn module(&self, kind: &str) -> Option<&dyn ModuleProcessor> {
        self.modules.get(kind).map(Arc::as_ref)
    }

    pub fn page(&self, doc_type: &str) -> Option<&dyn PageProcessor> {
        self.pages.get(doc_type).map(Arc::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(registry.module("hero").map(|p| p.name()), Some("hero"));
        assert_eq!(registry.module("post-list").map(|p| p.name()), Some("post-list"));
        assert!(registry.page("post").is_some());
        assert!(registry.module("gallery").is_none());
    }

    #[test]
    fn empty_registry_has_nothing() {
        let registry = ProcessorRegistry::new();
        assert!(registry.module("hero").is_none());
        assert!(registry.page("post").is_none());
    }
}
