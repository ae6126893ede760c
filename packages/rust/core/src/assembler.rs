//! Page assembly: route → document → concurrent fetches → transform → processors.
//!
//! Stages per request:
//! 0. Resolve the route and fetch the page document
//! 1. Dispatch every processor fetch and every global concurrently
//! 2. Settle all of them, each bounded by the fetch timeout
//! 3. Reshape results into per-module, per-global, and page data
//! 4. Normalize and resolve the merged tree in one pass
//! 5. Run module and page processors
//! 6. Attach translations and OpenGraph tags

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{Span, debug, error, info, instrument, warn};
use uuid::Uuid;

use folio_cache::ResponseCache;
use folio_content::Normalizer;
use folio_shared::{
    AppConfig, BlockOutput, FolioError, GlobalSpec, Module, RequestContext, Result, Settled,
    SiteConfig, SiteSettings,
};
use folio_source::{ContentSource, DocumentLookup, FetchRequest};

use crate::processors::{FetchDescriptor, ProcessorRegistry};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A fetch that did not settle successfully. Diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    /// `module[2].items`, `global.header`, or `page.related`.
    pub target: String,
    pub error: String,
    /// Backend trouble (network, status, timeout, bad body) as opposed to a
    /// local fault such as a bad request or a crashed task.
    pub transient: bool,
}

/// A fully assembled page, ready for a renderer.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledPage {
    pub request_id: Uuid,
    pub language: String,
    /// Page document without its modules.
    pub page: Value,
    pub modules: Vec<Module>,
    pub globals: Map<String, Value>,
    pub translations: BTreeMap<String, String>,
    pub og: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FetchFailure>,
}

#[derive(Debug, Clone)]
pub enum PageOutcome {
    Found(Box<AssembledPage>),
    NotFound { path: String },
}

// ---------------------------------------------------------------------------
// Internal task bookkeeping
// ---------------------------------------------------------------------------

/// Where a settled result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Module { index: usize, name: String },
    Global(String),
    Page(String),
}

impl Slot {
    fn label(&self) -> String {
        match self {
            Self::Module { index, name } => format!("module[{index}].{name}"),
            Self::Global(name) => format!("global.{name}"),
            Self::Page(name) => format!("page.{name}"),
        }
    }
}

enum Call {
    Fetch(FetchRequest),
    Global { name: String, spec: GlobalSpec },
}

struct Task {
    slot: Slot,
    call: Call,
}

/// Data gathered for one request after the settle barrier.
#[derive(Default)]
struct Reshaped {
    modules: Vec<Map<String, Value>>,
    globals: Map<String, Value>,
    page: Map<String, Value>,
    failures: Vec<FetchFailure>,
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Coordinates everything needed to render one page.
pub struct PageAssembler {
    source: Arc<dyn ContentSource>,
    site: Arc<SiteConfig>,
    settings: SiteSettings,
    registry: ProcessorRegistry,
    fetch_timeout: Duration,
}

impl PageAssembler {
    pub fn new(
        source: Arc<dyn ContentSource>,
        site: Arc<SiteConfig>,
        settings: SiteSettings,
        registry: ProcessorRegistry,
    ) -> Self {
        let fetch_timeout = settings.fetch_timeout();
        Self {
            source,
            site,
            settings,
            registry,
            fetch_timeout,
        }
    }

    /// Wire up cache, backend, static site files, and built-in processors.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let cache = match ResponseCache::from_config(&config.cache).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "response cache unavailable, fetching directly");
                None
            }
        };
        let source = folio_source::connect(config, cache)?;
        let site = SiteConfig::load_dir(&config.site.resolved_config_dir()?)?;
        Ok(Self::new(
            source,
            Arc::new(site),
            config.site.clone(),
            ProcessorRegistry::with_builtins(),
        ))
    }

    /// Override the per-fetch time bound.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Assemble the page at `path`. `language` overrides the path's prefix.
    ///
    /// Individual fetch failures degrade the affected data; only a failed
    /// page lookup is an error.
    #[instrument(skip(self), fields(request_id = tracing::field::Empty))]
    pub async fn assemble(&self, path: &str, language: Option<&str>) -> Result<PageOutcome> {
        // Stage 0: route and page document.
        let route = self.site.resolve_route(path, &self.settings);
        let language = language
            .map(String::from)
            .or(route.language.clone())
            .unwrap_or_else(|| self.settings.default_language.clone());
        let ctx = RequestContext::new(Some(language), self.settings.default_language.clone());
        Span::current().record("request_id", tracing::field::display(ctx.request_id));

        let lookup = DocumentLookup::new(route.slug.clone(), route.doc_type.clone());
        let Some(mut page) = self
            .source
            .fetch_document(&lookup, ctx.language.as_deref())
            .await?
        else {
            info!(slug = %route.slug, "page not found");
            return Ok(PageOutcome::NotFound {
                path: path.to_string(),
            });
        };

        let raw_modules = take_modules(&mut page);
        let page_type = page
            .get("_type")
            .and_then(Value::as_str)
            .map(String::from)
            .or(route.doc_type.clone());

        // Stages 1-3.
        let tasks = self.plan(&raw_modules, &page, page_type.as_deref(), &ctx);
        debug!(modules = raw_modules.len(), tasks = tasks.len(), "dispatching fetches");
        let settled = self.settle(self.dispatch(tasks, &ctx)).await;
        let reshaped = reshape(settled, raw_modules.len());

        // Stage 4: one tree so module data is localized and resolved as well.
        let modules_tree: Vec<Value> = raw_modules
            .into_iter()
            .zip(reshaped.modules)
            .map(|(module, data)| json!({"module": module, "data": data}))
            .collect();
        let merged = json!({
            "page": page,
            "modules": modules_tree,
            "globals": reshaped.globals,
            "data": reshaped.page,
        });
        let merged =
            folio_content::transform(self.source.as_ref(), merged, &ctx, &self.site, &self.settings)
                .await;
        let Value::Object(mut merged) = merged else {
            return Ok(PageOutcome::NotFound {
                path: path.to_string(),
            });
        };
        let Some(page) = merged.remove("page") else {
            info!("page document is unpublished");
            return Ok(PageOutcome::NotFound {
                path: path.to_string(),
            });
        };

        // Stage 5.
        let modules = self.process_modules(merged.remove("modules"), &ctx);
        let page_data = into_map(merged.remove("data"));
        let page = self.process_page(page, page_type.as_deref(), &page_data, &ctx);

        // Stage 6.
        let lang = ctx.effective_language();
        let default = &self.settings.default_language;
        let assembled = AssembledPage {
            request_id: ctx.request_id,
            language: lang.to_string(),
            page,
            modules,
            globals: into_map(merged.remove("globals")),
            translations: self.site.translations_for(lang, default),
            og: self.site.og_for(lang, default),
            failures: reshaped.failures,
        };

        info!(
            modules = assembled.modules.len(),
            globals = assembled.globals.len(),
            failures = assembled.failures.len(),
            "page assembled"
        );
        Ok(PageOutcome::Found(Box::new(assembled)))
    }

    /// Stage 1 planning: every fetch the page needs.
    fn plan(
        &self,
        modules: &[Value],
        page: &Value,
        page_type: Option<&str>,
        ctx: &RequestContext,
    ) -> Vec<Task> {
        let mut tasks = Vec::new();

        // Processors plan against a localized view; drafts plan nothing.
        let classifier = folio_content::classifier_for(&self.settings);
        let mut view = Normalizer::new(&classifier, ctx, BlockOutput::Html);

        for (index, raw) in modules.iter().enumerate() {
            let Some(module) = view.normalize(raw.clone()).and_then(Module::from_value) else {
                continue;
            };
            let Some(processor) = self.registry.module(&module.kind) else {
                continue;
            };
            for FetchDescriptor { name, request } in processor.fetch_data(&module, ctx) {
                tasks.push(Task {
                    slot: Slot::Module { index, name },
                    call: Call::Fetch(request),
                });
            }
        }

        for (name, spec) in &self.site.globals {
            tasks.push(Task {
                slot: Slot::Global(name.clone()),
                call: Call::Global {
                    name: name.clone(),
                    spec: spec.clone(),
                },
            });
        }

        if let Some(processor) = page_type.and_then(|t| self.registry.page(t)) {
            let page = view.normalize(page.clone()).unwrap_or(Value::Null);
            for FetchDescriptor { name, request } in processor.fetch_data(&page, ctx) {
                tasks.push(Task {
                    slot: Slot::Page(name),
                    call: Call::Fetch(request),
                });
            }
        }

        tasks
    }

    /// Stage 1 dispatch: one spawned task per fetch, each with its own timeout.
    fn dispatch(&self, tasks: Vec<Task>, ctx: &RequestContext) -> Vec<(Slot, JoinHandle<Result<Value>>)> {
        let timeout = self.fetch_timeout;
        tasks
            .into_iter()
            .map(|Task { slot, call }| {
                let source = self.source.clone();
                let language = ctx.language.clone();
                let handle = tokio::spawn(async move {
                    let work = async {
                        match &call {
                            Call::Fetch(request) => source.fetch(request, language.as_deref()).await,
                            Call::Global { name, spec } => source
                                .fetch_global(name, spec, language.as_deref())
                                .await
                                .map(|doc| doc.unwrap_or(Value::Null)),
                        }
                    };
                    tokio::time::timeout(timeout, work)
                        .await
                        .map_err(|_| FolioError::Timeout(timeout))?
                });
                (slot, handle)
            })
            .collect()
    }

    /// Stage 2: wait for every task, turning errors into failure entries.
    async fn settle(&self, handles: Vec<(Slot, JoinHandle<Result<Value>>)>) -> Vec<(Slot, Settled)> {
        let mut settled = Vec::with_capacity(handles.len());
        for (slot, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(value)) => Settled::Ok { value },
                Ok(Err(e)) => {
                    let transient = e.is_transient();
                    if transient {
                        warn!(target_slot = %slot.label(), error = %e, "fetch failed, degrading");
                    } else {
                        error!(target_slot = %slot.label(), error = %e, "fetch could not run");
                    }
                    Settled::Failed {
                        error: e.to_string(),
                        transient,
                    }
                }
                Err(e) => {
                    error!(target_slot = %slot.label(), error = %e, "fetch task aborted");
                    Settled::Failed {
                        error: format!("task aborted: {e}"),
                        transient: false,
                    }
                }
            };
            settled.push((slot, outcome));
        }
        settled
    }

    /// Stage 5 for modules. Processors cannot change `type` or `_id`.
    fn process_modules(&self, tree: Option<Value>, ctx: &RequestContext) -> Vec<Module> {
        let Some(Value::Array(entries)) = tree else {
            return Vec::new();
        };

        entries
            .into_iter()
            .filter_map(|entry| {
                let Value::Object(mut entry) = entry else {
                    return None;
                };
                // Drafts were dropped by normalization.
                let module = Module::from_value(entry.remove("module")?)?;
                let data = into_map(entry.remove("data"));

                let Some(processor) = self.registry.module(&module.kind) else {
                    return Some(module);
                };
                let kind = module.kind.clone();
                let id = module.id().map(String::from);
                let mut processed = processor.process(module, &data, ctx);

                if processed.kind != kind {
                    warn!(processor = processor.name(), "processor changed module type, restoring");
                    processed.kind = kind;
                }
                if let Some(id) = id {
                    if processed.id() != Some(id.as_str()) {
                        warn!(processor = processor.name(), "processor changed module id, restoring");
                        processed.fields.insert("_id".into(), Value::String(id));
                    }
                }
                Some(processed)
            })
            .collect()
    }

    /// Stage 5 for the page document.
    fn process_page(
        &self,
        page: Value,
        page_type: Option<&str>,
        data: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Value {
        let Some(processor) = page_type.and_then(|t| self.registry.page(t)) else {
            return page;
        };
        let kept: Vec<(&str, Value)> = ["_type", "_id"]
            .into_iter()
            .filter_map(|f| page.get(f).cloned().map(|v| (f, v)))
            .collect();

        let mut processed = processor.process(page, data, ctx);
        if let Value::Object(fields) = &mut processed {
            for (field, value) in kept {
                fields.insert(field.to_string(), value);
            }
        }
        processed
    }
}

/// Detach the module sequence from the page document.
fn take_modules(page: &mut Value) -> Vec<Value> {
    match page.as_object_mut().and_then(|p| p.remove("modules")) {
        Some(Value::Array(modules)) => modules,
        _ => Vec::new(),
    }
}

/// Stage 3: route settled values to their module, global, or page slot.
fn reshape(settled: Vec<(Slot, Settled)>, module_count: usize) -> Reshaped {
    let mut out = Reshaped {
        modules: vec![Map::new(); module_count],
        ..Default::default()
    };

    for (slot, outcome) in settled {
        let value = match outcome {
            Settled::Ok { value } => value,
            Settled::Failed { error, transient } => {
                out.failures.push(FetchFailure {
                    target: slot.label(),
                    error,
                    transient,
                });
                continue;
            }
        };
        match slot {
            Slot::Module { index, name } => {
                if let Some(data) = out.modules.get_mut(index) {
                    data.insert(name, value);
                }
            }
            Slot::Global(name) => {
                out.globals.insert(name, value);
            }
            Slot::Page(name) => {
                out.page.insert(name, value);
            }
        }
    }
    out
}

fn into_map(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
