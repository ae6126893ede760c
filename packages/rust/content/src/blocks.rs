//! Rich-text block conversion.
//!
//! Blocks arrive as a flat sequence: text blocks (`_type: "block"`) with a
//! paragraph `style`, optional `listItem`/`level`, span `children`, and
//! `markDefs` for annotations, interleaved with embedded objects such as
//! images or videos.

use serde_json::{Value, json};

use folio_shared::node::TYPE_FIELD;
use folio_shared::slug_case;

/// Type tag of a plain text block.
const TEXT_BLOCK: &str = "block";

/// Discriminant field of a submodule.
pub const SUBMODULE_TYPE: &str = "type";

/// Submodule type emitted for a run of coalesced text blocks.
pub const TEXT_SUBMODULE: &str = "text";

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// One open list in the nesting stack.
struct ListFrame {
    tag: &'static str,
    item_open: bool,
}

/// Tracks list nesting across consecutive list-item blocks.
#[derive(Default)]
struct ListState {
    frames: Vec<ListFrame>,
}

impl ListState {
    /// Emit the tags needed to place a new `<li>` at `level` inside a `tag` list.
    fn enter_item(&mut self, out: &mut String, level: usize, tag: &'static str) {
        let level = level.max(1);
        while self.frames.len() > level {
            self.close_top(out);
        }

        if self.frames.len() == level {
            let switch = self.frames.last().is_some_and(|f| f.tag != tag);
            if switch {
                self.close_top(out);
            } else if let Some(top) = self.frames.last_mut() {
                if top.item_open {
                    out.push_str("</li>");
                    top.item_open = false;
                }
            }
        }

        while self.frames.len() < level {
            // A nested list must live inside an item of its parent.
            if let Some(parent) = self.frames.last_mut() {
                if !parent.item_open {
                    out.push_str("<li>");
                    parent.item_open = true;
                }
            }
            out.push('<');
            out.push_str(tag);
            out.push('>');
            self.frames.push(ListFrame {
                tag,
                item_open: false,
            });
        }

        out.push_str("<li>");
        if let Some(top) = self.frames.last_mut() {
            top.item_open = true;
        }
    }

    fn close_top(&mut self, out: &mut String) {
        if let Some(frame) = self.frames.pop() {
            if frame.item_open {
                out.push_str("</li>");
            }
            out.push_str("</");
            out.push_str(frame.tag);
            out.push('>');
        }
    }

    fn close_all(&mut self, out: &mut String) {
        while !self.frames.is_empty() {
            self.close_top(out);
        }
    }
}

/// Render a block sequence to one HTML string.
///
/// Non-text entries are skipped; they only break list runs.
pub fn convert_blocks_to_html(blocks: &[Value]) -> String {
    let mut out = String::new();
    let mut lists = ListState::default();

    for block in blocks {
        if !is_text_block(block) {
            lists.close_all(&mut out);
            continue;
        }

        let inner = render_children(block);
        match block.get("listItem").and_then(Value::as_str) {
            Some(style) => {
                let tag = if style == "number" { "ol" } else { "ul" };
                let level = block
                    .get("level")
                    .and_then(Value::as_u64)
                    .map_or(1, |l| usize::try_from(l).unwrap_or(1));
                lists.enter_item(&mut out, level, tag);
                out.push_str(&inner);
            }
            None => {
                lists.close_all(&mut out);
                let tag = style_tag(block.get("style").and_then(Value::as_str));
                out.push_str(&format!("<{tag}>{inner}</{tag}>"));
            }
        }
    }

    lists.close_all(&mut out);
    out
}

fn style_tag(style: Option<&str>) -> &'static str {
    match style {
        Some("h1") => "h1",
        Some("h2") => "h2",
        Some("h3") => "h3",
        Some("h4") => "h4",
        Some("h5") => "h5",
        Some("h6") => "h6",
        Some("blockquote") => "blockquote",
        _ => "p",
    }
}

fn render_children(block: &Value) -> String {
    let empty = Vec::new();
    let mark_defs = block
        .get("markDefs")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    block
        .get("children")
        .and_then(Value::as_array)
        .unwrap_or(&empty)
        .iter()
        .map(|span| render_span(span, mark_defs))
        .collect()
}

fn render_span(span: &Value, mark_defs: &[Value]) -> String {
    let text = span.get("text").and_then(Value::as_str).unwrap_or_default();
    let mut html = html_escape::encode_text(text).replace('\n', "<br>");

    let marks = span
        .get("marks")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    // First mark is the outermost element.
    for mark in marks.iter().rev().filter_map(Value::as_str) {
        if let Some((open, close)) = mark_tags(mark, mark_defs) {
            html = format!("{open}{html}{close}");
        }
    }
    html
}

fn mark_tags(mark: &str, mark_defs: &[Value]) -> Option<(String, String)> {
    let simple = |tag: &str| Some((format!("<{tag}>"), format!("</{tag}>")));
    match mark {
        "strong" => simple("strong"),
        "em" => simple("em"),
        "code" => simple("code"),
        "underline" => simple("u"),
        "strike-through" => simple("s"),
        key => {
            let def = mark_defs
                .iter()
                .find(|d| d.get("_key").and_then(Value::as_str) == Some(key))?;
            if def.get("_type").and_then(Value::as_str) != Some("link") {
                return None;
            }
            let href = def.get("href").and_then(Value::as_str).unwrap_or_default();
            let new_tab = ["blank", "newTab"]
                .iter()
                .any(|f| def.get(*f).and_then(Value::as_bool) == Some(true));
            let target = if new_tab {
                r#" target="_blank" rel="noopener noreferrer""#
            } else {
                ""
            };
            Some((
                format!(
                    r#"<a href="{}"{target}>"#,
                    html_escape::encode_double_quoted_attribute(href)
                ),
                "</a>".to_string(),
            ))
        }
    }
}

fn is_text_block(block: &Value) -> bool {
    block.get("_type").and_then(Value::as_str) == Some(TEXT_BLOCK)
}

// ---------------------------------------------------------------------------
// Submodules
// ---------------------------------------------------------------------------

/// Split a block sequence into typed submodules.
///
/// Consecutive text blocks coalesce into one `{type: "text", content}` entry.
/// Every embedded object flushes the pending run and becomes its own entry,
/// typed by its slug-cased `_type`; `embed` normalizes it first and may drop
/// it by returning `None`. The embed keeps its `_type`, so reference markers
/// and collection documents inside block content still resolve.
pub fn blocks_to_submodules<F>(blocks: Vec<Value>, mut embed: F) -> Vec<Value>
where
    F: FnMut(Value) -> Option<Value>,
{
    let mut out = Vec::new();
    let mut run: Vec<Value> = Vec::new();

    for block in blocks {
        if is_text_block(&block) {
            run.push(block);
            continue;
        }
        flush_text(&mut run, &mut out);

        let Some(Value::Object(mut submodule)) = embed(block) else {
            continue;
        };
        let kind = submodule
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .map(slug_case)
            .unwrap_or_else(|| "embed".to_string());
        submodule.insert(SUBMODULE_TYPE.into(), Value::String(kind));
        out.push(Value::Object(submodule));
    }

    flush_text(&mut run, &mut out);
    out
}

fn flush_text(run: &mut Vec<Value>, out: &mut Vec<Value>) {
    if run.is_empty() {
        return;
    }
    let content = convert_blocks_to_html(run.as_slice());
    run.clear();
    out.push(json!({"type": TEXT_SUBMODULE, "content": content}));
}
