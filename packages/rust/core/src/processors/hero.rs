use serde_json::{Map, Value};

use folio_shared::{Module, RequestContext};

use super::ModuleProcessor;

/// Fields rewritten when the editor ticks `uppercase`.
const UPPERCASE_FIELDS: [&str; 2] = ["eyebrow", "title"];

/// Hero banner: optional uppercase styling.
pub struct HeroProcessor;

impl ModuleProcessor for HeroProcessor {
    fn name(&self) -> &str {
        "hero"
    }

    fn process(&self, mut module: Module, _data: &Map<String, Value>, _ctx: &RequestContext) -> Module {
        if module.fields.get("uppercase").and_then(Value::as_bool) != Some(true) {
            return module;
        }
        for field in UPPERCASE_FIELDS {
            if let Some(Value::String(text)) = module.fields.get_mut(field) {
                *text = text.to_uppercase();
            }
        }
        module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uppercases_only_when_asked() {
        let ctx = RequestContext::new(Some("pl".into()), "en");
        let m = Module::from_value(json!({"_type": "hero", "title": "Cześć", "uppercase": true}))
            .unwrap();
        let out = HeroProcessor.process(m, &Map::new(), &ctx);
        assert_eq!(out.fields["title"], "CZEŚĆ");

        let m = Module::from_value(json!({"_type": "hero", "title": "Cześć"})).unwrap();
        let out = HeroProcessor.process(m, &Map::new(), &ctx);
        assert_eq!(out.fields["title"], "Cześć");
    }
}
