use std::sync::Arc;

use handlebars::Handlebars;
use serde_json::Value;

use crate::core::{error::Error, ports::TemplateRenderer};

/// `{{variable}}` substitution for prompts and webhook payloads.
///
/// Output is never HTML-escaped and unknown variables render as empty strings.
#[derive(Clone)]
pub struct HandlebarsRenderer {
    engine: Arc<Handlebars<'static>>,
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        Self {
            engine: Arc::new(handlebars),
        }
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, data: &Value) -> crate::core::Result<String> {
        self.engine
            .render_template(template, data)
            .map_err(|e| Error::TemplateRendering(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_without_escaping() {
        let renderer = HandlebarsRenderer::new();
        let out = renderer
            .render(
                r#"{"name":"{{testName}}","missing":"{{nope}}"}"#,
                &json!({ "testName": "Q&A <smoke>" }),
            )
            .unwrap();
        assert_eq!(out, r#"{"name":"Q&A <smoke>","missing":""}"#);
    }

    #[test]
    fn reports_malformed_templates() {
        let err = HandlebarsRenderer::new()
            .render("{{#if}", &json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::TemplateRendering(_)));
    }
}
