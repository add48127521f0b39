use minijinja::{AutoEscape, Environment};
use minijinja::value::Value;
use serde::Serialize;

use crate::error::{Result, Chainable};
use crate::value::Dict;
use crate::templating::{Engine, EngineInit};

/// A [`minijinja`] environment in which every partial is a named template.
///
/// Every template is HTML-escaped, like `{{ }}` in mustache. Use `|safe` to
/// emit trusted markup verbatim.
#[derive(Debug)]
pub struct MiniJinjaEngine {
    env: Environment<'static>,
}

impl EngineInit for MiniJinjaEngine {
    type Engine = Self;

    fn init<G: Serialize>(globals: G) -> Self::Engine {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_global("G", Value::from_serializable(&globals));
        env.add_function("now", ext::now);
        env.add_filter("deslug", ext::deslug);
        env.add_filter("slugify", ext::slugify);
        env.add_filter("date", ext::date);
        env.add_filter("split", ext::split);
        #[cfg(feature = "markdown")]
        env.add_filter("markdown", ext::markdown);
        MiniJinjaEngine { env }
    }
}

impl Engine for MiniJinjaEngine {
    fn register_partial(&mut self, name: &str, source: &str) -> Result<()> {
        self.env.add_template_owned(name.to_string(), source.to_string())
            .chain_with(|| error! {
                kind: Render;
                "failed to compile fragment",
                "fragment" => name,
            })
    }

    fn has_partial(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    fn render_str(
        &self,
        name: Option<&str>,
        template_str: &str,
        data: &Dict,
    ) -> Result<String> {
        let context = Value::from_serializable(data);
        let string = match name {
            Some(name) => self.env.render_named_str(name, template_str, context)?,
            None => self.env.render_str(template_str, context)?,
        };

        Ok(string)
    }

    fn include_source(&self, name: &str) -> String {
        format!("{{% include {name:?} %}}")
    }
}

mod ext {
    use chrono::{NaiveDate, NaiveTime, NaiveDateTime, DateTime, Utc};
    use minijinja::{value::{intern, Value}, Error, ErrorKind};

    pub fn deslug(value: &str) -> String {
        value.replace('-', " ")
    }

    pub fn slugify(value: &str) -> String {
        crate::util::slugify(value)
    }

    pub fn date(value: Value, fmt: &str) -> Result<Value, Error> {
        if let Ok(ts) = i64::try_from(value.clone()) {
            let datetime = DateTime::<Utc>::from_timestamp(ts, 0)
                .ok_or_else(|| Error::new(
                    ErrorKind::InvalidOperation,
                    "invalid timestamp provided to `date`"
                ))?;

            return Ok(datetime.format(fmt).to_string().into());
        }

        let kind = value.kind();
        let attr = value.get_attr("$__toml_private_datetime");
        let string = attr.as_ref()
            .ok()
            .and_then(|v| v.as_str())
            .or_else(|| value.as_str())
            .ok_or_else(|| Error::new(
                ErrorKind::InvalidOperation,
                format!("`date` must be applied to a string or integer, found {kind}")
            ))?;

        let datetime = string.parse::<NaiveDate>().map(|d| d.format(fmt))
            .or_else(|_| string.parse::<NaiveTime>().map(|t| t.format(fmt)))
            .or_else(|_| string.parse::<NaiveDateTime>().map(|dt| dt.format(fmt)))
            .or_else(|_| string.parse::<DateTime<Utc>>().map(|dt| dt.format(fmt)))
            .map_err(|e| Error::new(
                ErrorKind::InvalidOperation,
                format!("failed to parse {string}: {e}")
            ))?;

        Ok(datetime.to_string().into())
    }

    pub fn split(value: &str, pat: &str, n: Option<usize>) -> Result<Value, Error> {
        match n {
            Some(n) => Ok(value.split(pat).nth(n).map(Value::from).unwrap_or(Value::UNDEFINED)),
            None => Ok(value.split(pat).map(intern).collect()),
        }
    }

    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }

    #[cfg(feature = "markdown")]
    pub fn markdown(value: &str) -> Value {
        use pulldown_cmark::{html, Options, Parser};

        let options = Options::ENABLE_TABLES
            | Options::ENABLE_FOOTNOTES
            | Options::ENABLE_STRIKETHROUGH;

        let mut string = String::with_capacity(value.len() * 3 / 2);
        html::push_html(&mut string, Parser::new_ext(value, options));
        Value::from_safe_string(string)
    }
}

impl_error_detail_with_std_error!(minijinja::Error => Render);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn engine() -> MiniJinjaEngine {
        MiniJinjaEngine::init::<crate::value::Dict>(crate::dict! { "site" => "Example" })
    }

    #[test]
    fn renders_partials_by_name() {
        let mut engine = engine();
        engine.register_partial("card", "<div>{{title}}</div>").unwrap();
        assert!(engine.has_partial("card"));
        assert!(!engine.has_partial("nav"));

        let source = engine.include_source("card");
        let data = crate::dict! { "component" => "card", "title" => "Hi" };
        let html = engine.render_str(Some("home.html"), &source, &data).unwrap();
        assert_eq!(html, "<div>Hi</div>");
    }

    #[test]
    fn escapes_and_exposes_globals() {
        let mut engine = engine();
        engine.register_partial("t", "{{ G.site }}: {{ body }} {{ raw|safe }}").unwrap();
        let data = crate::dict! { "body" => "<b>", "raw" => "<i>" };
        let html = engine.render_str(None, &engine.include_source("t"), &data).unwrap();
        assert_eq!(html, "Example: &lt;b&gt; <i>");
    }

    #[test]
    fn later_partial_replaces_earlier() {
        let mut engine = engine();
        engine.register_partial("card", "one").unwrap();
        engine.register_partial("card", "two").unwrap();
        let html = engine.render_str(None, &engine.include_source("card"), &Dict::new()).unwrap();
        assert_eq!(html, "two");
    }

    #[test]
    fn missing_partial_is_a_render_error() {
        let engine = engine();
        let error = engine.render_str(None, &engine.include_source("nope"), &Dict::new()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Render);
    }

    #[test]
    fn filters() {
        let mut engine = engine();
        engine.register_partial("f", "{{ 'a-b'|deslug }}|{{ 'Hello World'|slugify }}|{{ '2024-02-03'|date('%d/%m') }}").unwrap();
        let html = engine.render_str(None, &engine.include_source("f"), &Dict::new()).unwrap();
        assert_eq!(html, "a b|hello-world|03/02");
    }

    #[cfg(feature = "markdown")]
    #[test]
    fn markdown_filter() {
        let mut engine = engine();
        engine.register_partial("md", "{{ body|markdown }}").unwrap();
        let data = crate::dict! { "body" => "*hi*" };
        let html = engine.render_str(None, &engine.include_source("md"), &data).unwrap();
        assert_eq!(html.trim(), "<p><em>hi</em></p>");
    }
}
