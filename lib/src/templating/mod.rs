pub mod minijinja;

use std::fmt::Debug;

use serde::Serialize;

use crate::error::Result;
use crate::value::Dict;

pub trait EngineInit {
    type Engine: Engine + 'static;

    fn init<G: Serialize>(globals: G) -> Self::Engine;
}

/// A template engine that knows named partials and renders ad-hoc templates
/// which reference them.
pub trait Engine: Send + Sync + Debug {
    /// Registers `source` under `name`, replacing any partial of that name.
    fn register_partial(&mut self, name: &str, source: &str) -> Result<()>;

    fn has_partial(&self, name: &str) -> bool;

    /// Renders `template_str` with `data` as its context. `name` is used in
    /// diagnostics.
    fn render_str(
        &self,
        name: Option<&str>,
        template_str: &str,
        data: &Dict,
    ) -> Result<String>;

    /// The source of an ad-hoc template whose only content is the partial
    /// `name`.
    fn include_source(&self, name: &str) -> String;
}
