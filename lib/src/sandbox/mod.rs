//! Isolated evaluation of page scripts.
//!
//! Every page script runs in a fresh Lua state, in an environment of its own
//! whose reads fall back to the standard library. The environment exposes:
//!
//!   * `__PLUME__`: always `true`
//!   * `module`: `{ id, filename, exports }`, bound to the script's file
//!   * `exports`: the initial `module.exports` table
//!   * `require`: loads another script, see [`ModuleLoader`]
//!   * `__filename`, `__dirname`: the script's absolute path and directory
//!
//! A script exports its page function either by returning it or by assigning
//! it to `module.exports`. A table with a truthy `__esModule` and a `default`
//! field is unwrapped once; see [`Export`].

pub mod resolve;
pub mod loader;

use std::sync::Arc;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::Debug;
use mlua::{DeserializeOptions, Function, Lua, LuaSerdeExt, RegistryKey, Value};

use crate::error::{Chainable, Result};
use crate::page::PageDescriptor;

pub use resolve::{Resolve, RelativeResolver, Specifier};
pub use loader::{ModuleLoader, ScriptContext, Deadline, FLAG};

/// How a script's export was found.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExportKind {
    /// The export value itself.
    Direct,
    /// The `default` field of an `__esModule` table.
    DefaultWrapped,
}

/// A script's export value, unwrapped at most once.
#[derive(Debug)]
pub struct Export<'lua> {
    pub kind: ExportKind,
    pub value: Value<'lua>,
}

impl<'lua> Export<'lua> {
    pub fn classify(value: Value<'lua>) -> mlua::Result<Self> {
        if let Value::Table(table) = &value {
            let flag: Value = table.get("__esModule")?;
            let default: Value = table.get("default")?;
            if truthy(&flag) && !default.is_nil() {
                return Ok(Export { kind: ExportKind::DefaultWrapped, value: default });
            }
        }

        Ok(Export { kind: ExportKind::Direct, value })
    }
}

fn truthy(value: &Value<'_>) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Evaluates page scripts into callable [`PageScript`]s.
#[derive(Debug, Clone)]
pub struct Evaluator {
    #[debug(ignore)]
    resolver: Arc<dyn Resolve>,
    search_paths: Arc<[PathBuf]>,
    timeout: Option<Duration>,
}

impl Evaluator {
    /// An evaluator using [`RelativeResolver`] that looks up bare `require`
    /// names in `search_paths`, with no time limit.
    pub fn new<S: Into<Arc<[PathBuf]>>>(search_paths: S) -> Self {
        Evaluator {
            resolver: Arc::new(RelativeResolver),
            search_paths: search_paths.into(),
            timeout: None,
        }
    }

    pub fn with_resolver<R: Resolve + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Limits evaluation and every call of the page function to `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// A fresh module loader for one evaluation. Pass it to
    /// [`Evaluator::evaluate_with()`] to see which modules were loaded even if
    /// evaluation fails.
    pub fn loader(&self) -> Arc<ModuleLoader> {
        Arc::new(ModuleLoader::new(self.resolver.clone(), self.search_paths.clone()))
    }

    pub fn evaluate(&self, path: &Path) -> Result<PageScript> {
        self.evaluate_with(path, self.loader())
    }

    /// Evaluates the script at `path`, loading its modules through `loader`.
    pub fn evaluate_with(&self, path: &Path, loader: Arc<ModuleLoader>) -> Result<PageScript> {
        if path.as_os_str().is_empty() {
            return err!(kind: Evaluation; "The file is empty");
        }

        let source = std::fs::read_to_string(path).chain_with(|| error! {
            "failed to read page script",
            "path" => path.display(),
        })?;

        self.execute_with(&source, ScriptContext::new(path), loader)
    }

    /// Runs `source` as the script described by `ctx` and extracts its page
    /// function.
    pub fn execute(&self, source: &str, ctx: ScriptContext) -> Result<PageScript> {
        self.execute_with(source, ctx, self.loader())
    }

    pub fn execute_with(
        &self,
        source: &str,
        ctx: ScriptContext,
        loader: Arc<ModuleLoader>,
    ) -> Result<PageScript> {
        if source.trim().is_empty() {
            return err!(kind: Evaluation; "The file is empty", "path" => ctx.path.display());
        }

        let lua = Lua::new();
        let deadline = Deadline::default();
        if let Some(budget) = self.timeout {
            deadline.install(&lua, budget);
        }

        let (kind, function) = {
            deadline.arm(self.timeout);
            let exported = loader.execute(&lua, source, &ctx);
            deadline.disarm();

            let exported = exported.chain_with(|| error! {
                kind: Evaluation;
                "page script failed to evaluate",
                "path" => ctx.path.display(),
            })?;

            let export = Export::classify(exported)?;
            match export.value {
                Value::Function(function) => (export.kind, lua.create_registry_value(function)?),
                other => return err! {
                    kind: Evaluation;
                    "Source did not produce an HTML",
                    "path" => ctx.path.display(),
                    "exported" => other.type_name(),
                },
            }
        };

        Ok(PageScript {
            name: ctx.name().into(),
            path: ctx.path,
            kind,
            timeout: self.timeout,
            lua,
            function,
            loader,
            deadline,
        })
    }
}

/// An evaluated page script, holding its own Lua state.
#[derive(Debug)]
pub struct PageScript {
    pub name: Arc<str>,
    pub path: PathBuf,
    kind: ExportKind,
    timeout: Option<Duration>,
    #[debug(ignore)]
    lua: Lua,
    #[debug(ignore)]
    function: RegistryKey,
    #[debug(ignore)]
    loader: Arc<ModuleLoader>,
    #[debug(ignore)]
    deadline: Deadline,
}

impl PageScript {
    /// Calls the page function. Its return value must be a table; functions
    /// inside it are dropped.
    pub fn call(&self) -> Result<PageDescriptor> {
        let function: Function = self.lua.registry_value(&self.function)?;

        self.deadline.arm(self.timeout);
        let returned = function.call::<_, Value>(());
        self.deadline.disarm();

        let returned = returned.chain_with(|| error! {
            kind: Evaluation;
            "page function failed",
            "path" => self.path.display(),
        })?;

        let options = DeserializeOptions::new().deny_unsupported_types(false);
        let data: crate::value::Value = self.lua.from_value_with(returned, options)
            .chain_with(|| error! {
                kind: Evaluation;
                "page data could not be converted",
                "path" => self.path.display(),
            })?;

        match data.into_dict() {
            Ok(data) => Ok(PageDescriptor { name: self.name.clone(), data }),
            Err(other) => err! {
                kind: Evaluation;
                "page function must return a table",
                "path" => self.path.display(),
                "returned" => other.kind(),
            },
        }
    }

    pub fn kind(&self) -> ExportKind {
        self.kind
    }

    /// Module files loaded through `require`, in load order.
    pub fn modules(&self) -> Vec<PathBuf> {
        self.loader.loaded()
    }
}

impl_error_detail_with_std_error!(mlua::Error => Evaluation);

#[cfg(test)]
mod tests {
    use std::fs;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::error::ErrorKind;
    use crate::value::Value as DataValue;

    assert_impl_all!(PageScript: Send);
    assert_impl_all!(Evaluator: Send, Sync);

    fn write(root: &Path, name: &str, source: &str) -> PathBuf {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, source).unwrap();
        path
    }

    fn evaluator(root: &Path) -> Evaluator {
        Evaluator::new(vec![root.to_path_buf()])
    }

    #[test]
    fn returned_function_is_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "home.lua", r#"
            return function()
                return { component = "card", title = "Hi", count = 3, ratio = 0.5 }
            end
        "#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        assert_eq!(script.kind(), ExportKind::Direct);
        assert_eq!(&*script.name, "home");

        let page = script.call().unwrap();
        assert_eq!(page.component(), Some("card"));
        assert_eq!(page.data["title"].as_str(), Some("Hi"));
        assert_eq!(page.data["count"], DataValue::Int(3));
        assert_eq!(page.data["ratio"], DataValue::Float(0.5));
    }

    #[test]
    fn module_exports_is_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "about.page.lua", r#"
            module.exports = function() return { component = "card" } end
        "#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        assert_eq!(&*script.name, "about");
        assert_eq!(script.call().unwrap().component(), Some("card"));
    }

    #[test]
    fn es_module_default_is_unwrapped_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "esm.lua", r#"
            return {
                __esModule = true,
                default = function() return { component = "card" } end,
            }
        "#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        assert_eq!(script.kind(), ExportKind::DefaultWrapped);
        assert_eq!(script.call().unwrap().component(), Some("card"));

        let path = write(dir.path(), "plain.lua", r#"
            return { default = function() return {} end }
        "#);

        let error = evaluator(dir.path()).evaluate(&path).unwrap_err();
        assert!(error.to_string().contains("Source did not produce an HTML"));
    }

    #[test]
    fn non_function_export_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "string.lua", "return 'hello'");

        let error = evaluator(dir.path()).evaluate(&path).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(error.to_string().contains("Source did not produce an HTML"));
        assert!(error.to_string().contains("exported: string"));

        let path = write(dir.path(), "nothing.lua", "local x = 1");
        let error = evaluator(dir.path()).evaluate(&path).unwrap_err();
        assert!(error.to_string().contains("Source did not produce an HTML"));
    }

    #[test]
    fn empty_sources_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "blank.lua", "  \n\t");

        let error = evaluator(dir.path()).evaluate(&path).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(error.to_string().contains("The file is empty"));

        let error = evaluator(dir.path()).evaluate(Path::new("")).unwrap_err();
        assert!(error.to_string().contains("The file is empty"));

        let error = evaluator(dir.path()).evaluate(&dir.path().join("missing.lua")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Io);
    }

    #[test]
    fn page_returning_a_non_table_fails_on_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "str.lua", r#"return function() return "hi" end"#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        let error = script.call().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(error.to_string().contains("must return a table"));
    }

    #[test]
    fn throwing_page_function_is_an_evaluation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "broken.lua", r#"
            return function() error("kaboom") end
        "#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        let error = script.call().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(error.to_string().contains("kaboom"));
    }

    #[test]
    fn environment_describes_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "env.lua", r#"
            local flag, file, dir, id = __PLUME__, __filename, __dirname, module.id
            local same = rawequal(exports, module.exports)
            return function()
                return {
                    component = "c",
                    flag = flag,
                    file = file,
                    dir = dir,
                    id = id,
                    same = same,
                    callback = function() end,
                }
            end
        "#);

        let page = evaluator(dir.path()).evaluate(&path).unwrap().call().unwrap();
        let path = path.to_string_lossy();
        assert_eq!(page.data["flag"], DataValue::Bool(true));
        assert_eq!(page.data["file"].as_str(), Some(&*path));
        assert_eq!(page.data["id"].as_str(), Some(&*path));
        assert_eq!(page.data["dir"].as_str(), Some(&*dir.path().to_string_lossy()));
        assert_eq!(page.data["same"], DataValue::Bool(true));
        assert!(!page.data.contains_key("callback"));
    }

    #[test]
    fn relative_requires_resolve_against_the_requiring_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_lib/util.lua", "return { greeting = 'hello' }");
        write(dir.path(), "_lib/nav.lua", r#"
            local util = require("./util")
            return { links = 2, greeting = util.greeting }
        "#);

        let path = write(dir.path(), "blog/post.lua", r#"
            local nav = require("../_lib/nav")
            return function()
                return { component = "c", links = nav.links, greeting = nav.greeting }
            end
        "#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        let page = script.call().unwrap();
        assert_eq!(page.data["links"], DataValue::Int(2));
        assert_eq!(page.data["greeting"].as_str(), Some("hello"));

        let modules = script.modules();
        assert_eq!(modules.len(), 2);
        assert!(modules[0].ends_with("_lib/nav.lua"));
        assert!(modules[1].ends_with("_lib/util.lua"));
    }

    #[test]
    fn bare_requires_use_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        write(&shared, "strings/init.lua", "return { name = 'strings' }");
        write(&shared, "util.luau", "return { name = 'util' }");

        let path = write(dir.path(), "pages/home.lua", r#"
            local util = require("util")
            local strings = require("strings")
            return function()
                return { component = "c", a = util.name, b = strings.name }
            end
        "#);

        let page = Evaluator::new(vec![shared])
            .evaluate(&path).unwrap()
            .call().unwrap();

        assert_eq!(page.data["a"].as_str(), Some("util"));
        assert_eq!(page.data["b"].as_str(), Some("strings"));
    }

    #[test]
    fn dotted_bare_names_are_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "shared/util.lua", "return { n = 7 }");
        let path = write(dir.path(), "home.lua", r#"
            local util = require("shared.util")
            return function() return { component = "c", n = util.n } end
        "#);

        let page = evaluator(dir.path()).evaluate(&path).unwrap().call().unwrap();
        assert_eq!(page.data["n"], DataValue::Int(7));
    }

    #[test]
    fn unknown_modules_fail_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "home.lua", r#"
            local missing = require("./missing")
            return function() return {} end
        "#);

        let error = evaluator(dir.path()).evaluate(&path).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(error.to_string().contains("module './missing' not found"));
    }

    #[test]
    fn failed_evaluations_still_report_their_modules() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_fine.lua", "return {}");
        write(dir.path(), "_bad.lua", "error('bad module')");
        let path = write(dir.path(), "home.lua", r#"
            require("./_fine")
            require("./_bad")
            return function() return {} end
        "#);

        let evaluator = evaluator(dir.path());
        let loader = evaluator.loader();
        let error = evaluator.evaluate_with(&path, loader.clone()).unwrap_err();
        assert!(error.to_string().contains("bad module"));

        let modules = loader.loaded();
        assert_eq!(modules.len(), 2);
        assert!(modules[0].ends_with("_fine.lua"));
        assert!(modules[1].ends_with("_bad.lua"));
    }

    #[test]
    fn modules_are_cached_per_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_m.lua", "return {}");
        let path = write(dir.path(), "home.lua", r#"
            local a = require("./_m")
            local b = require("./_m.lua")
            return function() return { component = "c", same = rawequal(a, b) } end
        "#);

        let script = evaluator(dir.path()).evaluate(&path).unwrap();
        assert_eq!(script.call().unwrap().data["same"], DataValue::Bool(true));
        assert_eq!(script.modules().len(), 1);
    }

    #[test]
    fn globals_written_by_modules_stay_in_their_environment() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_leaky.lua", "leaked = 1 string = nil return {}");
        let path = write(dir.path(), "home.lua", r#"
            require("./_leaky")
            return function()
                return { component = "c", leaked = leaked, upper = string.upper("x") }
            end
        "#);

        let page = evaluator(dir.path()).evaluate(&path).unwrap().call().unwrap();
        assert!(!page.data.contains_key("leaked"));
        assert_eq!(page.data["upper"].as_str(), Some("X"));
    }

    #[test]
    fn custom_resolvers_replace_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        write(&lib, "nav.lua", "return { from = 'lib' }");

        let path = write(dir.path(), "pages/home.lua", r#"
            local nav = require("nav")
            return function() return { component = "c", from = nav.from } end
        "#);

        let page = Evaluator::new(Vec::<PathBuf>::new())
            .with_resolver(move |specifier: &str, _: &Path| Specifier::Path(lib.join(specifier)))
            .evaluate(&path).unwrap()
            .call().unwrap();

        assert_eq!(page.data["from"].as_str(), Some("lib"));
    }

    #[test]
    fn runaway_scripts_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = evaluator(dir.path()).with_timeout(Some(Duration::from_millis(50)));

        let path = write(dir.path(), "spin.lua", "while true do end");
        let error = evaluator.evaluate(&path).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Evaluation);
        assert!(error.to_string().contains("time budget"));

        let path = write(dir.path(), "slow.lua", r#"
            return function() while true do end end
        "#);

        let script = evaluator.evaluate(&path).unwrap();
        let error = script.call().unwrap_err();
        assert!(error.to_string().contains("time budget"));
    }
}
