use std::ffi::OsString;
use std::sync::Arc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use mlua::{Lua, Table, Value, VmState};
use parking_lot::Mutex;

use crate::sandbox::resolve::{Resolve, Specifier};
use crate::util::normalize;

/// Name of the global that tells a script it runs inside a build.
pub const FLAG: &str = "__PLUME__";

/// Lua registry slot holding loaded modules, keyed by absolute path.
const MODULE_CACHE: &str = "plume.modules";

const MODULE_EXTENSIONS: &[&str] = &["lua", "luau"];

/// What a script sees of itself: its own file and directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptContext {
    pub path: PathBuf,
    pub dir: PathBuf,
}

impl ScriptContext {
    pub fn new(path: &Path) -> Self {
        let path = std::path::absolute(path)
            .map(normalize)
            .unwrap_or_else(|_| normalize(path));

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        ScriptContext { path, dir }
    }

    /// The script's file name up to its first `.`.
    pub fn name(&self) -> &str {
        self.path.file_name()
            .and_then(|name| name.to_str())
            .map_or("", crate::util::base_name)
    }
}

/// Builds per-file environments and implements `require` inside them.
pub struct ModuleLoader {
    resolver: Arc<dyn Resolve>,
    search_paths: Arc<[PathBuf]>,
    loaded: Mutex<Vec<PathBuf>>,
}

impl ModuleLoader {
    pub fn new(resolver: Arc<dyn Resolve>, search_paths: Arc<[PathBuf]>) -> Self {
        ModuleLoader { resolver, search_paths, loaded: Mutex::new(vec![]) }
    }

    /// Module files loaded so far, in load order.
    pub fn loaded(&self) -> Vec<PathBuf> {
        self.loaded.lock().clone()
    }

    /// A fresh environment for the script described by `ctx`. Reads fall back
    /// to the standard globals; writes stay in the environment.
    pub fn environment<'lua>(
        self: &Arc<Self>,
        lua: &'lua Lua,
        ctx: &ScriptContext,
    ) -> mlua::Result<Table<'lua>> {
        let fallback = lua.create_table()?;
        fallback.set("__index", lua.globals())?;

        let env = lua.create_table()?;
        env.set_metatable(Some(fallback));

        let filename = ctx.path.to_string_lossy();
        let exports = lua.create_table()?;
        let module = lua.create_table()?;
        module.set("id", &*filename)?;
        module.set("filename", &*filename)?;
        module.set("exports", exports.clone())?;

        let loader = self.clone();
        let dir = ctx.dir.clone();
        let require = lua.create_function(move |lua, specifier: String| {
            loader.require(lua, &dir, &specifier)
        })?;

        env.raw_set(FLAG, true)?;
        env.raw_set("module", module)?;
        env.raw_set("exports", exports)?;
        env.raw_set("require", require)?;
        env.raw_set("__filename", &*filename)?;
        env.raw_set("__dirname", &*ctx.dir.to_string_lossy())?;
        Ok(env)
    }

    /// Runs `source` as the script `ctx` and returns what it exports: the
    /// chunk's return value if it returned one, `module.exports` otherwise.
    pub fn execute<'lua>(
        self: &Arc<Self>,
        lua: &'lua Lua,
        source: &str,
        ctx: &ScriptContext,
    ) -> mlua::Result<Value<'lua>> {
        let env = self.environment(lua, ctx)?;
        let value: Value = lua.load(source)
            .set_name(format!("@{}", ctx.path.display()))
            .set_environment(env.clone())
            .eval()?;

        if !value.is_nil() {
            return Ok(value);
        }

        let module: Table = env.raw_get("module")?;
        module.get("exports")
    }

    fn require<'lua>(
        self: &Arc<Self>,
        lua: &'lua Lua,
        dir: &Path,
        specifier: &str,
    ) -> mlua::Result<Value<'lua>> {
        let path = match self.resolver.resolve(specifier, dir) {
            Specifier::Path(path) => locate(&path),
            Specifier::Bare(name) => self.search(&name),
        };

        let path = path.ok_or_else(|| mlua::Error::RuntimeError(
            format!("module '{specifier}' not found")
        ))?;

        let cache = module_cache(lua)?;
        let key = path.to_string_lossy().into_owned();
        let cached: Value = cache.raw_get(key.as_str())?;
        if !cached.is_nil() {
            return Ok(cached);
        }

        let source = std::fs::read_to_string(&path).map_err(|e| mlua::Error::RuntimeError(
            format!("failed to read module '{}': {e}", path.display())
        ))?;

        self.loaded.lock().push(path.clone());

        // A module that requires itself, directly or not, sees `true`.
        cache.raw_set(key.as_str(), true)?;
        let value = match self.execute(lua, &source, &ScriptContext::new(&path)) {
            Ok(Value::Nil) => Value::Boolean(true),
            Ok(value) => value,
            Err(e) => {
                cache.raw_set(key.as_str(), Value::Nil)?;
                return Err(e);
            }
        };

        cache.raw_set(key.as_str(), value.clone())?;
        Ok(value)
    }

    /// Looks up a bare module name in the search paths. `a.b` is `a/b`.
    fn search(&self, name: &str) -> Option<PathBuf> {
        let relative: PathBuf = if name.contains('/') {
            name.into()
        } else {
            name.split('.').collect()
        };

        self.search_paths.iter()
            .find_map(|root| locate(&normalize(root.join(&relative))))
    }
}

fn module_cache(lua: &Lua) -> mlua::Result<Table<'_>> {
    if let Some(cache) = lua.named_registry_value::<Option<Table>>(MODULE_CACHE)? {
        return Ok(cache);
    }

    let cache = lua.create_table()?;
    lua.set_named_registry_value(MODULE_CACHE, cache.clone())?;
    Ok(cache)
}

/// The module file `path` refers to: `path` itself, `path.lua`, `path.luau`,
/// `path/init.lua`, or `path/init.luau`, whichever exists first.
fn locate(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }

    let with_ext = MODULE_EXTENSIONS.iter().map(|ext| {
        let mut string = OsString::from(path.as_os_str());
        string.push(".");
        string.push(ext);
        PathBuf::from(string)
    });

    let init = MODULE_EXTENSIONS.iter().map(|ext| path.join("init").with_extension(ext));
    with_ext.chain(init).find(|candidate| candidate.is_file())
}

/// A wall-clock budget enforced through Luau interrupts.
#[derive(Debug, Clone, Default)]
pub struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    pub fn install(&self, lua: &Lua, budget: Duration) {
        let deadline = self.clone();
        lua.set_interrupt(move |_| {
            if deadline.expired() {
                return Err(mlua::Error::RuntimeError(format!(
                    "script exceeded its time budget of {}ms", budget.as_millis()
                )));
            }

            Ok(VmState::Continue)
        });
    }

    pub fn arm(&self, budget: Option<Duration>) {
        *self.0.lock() = budget.map(|budget| Instant::now() + budget);
    }

    pub fn disarm(&self) {
        *self.0.lock() = None;
    }

    pub fn expired(&self) -> bool {
        self.0.lock().map_or(false, |deadline| Instant::now() >= deadline)
    }
}
