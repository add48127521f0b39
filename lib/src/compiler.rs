//! A minimal build host: plugins contribute assets to a [`Compilation`], the
//! [`Compiler`] writes them out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::path::{Path, PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::error::{Chainable, Error, Result};
use crate::time;

/// Asks running work to stop. Work already started finishes; work not yet
/// started is skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInfo {
    /// Whether the asset was newly created in this pass.
    pub created: bool,
    /// The file the asset was built from.
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Path relative to the compilation's output directory.
    pub name: String,
    pub source: Arc<str>,
    pub info: AssetInfo,
}

/// The state of one build pass.
#[derive(Debug)]
pub struct Compilation {
    output: PathBuf,
    assets: BTreeMap<String, Asset>,
    file_dependencies: BTreeSet<PathBuf>,
    errors: Vec<Error>,
    cancel: CancelToken,
    written: usize,
}

impl Compilation {
    pub fn new<P: Into<PathBuf>>(output: P) -> Self {
        Compilation::with_cancel(output, CancelToken::new())
    }

    pub fn with_cancel<P: Into<PathBuf>>(output: P, cancel: CancelToken) -> Self {
        Compilation {
            output: output.into(),
            assets: BTreeMap::new(),
            file_dependencies: BTreeSet::new(),
            errors: vec![],
            cancel,
            written: 0,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn get(&self, name: &str) -> Option<&Asset> {
        self.assets.get(name)
    }

    /// Adds an asset, returning the asset of the same name it replaced.
    pub fn emit<N, S>(&mut self, name: N, source: S, info: AssetInfo) -> Option<Asset>
        where N: Into<String>, S: Into<Arc<str>>
    {
        let name = name.into();
        let asset = Asset { name: name.clone(), source: source.into(), info };
        self.assets.insert(name, asset)
    }

    /// All assets, sorted by name.
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Records `path` as an input of this pass. Returns `true` if it wasn't
    /// already recorded.
    pub fn add_dependency<P: Into<PathBuf>>(&mut self, path: P) -> bool {
        self.file_dependencies.insert(path.into())
    }

    pub fn file_dependencies(&self) -> &BTreeSet<PathBuf> {
        &self.file_dependencies
    }

    pub fn push_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Errors recovered from during this pass.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// The number of assets written to disk by the compiler.
    pub fn written(&self) -> usize {
        self.written
    }
}

/// A build step. Hooks run in plugin registration order.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Runs once per pass; contributes assets.
    fn compilation(&self, compilation: &mut Compilation) -> Result<()>;

    /// Runs after every plugin's `compilation` hook; records dependencies.
    fn after_compile(&self, _compilation: &mut Compilation) -> Result<()> {
        Ok(())
    }

    /// A marker displayed next to `asset` in [`Stats`](crate::Stats).
    fn asset_marker(&self, _asset: &Asset) -> Option<&str> {
        None
    }
}

/// Runs plugins and writes their assets under `output`.
#[derive(Clone)]
pub struct Compiler {
    output: PathBuf,
    plugins: Vec<Arc<dyn Plugin>>,
    cancel: CancelToken,
}

impl Compiler {
    pub fn new<P: Into<PathBuf>>(output: P) -> Self {
        Compiler { output: output.into(), plugins: vec![], cancel: CancelToken::new() }
    }

    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs one pass to completion. A failing hook is logged and recorded in
    /// [`Compilation::errors()`]; only failing to write output fails the run.
    pub fn run(&self) -> Result<Compilation> {
        let mut compilation = Compilation::with_cancel(&self.output, self.cancel.clone());
        for plugin in &self.plugins {
            let result = time!(format!("{}: compilation", plugin.name()), {
                plugin.compilation(&mut compilation)
            });

            if let Err(e) = result {
                tracing::error!(plugin = plugin.name(), "compilation hook failed:\n{e}");
                compilation.push_error(e);
            }
        }

        for plugin in &self.plugins {
            if let Err(e) = plugin.after_compile(&mut compilation) {
                tracing::error!(plugin = plugin.name(), "after-compile hook failed:\n{e}");
                compilation.push_error(e);
            }
        }

        if self.cancel.is_cancelled() {
            return err!("build was cancelled", "output" => self.output.display());
        }

        compilation.written = self.write(&compilation)?;
        info!(
            assets = compilation.assets.len(),
            written = compilation.written,
            errors = compilation.errors.len(),
            "build pass complete"
        );

        Ok(compilation)
    }

    /// Runs one pass on a thread of its own.
    pub fn spawn(&self) -> Result<BuildTask> {
        let compiler = Compiler { cancel: CancelToken::new(), ..self.clone() };
        let cancel = compiler.cancel.clone();
        let handle = std::thread::Builder::new()
            .name("plume-build".into())
            .spawn(move || compiler.run())
            .chain_with(|| error!("failed to spawn build thread"))?;

        Ok(BuildTask { handle, cancel })
    }

    /// Writes every asset whose content differs from what's on disk.
    fn write(&self, compilation: &Compilation) -> Result<usize> {
        let mut written = 0;
        for asset in compilation.assets() {
            let path = self.output.join(&asset.name);
            if std::fs::read(&path).map_or(false, |bytes| bytes == asset.source.as_bytes()) {
                debug!(asset = %asset.name, "unchanged on disk");
                continue;
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).chain_with(|| error! {
                    "failed to create output directory",
                    "directory" => parent.display(),
                })?;
            }

            std::fs::write(&path, asset.source.as_bytes()).chain_with(|| error! {
                "failed to write asset",
                "asset" => &asset.name,
                "path" => path.display(),
            })?;

            written += 1;
        }

        Ok(written)
    }
}

/// A build pass running in the background.
#[derive(Debug)]
pub struct BuildTask {
    handle: JoinHandle<Result<Compilation>>,
    cancel: CancelToken,
}

impl BuildTask {
    /// Waits for the pass to finish.
    pub fn join(self) -> Result<Compilation> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => err!("build thread panicked"),
        }
    }

    /// Asks the pass to stop. Pages not yet started are skipped and nothing
    /// is written.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use parking_lot::Mutex;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Compiler: Send, Sync);
    assert_impl_all!(BuildTask: Send);

    struct Emit(&'static str, &'static str);

    impl Plugin for Emit {
        fn name(&self) -> &str {
            "emit"
        }

        fn compilation(&self, compilation: &mut Compilation) -> Result<()> {
            compilation.emit(self.0, self.1, AssetInfo::default());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Hooks(Mutex<Vec<&'static str>>);

    impl Plugin for Arc<Hooks> {
        fn name(&self) -> &str {
            "hooks"
        }

        fn compilation(&self, _: &mut Compilation) -> Result<()> {
            self.0.lock().push("compilation");
            err!("compilation failed on purpose")
        }

        fn after_compile(&self, compilation: &mut Compilation) -> Result<()> {
            self.0.lock().push("after_compile");
            compilation.add_dependency("/src/a");
            Ok(())
        }
    }

    #[test]
    fn hooks_run_in_order_and_errors_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(Hooks::default());
        let compiler = Compiler::new(dir.path()).plugin(hooks.clone()).plugin(Emit("a.html", "A"));

        let compilation = compiler.run().unwrap();
        assert_eq!(*hooks.0.lock(), ["compilation", "after_compile"]);
        assert_eq!(compilation.errors().len(), 1);
        assert!(compilation.file_dependencies().contains(Path::new("/src/a")));
        assert_eq!(fs::read_to_string(dir.path().join("a.html")).unwrap(), "A");
    }

    #[test]
    fn unchanged_assets_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(dir.path().join("out")).plugin(Emit("nested/a.html", "A"));

        assert_eq!(compiler.run().unwrap().written(), 1);
        assert_eq!(compiler.run().unwrap().written(), 0);

        fs::write(dir.path().join("out/nested/a.html"), "stale").unwrap();
        assert_eq!(compiler.run().unwrap().written(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("out/nested/a.html")).unwrap(), "A");
    }

    #[test]
    fn emit_replaces_and_get_finds() {
        let mut compilation = Compilation::new("/out");
        assert!(compilation.emit("a", "1", AssetInfo::default()).is_none());
        let old = compilation.emit("a", "2", AssetInfo::default());
        assert_eq!(old.map(|a| a.source), Some("1".into()));
        assert_eq!(&*compilation.get("a").unwrap().source, "2");
        assert!(compilation.add_dependency("/x"));
        assert!(!compilation.add_dependency("/x"));
    }

    #[test]
    fn spawned_builds_join_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(dir.path()).plugin(Emit("a.html", "A"));

        let task = compiler.spawn().unwrap();
        let compilation = task.join().unwrap();
        assert_eq!(compilation.assets().count(), 1);

        struct Wait(CancelToken);

        impl Plugin for Wait {
            fn name(&self) -> &str {
                "wait"
            }

            fn compilation(&self, compilation: &mut Compilation) -> Result<()> {
                let token = compilation.cancel_token().clone();
                while !token.is_cancelled() {
                    std::thread::yield_now();
                }

                self.0.cancel();
                Ok(())
            }
        }

        let observed = CancelToken::new();
        let compiler = Compiler::new(dir.path().join("cancelled")).plugin(Wait(observed.clone()));
        let task = compiler.spawn().unwrap();
        task.cancel();
        assert!(task.join().is_err());
        assert!(observed.is_cancelled());
        assert!(!dir.path().join("cancelled").exists());
        assert!(!compiler.cancel_token().is_cancelled());
    }
}
