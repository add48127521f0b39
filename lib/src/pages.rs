use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::config::Config;
use crate::compiler::{Asset, Compilation, Plugin};
use crate::fragments::FragmentRegistry;
use crate::limiter::Limiter;
use crate::page::{PageBuilder, PageFile};
use crate::sandbox::{Evaluator, Resolve};
use crate::templating::EngineInit;
use crate::templating::minijinja::MiniJinjaEngine;
use crate::time;

/// Builds one page per page script on every pass.
#[derive(Debug)]
pub struct PagesPlugin {
    config: Config,
    evaluator: Evaluator,
    limiter: Limiter,
    /// Modules loaded by the pages of the current pass.
    modules: Mutex<Vec<PathBuf>>,
}

impl PagesPlugin {
    pub const NAME: &'static str = "plume-pages";

    /// Marks pages created by this plugin in [`Stats`](crate::Stats).
    pub const MARKER: &'static str = "✨";

    /// Validates `config`; fails with a configuration error if it's invalid.
    pub fn new(config: Config) -> Result<Self> {
        let config = config.validate()?;
        let evaluator = Evaluator::new(config.options.search_paths.clone())
            .with_timeout(config.options.timeout());

        Ok(PagesPlugin {
            limiter: Limiter::new(config.options.concurrency),
            evaluator,
            config,
            modules: Mutex::new(vec![]),
        })
    }

    /// Resolves `require` specifiers with `resolver` instead of the default
    /// relative resolver.
    pub fn with_resolver<R: Resolve + 'static>(mut self, resolver: R) -> Self {
        self.evaluator = self.evaluator.with_resolver(resolver);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Plugin for PagesPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn compilation(&self, compilation: &mut Compilation) -> Result<()> {
        let (config, options) = (&self.config, &self.config.options);
        self.modules.lock().clear();

        let registry = time!("fragment registration", {
            FragmentRegistry::register_all(&config.components, &options.fragment_extensions)?
        });

        let mut engine = MiniJinjaEngine::init(&options.globals);
        for e in registry.install(&mut engine) {
            compilation.push_error(e);
        }

        let pages = PageFile::discover(&config.pages, &options.page_extensions)?;
        info!(fragments = registry.len(), pages = pages.len(), "building pages");

        let cancel = compilation.cancel_token().clone();
        let builder = PageBuilder::new(&engine, &self.evaluator, &config.destination);
        let results = time!("page builds", builder.build(pages, &self.limiter, &cancel)?);

        let (mut rendered, mut failed, mut cancelled) = (vec![], 0, 0);
        for build in results {
            let Some(build) = build else {
                cancelled += 1;
                continue;
            };

            self.modules.lock().extend(build.modules);
            match build.result {
                Ok(page) => rendered.push(page),
                Err(e) => {
                    tracing::error!("page failed to build:\n{e}");
                    compilation.push_error(e);
                    failed += 1;
                }
            }
        }

        if cancelled > 0 {
            warn!(cancelled, "build cancelled before every page started");
        }

        let commit = crate::output::commit(compilation, rendered);
        info!(created = commit.created, skipped = commit.skipped, failed, "committed pages");
        Ok(())
    }

    fn after_compile(&self, compilation: &mut Compilation) -> Result<()> {
        let modules = std::mem::take(&mut *self.modules.lock());
        let roots = [&self.config.components, &self.config.pages];
        let added = crate::dependencies::record(compilation, &roots, modules)?;
        debug!(added, total = compilation.file_dependencies().len(), "recorded dependencies");
        Ok(())
    }

    fn asset_marker(&self, asset: &Asset) -> Option<&str> {
        asset.info.created.then_some(Self::MARKER)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn invalid_configuration_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("nope"), dir.path(), dir.path().join("out"));
        let error = PagesPlugin::new(config).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn pages_from_modules_outside_the_roots_are_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["components", "pages", "shared"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        fs::write(dir.path().join("components/card.html"), "<p>{{ title }}</p>").unwrap();
        fs::write(dir.path().join("shared/titles.lua"), "return { home = 'Home' }").unwrap();
        fs::write(dir.path().join("pages/home.lua"), r#"
            local titles = require("titles")
            return function() return { component = "card", title = titles.home } end
        "#).unwrap();

        let mut config = Config::new("components", "pages", "public").rebase(dir.path());
        config.options.search_paths.push(dir.path().join("shared"));
        let plugin = PagesPlugin::new(config).unwrap();

        let mut compilation = Compilation::new(dir.path().join("public"));
        plugin.compilation(&mut compilation).unwrap();
        plugin.after_compile(&mut compilation).unwrap();

        let home = compilation.get("home.html").unwrap();
        assert_eq!(&*home.source, "<p>Home</p>");
        assert_eq!(plugin.asset_marker(home), Some(PagesPlugin::MARKER));

        let shared = fs::canonicalize(dir.path().join("shared/titles.lua")).unwrap();
        assert!(compilation.file_dependencies().contains(&shared));
    }

    #[test]
    fn failing_pages_still_depend_on_their_modules() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["components", "pages", "shared"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        fs::write(dir.path().join("components/card.html"), "<p>{{ title }}</p>").unwrap();
        fs::write(dir.path().join("shared/broken.lua"), "return { title = nil .. 'x' }").unwrap();
        fs::write(dir.path().join("shared/fine.lua"), "return { title = 'Fine' }").unwrap();
        fs::write(dir.path().join("pages/home.lua"), r#"
            local broken = require("broken")
            return function() return { component = "card", title = broken.title } end
        "#).unwrap();

        fs::write(dir.path().join("pages/about.lua"), r#"
            local fine = require("fine")
            return function() error("about " .. fine.title .. " is unfinished") end
        "#).unwrap();

        let mut config = Config::new("components", "pages", "public").rebase(dir.path());
        config.options.search_paths.push(dir.path().join("shared"));
        let plugin = PagesPlugin::new(config).unwrap();

        let mut compilation = Compilation::new(dir.path().join("public"));
        plugin.compilation(&mut compilation).unwrap();
        plugin.after_compile(&mut compilation).unwrap();

        assert_eq!(compilation.assets().count(), 0);
        assert_eq!(compilation.errors().len(), 2);
        for module in ["shared/broken.lua", "shared/fine.lua"] {
            let module = fs::canonicalize(dir.path().join(module)).unwrap();
            assert!(compilation.file_dependencies().contains(&module), "{}", module.display());
        }
    }
}
