use std::sync::Arc;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Chainable, Result};
use crate::fstree::FsTree;
use crate::value::{Dict, Value};
use crate::sandbox::{Evaluator, ModuleLoader};
use crate::templating::Engine;
use crate::limiter::Limiter;
use crate::compiler::CancelToken;

/// The key of page data naming the fragment to render.
pub const COMPONENT_KEY: &str = "component";

/// What a page function returns: the data to render, named after its page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDescriptor {
    pub name: Arc<str>,
    pub data: Arc<Dict>,
}

impl PageDescriptor {
    pub fn component(&self) -> Option<&str> {
        self.data.get(COMPONENT_KEY).and_then(|v| v.as_str())
    }
}

/// A page script under the pages root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    pub name: Arc<str>,
    pub path: Arc<Path>,
}

impl PageFile {
    /// Every file under `root` with one of `extensions`, except those whose
    /// name starts with `_` (helper modules) or `.`. Sorted by path.
    pub fn discover<S: AsRef<str>>(root: &Path, extensions: &[S]) -> Result<Vec<PageFile>> {
        let tree = FsTree::build(root).chain_with(|| error! {
            "failed to discover pages",
            "pages root" => root.display(),
        })?;

        let pages = tree.visible_files()
            .into_iter()
            .filter(|entry| entry.has_ext(extensions))
            .filter(|entry| !crate::util::is_private(&entry.file_name))
            .map(|entry| PageFile { name: entry.base_name().into(), path: entry.path.clone() })
            .collect();

        Ok(pages)
    }

    /// `<name>.html`
    pub fn output_filename(&self) -> String {
        format!("{}.html", self.name)
    }
}

/// A rendered page, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub filename: String,
    pub html: String,
    /// Absolute path the page is written to.
    pub destination: PathBuf,
    /// The page script it was rendered from.
    pub source: Arc<Path>,
}

/// The outcome of building one page.
#[derive(Debug)]
pub struct PageBuild {
    pub result: Result<RenderedPage>,
    /// Module files the page script loaded, whether or not the page built.
    pub modules: Vec<PathBuf>,
}

/// Turns page scripts into rendered pages.
#[derive(Debug, Clone, Copy)]
pub struct PageBuilder<'a> {
    pub engine: &'a dyn Engine,
    pub evaluator: &'a Evaluator,
    pub destination: &'a Path,
}

impl<'a> PageBuilder<'a> {
    pub fn new(engine: &'a dyn Engine, evaluator: &'a Evaluator, destination: &'a Path) -> Self {
        PageBuilder { engine, evaluator, destination }
    }

    /// Builds every page under `limiter`. The result for each page is in the
    /// position of the page in `pages`, and is `None` if the build was
    /// cancelled before the page started.
    pub fn build(
        &self,
        pages: Vec<PageFile>,
        limiter: &Limiter,
        cancel: &CancelToken,
    ) -> Result<Vec<Option<PageBuild>>> {
        limiter.run(pages, cancel, |page| self.build_page(&page))
    }

    /// Evaluates `page`, calls its page function, and renders the fragment it
    /// names with the page data.
    pub fn build_page(&self, page: &PageFile) -> PageBuild {
        let loader = self.evaluator.loader();
        let result = self.render(page, loader.clone());
        PageBuild { result, modules: loader.loaded() }
    }

    fn render(&self, page: &PageFile, loader: Arc<ModuleLoader>) -> Result<RenderedPage> {
        let script = self.evaluator.evaluate_with(&page.path, loader)?;
        let descriptor = script.call()?;

        let component = match descriptor.data.get(COMPONENT_KEY) {
            Some(Value::String(name)) => name.clone(),
            Some(other) => return err! {
                kind: Render;
                "page `component` must be a string",
                "page" => page.path.display(),
                "found" => other.kind(),
            },
            None => return err! {
                kind: Render;
                "page data does not name a `component`",
                "page" => page.path.display(),
            },
        };

        if !self.engine.has_partial(&component) {
            return err! {
                kind: Render;
                "page names an unknown component",
                "page" => page.path.display(),
                "component" => component,
            };
        }

        let filename = page.output_filename();
        let template = self.engine.include_source(&component);
        let html = self.engine.render_str(Some(&filename), &template, &descriptor.data)
            .chain_with(|| error! {
                kind: Render;
                "failed to render page",
                "page" => page.path.display(),
                "component" => &*component,
            })?;

        debug!(page = %page.name, component = %component, "rendered page");
        Ok(RenderedPage {
            destination: self.destination.join(&filename),
            filename,
            html,
            source: page.path.clone(),
        })
    }
}
