use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, Chainable, ErrorKind};
use crate::value::{Dict, Format, Json, Toml};

/// The name of the configuration file looked up by default.
pub const CONFIG_FILE: &str = "plume.toml";

/// Everything a build pass needs to know. Validated once, before any pass.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The root of the template fragments.
    pub components: PathBuf,
    /// The root of the page scripts.
    pub pages: PathBuf,
    /// Where rendered pages are written.
    pub destination: PathBuf,
    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Options {
    /// Maximum number of page builds in flight.
    pub concurrency: NonZeroUsize,
    /// Wall-clock budget for evaluating a page script and for calling its page
    /// function, in milliseconds. `0` disables the limit.
    pub timeout_ms: u64,
    /// Extensions of files under `components` that are fragments.
    pub fragment_extensions: Vec<String>,
    /// Extensions of files under `pages` that are page scripts.
    pub page_extensions: Vec<String>,
    /// Directories searched for bare `require` specifiers. Defaults to the
    /// pages root when empty.
    pub search_paths: Vec<PathBuf>,
    /// Values available to every template as `G`.
    pub globals: Dict,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            concurrency: Options::DEFAULT_CONCURRENCY,
            timeout_ms: 10_000,
            fragment_extensions: ["html", "hbs", "mustache", "jinja", "j2"]
                .into_iter()
                .map(String::from)
                .collect(),
            page_extensions: vec!["lua".into(), "luau".into()],
            search_paths: vec![],
            globals: Dict::new(),
        }
    }
}

impl Options {
    pub const DEFAULT_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(100) {
        Some(n) => n,
        None => unreachable!(),
    };

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Config {
    pub fn new<C, P, D>(components: C, pages: P, destination: D) -> Self
        where C: Into<PathBuf>, P: Into<PathBuf>, D: Into<PathBuf>
    {
        Config {
            components: components.into(),
            pages: pages.into(),
            destination: destination.into(),
            options: Options::default(),
        }
    }

    /// Reads a configuration file, TOML or JSON by extension. Relative paths
    /// in the file are resolved against the file's directory.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Json::read(path),
            _ => Toml::read(path),
        }.map_err(|e| e.with_kind(ErrorKind::Configuration))?;

        let base = path.parent().unwrap_or(Path::new("."));
        Ok(config.rebase(base))
    }

    /// Resolves relative paths against `base`.
    pub fn rebase(mut self, base: &Path) -> Self {
        for path in [&mut self.components, &mut self.pages, &mut self.destination] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }

        for path in &mut self.options.search_paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }

        self
    }

    /// Checks that both source roots are existing directories and makes every
    /// path absolute. Fails with a configuration error otherwise.
    pub fn validate(mut self) -> Result<Self> {
        self.components = dircheck(&self.components, "components")?;
        self.pages = dircheck(&self.pages, "pages")?;
        self.options.search_paths = self.options.search_paths.iter()
            .map(|path| dircheck(path, "search path"))
            .collect::<Result<_>>()?;

        if self.options.search_paths.is_empty() {
            self.options.search_paths.push(self.pages.clone());
        }

        if self.destination.as_os_str().is_empty() {
            return err!(kind: Configuration; "destination must not be empty");
        }

        self.destination = std::path::absolute(&self.destination)
            .map(|path| crate::util::normalize(path))
            .chain_with(|| error! {
                kind: Configuration;
                "destination could not be made absolute",
                "destination" => self.destination.display(),
            })?;

        if self.options.page_extensions.is_empty() {
            return err!(kind: Configuration; "at least one page extension is required");
        }

        if self.options.fragment_extensions.is_empty() {
            return err!(kind: Configuration; "at least one fragment extension is required");
        }

        Ok(self)
    }
}

#[track_caller]
fn dircheck(path: &Path, what: &str) -> Result<PathBuf> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::canonicalize(path).chain_with(|| error! {
            kind: Configuration;
            format!("{what} path could not be canonicalized"),
            "path" => path.display(),
        }),
        Ok(_) => err! {
            kind: Configuration;
            format!("{what} path must point to a directory"),
            "path is not a directory" => path.display(),
        },
        Err(e) => Err(e).chain_with(|| error! {
            kind: Configuration;
            format!("{what} must point to an existing directory"),
            "path does not exist" => path.display(),
        }),
    }
}
