//! Template fragments, discovered under the components root.
//!
//! A fragment is named after the leading segment of its path relative to the
//! components root, up to the first `.`:
//!
//! | path                      | name   |
//! |---------------------------|--------|
//! | `card.hbs`                | `card` |
//! | `card/index.html`         | `card` |
//! | `layout/parts/head.html`  | `layout` |
//!
//! Discovery is sorted by path and later registrations replace earlier ones,
//! so with both `card/index.html` and `card.html` present, `card.html` wins.

use std::sync::Arc;
use std::path::{Component, Path};
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{Chainable, Error, Result};
use crate::fstree::{Entry, FsTree};
use crate::templating::Engine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: Arc<str>,
    pub path: Arc<Path>,
    pub content: Arc<str>,
}

/// The fragments of one build pass, keyed by name.
#[derive(Debug, Default)]
pub struct FragmentRegistry {
    fragments: BTreeMap<Arc<str>, Fragment>,
}

/// The registration name of a fragment at `relative` path: its leading path
/// segment up to the first `.`. `None` if that would be empty.
pub fn fragment_name(relative: &Path) -> Option<&str> {
    let first = match relative.components().next()? {
        Component::Normal(segment) => segment.to_str()?,
        _ => return None,
    };

    let name = crate::util::base_name(first);
    (!name.is_empty()).then_some(name)
}

impl FragmentRegistry {
    pub fn new() -> Self {
        FragmentRegistry::default()
    }

    /// Discovers every file under `root` with one of `extensions` and
    /// registers it. Files that can't be read, aren't UTF-8, or are empty are
    /// skipped with a warning.
    pub fn register_all<S: AsRef<str>>(root: &Path, extensions: &[S]) -> Result<Self> {
        let tree = FsTree::build(root).chain_with(|| error! {
            "failed to discover fragments",
            "components root" => root.display(),
        })?;

        let mut registry = FragmentRegistry::new();
        for entry in tree.visible_files().into_iter().filter(|e| e.has_ext(extensions)) {
            match Self::load(entry) {
                Ok(Some(fragment)) => { registry.register(fragment); },
                Ok(None) => warn!(path = %entry.path.display(), "skipping empty fragment"),
                Err(e) => warn!(path = %entry.path.display(), "skipping unreadable fragment:\n{e}"),
            }
        }

        debug!(count = registry.len(), root = %root.display(), "registered fragments");
        Ok(registry)
    }

    fn load(entry: &Entry) -> Result<Option<Fragment>> {
        let name = match fragment_name(entry.relative_path()) {
            Some(name) => name,
            None => return err! {
                kind: Io;
                "fragment path has no usable name",
                "path" => entry.path.display(),
            },
        };

        let content = std::fs::read_to_string(&entry.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(Fragment {
            name: name.into(),
            path: entry.path.clone(),
            content: content.into(),
        }))
    }

    /// Registers `fragment`, returning the fragment it replaced, if any.
    pub fn register(&mut self, fragment: Fragment) -> Option<Fragment> {
        let replaced = self.fragments.insert(fragment.name.clone(), fragment);
        if let Some(old) = &replaced {
            let new = &self.fragments[&old.name];
            debug!(
                name = %old.name,
                replaced = %old.path.display(),
                by = %new.path.display(),
                "fragment name registered twice; last registration wins"
            );
        }

        replaced
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }

    /// Registers every fragment as a partial of `engine`. A fragment the
    /// engine rejects is skipped with a warning; the rest are still
    /// registered. Returns the errors of the skipped fragments.
    pub fn install<E: Engine + ?Sized>(&self, engine: &mut E) -> Vec<Error> {
        let mut errors = vec![];
        for fragment in self.iter() {
            let result = engine.register_partial(&fragment.name, &fragment.content)
                .chain_with(|| error! {
                    "failed to register fragment",
                    "path" => fragment.path.display(),
                });

            if let Err(e) = result {
                warn!(fragment = %fragment.name, "skipping fragment:\n{e}");
                errors.push(e);
            }
        }

        errors
    }
}
