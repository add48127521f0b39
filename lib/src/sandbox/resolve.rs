use std::path::{Path, PathBuf};

use crate::util::normalize;

/// Where a `require` specifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    /// A file system path, possibly missing its extension.
    Path(PathBuf),
    /// A name to look up in the module search paths.
    Bare(String),
}

/// A module resolution policy: maps the specifier passed to `require` from a
/// script in directory `dir` to a [`Specifier`].
///
/// Any `Fn(&str, &Path) -> Specifier` is a `Resolve`.
pub trait Resolve: Send + Sync {
    fn resolve(&self, specifier: &str, dir: &Path) -> Specifier;
}

/// Rewrites `./` and `../` specifiers into absolute paths rooted at the
/// requiring script's directory. Everything else is passed through as a bare
/// name.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelativeResolver;

impl RelativeResolver {
    pub fn is_relative(specifier: &str) -> bool {
        specifier == "." || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
    }
}

impl Resolve for RelativeResolver {
    fn resolve(&self, specifier: &str, dir: &Path) -> Specifier {
        if Self::is_relative(specifier) {
            Specifier::Path(normalize(dir.join(specifier)))
        } else {
            Specifier::Bare(specifier.to_string())
        }
    }
}

impl<F> Resolve for F where F: Fn(&str, &Path) -> Specifier + Send + Sync {
    fn resolve(&self, specifier: &str, dir: &Path) -> Specifier {
        self(specifier, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_specifiers_are_rooted_at_dir() {
        let dir = Path::new("/site/pages/blog");
        let resolve = |s| RelativeResolver.resolve(s, dir);

        assert_eq!(resolve("./nav"), Specifier::Path("/site/pages/blog/nav".into()));
        assert_eq!(resolve("../_shared/nav"), Specifier::Path("/site/pages/_shared/nav".into()));
        assert_eq!(resolve(".."), Specifier::Path("/site/pages".into()));
    }

    #[test]
    fn bare_specifiers_pass_through() {
        let dir = Path::new("/site/pages");
        assert_eq!(RelativeResolver.resolve("shared.nav", dir), Specifier::Bare("shared.nav".into()));
        assert_eq!(RelativeResolver.resolve(".hidden", dir), Specifier::Bare(".hidden".into()));
        assert_eq!(RelativeResolver.resolve("/abs/nav", dir), Specifier::Bare("/abs/nav".into()));
    }

    #[test]
    fn closures_are_strategies() {
        let fixed = |specifier: &str, _: &Path| Specifier::Path(Path::new("/lib").join(specifier));
        assert_eq!(fixed.resolve("nav", Path::new("/x")), Specifier::Path("/lib/nav".into()));
    }
}
