mod macros;

pub use macros::*;

use std::path::{Path, PathBuf, Component};

/// Convert spaces to hyphens. Remove characters that aren't alphanumerics,
/// underscores, or hyphens. Convert to lowercase. Also strip leading and
/// trailing whitespace.
pub fn slugify(string: &str) -> String {
    let mut output = String::with_capacity(string.len());

    let mut need_dash = false;
    for ch in string.chars() {
        for b in deunicode::deunicode_char(ch).unwrap_or("-").bytes() {
            match b {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' => {
                    if need_dash {
                        output.push('-');
                        need_dash = false;
                    }

                    output.push(b.to_ascii_lowercase() as char);
                }
                _ => {
                    // This deviates from Django: all sequences of characters
                    // not alphanumeric or `_` or converted into one `-`.
                    need_dash = !output.is_empty();
                }
            }
        }
    }

    output
}

/// A helper function to determine the relative path to `path` from `base`.
///
/// Returns `None` if there is no relative path from `base` to `path`, that is,
/// `base` and `path` do not share a common ancestor. `path` and `base` must be
/// either both absolute or both relative; returns `None` if one is relative and
/// the other absolute.
///
/// ```
/// use std::path::Path;
/// use plume::util::diff_paths;
///
/// // Paths must be both relative or both absolute.
/// assert_eq!(diff_paths("/a/b/c", "b/c"), None);
/// assert_eq!(diff_paths("a/b/c", "/b/c"), None);
///
/// // The root/relative root is always a common ancestor.
/// assert_eq!(diff_paths("/a/b/c", "/b/c"), Some("../../a/b/c".into()));
/// assert_eq!(diff_paths("c/a", "b/c/a"), Some("../../../c/a".into()));
///
/// let out = "/site/out";
/// assert_eq!(diff_paths("/site/out/home.html", out), Some("home.html".into()));
/// assert_eq!(diff_paths("/site/out/blog/post.html", out), Some("blog/post.html".into()));
/// ```
// Copyright 2021 Sergio Benitez
// Copyright 2012-2015 The Rust Project Developers.
// Copyright 2017 The Rust Project Developers.
// Adapted from `figment`, which adapted from `pathdiff`, which itself adapted
// from rustc's path_relative_from.
pub fn diff_paths<P, B>(path: P, base: B) -> Option<PathBuf>
     where P: AsRef<Path>, B: AsRef<Path>
{
    let (path, base) = (path.as_ref(), base.as_ref());
    if path.has_root() != base.has_root() {
        return None;
    }

    let mut ita = path.components();
    let mut itb = base.components();
    let mut comps: Vec<Component> = vec![];
    loop {
        match (ita.next(), itb.next()) {
            (None, None) => break,
            (Some(a), None) => {
                comps.push(a);
                comps.extend(ita.by_ref());
                break;
            }
            (None, _) => comps.push(Component::ParentDir),
            (Some(a), Some(b)) if comps.is_empty() && a == b => (),
            (Some(a), Some(b)) if b == Component::CurDir => comps.push(a),
            (Some(_), Some(b)) if b == Component::ParentDir => return None,
            (Some(a), Some(_)) => {
                comps.push(Component::ParentDir);
                for _ in itb {
                    comps.push(Component::ParentDir);
                }
                comps.push(a);
                comps.extend(ita.by_ref());
                break;
            }
        }
    }

    Some(comps.iter().map(|c| c.as_os_str()).collect())
}

/// Lexically normalizes `path`: drops `.` components and folds `..` into the
/// preceding component. The file system is never consulted, so symlinks are
/// not resolved. A `..` that would climb above the root is dropped.
///
/// ```
/// use std::path::Path;
/// use plume::util::normalize;
///
/// assert_eq!(normalize("/a/b/./c"), Path::new("/a/b/c"));
/// assert_eq!(normalize("/a/b/../c"), Path::new("/a/c"));
/// assert_eq!(normalize("/a/../../c"), Path::new("/c"));
/// assert_eq!(normalize("a/../../c"), Path::new("../c"));
/// ```
pub fn normalize<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut normal = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => continue,
            Component::ParentDir => match normal.components().next_back() {
                Some(Component::Normal(_)) => { normal.pop(); },
                Some(Component::RootDir | Component::Prefix(_)) => continue,
                Some(Component::ParentDir) | None => normal.push(".."),
                Some(Component::CurDir) => unreachable!("`.` is never pushed"),
            },
            c => normal.push(c),
        }
    }

    normal
}

/// The part of a file name before its first `.`: `home.page.lua` is `home`.
pub fn base_name(file_name: &str) -> &str {
    match file_name.split_once('.') {
        Some((left, _)) => left,
        None => file_name,
    }
}

/// Whether a file named `file_name` is a private helper (`_nav.lua`) rather
/// than a page.
pub fn is_private(file_name: &str) -> bool {
    file_name.starts_with('_')
}

/// Whether a file named `file_name` is hidden (`.DS_Store`, `.page.lua.swp`).
pub fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with('.')
}
