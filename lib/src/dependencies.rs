use std::path::{Path, PathBuf};

use crate::error::{Chainable, Result};
use crate::fstree::FsTree;
use crate::compiler::Compilation;

/// Records every file under each of `roots`, and every path in `modules`, as
/// an input of `compilation`. Files are recorded whether or not they built.
/// Returns how many paths weren't recorded before.
pub fn record<P, I>(compilation: &mut Compilation, roots: &[P], modules: I) -> Result<usize>
    where P: AsRef<Path>, I: IntoIterator<Item = PathBuf>
{
    let mut added = 0;
    for root in roots.iter().map(|root| root.as_ref()) {
        let tree = FsTree::build(root).chain_with(|| error! {
            "failed to scan for dependencies",
            "root" => root.display(),
        })?;

        for file in tree.files() {
            added += compilation.add_dependency(file.path.to_path_buf()) as usize;
        }
    }

    for module in modules {
        added += compilation.add_dependency(module) as usize;
    }

    Ok(added)
}
