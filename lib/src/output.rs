use std::path::Component;

use tracing::debug;

use crate::compiler::{AssetInfo, Compilation};
use crate::page::RenderedPage;

/// What [`commit()`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub created: usize,
    pub skipped: usize,
}

/// The name of the asset `page` is committed as: its destination relative to
/// the compilation's output directory, or its filename if the destination
/// isn't inside the output directory.
pub fn asset_name(compilation: &Compilation, page: &RenderedPage) -> String {
    crate::util::diff_paths(&page.destination, compilation.output())
        .filter(|path| !path.as_os_str().is_empty())
        .filter(|path| path.components().all(|c| matches!(c, Component::Normal(_))))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| page.filename.clone())
}

/// Emits every page as a newly created asset unless an asset of the same name
/// already exists, in which case the existing asset is kept.
pub fn commit<I>(compilation: &mut Compilation, pages: I) -> Commit
    where I: IntoIterator<Item = RenderedPage>
{
    let mut commit = Commit::default();
    for page in pages {
        let name = asset_name(compilation, &page);
        if compilation.get(&name).is_some() {
            debug!(asset = %name, page = %page.source.display(), "asset exists; keeping it");
            commit.skipped += 1;
            continue;
        }

        let info = AssetInfo { created: true, source_path: Some(page.source.to_path_buf()) };
        compilation.emit(name, page.html, info);
        commit.created += 1;
    }

    commit
}
