use std::path::PathBuf;

xflags::xflags! {
    /// Builds one HTML page per page script.
    cmd plumage {
        /// The configuration file. Defaults to `plume.toml`.
        optional -c, --config path: PathBuf
        /// Maximum number of page builds in flight.
        optional -j, --concurrency n: usize
        /// Log more. Repeat for even more.
        repeated -v, --verbose
    }
}
