#![doc = svgbobdoc::transform!(
//! A toolkit for building static HTML pages out of Lua page scripts and
//! reusable template fragments.
//!
//! # Overview
//!
//! Plume consumes two directory trees: a _components_ root full of template
//! fragments and a _pages_ root full of page scripts. Every page script
//! evaluates to a function which, when called, returns the page's data: a
//! table naming the fragment to render (`component`) and the values to render
//! it with. Each page becomes one `<name>.html` file.
//!
//! Plume runs as a [`Plugin`](compiler::Plugin) of a build [`Compiler`]. A
//! single build pass proceeds as follows:
//!
//! ```svgbob
//!  +------------+     +--------------------+
//!  | components |---->| fragment registry  |-----------+
//!  +------------+     +--------------------+           |
//!                                                      v
//!  +------------+     +-----------+     +--------------+------+
//!  |   pages    |---->|  sandbox  |---->|    page builder     |
//!  +-----+------+     +-----------+     | (bounded by limiter)|
//!        |                              +----------+----------+
//!        |                                         |
//!        |                                         v
//!        |                              +---------------------+
//!        |                              |  output deduplicator|
//!        |                              +----------+----------+
//!        |                                         |
//!        v                                         v
//!  +-----+---------------+              +---------------------+
//!  | dependency tracker  |------------->|     compilation     |
//!  +---------------------+              +---------------------+
//! ```
//!
//! In words:
//!
//!   1. Every fragment under the components root is registered with the
//!      template engine under the name of its leading path segment.
//!   2. Every page script not starting with `_` is evaluated in its own Lua
//!      environment. `require` inside a script resolves `./` and `../`
//!      specifiers against the script's own directory.
//!   3. The page function is called, the named fragment is rendered with the
//!      page data, and the result is committed to the compilation unless an
//!      asset of the same name already exists.
//!   4. Every file under both roots is recorded as a dependency of the
//!      compilation so that editing any of them invalidates the output.
//!
//! A page that fails at any step is logged and skipped; it never stops its
//! siblings from being built.
)]

#[macro_use]
pub mod error;
pub mod util;
pub mod fstree;
pub mod value;
pub mod config;
pub mod templating;
pub mod fragments;
pub mod sandbox;
pub mod page;
pub mod limiter;
pub mod output;
pub mod dependencies;
pub mod compiler;
pub mod stats;
pub mod pages;

pub use rayon;
pub use tracing;
pub use compiler::{Compiler, Compilation, Plugin, BuildTask, CancelToken};
pub use config::{Config, Options};
pub use pages::PagesPlugin;
pub use stats::Stats;
