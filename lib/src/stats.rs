use std::fmt;
use std::sync::Arc;
use std::collections::BTreeMap;

use crate::compiler::{Asset, Compilation, Compiler, Plugin};

/// A summary of a finished pass, displayed as a tree of its assets. Plugins
/// may mark assets; see [`Plugin::asset_marker()`].
pub struct Stats<'a> {
    compilation: &'a Compilation,
    plugins: &'a [Arc<dyn Plugin>],
}

#[derive(Default)]
struct Node<'a> {
    asset: Option<&'a Asset>,
    children: BTreeMap<&'a str, Node<'a>>,
}

impl<'a> Stats<'a> {
    pub fn new(compiler: &'a Compiler, compilation: &'a Compilation) -> Self {
        Stats { compilation, plugins: compiler.plugins() }
    }

    pub fn assets(&self) -> usize {
        self.compilation.assets().count()
    }

    pub fn created(&self) -> usize {
        self.compilation.assets().filter(|a| a.info.created).count()
    }

    pub fn errors(&self) -> usize {
        self.compilation.errors().len()
    }

    fn marker(&self, asset: &Asset) -> Option<&'a str> {
        self.plugins.iter().find_map(|plugin| plugin.asset_marker(asset))
    }

    fn tree(&self) -> Node<'a> {
        let mut root = Node::default();
        for asset in self.compilation.assets() {
            let node = asset.name.split('/')
                .filter(|segment| !segment.is_empty())
                .fold(&mut root, |node, segment| node.children.entry(segment).or_default());

            node.asset = Some(asset);
        }

        root
    }

    fn fmt_node(
        &self,
        f: &mut fmt::Formatter<'_>,
        siblings: &mut Vec<bool>,
        name: &str,
        node: &Node<'a>,
    ) -> fmt::Result {
        for (j, sibling) in siblings.iter().enumerate() {
            match (sibling, j == siblings.len() - 1) {
                (false, false) => write!(f, "    ")?,
                (false, true) => write!(f, "└── ")?,
                (true, false) => write!(f, "│   ")?,
                (true, true) => write!(f, "├── ")?,
            }
        }

        match node.asset.and_then(|asset| self.marker(asset)) {
            Some(marker) => writeln!(f, "{marker} {name}")?,
            None => writeln!(f, "{name}")?,
        }

        for (i, (name, child)) in node.children.iter().enumerate() {
            siblings.push(i < node.children.len() - 1);
            self.fmt_node(f, siblings, name, child)?;
            siblings.pop();
        }

        Ok(())
    }
}

impl fmt::Display for Stats<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = format!("🗂 {}", self.compilation.output().display());
        self.fmt_node(f, &mut vec![], &root, &self.tree())?;
        write!(f, "{} assets, {} created, {} errors", self.assets(), self.created(), self.errors())
    }
}
