//! Workspace semantic analysis engine for the Faust language server.
//!
//! This crate owns everything that does not talk to the editor directly:
//!
//! - **text**: byte offset / line-character conversion and incremental edits
//! - **uri**: `file://` URI and OS path handling
//! - **files**: the concurrent file store and content-hash scope cache
//! - **parser**: the tree-sitter adapter for the Faust grammar
//! - **scope**: lexical scopes and tagged symbols
//! - **deps**: the import/library dependency graph
//! - **analysis**: syntax tree to scope tree, across the import graph
//! - **resolve**: definition, documentation, environment, library and
//!   completion lookups over the scope graph
//! - **config**: per-project `.faustcfg.json` configuration

pub mod analysis;
pub mod config;
pub mod deps;
mod error;
pub mod files;
pub mod parser;
pub mod resolve;
pub mod scope;
pub mod text;
pub mod uri;

pub use error::{Error, Result};

use crate::deps::DependencyGraph;
use crate::files::FileStore;
use crate::parser::ParserPool;

/// Everything the analyzer and resolver need to answer queries: the file
/// store (with its scope cache), the dependency graph and the parser pool.
pub struct Store {
    pub files: FileStore,
    pub deps: DependencyGraph,
    pub parsers: ParserPool,
}

impl Store {
    pub fn new() -> Result<Self> {
        Ok(Self {
            files: FileStore::new(),
            deps: DependencyGraph::new(),
            parsers: ParserPool::new()?,
        })
    }
}
