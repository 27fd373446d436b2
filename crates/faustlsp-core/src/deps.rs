//! The import/library dependency graph between workspace files.
//!
//! Forward edges (`imports`) and reverse edges (`imported_by`) are kept in
//! lockstep so that dependents of a changed file can be found without a
//! scan. Reverse edges carry a tag: the identifier a library import was
//! bound to, or the empty string for a bare file import.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Default)]
struct Graph {
    imports: HashMap<PathBuf, HashSet<PathBuf>>,
    imported_by: HashMap<PathBuf, HashMap<PathBuf, String>>,
}

/// Thread-safe dependency graph keyed by absolute path.
#[derive(Default)]
pub struct DependencyGraph {
    inner: RwLock<Graph>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `importer` imports `imported` via a bare `import`.
    pub fn add_dependency(&self, importer: &Path, imported: &Path) {
        self.add_tagged(importer, imported, String::new());
    }

    /// Records that `importer` binds `imported` to `library` via `library()`.
    pub fn add_library_dependency(&self, importer: &Path, imported: &Path, library: &str) {
        self.add_tagged(importer, imported, library.to_string());
    }

    fn add_tagged(&self, importer: &Path, imported: &Path, tag: String) {
        let mut graph = self.inner.write().unwrap();
        graph
            .imports
            .entry(importer.to_path_buf())
            .or_default()
            .insert(imported.to_path_buf());
        graph
            .imported_by
            .entry(imported.to_path_buf())
            .or_default()
            .insert(importer.to_path_buf(), tag);
    }

    /// Drops every outgoing edge of `path`, and its incoming edges if the
    /// file itself is going away. Called before a file is re-analyzed.
    pub fn remove_dependencies_for(&self, path: &Path) {
        let mut graph = self.inner.write().unwrap();
        if let Some(imported_paths) = graph.imports.remove(path) {
            for imported in imported_paths {
                if let Some(importers) = graph.imported_by.get_mut(&imported) {
                    importers.remove(path);
                    if importers.is_empty() {
                        graph.imported_by.remove(&imported);
                    }
                }
            }
        }
        graph.imported_by.remove(path);
    }

    /// Files that `path` imports.
    pub fn imports_of(&self, path: &Path) -> Vec<PathBuf> {
        let graph = self.inner.read().unwrap();
        graph
            .imports
            .get(path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Files that import `path`.
    pub fn importers_of(&self, path: &Path) -> Vec<PathBuf> {
        let graph = self.inner.read().unwrap();
        graph
            .imported_by
            .get(path)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The library tag `importer` used for `path`, if any edge exists.
    pub fn library_tag(&self, path: &Path, importer: &Path) -> Option<String> {
        let graph = self.inner.read().unwrap();
        graph.imported_by.get(path)?.get(importer).cloned()
    }

    /// Checks that forward and reverse edges agree. Test support.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let graph = self.inner.read().unwrap();
        let forward_ok = graph.imports.iter().all(|(a, bs)| {
            bs.iter().all(|b| {
                graph
                    .imported_by
                    .get(b)
                    .is_some_and(|m| m.contains_key(a))
            })
        });
        let reverse_ok = graph.imported_by.iter().all(|(b, importers)| {
            importers.keys().all(|a| {
                graph.imports.get(a).is_some_and(|set| set.contains(b))
            })
        });
        forward_ok && reverse_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn edges_are_kept_in_lockstep() {
        let graph = DependencyGraph::new();
        graph.add_dependency(&p("/a.dsp"), &p("/b.lib"));
        graph.add_library_dependency(&p("/a.dsp"), &p("/c.lib"), "c");
        graph.add_dependency(&p("/d.dsp"), &p("/b.lib"));

        assert!(graph.is_consistent());
        assert_eq!(graph.imports_of(&p("/a.dsp")).len(), 2);
        let mut importers = graph.importers_of(&p("/b.lib"));
        importers.sort();
        assert_eq!(importers, vec![p("/a.dsp"), p("/d.dsp")]);
    }

    #[test]
    fn library_edges_carry_their_binding() {
        let graph = DependencyGraph::new();
        graph.add_library_dependency(&p("/a.dsp"), &p("/c.lib"), "c");
        graph.add_dependency(&p("/a.dsp"), &p("/b.lib"));

        assert_eq!(graph.library_tag(&p("/c.lib"), &p("/a.dsp")), Some("c".into()));
        assert_eq!(graph.library_tag(&p("/b.lib"), &p("/a.dsp")), Some(String::new()));
        assert_eq!(graph.library_tag(&p("/c.lib"), &p("/other.dsp")), None);
    }

    #[test]
    fn removal_drops_both_sides() {
        let graph = DependencyGraph::new();
        graph.add_dependency(&p("/a.dsp"), &p("/b.lib"));
        graph.add_dependency(&p("/d.dsp"), &p("/b.lib"));

        graph.remove_dependencies_for(&p("/a.dsp"));
        assert!(graph.is_consistent());
        assert!(graph.imports_of(&p("/a.dsp")).is_empty());
        assert_eq!(graph.importers_of(&p("/b.lib")), vec![p("/d.dsp")]);

        graph.remove_dependencies_for(&p("/d.dsp"));
        assert!(graph.importers_of(&p("/b.lib")).is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn reanalysis_replaces_stale_edges() {
        let graph = DependencyGraph::new();
        graph.add_dependency(&p("/a.dsp"), &p("/old.lib"));

        // The file was edited: its only import is now new.lib.
        graph.remove_dependencies_for(&p("/a.dsp"));
        graph.add_dependency(&p("/a.dsp"), &p("/new.lib"));

        assert_eq!(graph.imports_of(&p("/a.dsp")), vec![p("/new.lib")]);
        assert!(graph.importers_of(&p("/old.lib")).is_empty());
        assert!(graph.is_consistent());
    }
}
