//! The concurrent file store.
//!
//! Tracks every file the server knows about: editor buffers and their
//! on-disk neighbours, keyed by absolute path. Each record couples the
//! content bytes with their SHA-256 hash, the editor-open flag and the
//! published root scope; the per-record lock keeps that triple consistent
//! for concurrent readers.
//!
//! The store also owns the content-addressed scope cache: identical
//! content (including a file edited back to a prior state) reuses the
//! scope tree built for that hash.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use lsp_types::{Range, Url};
use sha2::{Digest, Sha256};

use crate::scope::Scope;
use crate::text::{self, Encoding};
use crate::uri::Handle;
use crate::{Error, Result};

/// SHA-256 digest of a file's content.
pub type ContentHash = [u8; 32];

pub fn hash_content(content: &str) -> ContentHash {
    Sha256::digest(content.as_bytes()).into()
}

/// Mutable state of one tracked file. Always read and written as a unit
/// under the record's lock.
#[derive(Debug, Default)]
struct FileState {
    content: String,
    hash: ContentHash,
    open_in_editor: bool,
    has_syntax_errors: bool,
    scope: Option<Arc<Scope>>,
}

/// One tracked file.
#[derive(Debug)]
pub struct FileRecord {
    pub handle: Handle,
    state: RwLock<FileState>,
}

impl FileRecord {
    fn new(handle: Handle, content: String) -> Self {
        let hash = hash_content(&content);
        FileRecord {
            handle,
            state: RwLock::new(FileState {
                content,
                hash,
                ..FileState::default()
            }),
        }
    }

    /// A consistent (content, hash) snapshot.
    pub fn snapshot(&self) -> (String, ContentHash) {
        let state = self.state.read().unwrap();
        (state.content.clone(), state.hash)
    }

    pub fn hash(&self) -> ContentHash {
        self.state.read().unwrap().hash
    }

    pub fn scope(&self) -> Option<Arc<Scope>> {
        self.state.read().unwrap().scope.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.read().unwrap().open_in_editor
    }

    pub fn has_syntax_errors(&self) -> bool {
        self.state.read().unwrap().has_syntax_errors
    }

    pub fn set_syntax_errors(&self, value: bool) {
        self.state.write().unwrap().has_syntax_errors = value;
    }

    /// Publishes a root scope built from content with `hash`. The scope is
    /// dropped if the content has changed in the meantime, so a stale
    /// analysis can never be attached.
    pub fn publish_scope(&self, hash: ContentHash, scope: Arc<Scope>) -> bool {
        let mut state = self.state.write().unwrap();
        if state.hash == hash {
            state.scope = Some(scope);
            true
        } else {
            false
        }
    }

    fn replace_content(&self, content: String, cache: &DashMap<ContentHash, Arc<Scope>>) {
        let hash = hash_content(&content);
        let mut state = self.state.write().unwrap();
        state.content = content;
        state.hash = hash;
        // The old scope described old content; re-attach from the cache if
        // this exact content was analyzed before.
        state.scope = cache.get(&hash).map(|entry| entry.value().clone());
    }
}

/// Concurrent map from absolute path to file record, plus the scope cache.
pub struct FileStore {
    files: DashMap<PathBuf, Arc<FileRecord>>,
    cache: DashMap<ContentHash, Arc<Scope>>,
    encoding: RwLock<Encoding>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    pub fn new() -> Self {
        FileStore {
            files: DashMap::new(),
            cache: DashMap::new(),
            encoding: RwLock::new(Encoding::default()),
        }
    }

    /// Sets the position encoding negotiated at initialize time.
    pub fn set_encoding(&self, encoding: Encoding) {
        *self.encoding.write().unwrap() = encoding;
    }

    pub fn encoding(&self) -> Encoding {
        *self.encoding.read().unwrap()
    }

    /// Reads `handle` from disk into the store. A file already present is
    /// left untouched; a path that does not exist is silently skipped;
    /// other read errors are logged and skipped.
    pub fn open(&self, handle: Handle) {
        if self.files.contains_key(&handle.path) {
            return;
        }
        let content = match std::fs::read_to_string(&handle.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                log::error!("failed to read {}: {err}", handle.path.display());
                return;
            }
        };
        let record = Arc::new(FileRecord::new(handle.clone(), content));
        self.files.insert(handle.path, record);
    }

    /// [`FileStore::open`] from a bare path.
    pub fn open_path(&self, path: &Path) {
        match Handle::from_path(path.to_path_buf()) {
            Ok(handle) => self.open(handle),
            Err(err) => log::error!("invalid path {}: {err}", path.display()),
        }
    }

    /// Inserts or replaces a record with editor-supplied content.
    pub fn add(&self, handle: Handle, content: String) {
        let record = Arc::new(FileRecord::new(handle.clone(), content));
        self.files.insert(handle.path, record);
    }

    /// Replaces a file's content wholesale.
    pub fn modify_full(&self, path: &Path, content: String) -> Result<()> {
        let record = self.get(path).ok_or_else(|| Error::FileNotTracked(path.to_path_buf()))?;
        record.replace_content(content, &self.cache);
        Ok(())
    }

    /// Applies one incremental edit to a file's content.
    pub fn modify_incremental(&self, path: &Path, range: Range, new_text: &str) -> Result<()> {
        let record = self.get(path).ok_or_else(|| Error::FileNotTracked(path.to_path_buf()))?;
        let (content, _) = record.snapshot();
        let updated = text::apply_edit(range, new_text, &content, self.encoding())?;
        record.replace_content(updated, &self.cache);
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<Arc<FileRecord>> {
        self.files.get(path).map(|entry| entry.value().clone())
    }

    pub fn get_uri(&self, uri: &Url) -> Option<Arc<FileRecord>> {
        let path = crate::uri::uri_to_path(uri).ok()?;
        self.get(&path)
    }

    /// Flips the editor-open flag. Content is kept either way.
    pub fn set_open(&self, path: &Path, open: bool) {
        if let Some(record) = self.get(path) {
            record.state.write().unwrap().open_in_editor = open;
        }
    }

    /// Removes a record and the cached scope for its content.
    pub fn remove(&self, path: &Path) {
        if let Some((_, record)) = self.files.remove(path) {
            let hash = record.hash();
            self.cache.remove(&hash);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn cached_scope(&self, hash: &ContentHash) -> Option<Arc<Scope>> {
        self.cache.get(hash).map(|entry| entry.value().clone())
    }

    /// Caching is idempotent per hash: the first published scope wins.
    pub fn cache_scope(&self, hash: ContentHash, scope: Arc<Scope>) {
        self.cache.entry(hash).or_insert(scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;
    use std::io::Write;

    fn handle(path: &str) -> Handle {
        Handle::from_path(PathBuf::from(path)).unwrap()
    }

    #[test]
    fn hash_tracks_content_through_modifications() {
        let store = FileStore::new();
        let h = handle("/virtual/a.dsp");
        store.add(h.clone(), "process = _;".into());

        let record = store.get(&h.path).unwrap();
        let (content, hash) = record.snapshot();
        assert_eq!(hash, hash_content(&content));

        store.modify_full(&h.path, "process = !;".into()).unwrap();
        let (content, hash) = record.snapshot();
        assert_eq!(content, "process = !;");
        assert_eq!(hash, hash_content(&content));
    }

    #[test]
    fn incremental_edit_matches_expected_content_and_hash() {
        let store = FileStore::new();
        let h = handle("/virtual/b.dsp");
        store.add(h.clone(), "abcdef".into());

        let range = Range::new(Position::new(0, 2), Position::new(0, 4));
        store.modify_incremental(&h.path, range, "XY").unwrap();

        let record = store.get(&h.path).unwrap();
        let (content, hash) = record.snapshot();
        assert_eq!(content, "abXYef");
        assert_eq!(hash, hash_content("abXYef"));
    }

    #[test]
    fn open_reads_from_disk_and_missing_paths_are_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("on_disk.dsp");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "process = _;").unwrap();

        let store = FileStore::new();
        store.open_path(&path);
        assert!(store.contains(&path));

        let missing = dir.path().join("not_there.dsp");
        store.open_path(&missing);
        assert!(!store.contains(&missing));
    }

    #[test]
    fn open_is_a_noop_for_present_files() {
        let store = FileStore::new();
        let h = handle("/virtual/c.dsp");
        store.add(h.clone(), "editor content".into());

        // Re-opening must not clobber the editor's content.
        store.open(h.clone());
        let record = store.get(&h.path).unwrap();
        assert_eq!(record.snapshot().0, "editor content");
    }

    #[test]
    fn close_keeps_content_but_clears_the_flag() {
        let store = FileStore::new();
        let h = handle("/virtual/d.dsp");
        store.add(h.clone(), "x = 1;".into());
        store.set_open(&h.path, true);
        assert!(store.get(&h.path).unwrap().is_open());

        store.set_open(&h.path, false);
        let record = store.get(&h.path).unwrap();
        assert!(!record.is_open());
        assert_eq!(record.snapshot().0, "x = 1;");
    }

    #[test]
    fn stale_scopes_are_never_published() {
        let store = FileStore::new();
        let h = handle("/virtual/e.dsp");
        store.add(h.clone(), "a = 1;".into());
        let record = store.get(&h.path).unwrap();
        let old_hash = record.hash();

        store.modify_full(&h.path, "a = 2;".into()).unwrap();

        let scope = Scope::root(Range::default());
        assert!(!record.publish_scope(old_hash, scope.clone()));
        assert!(record.scope().is_none());
        assert!(record.publish_scope(record.hash(), scope));
        assert!(record.scope().is_some());
    }

    #[test]
    fn editing_back_reattaches_the_cached_scope() {
        let store = FileStore::new();
        let h = handle("/virtual/f.dsp");
        store.add(h.clone(), "a = 1;".into());
        let record = store.get(&h.path).unwrap();

        let hash = record.hash();
        let scope = Scope::root(Range::default());
        record.publish_scope(hash, scope.clone());
        store.cache_scope(hash, scope.clone());

        store.modify_full(&h.path, "a = 2;".into()).unwrap();
        assert!(record.scope().is_none());

        store.modify_full(&h.path, "a = 1;".into()).unwrap();
        let reattached = record.scope().unwrap();
        assert!(Arc::ptr_eq(&reattached, &scope));
    }

    #[test]
    fn remove_drops_record_and_cache_entry() {
        let store = FileStore::new();
        let h = handle("/virtual/g.dsp");
        store.add(h.clone(), "a = 1;".into());
        let hash = store.get(&h.path).unwrap().hash();
        store.cache_scope(hash, Scope::root(Range::default()));

        store.remove(&h.path);
        assert!(!store.contains(&h.path));
        assert!(store.cached_scope(&hash).is_none());
    }
}
