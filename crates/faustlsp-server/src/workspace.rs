//! The workspace mirror.
//!
//! Keeps three views of the workspace consistent: the editor buffers
//! (authoritative for open files), the file store (authoritative for
//! analysis) and a temp-directory replica that the external compiler is
//! pointed at. A single event loop serialises editor events against
//! filesystem watch events and drives diagnostics and re-analysis on every
//! change.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::PublishDiagnosticsParams;
use walkdir::WalkDir;

use faustlsp_core::analysis::{self, AnalysisContext};
use faustlsp_core::config::{ProjectConfig, CONFIG_FILE_NAME};
use faustlsp_core::Store;

use crate::diagnostics;

/// Document events forwarded from the LSP notification handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    Open(PathBuf),
    Change(PathBuf),
    Close(PathBuf),
}

/// Files the server analyses and mirrors.
pub fn is_faust_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "dsp" || ext == "lib")
}

/// The workspace being served: its root, its temp mirror and its project
/// configuration.
pub struct Workspace {
    root: PathBuf,
    mirror: TempDir,
    config: RwLock<ProjectConfig>,
    tracked: Mutex<Vec<PathBuf>>,
}

impl Workspace {
    /// Creates the mirror directory (`faustlsp-*` under a `faustlsp`
    /// parent in the OS temp dir) and loads the project configuration.
    pub fn new(root: PathBuf) -> anyhow::Result<Workspace> {
        let parent = std::env::temp_dir().join("faustlsp");
        std::fs::create_dir_all(&parent)?;
        let mirror = tempfile::Builder::new()
            .prefix("faustlsp-")
            .tempdir_in(parent)?;
        log::info!("mirror directory: {}", mirror.path().display());

        let config = ProjectConfig::load(&root);
        Ok(Workspace {
            root,
            mirror,
            config: RwLock::new(config),
            tracked: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> ProjectConfig {
        self.config.read().unwrap().clone()
    }

    pub fn reload_config(&self) {
        *self.config.write().unwrap() = ProjectConfig::load(&self.root);
        log::info!("reloaded project configuration");
    }

    pub fn analysis_context(&self) -> AnalysisContext {
        AnalysisContext {
            root: self.root.clone(),
            command: self.config().command,
        }
    }

    /// Where `path` lives inside the mirror: the absolute path is replayed
    /// one-to-one under the temp directory.
    pub fn mirror_path(&self, path: &Path) -> PathBuf {
        let unrooted: PathBuf = path
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .collect();
        self.mirror.path().join(unrooted)
    }

    /// The mirror-side workspace root, used as the compiler's working dir.
    pub fn mirror_root(&self) -> PathBuf {
        self.mirror_path(&self.root)
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.tracked.lock().unwrap().clone()
    }

    fn track(&self, path: PathBuf) {
        let mut tracked = self.tracked.lock().unwrap();
        if !tracked.contains(&path) {
            tracked.push(path);
        }
    }

    /// Removes the first matching entry.
    fn untrack(&self, path: &Path) {
        let mut tracked = self.tracked.lock().unwrap();
        if let Some(index) = tracked.iter().position(|p| p == path) {
            tracked.remove(index);
        }
    }

    /// Drops the mirror directory. Called on shutdown; some editors kill
    /// the process right after, so this doesn't wait for exit.
    pub fn cleanup(&self) {
        if let Err(err) = std::fs::remove_dir_all(self.mirror.path()) {
            log::debug!("mirror cleanup: {err}");
        }
    }

    fn write_mirror(&self, path: &Path, content: &[u8]) {
        let mirror = self.mirror_path(path);
        if let Some(parent) = mirror.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                log::error!("couldn't create mirror dir {}: {err}", parent.display());
                return;
            }
        }
        if let Err(err) = std::fs::write(&mirror, content) {
            log::error!("couldn't write mirror file {}: {err}", mirror.display());
        }
    }

    fn write_mirror_from_store(&self, store: &Store, path: &Path) {
        if let Some(record) = store.files.get(path) {
            let (content, _) = record.snapshot();
            self.write_mirror(path, content.as_bytes());
        }
    }
}

/// Seeds the store and mirror from disk, then multiplexes editor events,
/// watcher events and cancellation until the session ends.
pub async fn run(
    workspace: Arc<Workspace>,
    store: Arc<Store>,
    mut editor_rx: mpsc::UnboundedReceiver<EditorEvent>,
    diag_tx: mpsc::UnboundedSender<PublishDiagnosticsParams>,
    cancel: CancellationToken,
) {
    let directories = seed(&workspace, &store, &diag_tx).await;

    // Forward notify callbacks onto the loop's channel.
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let mut watcher = match notify::recommended_watcher(move |result| {
        let _ = watch_tx.send(result);
    }) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            log::error!("couldn't start filesystem watcher: {err}");
            None
        }
    };
    if let Some(watcher) = watcher.as_mut() {
        for directory in &directories {
            if let Err(err) = watcher.watch(directory, RecursiveMode::NonRecursive) {
                log::error!("couldn't watch {}: {err}", directory.display());
            }
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("workspace loop cancelled");
                break;
            }
            event = editor_rx.recv() => {
                let Some(event) = event else { break };
                handle_editor_event(&workspace, &store, &diag_tx, event).await;
            }
            result = watch_rx.recv() => {
                match result {
                    Some(Ok(event)) => {
                        handle_watch_event(&workspace, &store, &diag_tx, watcher.as_mut(), event)
                            .await;
                    }
                    Some(Err(err)) => log::error!("watch error: {err}"),
                    None => break,
                }
            }
        }
    }
    // Dropping the watcher closes its OS handles.
}

/// Replicates the workspace into the mirror and opens every file into the
/// store, diagnosing and analysing as it goes. Returns the directories the
/// watcher should observe.
async fn seed(
    workspace: &Arc<Workspace>,
    store: &Arc<Store>,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
) -> Vec<PathBuf> {
    let mut directories = Vec::new();
    for entry in WalkDir::new(workspace.root()) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("workspace walk: {err}");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_dir() {
            if let Err(err) = std::fs::create_dir_all(workspace.mirror_path(path)) {
                log::error!("mirror replicate: {err}");
            }
            directories.push(path.to_path_buf());
            continue;
        }

        store.files.open_path(path);
        if !store.files.contains(path) {
            continue;
        }
        workspace.track(path.to_path_buf());
        workspace.write_mirror_from_store(store, path);

        if is_faust_file(path) {
            diagnostics::diagnose_file(workspace, store, path, diag_tx).await;
            analysis::analyze(store, &workspace.analysis_context(), path);
        }
    }
    log::info!(
        "workspace seeded: {} files tracked",
        workspace.tracked().len()
    );
    directories
}

async fn handle_editor_event(
    workspace: &Arc<Workspace>,
    store: &Arc<Store>,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
    event: EditorEvent,
) {
    match event {
        EditorEvent::Open(path) => {
            workspace.track(path.clone());
            workspace.write_mirror_from_store(store, &path);
        }
        EditorEvent::Change(path) => {
            workspace.write_mirror_from_store(store, &path);
            if is_faust_file(&path) {
                diagnostics::diagnose_file(workspace, store, &path, diag_tx).await;
                analysis::analyze(store, &workspace.analysis_context(), &path);
            }
        }
        EditorEvent::Close(path) => {
            // Disk becomes authoritative again, if the file is still there.
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    if let Err(err) = store.files.modify_full(&path, content.clone()) {
                        log::error!("close reread failed for {}: {err}", path.display());
                    }
                    workspace.write_mirror(&path, content.as_bytes());
                }
                Err(_) => {
                    store.files.remove(&path);
                    workspace.untrack(&path);
                    let _ = std::fs::remove_file(workspace.mirror_path(&path));
                }
            }
        }
    }
}

async fn handle_watch_event(
    workspace: &Arc<Workspace>,
    store: &Arc<Store>,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
    mut watcher: Option<&mut RecommendedWatcher>,
    event: notify::Event,
) {
    use notify::event::{EventKind, ModifyKind, RenameMode};

    // Events outside the workspace root are not ours.
    let paths: Vec<PathBuf> = event
        .paths
        .iter()
        .filter(|path| path.starts_with(workspace.root()))
        .cloned()
        .collect();
    if paths.is_empty() {
        return;
    }

    match event.kind {
        EventKind::Create(_) => {
            for path in &paths {
                handle_created(workspace, store, diag_tx, watcher.as_deref_mut(), path).await;
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let (from, to) = (&paths[0], &paths[1]);
            let _ = std::fs::rename(workspace.mirror_path(from), workspace.mirror_path(to));
            store.files.remove(from);
            workspace.untrack(from);
            handle_created(workspace, store, diag_tx, None, to).await;
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            for path in &paths {
                store.files.remove(path);
                workspace.untrack(path);
                let mirror = workspace.mirror_path(path);
                if mirror.is_dir() {
                    let _ = std::fs::remove_dir_all(&mirror);
                } else {
                    let _ = std::fs::remove_file(&mirror);
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &paths {
                handle_created(workspace, store, diag_tx, None, path).await;
            }
        }
        EventKind::Modify(_) => {
            for path in &paths {
                handle_written(workspace, store, diag_tx, path).await;
            }
        }
        _ => {}
    }
}

async fn handle_created(
    workspace: &Arc<Workspace>,
    store: &Arc<Store>,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
    watcher: Option<&mut RecommendedWatcher>,
    path: &Path,
) {
    if path.is_dir() {
        let _ = std::fs::create_dir_all(workspace.mirror_path(path));
        if let Some(watcher) = watcher {
            if let Err(err) = watcher.watch(path, RecursiveMode::NonRecursive) {
                log::error!("couldn't watch new dir {}: {err}", path.display());
            }
        }
        return;
    }

    store.files.open_path(path);
    if !store.files.contains(path) {
        return;
    }
    workspace.track(path.to_path_buf());
    workspace.write_mirror_from_store(store, path);
    refresh_after_disk_change(workspace, store, diag_tx, path).await;
}

async fn handle_written(
    workspace: &Arc<Workspace>,
    store: &Arc<Store>,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
    path: &Path,
) {
    if path.is_dir() {
        return;
    }
    // The editor buffer wins while the file is open.
    if store.files.get(path).is_some_and(|record| record.is_open()) {
        return;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            log::error!("couldn't reread {}: {err}", path.display());
            return;
        }
    };
    if store.files.contains(path) {
        if let Err(err) = store.files.modify_full(path, content.clone()) {
            log::error!("couldn't update {}: {err}", path.display());
            return;
        }
    } else {
        store.files.open_path(path);
        workspace.track(path.to_path_buf());
    }
    workspace.write_mirror(path, content.as_bytes());
    refresh_after_disk_change(workspace, store, diag_tx, path).await;
}

/// Re-diagnoses and re-analyses after a disk-origin change; a changed
/// project config re-diagnoses the whole workspace.
async fn refresh_after_disk_change(
    workspace: &Arc<Workspace>,
    store: &Arc<Store>,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
    path: &Path,
) {
    if path.file_name().is_some_and(|name| name == CONFIG_FILE_NAME) {
        workspace.reload_config();
        for tracked in workspace.tracked() {
            if is_faust_file(&tracked) {
                diagnostics::diagnose_file(workspace, store, &tracked, diag_tx).await;
            }
        }
        return;
    }
    if is_faust_file(path) {
        diagnostics::diagnose_file(workspace, store, path, diag_tx).await;
        analysis::analyze(store, &workspace.analysis_context(), path);
    }
}
