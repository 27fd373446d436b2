//! LSP backend: lifecycle state machine, capability negotiation and the
//! thin dispatch from protocol requests to the analysis engine.
//!
//! Document notifications only update the file store and enqueue an event
//! for the workspace mirror; the mirror's single event loop does the
//! heavier work (mirroring, diagnostics, analysis) in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use faustlsp_core::text::Encoding;
use faustlsp_core::uri::{uri_to_path, Handle};
use faustlsp_core::Store;

use crate::workspace::{self, EditorEvent, Workspace};
use crate::{completion, definition, diagnostics, formatting, hover, symbols};

/// Server lifecycle per the LSP state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Created,
    Initializing,
    Running,
    Shutdown,
}

/// The Faust language server.
pub struct Backend {
    client: Client,
    store: Arc<Store>,
    workspace: OnceLock<Arc<Workspace>>,
    status: RwLock<Status>,
    /// Set once the client has sent `shutdown`; decides the exit code.
    clean_exit: Arc<AtomicBool>,
    editor_tx: mpsc::UnboundedSender<EditorEvent>,
    editor_rx: Mutex<Option<mpsc::UnboundedReceiver<EditorEvent>>>,
    diag_tx: mpsc::UnboundedSender<PublishDiagnosticsParams>,
    diag_rx: Mutex<Option<mpsc::UnboundedReceiver<PublishDiagnosticsParams>>>,
    cancel: CancellationToken,
}

impl Backend {
    pub fn new(client: Client, clean_exit: Arc<AtomicBool>) -> Self {
        let (editor_tx, editor_rx) = mpsc::unbounded_channel();
        let (diag_tx, diag_rx) = mpsc::unbounded_channel();
        Backend {
            client,
            // A missing grammar is unrecoverable; abort startup.
            store: Arc::new(Store::new().expect("faust grammar failed to load")),
            workspace: OnceLock::new(),
            status: RwLock::new(Status::Created),
            clean_exit,
            editor_tx,
            editor_rx: Mutex::new(Some(editor_rx)),
            diag_tx,
            diag_rx: Mutex::new(Some(diag_rx)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn workspace(&self) -> Option<&Arc<Workspace>> {
        self.workspace.get()
    }

    fn status(&self) -> Status {
        *self.status.read().unwrap()
    }

    fn set_status(&self, status: Status) {
        *self.status.write().unwrap() = status;
    }

    /// Requests are only valid while the server is running: anything but
    /// `initialize` before then, or anything but `exit` after `shutdown`,
    /// is a protocol error.
    fn ensure_ready(&self) -> jsonrpc::Result<()> {
        match self.status() {
            Status::Created | Status::Initializing | Status::Shutdown => {
                Err(jsonrpc::Error::invalid_request())
            }
            Status::Running => Ok(()),
        }
    }

    fn handle_for(&self, uri: &Url) -> Option<Handle> {
        match Handle::from_uri(uri.clone()) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("bad document uri {uri}: {err}");
                None
            }
        }
    }

    fn enqueue(&self, event: EditorEvent) {
        if self.editor_tx.send(event).is_err() {
            log::error!("workspace event loop is gone");
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        if self.status() != Status::Created {
            return Err(jsonrpc::Error::invalid_request());
        }
        self.set_status(Status::Initializing);

        // UTF-16 if the client offers it first, otherwise UTF-32. UTF-8 is
        // never accepted as a position encoding.
        let encoding = params
            .capabilities
            .general
            .as_ref()
            .and_then(|general| general.position_encodings.as_ref())
            .and_then(|encodings| encodings.first())
            .and_then(Encoding::from_kind)
            .unwrap_or(Encoding::Utf32);
        self.store.files.set_encoding(encoding);

        #[allow(deprecated)]
        let root = params
            .root_uri
            .as_ref()
            .and_then(|uri| uri_to_path(uri).ok())
            .or_else(|| {
                params
                    .workspace_folders
                    .as_ref()
                    .and_then(|folders| folders.first())
                    .and_then(|folder| uri_to_path(&folder.uri).ok())
            })
            .or_else(|| std::env::current_dir().ok())
            .ok_or_else(jsonrpc::Error::internal_error)?;
        log::info!("workspace root: {}", root.display());

        let workspace = Workspace::new(root).map_err(|err| {
            log::error!("couldn't set up workspace mirror: {err}");
            jsonrpc::Error::internal_error()
        })?;
        let _ = self.workspace.set(Arc::new(workspace));

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                position_encoding: Some(encoding.kind()),
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                document_symbol_provider: Some(OneOf::Left(true)),
                document_formatting_provider: Some(OneOf::Left(true)),
                definition_provider: Some(OneOf::Left(true)),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                references_provider: Some(OneOf::Left(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![".".to_string()]),
                    ..Default::default()
                }),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: None,
                    }),
                    file_operations: None,
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "faustlsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.set_status(Status::Running);
        let Some(workspace) = self.workspace() else {
            return;
        };

        if let Some(diag_rx) = self.diag_rx.lock().unwrap().take() {
            tokio::spawn(diagnostics::publisher(self.client.clone(), diag_rx));
        }
        if let Some(editor_rx) = self.editor_rx.lock().unwrap().take() {
            tokio::spawn(workspace::run(
                workspace.clone(),
                self.store.clone(),
                editor_rx,
                self.diag_tx.clone(),
                self.cancel.child_token(),
            ));
        }
        log::info!("faustlsp initialized");
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        self.clean_exit.store(true, Ordering::SeqCst);
        self.set_status(Status::Shutdown);
        self.cancel.cancel();
        // Some clients kill the server right after shutdown; drop the
        // mirror now rather than at exit.
        if let Some(workspace) = self.workspace() {
            workspace.cleanup();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Some(handle) = self.handle_for(&params.text_document.uri) else {
            return;
        };
        let path = handle.path.clone();
        // The editor buffer is authoritative from now until close. A file
        // the workspace walk already loaded keeps its record (and, when the
        // text is unchanged, its cached scope); anything else is added with
        // the editor's initial text.
        if self.store.files.contains(&path) {
            if let Err(err) = self.store.files.modify_full(&path, params.text_document.text) {
                log::error!("couldn't open {}: {err}", path.display());
            }
        } else {
            self.store.files.add(handle, params.text_document.text);
        }
        self.store.files.set_open(&path, true);
        self.enqueue(EditorEvent::Open(path));
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(handle) = self.handle_for(&params.text_document.uri) else {
            return;
        };
        for change in params.content_changes {
            let result = match change.range {
                Some(range) => {
                    self.store
                        .files
                        .modify_incremental(&handle.path, range, &change.text)
                }
                None => self.store.files.modify_full(&handle.path, change.text),
            };
            if let Err(err) = result {
                log::error!("couldn't apply change to {}: {err}", handle.path.display());
            }
        }
        self.enqueue(EditorEvent::Change(handle.path));
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Some(handle) = self.handle_for(&params.text_document.uri) else {
            return;
        };
        self.store.files.set_open(&handle.path, false);
        self.enqueue(EditorEvent::Close(handle.path));
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> jsonrpc::Result<Option<GotoDefinitionResponse>> {
        self.ensure_ready()?;
        let position_params = params.text_document_position_params;
        Ok(definition::definition_location(
            &self.store,
            &position_params.text_document.uri,
            position_params.position,
        )
        .map(GotoDefinitionResponse::Scalar))
    }

    async fn references(&self, params: ReferenceParams) -> jsonrpc::Result<Option<Vec<Location>>> {
        self.ensure_ready()?;
        let position_params = params.text_document_position;
        Ok(definition::references(
            &self.store,
            &position_params.text_document.uri,
            position_params.position,
        ))
    }

    async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        self.ensure_ready()?;
        let position_params = params.text_document_position_params;
        Ok(hover::hover(
            &self.store,
            &position_params.text_document.uri,
            position_params.position,
        ))
    }

    async fn completion(
        &self,
        params: CompletionParams,
    ) -> jsonrpc::Result<Option<CompletionResponse>> {
        self.ensure_ready()?;
        let position_params = params.text_document_position;
        Ok(completion::completion_items(
            &self.store,
            &position_params.text_document.uri,
            position_params.position,
        )
        .map(CompletionResponse::Array))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> jsonrpc::Result<Option<DocumentSymbolResponse>> {
        self.ensure_ready()?;
        Ok(symbols::document_symbols(&self.store, &params.text_document.uri)
            .map(DocumentSymbolResponse::Nested))
    }

    async fn formatting(
        &self,
        params: DocumentFormattingParams,
    ) -> jsonrpc::Result<Option<Vec<TextEdit>>> {
        self.ensure_ready()?;
        let Some(record) = self.store.files.get_uri(&params.text_document.uri) else {
            return Ok(None);
        };
        let (content, _) = record.snapshot();
        let indent = formatting::indent_for(&params.options);

        match formatting::format(content.as_bytes(), &indent).await {
            Ok(formatted) => Ok(Some(vec![formatting::whole_document_edit(
                &content,
                formatted,
                self.store.files.encoding(),
            )])),
            Err(err) => {
                log::error!("formatting failed: {err}");
                let mut error = jsonrpc::Error::internal_error();
                error.message = err.to_string().into();
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::{ClientSocket, LspService};

    fn test_service() -> (LspService<Backend>, ClientSocket) {
        LspService::new(|client| Backend::new(client, Arc::new(AtomicBool::new(false))))
    }

    #[allow(deprecated)]
    fn init_params(
        dir: &tempfile::TempDir,
        encodings: Option<Vec<PositionEncodingKind>>,
    ) -> InitializeParams {
        InitializeParams {
            root_uri: Some(Url::from_file_path(dir.path()).unwrap()),
            capabilities: ClientCapabilities {
                general: Some(GeneralClientCapabilities {
                    position_encodings: encodings,
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn hover_params() -> HoverParams {
        HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier {
                    uri: Url::parse("file:///nowhere.dsp").unwrap(),
                },
                position: Position::new(0, 0),
            },
            work_done_progress_params: Default::default(),
        }
    }

    #[tokio::test]
    async fn utf16_offered_first_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _socket) = test_service();
        let backend = service.inner();

        let encodings = vec![PositionEncodingKind::UTF16, PositionEncodingKind::UTF32];
        let result = backend
            .initialize(init_params(&dir, Some(encodings)))
            .await
            .unwrap();

        assert_eq!(
            result.capabilities.position_encoding,
            Some(PositionEncodingKind::UTF16)
        );
        assert_eq!(backend.store().files.encoding(), Encoding::Utf16);

        let completion = result.capabilities.completion_provider.unwrap();
        assert_eq!(completion.trigger_characters, Some(vec![".".to_string()]));
        match result.capabilities.text_document_sync {
            Some(TextDocumentSyncCapability::Kind(kind)) => {
                assert_eq!(kind, TextDocumentSyncKind::INCREMENTAL);
            }
            other => panic!("unexpected sync capability {other:?}"),
        }

        // A second initialize is out of sequence.
        let err = backend
            .initialize(init_params(&dir, None))
            .await
            .unwrap_err();
        assert_eq!(err.code, jsonrpc::ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn utf8_only_clients_fall_back_to_utf32() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _socket) = test_service();
        let backend = service.inner();

        let result = backend
            .initialize(init_params(&dir, Some(vec![PositionEncodingKind::UTF8])))
            .await
            .unwrap();

        assert_eq!(
            result.capabilities.position_encoding,
            Some(PositionEncodingKind::UTF32)
        );
        assert_eq!(backend.store().files.encoding(), Encoding::Utf32);
    }

    #[tokio::test]
    async fn absent_encoding_lists_fall_back_to_utf32() {
        for encodings in [None, Some(Vec::new())] {
            let dir = tempfile::tempdir().unwrap();
            let (service, _socket) = test_service();
            let backend = service.inner();

            let result = backend
                .initialize(init_params(&dir, encodings))
                .await
                .unwrap();
            assert_eq!(
                result.capabilities.position_encoding,
                Some(PositionEncodingKind::UTF32)
            );
            assert_eq!(backend.store().files.encoding(), Encoding::Utf32);
        }
    }

    #[tokio::test]
    async fn requests_are_gated_on_the_lifecycle() {
        let (service, _socket) = test_service();
        let backend = service.inner();

        // Nothing but initialize is acceptable before initialization.
        let err = backend.hover(hover_params()).await.unwrap_err();
        assert_eq!(err.code, jsonrpc::ErrorCode::InvalidRequest);

        backend.set_status(Status::Running);
        assert!(backend.hover(hover_params()).await.unwrap().is_none());

        // Nothing but exit is acceptable after shutdown.
        backend.set_status(Status::Shutdown);
        let err = backend.hover(hover_params()).await.unwrap_err();
        assert_eq!(err.code, jsonrpc::ErrorCode::InvalidRequest);
    }
}
