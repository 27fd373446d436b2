//! Diagnostic generation and publication.
//!
//! Syntax diagnostics come straight off the tree; compiler diagnostics are
//! gated on a syntactically clean file and the project configuration, and
//! run against the mirror so unsaved buffers are compiled as-is. A single
//! publisher task owns the client side of the diagnostics channel.

use std::path::Path;

use tokio::sync::mpsc;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, PublishDiagnosticsParams};
use tower_lsp::Client;

use faustlsp_core::parser::{self, SyntaxError};
use faustlsp_core::uri::path_to_uri;
use faustlsp_core::Store;

use crate::compiler;
use crate::workspace::Workspace;

/// Maps parser errors onto protocol diagnostics.
pub fn syntax_diagnostics(errors: &[SyntaxError]) -> Vec<Diagnostic> {
    errors
        .iter()
        .map(|error| Diagnostic {
            range: error.range,
            severity: Some(DiagnosticSeverity::ERROR),
            source: Some("tree-sitter".to_string()),
            message: error.message.clone(),
            ..Default::default()
        })
        .collect()
}

/// Diagnoses one file and queues the result for publication.
///
/// The syntax-error flag on the file record gates the compiler run: a file
/// the parser rejects is never handed to the compiler.
pub async fn diagnose_file(
    workspace: &Workspace,
    store: &Store,
    path: &Path,
    diag_tx: &mpsc::UnboundedSender<PublishDiagnosticsParams>,
) {
    let Some(record) = store.files.get(path) else {
        return;
    };
    let (content, _) = record.snapshot();
    let Some(tree) = store.parsers.parse(content.as_bytes()) else {
        return;
    };
    let errors = parser::syntax_errors(content.as_bytes(), &tree);
    record.set_syntax_errors(!errors.is_empty());

    let mut diagnostics = syntax_diagnostics(&errors);

    let config = workspace.config();
    if errors.is_empty()
        && config.compiler_diagnostics
        && config.is_process_file(workspace.root(), path)
    {
        if let Some(diagnostic) =
            compiler::diagnose(&config, &workspace.mirror_path(path), &workspace.mirror_root())
                .await
        {
            diagnostics.push(diagnostic);
        }
    }

    let Ok(uri) = path_to_uri(path) else {
        return;
    };
    let _ = diag_tx.send(PublishDiagnosticsParams {
        uri,
        diagnostics,
        version: None,
    });
}

/// Forwards queued diagnostics to the client until the channel closes.
pub async fn publisher(
    client: Client,
    mut diag_rx: mpsc::UnboundedReceiver<PublishDiagnosticsParams>,
) {
    while let Some(params) = diag_rx.recv().await {
        client
            .publish_diagnostics(params.uri, params.diagnostics, params.version)
            .await;
    }
}
