//! Document symbols.

use tower_lsp::lsp_types::{DocumentSymbol, Url};

use faustlsp_core::{parser, Store};

/// The outline of one document.
pub fn document_symbols(store: &Store, uri: &Url) -> Option<Vec<DocumentSymbol>> {
    let record = store.files.get_uri(uri)?;
    let (content, _) = record.snapshot();
    let tree = store.parsers.parse(content.as_bytes())?;
    Some(parser::document_symbols(content.as_bytes(), &tree))
}
