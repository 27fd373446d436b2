//! Go-to-definition and the references stub.

use tower_lsp::lsp_types::{Location, Position, Url};

use faustlsp_core::uri::path_to_uri;
use faustlsp_core::{resolve, text, Store};

/// Resolves the (possibly dotted) identifier under the cursor to its
/// defining location. `None` whenever anything along the way is missing:
/// resolution failures are not errors to the client.
pub fn definition_location(store: &Store, uri: &Url, position: Position) -> Option<Location> {
    let record = store.files.get_uri(uri)?;
    let root = record.scope()?;
    let (content, _) = record.snapshot();
    let encoding = store.files.encoding();

    let offset = text::offset_of(position, &content, encoding).ok()?;
    let (identifier, span) = resolve::identifier_at(&content, offset);
    if identifier.is_empty() {
        return None;
    }
    let scope = resolve::find_lowest_scope(
        &root,
        resolve::byte_span_range(&content, span, encoding),
    );

    let location = resolve::find_definition(&identifier, &scope, store).ok()?;
    Some(Location {
        uri: path_to_uri(&location.file).ok()?,
        range: location.range,
    })
}

/// Reference search is a sketch: the defining location stands in for the
/// full reference set.
pub fn references(store: &Store, uri: &Url, position: Position) -> Option<Vec<Location>> {
    definition_location(store, uri, position).map(|location| vec![location])
}
