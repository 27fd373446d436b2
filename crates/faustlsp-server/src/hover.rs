//! Hover documentation.

use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind, Position, Url};

use faustlsp_core::{resolve, text, Store};

/// The documentation of the identifier under the cursor, as markdown.
pub fn hover(store: &Store, uri: &Url, position: Position) -> Option<Hover> {
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

    let docs = resolve::find_docs(&identifier, &scope, store).ok()?;
    if docs.is_empty() {
        return None;
    }
    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: docs,
        }),
        range: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::tests::analyzed_workspace;

    #[test]
    fn hover_shows_the_imported_symbol_docs() {
        let (_dir, store, uri) = analyzed_workspace(
            &[
                ("main.dsp", "import(\"util.dsp\");\nprocess = foo;\n"),
                ("util.dsp", "// Constant gain.\nfoo = 1;\n"),
            ],
            "main.dsp",
        );

        let hover = hover(&store, &uri, Position::new(1, 11)).unwrap();
        match hover.contents {
            HoverContents::Markup(markup) => {
                assert_eq!(markup.kind, MarkupKind::Markdown);
                assert_eq!(markup.value, " Constant gain.");
            }
            other => panic!("unexpected contents {other:?}"),
        }
    }

    #[test]
    fn undocumented_symbols_have_no_hover() {
        let (_dir, store, uri) =
            analyzed_workspace(&[("main.dsp", "foo = 1;\nprocess = foo;\n")], "main.dsp");
        assert!(hover(&store, &uri, Position::new(1, 11)).is_none());
    }
}
