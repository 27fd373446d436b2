//! Code completion.
//!
//! Candidates come from the resolver (everything visible at the cursor, or
//! the members of the library/environment left of a trailing dot); each
//! item replaces the identifier characters under the cursor via a plain
//! text edit.

use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionTextEdit, Documentation, InsertTextFormat,
    MarkupContent, MarkupKind, Position, TextEdit, Url,
};

use faustlsp_core::{resolve, Store};

/// Completion items for the given cursor position.
pub fn completion_items(store: &Store, uri: &Url, position: Position) -> Option<Vec<CompletionItem>> {
    let record = store.files.get_uri(uri)?;
    let candidates = resolve::completion_candidates(position, &record.handle.path, store);

    let (content, _) = record.snapshot();
    let replace_range =
        resolve::completion_replace_range(position, &content, store.files.encoding());

    let items = candidates
        .into_iter()
        .map(|candidate| CompletionItem {
            label: candidate.name.clone(),
            kind: Some(CompletionItemKind::VARIABLE),
            detail: (!candidate.docs.usage.is_empty()).then(|| candidate.docs.usage.clone()),
            documentation: (!candidate.docs.full.is_empty()).then(|| {
                Documentation::MarkupContent(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: candidate.docs.full,
                })
            }),
            insert_text_format: Some(InsertTextFormat::PLAIN_TEXT),
            text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                range: replace_range,
                new_text: candidate.name,
            })),
            ..Default::default()
        })
        .collect();
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::tests::analyzed_workspace;

    #[test]
    fn dot_completion_offers_imported_names() {
        // The document ends right after `util.`, with no trailing newline.
        let (_dir, store, uri) = analyzed_workspace(
            &[
                ("main.dsp", "import(\"util.dsp\");\nprocess = util."),
                ("util.dsp", "foo = 1;\n"),
            ],
            "main.dsp",
        );

        let items = completion_items(&store, &uri, Position::new(1, 15)).unwrap();
        assert!(items.iter().any(|item| item.label == "foo"));

        // Right after the dot there is nothing to replace.
        let foo = items.iter().find(|item| item.label == "foo").unwrap();
        match foo.text_edit.as_ref().unwrap() {
            CompletionTextEdit::Edit(edit) => {
                assert_eq!(edit.range.start, Position::new(1, 15));
                assert_eq!(edit.range.end, Position::new(1, 15));
                assert_eq!(edit.new_text, "foo");
            }
            other => panic!("unexpected edit {other:?}"),
        }
    }

    #[test]
    fn library_dot_completion_lists_only_the_library() {
        let (_dir, store, uri) = analyzed_workspace(
            &[
                ("main.dsp", "ut = library(\"util.dsp\");\nprocess = ut."),
                ("util.dsp", "foo = 1;\nbar = 2;\n"),
            ],
            "main.dsp",
        );

        let items = completion_items(&store, &uri, Position::new(1, 13)).unwrap();
        let labels: Vec<_> = items.iter().map(|item| item.label.as_str()).collect();
        assert!(labels.contains(&"foo"));
        assert!(labels.contains(&"bar"));
        assert!(!labels.contains(&"ut"));
    }

    #[test]
    fn plain_positions_list_the_visible_names() {
        let (_dir, store, uri) = analyzed_workspace(
            &[("main.dsp", "foo = 1;\nbar = 2;\nprocess = \n")],
            "main.dsp",
        );
        let items = completion_items(&store, &uri, Position::new(2, 10)).unwrap();
        let labels: Vec<_> = items.iter().map(|item| item.label.as_str()).collect();
        assert!(labels.contains(&"foo"));
        assert!(labels.contains(&"bar"));
    }
}
