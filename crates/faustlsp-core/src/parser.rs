//! Tree-sitter adapter for the Faust grammar.
//!
//! Wraps the underlying parser behind a mutex (tree-sitter parsers are not
//! thread-safe) and exposes the handful of primitives the rest of the
//! engine needs: parse bytes to a tree, list the filenames a tree imports,
//! collect syntax errors, extract the document-symbol outline and run raw
//! queries.

use std::sync::Mutex;

use lsp_types::{DocumentSymbol, Position, Range, SymbolKind};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, Tree};

use crate::Result;

/// The Faust grammar.
pub fn language() -> Language {
    tree_sitter_faust::LANGUAGE.into()
}

/// Serialised access to one tree-sitter parser instance.
pub struct ParserPool {
    inner: Mutex<Parser>,
}

impl ParserPool {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser.set_language(&language())?;
        Ok(ParserPool {
            inner: Mutex::new(parser),
        })
    }

    /// Parses `source` into a fresh tree. Trees are rebuilt from scratch on
    /// every call; the content-hash scope cache absorbs the cost upstream.
    pub fn parse(&self, source: &[u8]) -> Option<Tree> {
        let mut parser = self.inner.lock().unwrap();
        let tree = parser.parse(source, None);
        parser.reset();
        tree
    }
}

/// The LSP range a node spans. Tree-sitter columns are byte columns; Faust
/// sources are treated as ASCII for range reporting, like the grammar does.
pub fn node_range(node: &Node) -> Range {
    let start = node.start_position();
    let end = node.end_position();
    Range::new(
        Position::new(start.row as u32, start.column as u32),
        Position::new(end.row as u32, end.column as u32),
    )
}

/// UTF-8 text of a node, or empty when the range is out of bounds.
pub fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

/// Drops the surrounding quotes of a string literal token.
pub fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// A syntax error reported straight off the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub range: Range,
    pub message: String,
}

/// Collects error and missing-token nodes in source order.
///
/// Error nodes report what was unexpected and the nearest named construct
/// being parsed; missing nodes report the token the parser inserted.
pub fn syntax_errors(source: &[u8], tree: &Tree) -> Vec<SyntaxError> {
    let mut errors = Vec::new();
    collect_errors(tree.root_node(), source, &mut errors);
    errors
}

fn collect_errors(node: Node, source: &[u8], errors: &mut Vec<SyntaxError>) {
    if !node.has_error() && !node.is_missing() {
        return;
    }
    if node.is_error() {
        // Nested errors fold into the outermost error node.
        let context = nearest_named_ancestor(&node)
            .map(|n| n.kind().to_string())
            .unwrap_or_else(|| "program".to_string());
        let text: String = node_text(&node, source).chars().take(40).collect();
        errors.push(SyntaxError {
            range: node_range(&node),
            message: format!("Unexpected '{text}' while parsing {context}"),
        });
        return;
    }
    if node.is_missing() {
        errors.push(SyntaxError {
            range: node_range(&node),
            message: format!("Missing '{}'", node.kind()),
        });
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_errors(child, source, errors);
    }
}

fn nearest_named_ancestor<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(n) = current {
        if n.is_named() && !n.is_error() {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

/// Ordered filenames referenced by `import(...)` statements.
pub fn imports_of(source: &[u8], tree: &Tree) -> Vec<String> {
    let mut imports = Vec::new();
    collect_imports(tree.root_node(), source, &mut imports);
    imports
}

fn collect_imports(node: Node, source: &[u8], imports: &mut Vec<String>) {
    if node.kind() == "file_import" {
        if let Some(filename) = node.child_by_field_name("filename") {
            imports.push(strip_quotes(node_text(&filename, source)).to_string());
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_imports(child, source, imports);
    }
}

/// Runs a raw query against a tree and returns (capture name, node) pairs.
pub fn query_matches<'t>(
    pattern: &str,
    source: &[u8],
    tree: &'t Tree,
) -> Result<Vec<(String, Node<'t>)>> {
    let query = Query::new(&language(), pattern)?;
    let names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), source);
    let mut results = Vec::new();
    while let Some(matched) = matches.next() {
        for capture in matched.captures {
            results.push((names[capture.index as usize].to_string(), capture.node));
        }
    }
    Ok(results)
}

/// The document-symbol outline: definitions and function definitions, with
/// the local definitions of `with`/`letrec` blocks surfacing as children of
/// the enclosing definition.
pub fn document_symbols(source: &[u8], tree: &Tree) -> Vec<DocumentSymbol> {
    collect_document_symbols(tree.root_node(), source)
}

fn collect_document_symbols(node: Node, source: &[u8]) -> Vec<DocumentSymbol> {
    let mut symbols = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "definition" | "function_definition" => {
                let name = child
                    .child(0)
                    .map(|n| node_text(&n, source).to_string())
                    .unwrap_or_default();
                if name.is_empty() {
                    continue;
                }
                let children = collect_document_symbols(child, source);
                let range = node_range(&child);
                #[allow(deprecated)]
                symbols.push(DocumentSymbol {
                    name,
                    detail: None,
                    // Every Faust definition is a signal processor.
                    kind: SymbolKind::FUNCTION,
                    tags: None,
                    deprecated: None,
                    range,
                    selection_range: range,
                    children: (!children.is_empty()).then_some(children),
                });
            }
            "with_environment" | "letrec_environment" => {
                if let Some(body) = child.child_by_field_name("local_environment") {
                    symbols.extend(collect_document_symbols(body, source));
                }
            }
            _ => {}
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Tree {
        ParserPool::new().unwrap().parse(source.as_bytes()).unwrap()
    }

    #[test]
    fn parses_a_minimal_program() {
        let tree = parse("process = _;\n");
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn clean_programs_have_no_syntax_errors() {
        let source = "foo = 1;\nprocess = foo;\n";
        let tree = parse(source);
        assert!(syntax_errors(source.as_bytes(), &tree).is_empty());
    }

    #[test]
    fn broken_programs_report_errors() {
        let source = "process = foo with {\n";
        let tree = parse(source);
        let errors = syntax_errors(source.as_bytes(), &tree);
        assert!(!errors.is_empty());
    }

    #[test]
    fn imports_are_listed_in_source_order() {
        let source = "import(\"stdfaust.lib\");\nimport(\"util.dsp\");\nprocess = _;\n";
        let tree = parse(source);
        assert_eq!(
            imports_of(source.as_bytes(), &tree),
            vec!["stdfaust.lib", "util.dsp"]
        );
    }

    #[test]
    fn query_primitive_finds_imports() {
        let source = "import(\"util.dsp\");\nprocess = _;\n";
        let tree = parse(source);
        let matches = query_matches("(file_import) @import", source.as_bytes(), &tree).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "import");
        assert_eq!(matches[0].1.kind(), "file_import");
    }

    #[test]
    fn document_symbols_cover_definitions() {
        let source = "foo = 1;\nbar(x) = x + foo;\nprocess = bar(2);\n";
        let tree = parse(source);
        let symbols = document_symbols(source.as_bytes(), &tree);
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["foo", "bar", "process"]);
        assert!(symbols.iter().all(|s| s.kind == SymbolKind::FUNCTION));
    }

    #[test]
    fn with_locals_become_children() {
        let source = "a = b with { b = 2; };\n";
        let tree = parse(source);
        let symbols = document_symbols(source.as_bytes(), &tree);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "a");
        let children = symbols[0].children.as_ref().unwrap();
        assert_eq!(children[0].name, "b");
    }

    #[test]
    fn strip_quotes_only_strips_balanced_quotes() {
        assert_eq!(strip_quotes("\"util.dsp\""), "util.dsp");
        assert_eq!(strip_quotes("bare"), "bare");
    }
}
