//! Identifier resolution over the scope graph.
//!
//! Lookups walk the scope chain of one file, descend into imported files'
//! root scopes and follow dotted paths through environments and libraries.
//! Every routine that can cross file boundaries carries a visited set so
//! cyclic imports stay finite.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use lsp_types::{Position, Range};

use crate::files::FileStore;
use crate::scope::{Documentation, Scope, SourceLocation, Symbol};
use crate::text::{self, Encoding};
use crate::{Error, Result, Store};

/// Finds the first symbol named `ident` visible from `scope`: the scope's
/// own symbols first, then imported files, then the parent chain.
pub fn find_symbol(ident: &str, scope: &Arc<Scope>, store: &Store) -> Result<Symbol> {
    let mut visited = HashSet::new();
    find_symbol_in(ident, scope, &store.files, &mut visited)
        .ok_or_else(|| Error::SymbolNotFound(ident.to_string()))
}

fn find_symbol_in(
    ident: &str,
    scope: &Arc<Scope>,
    files: &FileStore,
    visited: &mut HashSet<PathBuf>,
) -> Option<Symbol> {
    {
        let symbols = scope.symbols();
        for symbol in symbols.iter() {
            if symbol.name() == Some(ident) {
                return Some(symbol.clone());
            }
        }
        for symbol in symbols.iter() {
            let Symbol::Import { file, .. } = symbol else {
                continue;
            };
            if file.as_os_str().is_empty() || !visited.insert(file.clone()) {
                continue;
            }
            let Some(root) = files.get(file).and_then(|record| record.scope()) else {
                continue;
            };
            if let Some(found) = find_symbol_in(ident, &root, files, visited) {
                return Some(found);
            }
        }
    }
    let parent = scope.parent()?;
    find_symbol_in(ident, &parent, files, visited)
}

/// Follows a symbol to the first environment it evaluates to.
///
/// Environment-like symbols are their own environment; definitions and
/// functions are followed through one layer of expression nesting.
pub fn find_first_environment(symbol: &Symbol) -> Option<Symbol> {
    match symbol {
        Symbol::Environment { .. }
        | Symbol::WithEnvironment { .. }
        | Symbol::LetRecEnvironment { .. } => Some(symbol.clone()),
        Symbol::Definition { .. } | Symbol::Function { .. } => {
            let scope = symbol.expression_scope()?;
            let symbols = scope.symbols();
            let first = symbols.first()?;
            find_first_environment(first)
        }
        _ => None,
    }
}

/// Resolves `ident` to an environment symbol visible from `scope`.
pub fn find_environment_ident(ident: &str, scope: &Arc<Scope>, store: &Store) -> Result<Symbol> {
    let symbol = find_symbol(ident, scope, store)?;
    find_first_environment(&symbol).ok_or_else(|| Error::SymbolNotFound(ident.to_string()))
}

/// Resolves `ident` to the file a `library(...)` binding imports.
pub fn find_library_ident(ident: &str, scope: &Arc<Scope>, store: &Store) -> Result<PathBuf> {
    match find_symbol(ident, scope, store)? {
        Symbol::Library { file, .. } if !file.as_os_str().is_empty() => Ok(file),
        _ => Err(Error::SymbolNotFound(ident.to_string())),
    }
}

/// Applies the dotted-identifier policy: every segment except the last is
/// resolved as an environment binding (preferred) or a library binding,
/// switching the active scope accordingly. Returns the final segment and
/// the scope it must be looked up in.
pub fn resolve_dotted<'i>(
    ident: &'i str,
    scope: &Arc<Scope>,
    store: &Store,
) -> (&'i str, Arc<Scope>) {
    let segments: Vec<&str> = ident.split('.').collect();
    let mut scope = scope.clone();

    for segment in &segments[..segments.len() - 1] {
        if let Ok(symbol) = find_environment_ident(segment, &scope, store) {
            if let Some(members) = symbol.member_scope() {
                scope = members;
                continue;
            }
        }
        let Ok(file) = find_library_ident(segment, &scope, store) else {
            break;
        };
        let Some(root) = store.files.get(&file).and_then(|record| record.scope()) else {
            break;
        };
        scope = root;
    }

    (segments[segments.len() - 1], scope)
}

/// The defining location of a (possibly dotted) identifier.
pub fn find_definition(ident: &str, scope: &Arc<Scope>, store: &Store) -> Result<SourceLocation> {
    let (last, scope) = resolve_dotted(ident, scope, store);
    Ok(find_symbol(last, &scope, store)?.location().clone())
}

/// The full documentation of a (possibly dotted) identifier.
pub fn find_docs(ident: &str, scope: &Arc<Scope>, store: &Store) -> Result<String> {
    let (last, scope) = resolve_dotted(ident, scope, store);
    let symbol = find_symbol(last, &scope, store)?;
    Ok(symbol.docs().map(|d| d.full.clone()).unwrap_or_default())
}

/// A name visible at some position, offered for completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCandidate {
    pub name: String,
    pub docs: Documentation,
}

/// Every name visible at `position` in `path`.
///
/// With no identifier under the cursor, or a plain prefix, this lists the
/// whole scope chain (the client filters). A dotted prefix ending in `.`
/// switches to the member scope of the named library or environment.
pub fn completion_candidates(
    position: Position,
    path: &std::path::Path,
    store: &Store,
) -> Vec<CompletionCandidate> {
    let Some(record) = store.files.get(path) else {
        return Vec::new();
    };
    let Some(root) = record.scope() else {
        return Vec::new();
    };
    let (content, _) = record.snapshot();
    let Ok(offset) = text::offset_of(position, &content, store.files.encoding()) else {
        return Vec::new();
    };

    let (identifier, ident_range) = identifier_at(&content, offset);
    let scope = find_lowest_scope(
        &root,
        byte_span_range(&content, ident_range, store.files.encoding()),
    );

    if let Some(prefix) = identifier.strip_suffix('.') {
        // Completion was requested right after the dot: list the members
        // of whatever the prefix names. A prefix that doesn't name a
        // library or environment (e.g. after a bare import) falls through
        // to the scope-chain listing, which covers imported names too.
        if let Some(members) = member_candidates(prefix, &scope, store) {
            return members;
        }
    }

    // Everything visible here, imports included.
    let mut candidates = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(scope);
    while let Some(scope) = current {
        candidates.extend(collect_symbols(&scope, "", store, &mut visited));
        current = scope.parent();
    }
    candidates
}

/// The members behind a dotted prefix, when the prefix names a library or
/// an environment-valued binding.
fn member_candidates(
    prefix: &str,
    scope: &Arc<Scope>,
    store: &Store,
) -> Option<Vec<CompletionCandidate>> {
    let (last, prefix_scope) = resolve_dotted(prefix, scope, store);
    let symbol = find_symbol(last, &prefix_scope, store).ok()?;
    if let Symbol::Library { file, .. } = &symbol {
        let root = store.files.get(file).and_then(|record| record.scope())?;
        return Some(collect_symbols(&root, "", store, &mut HashSet::new()));
    }
    let members = find_first_environment(&symbol)?.member_scope()?;
    Some(collect_symbols(&members, "", store, &mut HashSet::new()))
}

/// Collects the names in one scope: every named symbol, the members of
/// first-environments of nested definitions (dotted), and everything from
/// imported files.
fn collect_symbols(
    scope: &Arc<Scope>,
    prefix: &str,
    store: &Store,
    visited: &mut HashSet<PathBuf>,
) -> Vec<CompletionCandidate> {
    let mut out = Vec::new();
    let symbols = scope.symbols();
    for symbol in symbols.iter() {
        if let Some(name) = symbol.name() {
            if !name.is_empty() {
                out.push(CompletionCandidate {
                    name: join_dotted(prefix, name),
                    docs: symbol.docs().cloned().unwrap_or_default(),
                });
            }
        }
        match symbol {
            Symbol::Definition { .. }
            | Symbol::Function { .. }
            | Symbol::WithEnvironment { .. }
            | Symbol::LetRecEnvironment { .. } => {
                if let Some(environment) = find_first_environment(symbol) {
                    if let Some(members) = environment.member_scope() {
                        let nested = join_dotted(prefix, symbol.name().unwrap_or_default());
                        out.extend(collect_symbols(&members, &nested, store, visited));
                    }
                }
            }
            Symbol::Import { file, .. } => {
                if file.as_os_str().is_empty() || !visited.insert(file.clone()) {
                    continue;
                }
                if let Some(root) = store.files.get(file).and_then(|record| record.scope()) {
                    out.extend(collect_symbols(&root, prefix, store, visited));
                }
            }
            _ => {}
        }
    }
    out
}

fn join_dotted(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Descends greedily into the first child scope whose range contains the
/// query range.
pub fn find_lowest_scope(scope: &Arc<Scope>, range: Range) -> Arc<Scope> {
    let next = {
        let children = scope.children();
        children
            .iter()
            .find(|child| range_contains(child.range, range))
            .cloned()
    };
    match next {
        Some(child) => find_lowest_scope(&child, range),
        None => scope.clone(),
    }
}

/// Two-dimensional containment: line first, then character. A plain
/// field-by-field comparison is wrong across line boundaries.
pub fn range_contains(parent: Range, child: Range) -> bool {
    let start_ok = parent.start.line < child.start.line
        || (parent.start.line == child.start.line && parent.start.character <= child.start.character);
    let end_ok = parent.end.line > child.end.line
        || (parent.end.line == child.end.line && parent.end.character >= child.end.character);
    start_ok && end_ok
}

/// The dotted identifier under a byte offset, expanding left and right
/// over alphanumerics and `.`. An empty result carries the zero-length
/// span at the cursor.
pub fn identifier_at(content: &str, offset: usize) -> (String, (usize, usize)) {
    let bytes = content.as_bytes();
    let offset = offset.min(bytes.len());
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'.';

    let mut start = offset;
    while start > 0 && is_ident(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = offset;
    while end < bytes.len() && is_ident(bytes[end]) {
        end += 1;
    }
    (content[start..end].to_string(), (start, end))
}

/// The range completion items should replace: the identifier characters
/// (not dots) immediately left of the cursor.
pub fn completion_replace_range(position: Position, content: &str, encoding: Encoding) -> Range {
    let Ok(offset) = text::offset_of(position, content, encoding) else {
        return Range::default();
    };
    let bytes = content.as_bytes();
    let mut start = offset;
    while start > 0 && bytes[start - 1].is_ascii_alphanumeric() {
        start -= 1;
    }
    Range::new(
        text::position_of(start, content, encoding),
        text::position_of(offset, content, encoding),
    )
}

/// Converts a byte span into an LSP range.
pub fn byte_span_range(content: &str, span: (usize, usize), encoding: Encoding) -> Range {
    Range::new(
        text::position_of(span.0, content, encoding),
        text::position_of(span.1, content, encoding),
    )
}
