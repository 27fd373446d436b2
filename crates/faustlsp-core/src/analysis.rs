//! Scope and symbol analysis.
//!
//! Builds the lexical scope tree of a file from its syntax tree and
//! recursively analyses every file reached through `import` and `library`
//! statements. Discovered files flow through an internal work queue that
//! drains when no work remains, so an analysis pass always terminates, even
//! on cyclic import graphs: the per-pass visited set parses each path at
//! most once, and scope roots are cached by content hash.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tree_sitter::Node;

use crate::parser::{node_range, node_text, strip_quotes};
use crate::scope::{Documentation, Scope, SourceLocation, Symbol};
use crate::Store;

/// What the analyzer needs to resolve import paths: the workspace root and
/// the compiler used to locate the system library directory.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub root: PathBuf,
    pub command: String,
}

/// Analyses `path` and every file transitively reachable from it.
///
/// The queue is drained synchronously: every discovered import is pushed
/// onto the channel during traversal and consumed here until no work is
/// left.
pub fn analyze(store: &Store, ctx: &AnalysisContext, path: &Path) {
    let mut visited = HashSet::new();
    let (work_tx, work_rx) = crossbeam_channel::unbounded();
    work_tx.send(path.to_path_buf()).ok();

    while let Ok(next) = work_rx.try_recv() {
        if next.as_os_str().is_empty() {
            continue;
        }
        if !store.files.contains(&next) {
            // Imports may reach outside the tracked workspace, e.g. into
            // the system library directory.
            store.files.open_path(&next);
        }
        if store.files.contains(&next) {
            parse_file(store, ctx, &next, &mut visited, &work_tx);
        }
    }
}

/// Builds (or re-attaches) the root scope of one file.
fn parse_file(
    store: &Store,
    ctx: &AnalysisContext,
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    work: &Sender<PathBuf>,
) {
    if !visited.insert(path.to_path_buf()) {
        return;
    }
    let Some(record) = store.files.get(path) else {
        return;
    };
    let (content, hash) = record.snapshot();

    if let Some(cached) = store.files.cached_scope(&hash) {
        log::debug!("scope cache hit for {}", path.display());
        record.publish_scope(hash, cached);
        return;
    }

    let Some(tree) = store.parsers.parse(content.as_bytes()) else {
        log::error!("parser produced no tree for {}", path.display());
        return;
    };
    let root = Scope::root(node_range(&tree.root_node()));

    // Imports may have changed since the last analysis of this file.
    store.deps.remove_dependencies_for(path);

    let traversal = FileTraversal {
        store,
        ctx,
        file: path,
        source: content.as_bytes(),
        work,
    };
    traversal.visit(tree.root_node(), &root);

    record.publish_scope(hash, root.clone());
    store.files.cache_scope(hash, root);
    log::debug!("analyzed {}", path.display());
}

/// One file's walk over its syntax tree.
struct FileTraversal<'a> {
    store: &'a Store,
    ctx: &'a AnalysisContext,
    file: &'a Path,
    source: &'a [u8],
    work: &'a Sender<PathBuf>,
}

impl FileTraversal<'_> {
    fn loc(&self, node: &Node) -> SourceLocation {
        SourceLocation {
            file: self.file.to_path_buf(),
            range: node_range(node),
        }
    }

    fn text(&self, node: &Node) -> String {
        node_text(node, self.source).to_string()
    }

    /// Resolves a quoted import filename and queues the file for analysis.
    /// Returns the empty path when the file cannot be found.
    fn resolve_and_enqueue(&self, rel: &str) -> PathBuf {
        match resolve_file_path(self.ctx, rel) {
            Some((path, _dir)) => {
                self.work.send(path.clone()).ok();
                path
            }
            None => {
                log::debug!("unresolved import {rel:?} from {}", self.file.display());
                PathBuf::new()
            }
        }
    }

    fn visit_children(&self, node: &Node, scope: &Arc<Scope>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, scope);
        }
    }

    /// Maps one grammar node onto symbols and child scopes.
    fn visit(&self, node: Node, scope: &Arc<Scope>) {
        match node.kind() {
            "definition" => self.visit_definition(node, scope),
            "environment" => {
                // The named node is just the keyword; the record body is
                // its next sibling.
                let Some(body) = node.next_sibling() else {
                    return;
                };
                let env_scope = Scope::child(scope, node_range(&body));
                self.visit_children(&body, &env_scope);
                scope.add(Symbol::Environment {
                    loc: self.loc(&body),
                    name: String::new(),
                    local_scope: env_scope,
                });
            }
            "function_definition" => self.visit_function(node, scope),
            "recinition" => {
                let (Some(ident), Some(expr)) = (
                    node.child_by_field_name("name"),
                    node.child_by_field_name("expression"),
                ) else {
                    return;
                };
                scope.add(Symbol::Definition {
                    loc: self.loc(&ident),
                    name: self.text(&ident),
                    expr_range: node_range(&expr),
                    expr_scope: None,
                    docs: parse_documentation(&ident, self.source),
                });
            }
            "with_environment" => self.visit_local_environment(node, scope, false),
            "letrec_environment" => self.visit_local_environment(node, scope, true),
            "file_import" => {
                let Some(filename) = node.child_by_field_name("filename") else {
                    return;
                };
                let rel = strip_quotes(node_text(&filename, self.source)).to_string();
                let imported = self.resolve_and_enqueue(&rel);
                if !imported.as_os_str().is_empty() {
                    self.store.deps.add_dependency(self.file, &imported);
                }
                scope.add(Symbol::Import {
                    loc: self.loc(&node),
                    file: imported,
                });
            }
            "iteration" => {
                let (Some(current_iter), Some(expr)) = (
                    node.child_by_field_name("current_iter"),
                    node.child_by_field_name("expression"),
                ) else {
                    return;
                };
                let iter_scope = Scope::child(scope, node_range(&node));
                iter_scope.add(Symbol::Identifier {
                    loc: self.loc(&current_iter),
                    name: self.text(&current_iter),
                });
                scope.add(Symbol::Iteration {
                    loc: self.loc(&node),
                    iter_scope,
                    expr_range: node_range(&expr),
                });
            }
            "pattern" => self.visit_pattern(node, scope),
            _ => self.visit_children(&node, scope),
        }
    }

    fn visit_definition(&self, node: Node, scope: &Arc<Scope>) {
        let (Some(ident), Some(value)) = (
            node.child_by_field_name("variable"),
            node.child_by_field_name("value"),
        ) else {
            return;
        };
        let name = self.text(&ident);

        match value.kind() {
            "library" => {
                let Some(filename) = value.child_by_field_name("filename") else {
                    return;
                };
                let rel = strip_quotes(node_text(&filename, self.source)).to_string();
                let imported = self.resolve_and_enqueue(&rel);
                if !imported.as_os_str().is_empty() {
                    self.store
                        .deps
                        .add_library_dependency(self.file, &imported, &name);
                }
                scope.add(Symbol::Library {
                    loc: self.loc(&ident),
                    name,
                    file: imported,
                });
            }
            "environment" => {
                // See the bare `environment` case: body follows the keyword.
                let Some(body) = value.next_sibling() else {
                    return;
                };
                let env_scope = Scope::child(scope, node_range(&body));
                self.visit_children(&body, &env_scope);
                scope.add(Symbol::Environment {
                    loc: self.loc(&ident),
                    name,
                    local_scope: env_scope,
                });
            }
            _ => {
                let expr_scope = Scope::child(scope, node_range(&value));
                self.visit_children(&node, &expr_scope);
                scope.add(Symbol::Definition {
                    loc: self.loc(&ident),
                    name,
                    expr_range: node_range(&value),
                    expr_scope: Some(expr_scope),
                    docs: parse_documentation(&node, self.source),
                });
            }
        }
    }

    fn visit_function(&self, node: Node, scope: &Arc<Scope>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let Some(arguments) = name_node.next_named_sibling() else {
            return;
        };
        let Some(value) = node.child_by_field_name("value") else {
            return;
        };

        // The argument scope spans the whole definition and is linked
        // before the expression scope, so lookups inside the body reach
        // the arguments first.
        let arg_scope = Scope::child(scope, node_range(&node));
        let mut cursor = arguments.walk();
        for argument in arguments.named_children(&mut cursor) {
            arg_scope.add(Symbol::Identifier {
                loc: self.loc(&argument),
                name: self.text(&argument),
            });
        }

        let expr_scope = Scope::child(scope, node_range(&node));
        self.visit_children(&node, &expr_scope);

        scope.add(Symbol::Function {
            loc: self.loc(&name_node),
            name: self.text(&name_node),
            arg_scope,
            expr_range: node_range(&value),
            expr_scope,
            docs: parse_documentation(&node, self.source),
        });
    }

    fn visit_local_environment(&self, node: Node, scope: &Arc<Scope>, letrec: bool) {
        let (Some(expr), Some(local_env)) = (
            node.child_by_field_name("expression"),
            node.child_by_field_name("local_environment"),
        ) else {
            return;
        };

        let local_scope = Scope::child(scope, node_range(&node));
        let mut cursor = local_env.walk();
        for child in local_env.named_children(&mut cursor) {
            self.visit(child, &local_scope);
        }

        let expr_scope = Scope::child(scope, node_range(&node));
        self.visit(expr, &expr_scope);

        let loc = self.loc(&node);
        let expr_range = node_range(&expr);
        scope.add(if letrec {
            Symbol::LetRecEnvironment {
                loc,
                local_scope,
                expr_range,
                expr_scope,
            }
        } else {
            Symbol::WithEnvironment {
                loc,
                local_scope,
                expr_range,
                expr_scope,
            }
        });
    }

    fn visit_pattern(&self, node: Node, scope: &Arc<Scope>) {
        let Some(rules) = node.named_child(0) else {
            return;
        };
        let mut case_rules = Vec::new();
        let mut cursor = rules.walk();
        for rule in rules.named_children(&mut cursor) {
            if rule.kind() != "rule" {
                continue;
            }
            let Some(arguments) = rule.named_child(0) else {
                continue;
            };
            let Some(expression) = rule.child_by_field_name("expression") else {
                continue;
            };

            let rule_scope = Scope::child(scope, node_range(&rule));
            let mut args_cursor = arguments.walk();
            for argument in arguments.named_children(&mut args_cursor) {
                rule_scope.add(Symbol::Identifier {
                    loc: self.loc(&argument),
                    name: self.text(&argument),
                });
            }
            case_rules.push(Symbol::Rule {
                loc: self.loc(&rule),
                arg_scope: rule_scope,
                expr_range: node_range(&expression),
            });
        }
        scope.add(Symbol::Case {
            loc: self.loc(&node),
            rules: case_rules,
        });
    }
}

/// Collects the `//` comment lines immediately above a node into its
/// documentation: full text joined for markdown, plus a one-line usage
/// summary (the second line when there is one).
pub fn parse_documentation(node: &Node, source: &[u8]) -> Documentation {
    let mut lines: Vec<String> = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if sibling.kind() != "comment" {
            break;
        }
        let text = node_text(&sibling, source);
        let text = text.strip_prefix("//").unwrap_or(text);
        lines.insert(0, text.to_string());
        current = sibling.prev_sibling();
    }

    let usage = if lines.len() > 1 {
        lines[1].clone()
    } else {
        lines.first().cloned().unwrap_or_default()
    };
    Documentation {
        // Trailing double spaces keep markdown line breaks.
        full: lines.join("  \n"),
        usage,
    }
}

/// Resolves an import filename the way the Faust compiler does: first
/// relative to `rootDir`, then inside the compiler's system DSP directory.
/// Returns the resolved absolute path and the directory it was found in.
pub fn resolve_file_path(ctx: &AnalysisContext, rel: &str) -> Option<(PathBuf, PathBuf)> {
    let in_workspace = ctx.root.join(rel);
    if in_workspace.exists() {
        return Some((in_workspace, ctx.root.clone()));
    }

    let dsp_dir = faust_dsp_dir(&ctx.command)?;
    let in_dsp_dir = dsp_dir.join(rel);
    if in_dsp_dir.exists() {
        return Some((in_dsp_dir, dsp_dir));
    }
    None
}

/// Asks the compiler for its system DSP library directory.
pub fn faust_dsp_dir(command: &str) -> Option<PathBuf> {
    let output = match Command::new(command).arg("-dspdir").output() {
        Ok(output) => output,
        Err(err) => {
            log::debug!("couldn't run {command} -dspdir: {err}");
            return None;
        }
    };
    let stdout = String::from_utf8(output.stdout).ok()?;
    let dir = stdout.trim_end_matches('\n');
    if dir.is_empty() {
        return None;
    }
    Some(PathBuf::from(dir))
}
