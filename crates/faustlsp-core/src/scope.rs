//! Lexical scopes and the symbols that live in them.
//!
//! A [`Scope`] is a node in a file's scope tree: a parent link, ordered
//! child scopes, ordered symbols and the source range it spans. Scope trees
//! are built by the analyzer and then published on the owning file record;
//! after publication they are treated as immutable for the lifetime of the
//! file's content hash.
//!
//! Cross-file links (imports and libraries) are stored as paths into the
//! file store rather than as pointers, which keeps the cyclic file graph
//! representable without reference cycles.

use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, Weak};

use lsp_types::Range;

/// A (file, range) pair locating a symbol in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub range: Range,
}

/// Documentation attached to a definition-style symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Documentation {
    /// All comment lines above the definition, joined for markdown.
    pub full: String,
    /// The one-line usage summary.
    pub usage: String,
}

/// A lexical scope.
pub struct Scope {
    parent: Weak<Scope>,
    pub range: Range,
    children: RwLock<Vec<Arc<Scope>>>,
    symbols: RwLock<Vec<Symbol>>,
}

impl Scope {
    /// Creates a file root scope.
    pub fn root(range: Range) -> Arc<Scope> {
        Arc::new(Scope {
            parent: Weak::new(),
            range,
            children: RwLock::new(Vec::new()),
            symbols: RwLock::new(Vec::new()),
        })
    }

    /// Creates a child scope and links it into `parent` in discovery order.
    pub fn child(parent: &Arc<Scope>, range: Range) -> Arc<Scope> {
        let scope = Arc::new(Scope {
            parent: Arc::downgrade(parent),
            range,
            children: RwLock::new(Vec::new()),
            symbols: RwLock::new(Vec::new()),
        });
        parent.children.write().unwrap().push(scope.clone());
        scope
    }

    pub fn parent(&self) -> Option<Arc<Scope>> {
        self.parent.upgrade()
    }

    /// Appends a symbol in source order.
    pub fn add(&self, symbol: Symbol) {
        self.symbols.write().unwrap().push(symbol);
    }

    pub fn symbols(&self) -> RwLockReadGuard<'_, Vec<Symbol>> {
        self.symbols.read().unwrap()
    }

    pub fn children(&self) -> RwLockReadGuard<'_, Vec<Arc<Scope>>> {
        self.children.read().unwrap()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("range", &self.range)
            .field("symbols", &self.symbols.read().unwrap().len())
            .field("children", &self.children.read().unwrap().len())
            .finish()
    }
}

/// A tagged symbol. Fields are only present where they are meaningful for
/// the variant.
#[derive(Debug, Clone)]
pub enum Symbol {
    /// A bare identifier binding, e.g. a function argument.
    Identifier { loc: SourceLocation, name: String },

    /// `name = expression;`
    Definition {
        loc: SourceLocation,
        name: String,
        expr_range: Range,
        expr_scope: Option<Arc<Scope>>,
        docs: Documentation,
    },

    /// `name(args) = expression;`
    Function {
        loc: SourceLocation,
        name: String,
        arg_scope: Arc<Scope>,
        expr_range: Range,
        expr_scope: Arc<Scope>,
        docs: Documentation,
    },

    /// A pattern-matching `case { ... }` expression.
    Case { loc: SourceLocation, rules: Vec<Symbol> },

    /// One rule of a `case`: its argument scope and expression.
    Rule {
        loc: SourceLocation,
        arg_scope: Arc<Scope>,
        expr_range: Range,
    },

    /// `par`, `seq`, `sum` or `prod` with its loop identifier.
    Iteration {
        loc: SourceLocation,
        iter_scope: Arc<Scope>,
        expr_range: Range,
    },

    /// `expression with { ... }`
    WithEnvironment {
        loc: SourceLocation,
        local_scope: Arc<Scope>,
        expr_range: Range,
        expr_scope: Arc<Scope>,
    },

    /// `expression letrec { ... }`
    LetRecEnvironment {
        loc: SourceLocation,
        local_scope: Arc<Scope>,
        expr_range: Range,
        expr_scope: Arc<Scope>,
    },

    /// `name = environment { ... };`
    Environment {
        loc: SourceLocation,
        name: String,
        local_scope: Arc<Scope>,
    },

    /// `name = library("file.lib");`. `file` is empty when unresolved.
    Library {
        loc: SourceLocation,
        name: String,
        file: PathBuf,
    },

    /// `import("file.lib");`. `file` is empty when unresolved.
    Import { loc: SourceLocation, file: PathBuf },
}

impl Symbol {
    /// The identifier this symbol binds, if it binds one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Symbol::Identifier { name, .. }
            | Symbol::Definition { name, .. }
            | Symbol::Function { name, .. }
            | Symbol::Environment { name, .. }
            | Symbol::Library { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn location(&self) -> &SourceLocation {
        match self {
            Symbol::Identifier { loc, .. }
            | Symbol::Definition { loc, .. }
            | Symbol::Function { loc, .. }
            | Symbol::Case { loc, .. }
            | Symbol::Rule { loc, .. }
            | Symbol::Iteration { loc, .. }
            | Symbol::WithEnvironment { loc, .. }
            | Symbol::LetRecEnvironment { loc, .. }
            | Symbol::Environment { loc, .. }
            | Symbol::Library { loc, .. }
            | Symbol::Import { loc, .. } => loc,
        }
    }

    pub fn docs(&self) -> Option<&Documentation> {
        match self {
            Symbol::Definition { docs, .. } | Symbol::Function { docs, .. } => Some(docs),
            _ => None,
        }
    }

    /// The scope in which this symbol's members can be looked up with `.`
    /// access: the local scope of an environment-like symbol.
    pub fn member_scope(&self) -> Option<Arc<Scope>> {
        match self {
            Symbol::Environment { local_scope, .. }
            | Symbol::WithEnvironment { local_scope, .. }
            | Symbol::LetRecEnvironment { local_scope, .. } => Some(local_scope.clone()),
            _ => None,
        }
    }

    /// The scope of this symbol's right-hand-side expression, if it has one.
    pub fn expression_scope(&self) -> Option<Arc<Scope>> {
        match self {
            Symbol::Definition { expr_scope, .. } => expr_scope.clone(),
            Symbol::Function { expr_scope, .. }
            | Symbol::WithEnvironment { expr_scope, .. }
            | Symbol::LetRecEnvironment { expr_scope, .. } => Some(expr_scope.clone()),
            _ => None,
        }
    }

    /// Short tag for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Symbol::Identifier { .. } => "identifier",
            Symbol::Definition { .. } => "definition",
            Symbol::Function { .. } => "function",
            Symbol::Case { .. } => "case",
            Symbol::Rule { .. } => "rule",
            Symbol::Iteration { .. } => "iteration",
            Symbol::WithEnvironment { .. } => "with",
            Symbol::LetRecEnvironment { .. } => "letrec",
            Symbol::Environment { .. } => "environment",
            Symbol::Library { .. } => "library",
            Symbol::Import { .. } => "import",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::range_contains;
    use lsp_types::Position;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    #[test]
    fn child_scopes_link_both_ways() {
        let root = Scope::root(range(0, 0, 10, 0));
        let child = Scope::child(&root, range(1, 0, 2, 0));
        assert_eq!(root.children().len(), 1);
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &root));
        assert!(root.parent().is_none());
    }

    #[test]
    fn children_stay_inside_their_parent() {
        let root = Scope::root(range(0, 0, 10, 0));
        let a = Scope::child(&root, range(1, 0, 2, 0));
        let b = Scope::child(&a, range(1, 4, 1, 17));
        for (parent, child) in [(&root, &a), (&a, &b)] {
            assert!(range_contains(parent.range, child.range));
        }
    }

    #[test]
    fn symbols_keep_source_order() {
        let root = Scope::root(range(0, 0, 2, 0));
        for (i, name) in ["first", "second", "third"].iter().enumerate() {
            root.add(Symbol::Identifier {
                loc: SourceLocation {
                    file: PathBuf::from("/x.dsp"),
                    range: range(i as u32, 0, i as u32, 5),
                },
                name: name.to_string(),
            });
        }
        let names: Vec<_> = root.symbols().iter().filter_map(|s| s.name().map(String::from)).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn member_scope_only_for_environment_kinds() {
        let root = Scope::root(range(0, 0, 2, 0));
        let env = Symbol::Environment {
            loc: SourceLocation {
                file: PathBuf::from("/x.dsp"),
                range: range(0, 0, 0, 3),
            },
            name: "env".into(),
            local_scope: Scope::child(&root, range(0, 6, 1, 0)),
        };
        assert!(env.member_scope().is_some());

        let ident = Symbol::Identifier {
            loc: SourceLocation {
                file: PathBuf::from("/x.dsp"),
                range: range(0, 0, 0, 1),
            },
            name: "i".into(),
        };
        assert!(ident.member_scope().is_none());
    }
}
