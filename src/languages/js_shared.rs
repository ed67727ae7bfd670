//! Shared extraction logic for JavaScript and TypeScript.
//!
//! Both grammars use the same node kinds for imports, function declarations
//! and calls, so one walk serves JS, TS and TSX.
//!
//! Dispatch is table-driven: [`TOP_LEVEL`] maps each node kind the walk
//! understands to a handler, and [`walk`] is a plain recursive traversal over
//! that table. Kinds missing from the table are skipped without descending,
//! which confines extraction to top-level declarations.

use std::collections::BTreeSet;

use anyhow::Result;
use tree_sitter::{Node, Parser};

use crate::types::FunctionDecl;

use super::{node_text, ExtractionResult, ImportSpec};

/// Syntax node kinds with a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Program,
    ExportStatement,
    ImportDeclaration,
    FunctionDeclaration,
    GeneratorFunctionDeclaration,
}

impl NodeKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::ExportStatement => "export_statement",
            Self::ImportDeclaration => "import_statement",
            Self::FunctionDeclaration => "function_declaration",
            Self::GeneratorFunctionDeclaration => "generator_function_declaration",
        }
    }
}

/// What the walk does after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    Descend,
    Skip,
}

pub(crate) type Handler = for<'t, 's> fn(Node<'t>, &mut Collector<'s>) -> Visit;

pub(crate) const TOP_LEVEL: &[(NodeKind, Handler)] = &[
    (NodeKind::Program, descend),
    (NodeKind::ExportStatement, descend),
    (NodeKind::ImportDeclaration, collect_import),
    (NodeKind::FunctionDeclaration, collect_function),
    (NodeKind::GeneratorFunctionDeclaration, collect_function),
];

/// Accumulates extraction output during a walk.
pub(crate) struct Collector<'s> {
    source: &'s str,
    imports: Vec<ImportSpec>,
    functions: Vec<FunctionDecl>,
}

/// Parse source and extract imports + top-level functions. Works for JS, TS, and TSX.
pub fn extract(parser: &mut Parser, source: &str, file_path: &str) -> Result<ExtractionResult> {
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse {file_path}"))?;

    let mut collector = Collector {
        source,
        imports: Vec::new(),
        functions: Vec::new(),
    };
    walk(tree.root_node(), TOP_LEVEL, &mut collector);

    Ok(ExtractionResult {
        imports: collector.imports,
        functions: collector.functions,
    })
}

/// Generic recursive traversal driven by a handler table.
pub(crate) fn walk(node: Node, table: &[(NodeKind, Handler)], collector: &mut Collector) {
    if node.child_count() == 0 {
        return;
    }

    let handler = match table.iter().find(|(kind, _)| kind.as_str() == node.kind()) {
        Some((_, handler)) => *handler,
        None => return,
    };

    if handler(node, collector) == Visit::Descend {
        for child in node.named_children(&mut node.walk()) {
            walk(child, table, collector);
        }
    }
}

fn descend(_node: Node, _collector: &mut Collector) -> Visit {
    Visit::Descend
}

// ── Imports ──

fn collect_import(node: Node, collector: &mut Collector) -> Visit {
    let specifier = import_source(node, collector.source);
    if specifier.is_empty() {
        return Visit::Skip;
    }

    for clause in imported_names(node, collector.source) {
        collector.imports.push(ImportSpec {
            clause,
            specifier: specifier.clone(),
        });
    }
    Visit::Skip
}

fn import_source(node: Node, source: &str) -> String {
    // import ... from 'module': the source is a string child
    node.child_by_field_name("source")
        .map(|s| {
            node_text(s, source)
                .trim_matches('\'')
                .trim_matches('"')
                .trim_matches('`')
                .to_string()
        })
        .unwrap_or_default()
}

/// Exported names brought in by an import clause; `{ a as b }` yields `a`.
fn imported_names(node: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();

    for child in node.named_children(&mut node.walk()) {
        if child.kind() != "import_clause" {
            continue;
        }
        for inner in child.named_children(&mut child.walk()) {
            match inner.kind() {
                "identifier" => names.push(node_text(inner, source).to_string()),
                "named_imports" => {
                    for spec in inner.named_children(&mut inner.walk()) {
                        if spec.kind() == "import_specifier" {
                            if let Some(n) = spec.child_by_field_name("name") {
                                names.push(node_text(n, source).to_string());
                            }
                        }
                    }
                }
                "namespace_import" => {
                    if let Some(n) = inner.named_child(0) {
                        names.push(node_text(n, source).to_string());
                    }
                }
                _ => {}
            }
        }
    }

    names
}

// ── Functions ──

fn collect_function(node: Node, collector: &mut Collector) -> Visit {
    let name = match node.child_by_field_name("name") {
        Some(n) => node_text(n, collector.source).to_string(),
        None => return Visit::Skip,
    };

    let callees = match node.child_by_field_name("body") {
        Some(body) => direct_callees(body, collector.source),
        None => Vec::new(),
    };

    collector.functions.push(FunctionDecl {
        name,
        body: node_text(node, collector.source).to_string(),
        callees,
    });
    Visit::Skip
}

/// Distinct names of `f(...)` calls anywhere under `body`.
///
/// Only calls whose callee is a bare identifier count: `obj.f()`, `a[b]()`
/// and `(x || y)()` are ignored.
fn direct_callees(body: Node, source: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    let mut cursor = body.walk();

    loop {
        let current = cursor.node();

        if current.kind() == "call_expression" {
            if let Some(func) = current.child_by_field_name("function") {
                if func.kind() == "identifier" {
                    let name = node_text(func, source);
                    if !name.is_empty() {
                        names.insert(name.to_string());
                    }
                }
            }
        }

        if cursor.goto_first_child() {
            continue;
        }
        if cursor.goto_next_sibling() {
            continue;
        }
        loop {
            if !cursor.goto_parent() || cursor.node() == body {
                return names.into_iter().collect();
            }
            if cursor.goto_next_sibling() {
                break;
            }
        }
    }
}
