//! Syntax-tree locator built on tree-sitter's TypeScript grammars
//!
//! Finds the first declaration binding `function` to a function value: a
//! function declaration, or a `const`/`let`/`var` declarator whose value is an
//! arrow function or function expression, possibly wrapped in calls such as
//! `memo(...)`, parentheses or an `as` cast.

use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use abforge_core::PatchError;

use super::{Declaration, Located};

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function",
    "function_expression",
];

const VALUE_FUNCTION_KINDS: &[&str] = &[
    "arrow_function",
    "function",
    "function_expression",
    "generator_function",
];

/// Statement kinds that belong to the declaration they wrap
const WRAPPER_KINDS: &[&str] = &["export_statement", "lexical_declaration", "variable_declaration"];

fn parser_for(path: &Path) -> Result<Parser, PatchError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let language = match ext.as_str() {
        "ts" | "mts" | "cts" => tree_sitter_typescript::language_typescript(),
        "tsx" | "jsx" | "js" | "mjs" | "cjs" => tree_sitter_typescript::language_tsx(),
        _ => return Err(PatchError::UnsupportedFile(path.to_path_buf())),
    };

    let mut parser = Parser::new();
    parser
        .set_language(language)
        .map_err(|e| PatchError::Parser(format!("{:?}", e)))?;
    Ok(parser)
}

fn parse(path: &Path, source: &str) -> Result<Tree, PatchError> {
    let mut parser = parser_for(path)?;
    parser
        .parse(source, None)
        .ok_or_else(|| PatchError::Parser(format!("could not parse {}", path.display())))
}

fn has_name(node: Node<'_>, field: &str, source: &[u8], name: &str) -> bool {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(|text| text == name)
        .unwrap_or(false)
}

/// Dig through wrappers around a declarator's value to the function itself
fn unwrap_value(node: Node<'_>) -> Option<Node<'_>> {
    let kind = node.kind();
    if VALUE_FUNCTION_KINDS.contains(&kind) {
        return Some(node);
    }
    let mut cursor = node.walk();
    match kind {
        "call_expression" => {
            let args = node.child_by_field_name("arguments")?;
            let mut arg_cursor = args.walk();
            let found = args
                .named_children(&mut arg_cursor)
                .find_map(unwrap_value);
            found
        }
        "parenthesized_expression" | "as_expression" | "satisfies_expression" => {
            let inner = node.named_children(&mut cursor).next()?;
            unwrap_value(inner)
        }
        _ => None,
    }
}

/// The function node bound to `name` by this node, if any
fn target_function<'t>(node: Node<'t>, source: &[u8], name: &str) -> Option<Node<'t>> {
    let kind = node.kind();
    if FUNCTION_KINDS.contains(&kind) && has_name(node, "name", source, name) {
        return Some(node);
    }
    if kind == "variable_declarator" && has_name(node, "name", source, name) {
        return node.child_by_field_name("value").and_then(unwrap_value);
    }
    None
}

fn find_target<'t>(node: Node<'t>, source: &[u8], name: &str) -> Option<(Node<'t>, Node<'t>)> {
    if let Some(function) = target_function(node, source, name) {
        return Some((node, function));
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(|child| find_target(child, source, name))
}

/// Outermost export/declaration statement around `node`
fn statement_anchor(node: Node<'_>) -> Node<'_> {
    let mut anchor = node;
    while let Some(parent) = anchor.parent() {
        if WRAPPER_KINDS.contains(&parent.kind()) {
            anchor = parent;
        } else {
            break;
        }
    }
    anchor
}

/// Locate `function` in `source`
pub fn locate(path: &Path, source: &str, function: &str) -> Result<Located, PatchError> {
    let tree = parse(path, source)?;
    let bytes = source.as_bytes();

    let (binding, function_node) = match find_target(tree.root_node(), bytes, function) {
        Some(found) => found,
        None => return Ok(Located::NotFound),
    };

    let decl_line = statement_anchor(binding).start_position().row;
    tracing::debug!(
        "found `{}` as {} at line {}",
        function,
        function_node.kind(),
        decl_line + 1
    );

    match function_node.child_by_field_name("body") {
        Some(body) if body.kind() == "statement_block" => Ok(Located::Found(Declaration {
            decl_line,
            body_open_line: body.start_position().row,
            body_close_line: Some(body.end_position().row),
        })),
        _ => Ok(Located::NoBlockBody(Declaration {
            decl_line,
            body_open_line: decl_line,
            body_close_line: None,
        })),
    }
}

/// True when `patched` has parse errors that `original` did not
pub fn introduces_errors(path: &Path, original: &str, patched: &str) -> Result<bool, PatchError> {
    let before = parse(path, original)?.root_node().has_error();
    if before {
        return Ok(false);
    }
    Ok(parse(path, patched)?.root_node().has_error())
}
