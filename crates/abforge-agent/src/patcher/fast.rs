//! Literal fast path for the common component shapes
//!
//! Most components in the storefront are declared on one of a handful of exact
//! lines. Those are matched by plain string comparison; anything else goes to
//! the line-scanning locator.

use super::patterns::match_brace;
use super::Declaration;

const KNOWN_SHAPES: &[&str] = &[
    "export default function {name}() {",
    "export function {name}() {",
    "export const {name} = () => {",
    "function {name}() {",
    "const {name} = () => {",
];

/// Locate `function` if it is declared on one of the known lines
pub fn locate(source: &str, function: &str) -> Option<Declaration> {
    let shapes: Vec<String> = KNOWN_SHAPES
        .iter()
        .map(|shape| shape.replace("{name}", function))
        .collect();
    let lines: Vec<&str> = source.split('\n').collect();

    let (row, line) = lines
        .iter()
        .enumerate()
        .find(|(_, line)| shapes.iter().any(|shape| line.trim() == shape))?;

    let col = line.rfind('{')?;
    let close = match_brace(&lines, row, col)?;
    tracing::trace!("fast path hit for `{}` at line {}", function, row + 1);

    Some(Declaration {
        decl_line: row,
        body_open_line: row,
        body_close_line: Some(close),
    })
}
