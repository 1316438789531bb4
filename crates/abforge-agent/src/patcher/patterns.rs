//! Line-scanning declaration locator
//!
//! An ordered list of regular expressions for the declaration shapes React
//! components usually take. The first shape that matches any line wins; the
//! body brace is then found by scanning forward from the matched line.

use regex::Regex;

use super::Declaration;

/// Declaration shapes, tried in order. `{name}` is the escaped target name.
const DECLARATION_SHAPES: &[(&str, &str)] = &[
    (
        "function declaration",
        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*{name}\s*[<(]",
    ),
    (
        "arrow function",
        r"^\s*(?:export\s+)?(?:const|let|var)\s+{name}\s*(?::[^=]+)?=\s*(?:async\s+)?(?:<[^>]*>\s*)?(?:\(|[A-Za-z_$][\w$]*\s*=>)",
    ),
    (
        "function expression",
        r"^\s*(?:export\s+)?(?:const|let|var)\s+{name}\s*(?::[^=]+)?=\s*(?:async\s+)?function\b",
    ),
    (
        "wrapped component",
        r"^\s*(?:export\s+)?(?:const|let|var)\s+{name}\s*(?::[^=]+)?=\s*(?:React\.)?(?:memo|forwardRef)\s*(?:<[^>]*>)?\(",
    ),
];

/// Lines scanned past the declaration while looking for its body
const MAX_SIGNATURE_LINES: usize = 40;

/// Where the scan for a body brace ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyScan {
    /// Row and column of the opening brace
    Block(usize, usize),
    /// Arrow function returning an expression
    Expression,
    /// Nothing recognisable before the scan limit
    Missing,
}

fn compile(function: &str) -> Vec<(&'static str, Regex)> {
    let name = regex::escape(function);
    DECLARATION_SHAPES
        .iter()
        .filter_map(|(label, pattern)| {
            let source = pattern.replace("{name}", &format!(r"{}\b", name));
            Regex::new(&source).ok().map(|re| (*label, re))
        })
        .collect()
}

/// First declaration line for `function`, with the shape that matched
pub fn find_declaration_line(lines: &[&str], function: &str) -> Option<(usize, &'static str)> {
    for (label, re) in compile(function) {
        if let Some(idx) = lines.iter().position(|line| re.is_match(line)) {
            return Some((idx, label));
        }
    }
    None
}

/// Locate `function` and its body using the pattern list
pub fn locate(lines: &[&str], function: &str) -> Option<(Declaration, BodyScan)> {
    let (decl_line, label) = find_declaration_line(lines, function)?;
    tracing::debug!("matched {} for `{}` at line {}", label, function, decl_line + 1);

    let scan = scan_for_body(lines, decl_line);
    let decl = match scan {
        BodyScan::Block(row, col) => Declaration {
            decl_line,
            body_open_line: row,
            body_close_line: match_brace(lines, row, col),
        },
        _ => Declaration {
            decl_line,
            body_open_line: decl_line,
            body_close_line: None,
        },
    };
    Some((decl, scan))
}

/// Character classes the scanner tracks outside strings and comments
fn significant_chars(line: &str, in_block_comment: &mut bool) -> Vec<(usize, char)> {
    let mut out = Vec::new();
    let mut chars = line.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((idx, ch)) = chars.next() {
        if *in_block_comment {
            if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
                chars.next();
                *in_block_comment = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if ch == '\\' {
                chars.next();
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '/' if matches!(chars.peek(), Some((_, '/'))) => break,
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                *in_block_comment = true;
            }
            '\'' | '"' | '`' => quote = Some(ch),
            c if c.is_whitespace() => {}
            c => out.push((idx, c)),
        }
    }
    out
}

/// Find the brace opening the declaration's body
pub fn scan_for_body(lines: &[&str], decl_line: usize) -> BodyScan {
    let mut in_block_comment = false;
    let mut prev: Option<char> = None;
    let mut prev2: Option<char> = None;
    let mut after_arrow = false;
    let mut paren_depth: i32 = 0;

    let end = (decl_line + MAX_SIGNATURE_LINES).min(lines.len());
    for (row, line) in lines.iter().enumerate().take(end).skip(decl_line) {
        for (col, ch) in significant_chars(line, &mut in_block_comment) {
            if after_arrow {
                // `=> (` and `=> <jsx>` are expression bodies too
                return if ch == '{' {
                    BodyScan::Block(row, col)
                } else {
                    BodyScan::Expression
                };
            }
            match ch {
                '(' => paren_depth += 1,
                ')' => paren_depth -= 1,
                '>' if prev == Some('=') => {
                    after_arrow = true;
                }
                '{' => {
                    let opens_body = match prev {
                        Some(')') | Some(']') => true,
                        Some('>') => prev2 != Some('='),
                        Some(c) => c.is_alphanumeric() || c == '_' || c == '$',
                        None => false,
                    };
                    if opens_body && paren_depth <= 1 {
                        return BodyScan::Block(row, col);
                    }
                }
                ';' if paren_depth <= 0 => return BodyScan::Missing,
                _ => {}
            }
            prev2 = prev;
            prev = Some(ch);
        }
    }
    BodyScan::Missing
}

/// Row of the brace closing the one at (`row`, `col`)
pub fn match_brace(lines: &[&str], row: usize, col: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut in_block_comment = false;

    for (r, line) in lines.iter().enumerate().skip(row) {
        for (c, ch) in significant_chars(line, &mut in_block_comment) {
            if r == row && c < col {
                continue;
            }
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(r);
                    }
                }
                _ => {}
            }
        }
    }
    None
}
