//! Text of the injected experiment check and the edit that places it

use lazy_static::lazy_static;
use regex::Regex;

use abforge_core::contract::{InsertionPoint, WrapStrategy};

use super::{Declaration, PatchRequest};

lazy_static! {
    static ref IMPORT_START: Regex = Regex::new(r#"^\s*import[\s{*'"]"#).unwrap();
    static ref DIRECTIVE: Regex = Regex::new(r#"^\s*['"]use (client|server|strict)['"];?\s*$"#).unwrap();
}

/// Comment line written above every injected snippet
pub fn marker(key: &str, function: &str) -> String {
    format!("// @experiment:{} {}", key, function)
}

pub fn import_line(module_path: &str) -> String {
    format!(
        "import {{ getExperiment, getExperimentParams, logExposure }} from '{}';",
        module_path
    )
}

/// True when the source already imports from `module_path`
pub fn has_module_import(source: &str, module_path: &str) -> bool {
    let escaped = regex::escape(module_path);
    let pattern = format!(r#"(from|import)\s*['"]{}['"]"#, escaped);
    Regex::new(&pattern)
        .map(|re| re.is_match(source))
        .unwrap_or(false)
}

/// `btn-color_v2` + `Experiment` -> `btnColorV2Experiment`
pub fn binding_name(key: &str, suffix: &str) -> String {
    let mut ident = String::new();
    for (idx, part) in key
        .split(|c: char| c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        if idx == 0 {
            ident.push_str(&part.to_lowercase());
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                ident.extend(first.to_uppercase());
                ident.push_str(&chars.as_str().to_lowercase());
            }
        }
    }
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "exp");
    }
    ident.push_str(suffix);
    ident
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Snippet lines without indentation or line endings
pub fn snippet_lines(request: &PatchRequest) -> Vec<String> {
    let key = quote(&request.experiment_key);
    let param = quote(&request.parameter);
    let mut lines = vec![marker(&request.experiment_key, &request.function)];

    let (binding, value) = match request.wrap_with {
        WrapStrategy::GetExperiment => {
            let binding = binding_name(&request.experiment_key, "Experiment");
            let value = format!("{}?.get({}, false) ?? false", binding, param);
            (binding, value)
        }
        WrapStrategy::GetExperimentParams => {
            let binding = binding_name(&request.experiment_key, "Params");
            let value = format!("{}?.[{}] ?? false", binding, param);
            (binding, value)
        }
    };

    lines.push(format!(
        "const {} = {}({});",
        binding,
        request.wrap_with.function_name(),
        key
    ));
    lines.push(format!(
        "logExposure({}, {{ component: {}, parameter: {} }});",
        key,
        quote(&request.function),
        param
    ));

    match &request.custom_code {
        Some(custom) => lines.extend(custom.lines().map(str::to_string)),
        None => lines.push(format!("const {} = {};", request.parameter, value)),
    }

    lines
}

/// Line index before which a new import belongs
pub fn import_insertion_line(lines: &[&str]) -> usize {
    let mut after_directive = 0;
    let mut last_import_end: Option<usize> = None;
    let mut in_import = false;
    let mut in_block_comment = false;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if in_import {
            if line.contains("from") || line.ends_with(';') {
                in_import = false;
                last_import_end = Some(idx);
            }
            continue;
        }
        if in_block_comment {
            if line.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if line.starts_with("/*") {
            in_block_comment = !line.contains("*/");
            continue;
        }
        if DIRECTIVE.is_match(raw) {
            after_directive = idx + 1;
            continue;
        }
        if IMPORT_START.is_match(raw) {
            let complete = line.contains(" from ")
                || line.ends_with(';')
                || line.starts_with("import '")
                || line.starts_with("import \"");
            if complete {
                last_import_end = Some(idx);
            } else {
                in_import = true;
            }
            continue;
        }
        break;
    }

    last_import_end.map(|end| end + 1).unwrap_or(after_directive)
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

/// Indentation for lines placed inside the target's body
fn body_indent(lines: &[&str], decl: &Declaration) -> String {
    let limit = decl.body_close_line.unwrap_or(lines.len());
    let decl_indent = leading_whitespace(lines[decl.decl_line]);
    lines
        .iter()
        .enumerate()
        .skip(decl.body_open_line + 1)
        .take_while(|(idx, _)| *idx < limit)
        .map(|(_, l)| *l)
        .find(|l| !l.trim().is_empty())
        .map(|l| leading_whitespace(l).to_string())
        .filter(|indent| indent.len() > decl_indent.len())
        .unwrap_or_else(|| format!("{}  ", decl_indent))
}

/// Result of rendering an edit
#[derive(Debug)]
pub struct RenderedEdit {
    pub content: String,
    pub changes: Vec<String>,
}

/// Apply the snippet (and import if needed) around a located declaration.
///
/// Every line not inserted or replaced is carried over verbatim, including its
/// `\r` when the file uses CRLF endings.
pub fn render_edit(
    source: &str,
    decl: &Declaration,
    request: &PatchRequest,
    module_path: &str,
) -> RenderedEdit {
    let crlf = source.contains("\r\n");
    let lines: Vec<&str> = source.split('\n').collect();
    let ending = if crlf { "\r" } else { "" };

    let indent = match request.insertion_point {
        InsertionPoint::Before => leading_whitespace(lines[decl.decl_line]).to_string(),
        InsertionPoint::After | InsertionPoint::Replace => body_indent(&lines, decl),
    };
    let snippet: Vec<String> = snippet_lines(request)
        .into_iter()
        .map(|l| {
            if l.is_empty() {
                ending.to_string()
            } else {
                format!("{}{}{}", indent, l, ending)
            }
        })
        .collect();

    let import = if has_module_import(source, module_path) {
        None
    } else {
        Some((
            import_insertion_line(&lines),
            format!("{}{}", import_line(module_path), ending),
        ))
    };

    let replace_range = match (request.insertion_point, decl.body_close_line) {
        (InsertionPoint::Replace, Some(close)) => Some((decl.body_open_line + 1, close)),
        _ => None,
    };

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + snippet.len() + 1);
    let mut replaced = 0usize;
    for (idx, line) in lines.iter().enumerate() {
        if let Some((pos, text)) = &import {
            if *pos == idx {
                out.push(text.clone());
            }
        }
        if request.insertion_point == InsertionPoint::Before && idx == decl.decl_line {
            out.extend(snippet.iter().cloned());
        }
        if let Some((start, end)) = replace_range {
            if idx >= start && idx < end {
                replaced += 1;
                continue;
            }
        }
        out.push((*line).to_string());
        if request.insertion_point != InsertionPoint::Before && idx == decl.body_open_line {
            out.extend(snippet.iter().cloned());
        }
    }

    let mut changes = Vec::new();
    if let Some((pos, _)) = &import {
        changes.push(format!(
            "added experiment import from '{}' at line {}",
            module_path,
            pos + 1
        ));
    }
    let where_ = match request.insertion_point {
        InsertionPoint::Before => format!("before line {}", decl.decl_line + 1),
        InsertionPoint::After => format!("after line {}", decl.body_open_line + 1),
        InsertionPoint::Replace => format!(
            "replacing {} body line(s) after line {}",
            replaced,
            decl.body_open_line + 1
        ),
    };
    changes.push(format!(
        "injected {} check for '{}' into {} {}",
        request.wrap_with.function_name(),
        request.experiment_key,
        request.function,
        where_
    ));
    changes.push(format!(
        "bound '{}' to the experiment value (default false)",
        request.parameter
    ));

    RenderedEdit {
        content: out.join("\n"),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_names_are_camel_case_identifiers() {
        assert_eq!(binding_name("btn", "Experiment"), "btnExperiment");
        assert_eq!(binding_name("btn-color_v2", "Params"), "btnColorV2Params");
        assert_eq!(binding_name("2024-promo", "Experiment"), "exp2024PromoExperiment");
    }

    #[test]
    fn import_goes_after_last_import() {
        let lines = vec![
            "'use client';",
            "import React from 'react';",
            "import {",
            "  Card,",
            "} from './Card';",
            "",
            "export const Button = () => {",
        ];
        assert_eq!(import_insertion_line(&lines), 5);
    }

    #[test]
    fn import_goes_after_directive_without_imports() {
        let lines = vec!["\"use client\";", "", "export function Hero() {"];
        assert_eq!(import_insertion_line(&lines), 1);

        let lines = vec!["export function Hero() {"];
        assert_eq!(import_insertion_line(&lines), 0);
    }

    #[test]
    fn module_import_detection_matches_path_exactly() {
        let source = "import { getExperiment } from '@/lib/experiments';\n";
        assert!(has_module_import(source, "@/lib/experiments"));
        assert!(!has_module_import(source, "@/lib/experiments-v2"));
        assert!(!has_module_import(source, "@/lib"));
    }
}
