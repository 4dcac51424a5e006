//! Import hygiene
//!
//! Adds imports for React hooks that are called but never imported, merging
//! them into an existing `'react'` import when there is one, and drops import
//! lines that repeat an earlier one byte for byte.

use super::{hash_parts, line_extent, BlastRadius, PassBody, PassDescriptor, IMPORTS};
use crate::contract::{rules, Contract};
use crate::gate::{directive_prologue, pattern};
use crate::semantic::{analyze_tree, strip_quotes, SemanticContext};
use crate::syntax::{node_text, SyntaxTree};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;
use tree_sitter::Node;

pub const REACT_HOOKS: &[&str] = &[
    "useState",
    "useEffect",
    "useLayoutEffect",
    "useCallback",
    "useMemo",
    "useRef",
    "useContext",
    "useReducer",
    "useId",
    "useTransition",
    "useDeferredValue",
];

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(IMPORTS, "imports", PassBody::both(textual, structural))
        .describe("add missing hook imports and drop duplicate import lines")
        .blast_radius(BlastRadius::Wide)
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .postcondition(rules::syntax_preserved())
        .postcondition(rules::import_integrity_preserved())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let context = analyze_tree(tree);
            let mut parts: Vec<String> = Vec::new();
            tree.walk(|node, source| {
                if node.kind() == "import_statement" {
                    parts.push(node_text(node, source).trim().to_string());
                }
            });
            parts.extend(missing_hooks(&context).into_iter().map(|h| format!("missing:{h}")));
            hash_parts(parts)
        })
}

fn missing_hooks(context: &SemanticContext) -> BTreeSet<String> {
    context
        .external_uses
        .iter()
        .filter(|name| REACT_HOOKS.contains(&name.as_str()))
        .filter(|name| !context.imports.contains_key(*name) && !context.declarations.contains(*name))
        .cloned()
        .collect()
}

/// Where missing hooks go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// After the last named specifier: `, useX`
    AfterSpecifier(usize),
    /// Inside an empty `{}`
    IntoEmptyBraces(usize),
    /// After a default binding: `, { useX }`
    AfterDefault(usize),
    /// A fresh import line at this offset
    NewLine(usize),
}

fn import_line(hooks: &BTreeSet<String>) -> String {
    format!(
        "import {{ {} }} from 'react';\n",
        hooks.iter().cloned().collect::<Vec<_>>().join(", ")
    )
}

fn placement_text(placement: Placement, hooks: &BTreeSet<String>, source: &str) -> String {
    let names = hooks.iter().cloned().collect::<Vec<_>>().join(", ");
    match placement {
        Placement::AfterSpecifier(_) => format!(", {names}"),
        Placement::IntoEmptyBraces(_) => format!(" {names} "),
        Placement::AfterDefault(_) => format!(", {{ {names} }}"),
        Placement::NewLine(at) => {
            let line = import_line(hooks);
            if at > 0 && !source[..at].ends_with('\n') {
                format!("\n{line}")
            } else {
                line
            }
        }
    }
}

impl Placement {
    fn offset(&self) -> usize {
        match *self {
            Placement::AfterSpecifier(at)
            | Placement::IntoEmptyBraces(at)
            | Placement::AfterDefault(at)
            | Placement::NewLine(at) => at,
        }
    }
}

/// Byte offset just past the directive prologue (0 when there is none).
fn after_prologue(code: &str) -> usize {
    let count = directive_prologue(code).len();
    if count == 0 {
        return 0;
    }
    let mut seen = 0;
    let mut offset = 0;
    for line in code.split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("#!") {
            continue;
        }
        seen += 1;
        if seen == count {
            break;
        }
    }
    offset
}

fn end_of_line(code: &str, at: usize) -> usize {
    code[at..].find('\n').map(|i| at + i + 1).unwrap_or(code.len())
}

/// How a `'react'` import statement can absorb more named bindings.
fn merge_point(import: Node<'_>, source: &str) -> Option<Placement> {
    if node_text(import, source).starts_with("import type") {
        return None;
    }
    let mut cursor = import.walk();
    let clause = import
        .named_children(&mut cursor)
        .find(|child| child.kind() == "import_clause")?;

    let mut default_binding = None;
    let mut inner = clause.walk();
    for child in clause.named_children(&mut inner) {
        match child.kind() {
            "named_imports" => {
                let mut specs = child.walk();
                let last = child
                    .named_children(&mut specs)
                    .filter(|s| s.kind() == "import_specifier")
                    .last();
                return Some(match last {
                    Some(last) => Placement::AfterSpecifier(last.end_byte()),
                    None => Placement::IntoEmptyBraces(child.start_byte() + 1),
                });
            }
            "namespace_import" => return None,
            "identifier" => default_binding = Some(child.end_byte()),
            _ => {}
        }
    }
    default_binding.map(Placement::AfterDefault)
}

pub fn structural(tree: &mut SyntaxTree) -> anyhow::Result<()> {
    let hooks = missing_hooks(&analyze_tree(tree));

    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates = Vec::new();
    let mut merge: Option<Placement> = None;
    let mut last_import_end: Option<usize> = None;

    tree.walk(|node, source| {
        if node.kind() != "import_statement" {
            return;
        }
        if node.parent().map(|p| p.kind()) != Some("program") {
            return;
        }
        if !seen.insert(node_text(node, source).trim().to_string()) {
            duplicates.push(line_extent(source, node.byte_range()));
            return;
        }
        last_import_end = Some(node.end_byte());
        let from_react = node
            .child_by_field_name("source")
            .map(|s| strip_quotes(node_text(s, source)) == "react")
            .unwrap_or(false);
        if from_react && merge.is_none() {
            merge = merge_point(node, source);
        }
    });

    let placement = if hooks.is_empty() {
        None
    } else {
        let source = tree.source();
        Some(merge.unwrap_or_else(|| match last_import_end {
            Some(end) => Placement::NewLine(end_of_line(source, end)),
            None => Placement::NewLine(after_prologue(source)),
        }))
    };

    tree.traverse(|node, source, edits| {
        if node.kind() != "program" {
            return;
        }
        for range in &duplicates {
            edits.remove(range.clone());
        }
        if let Some(placement) = placement {
            let at = placement.offset();
            edits.replace_range(at..at, placement_text(placement, &hooks, source));
        }
    });
    Ok(())
}

fn import_statement_line() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r#"^import\s+(type\s+)?(.*?)\s*from\s*['"]([^'"]+)['"]\s*;?\s*$"#)
}

fn hook_call() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?:^|[^.\w$])(use[A-Z][A-Za-z0-9]*)\s*\(")
}

fn local_hook_declaration() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"\b(?:function|const|let|var)\s+(use[A-Z]\w*)")
}

/// Local names bound by an import clause such as `React, { a, b as c }`.
fn clause_bindings(clause: &str) -> Vec<String> {
    clause
        .split([',', '{', '}'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.split_whitespace().last())
        .map(str::to_string)
        .collect()
}

/// Pattern fallback for sources the parser rejects. Works line by line and
/// only understands single-line import statements.
pub fn textual(code: &str) -> anyhow::Result<String> {
    let mut imported: HashSet<String> = HashSet::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = String::with_capacity(code.len());
    let mut last_import_end: Option<usize> = None;
    let mut react_line: Option<(usize, String)> = None;

    for line in code.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(caps) = import_statement_line().captures(trimmed) {
            if !seen.insert(trimmed.to_string()) {
                continue;
            }
            imported.extend(clause_bindings(&caps[2]));
            if caps.get(1).is_none() && &caps[3] == "react" && react_line.is_none() {
                react_line = Some((kept.len(), line.to_string()));
            }
            kept.push_str(line);
            last_import_end = Some(kept.len());
            continue;
        }
        kept.push_str(line);
    }

    let declared: HashSet<&str> = local_hook_declaration()
        .captures_iter(&kept)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    let hooks: BTreeSet<String> = hook_call()
        .captures_iter(&kept)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|name| REACT_HOOKS.contains(name))
        .filter(|name| !imported.contains(*name) && !declared.contains(name))
        .map(str::to_string)
        .collect();
    if hooks.is_empty() {
        return Ok(kept);
    }

    let placement = react_line
        .and_then(|(start, line)| textual_merge_point(&line).map(|p| shift(p, start)))
        .unwrap_or_else(|| match last_import_end {
            Some(end) => Placement::NewLine(end),
            None => Placement::NewLine(after_prologue(&kept)),
        });
    let at = placement.offset();
    let text = placement_text(placement, &hooks, &kept);
    kept.insert_str(at, &text);
    Ok(kept)
}

fn shift(placement: Placement, by: usize) -> Placement {
    match placement {
        Placement::AfterSpecifier(at) => Placement::AfterSpecifier(at + by),
        Placement::IntoEmptyBraces(at) => Placement::IntoEmptyBraces(at + by),
        Placement::AfterDefault(at) => Placement::AfterDefault(at + by),
        Placement::NewLine(at) => Placement::NewLine(at + by),
    }
}

fn textual_merge_point(line: &str) -> Option<Placement> {
    let from = line.find(" from")?;
    let clause = &line[..from];
    if clause.contains('*') {
        return None;
    }
    if let Some(close) = clause.rfind('}') {
        let open = clause.find('{')?;
        let inside = clause[open + 1..close].trim_end();
        if inside.trim().is_empty() {
            return Some(Placement::IntoEmptyBraces(open + 1));
        }
        let last = open + 1 + inside.trim_end_matches(',').trim_end().len();
        return Some(Placement::AfterSpecifier(last));
    }
    let binding_end = clause.trim_end().len();
    Some(Placement::AfterDefault(binding_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, Dialect, DEFAULT_PARSE_TIMEOUT};

    fn run_structural(code: &str) -> String {
        let mut tree = parse(code, Dialect::Tsx, DEFAULT_PARSE_TIMEOUT).unwrap();
        structural(&mut tree).unwrap();
        tree.generate().unwrap()
    }

    #[test]
    fn test_merges_into_named_import() {
        let code = "import { useState } from 'react';\n\nexport function A() {\n  const [a] = useState(0);\n  useEffect(() => {}, []);\n  return <p>{a}</p>;\n}\n";
        let expected = code.replace("{ useState }", "{ useState, useEffect }");
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_extends_default_import() {
        let code = "import React from 'react';\nexport function A() { const [a] = useState(0); return a; }\n";
        let expected = code.replace("import React from", "import React, { useState } from");
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_adds_line_after_prologue() {
        let code = "'use client';\nexport function A() { const [a] = useState(0); return a; }\n";
        let expected = "'use client';\nimport { useState } from 'react';\nexport function A() { const [a] = useState(0); return a; }\n";
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_adds_line_after_last_import() {
        let code = "import a from './a';\nexport function A() { useEffect(a, []); return null; }\n";
        let expected = "import a from './a';\nimport { useEffect } from 'react';\nexport function A() { useEffect(a, []); return null; }\n";
        assert_eq!(run_structural(code), expected);
    }

    #[test]
    fn test_removes_duplicate_imports() {
        let code = "import a from './a';\nimport a from './a';\nconsole.info(a);\n";
        let expected = "import a from './a';\nconsole.info(a);\n";
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_ignores_member_calls_and_local_hooks() {
        let code = "import React from 'react';\nfunction useMemo() { return 1; }\nexport const a = () => React.useState(useMemo());\n";
        assert_eq!(run_structural(code), code);
        assert_eq!(textual(code).unwrap(), code);
    }

    #[test]
    fn test_idempotent() {
        let code = "export function A() { const r = useRef(null); return r; }\n";
        let once = run_structural(code);
        assert_eq!(once, format!("import {{ useRef }} from 'react';\n{code}"));
        assert_eq!(run_structural(&once), once);
    }
}
