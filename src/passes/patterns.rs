//! Leftover debugging and entity cleanup
//!
//! Removes standalone `console.log` / `console.debug` statements and decodes
//! quote entities (`&quot;`, `&#x27;`, `&apos;`) in markup text, where the
//! raw character renders identically.

use super::{hash_parts, line_extent, PassBody, PassDescriptor, PATTERNS};
use crate::contract::{rules, Contract};
use crate::gate::pattern;
use crate::syntax::{node_text, SyntaxTree};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tree_sitter::Node;

const DEBUG_CALLS: &[&str] = &["console.log", "console.debug"];
const ENTITIES: &[(&str, &str)] = &[("&quot;", "\""), ("&#x27;", "'"), ("&apos;", "'")];

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(PATTERNS, "patterns", PassBody::both(textual, structural))
        .describe("remove debug logging and decode quote entities in markup text")
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .postcondition(rules::syntax_preserved())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let mut parts = Vec::new();
            tree.walk(|node, source| {
                if is_debug_statement(node, source) {
                    parts.push(format!("log@{}", node_text(node, source)));
                }
                if is_markup_entity(node, source) {
                    parts.push(format!("entity@{}", node_text(node, source)));
                }
            });
            hash_parts(parts)
        })
}

fn has_entity(text: &str) -> bool {
    ENTITIES.iter().any(|(entity, _)| text.contains(entity))
}

fn decode_entities(text: &str) -> String {
    let mut out = text.to_string();
    for (entity, raw) in ENTITIES {
        out = out.replace(entity, raw);
    }
    out
}

/// Entity text inside markup children. Newer grammars split references
/// into their own node; older ones keep them inside `jsx_text`.
fn is_markup_entity(node: Node<'_>, source: &str) -> bool {
    let in_markup = node
        .parent()
        .map(|p| p.kind() == "jsx_element")
        .unwrap_or(false);
    in_markup
        && matches!(node.kind(), "html_character_reference" | "jsx_text")
        && has_entity(node_text(node, source))
}

fn is_debug_statement(node: Node<'_>, source: &str) -> bool {
    if node.kind() != "expression_statement" {
        return false;
    }
    let standalone = node
        .parent()
        .map(|p| matches!(p.kind(), "program" | "statement_block"))
        .unwrap_or(false);
    if !standalone {
        return false;
    }
    let Some(call) = node.named_child(0) else {
        return false;
    };
    if call.kind() != "call_expression" {
        return false;
    }
    call.child_by_field_name("function")
        .map(|f| DEBUG_CALLS.contains(&node_text(f, source)))
        .unwrap_or(false)
}

pub fn structural(tree: &mut SyntaxTree) -> anyhow::Result<()> {
    tree.traverse(|node, source, edits| {
        if is_debug_statement(node, source) {
            edits.remove(line_extent(source, node.byte_range()));
        } else if is_markup_entity(node, source) {
            edits.replace(node, decode_entities(node_text(node, source)));
        }
    });
    Ok(())
}

fn debug_line() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?m)^[ \t]*console\.(?:log|debug)\((?:[^()\n]|\([^()\n]*\))*\);?[ \t]*(?:\r?\n|$)")
}

fn markup_text() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r">([^<>{}]+)<")
}

pub fn textual(code: &str) -> anyhow::Result<String> {
    let without_logs = debug_line().replace_all(code, "");
    let decoded = markup_text().replace_all(&without_logs, |caps: &Captures<'_>| {
        format!(">{}<", decode_entities(&caps[1]))
    });
    Ok(decoded.into_owned())
}
