//! Accessibility attributes
//!
//! `<img>` without `alt` gets `alt=""` and `target="_blank"` links without
//! `rel` get `rel="noopener noreferrer"`. Tags with a spread attribute are
//! left alone since the spread may already supply the attribute.

use super::{hash_parts, PassBody, PassDescriptor, ACCESSIBILITY};
use crate::contract::{rules, Contract};
use crate::gate::pattern;
use crate::semantic::strip_quotes;
use crate::syntax::{jsx, node_text, SyntaxTree};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tree_sitter::Node;

const EMPTY_ALT: &str = r#" alt="""#;
const SAFE_REL: &str = r#" rel="noopener noreferrer""#;

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(ACCESSIBILITY, "accessibility", PassBody::both(textual, structural))
        .describe("add alt text placeholders and rel attributes to new-tab links")
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .postcondition(rules::no_malformed_handlers())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let mut parts = Vec::new();
            tree.walk(|node, source| {
                if let Some(attribute) = missing_attribute(node, source) {
                    parts.push(format!("{}@{}", attribute.trim(), node.start_byte()));
                }
            });
            hash_parts(parts)
        })
}

fn has_spread(tag: Node<'_>) -> bool {
    let mut cursor = tag.walk();
    let spread = tag
        .named_children(&mut cursor)
        .any(|child| child.kind() == "jsx_expression");
    spread
}

fn opens_new_tab(tag: Node<'_>, source: &str) -> bool {
    jsx::find_attribute(tag, source, "target")
        .and_then(jsx::attribute_value)
        .map(|value| {
            let text = node_text(value, source);
            strip_quotes(text.trim_start_matches('{').trim_end_matches('}')) == "_blank"
        })
        .unwrap_or(false)
}

/// The attribute text a tag is missing, if any.
fn missing_attribute(node: Node<'_>, source: &str) -> Option<&'static str> {
    if !matches!(node.kind(), "jsx_self_closing_element" | "jsx_opening_element") {
        return None;
    }
    if has_spread(node) {
        return None;
    }
    match jsx::tag_name(node, source)? {
        "img" if !jsx::has_attribute(node, source, "alt") => Some(EMPTY_ALT),
        "a" if opens_new_tab(node, source) && !jsx::has_attribute(node, source, "rel") => {
            Some(SAFE_REL)
        }
        _ => None,
    }
}

pub fn structural(tree: &mut SyntaxTree) -> anyhow::Result<()> {
    tree.traverse(|node, source, edits| {
        let Some(attribute) = missing_attribute(node, source) else {
            return;
        };
        if let Some(at) = jsx::attribute_insert_offset(node) {
            edits.replace_range(at..at, attribute);
        }
    });
    Ok(())
}

fn tag_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"<(img|a)\b([^>]*?)(\s*/?)>")
}

fn attribute_present(attrs: &str, name: &str) -> bool {
    attrs
        .match_indices(name)
        .any(|(at, _)| {
            let before = attrs[..at].chars().next_back();
            let after = attrs[at + name.len()..].trim_start();
            before.is_some_and(char::is_whitespace) && after.starts_with('=')
        })
}

fn new_tab_target() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r#"\btarget\s*=\s*\{?\s*["']_blank["']\s*\}?"#)
}

/// Pattern fallback, used for markup the parser rejects (an unclosed
/// `<img src={x}>` is the common case). Tags whose attribute text contains a
/// stray `>` inside braces are skipped rather than guessed at.
pub fn textual(code: &str) -> anyhow::Result<String> {
    let out = tag_pattern().replace_all(code, |caps: &Captures<'_>| {
        let whole = caps[0].to_string();
        let attrs = &caps[2];
        if attrs.matches('{').count() != attrs.matches('}').count() || attrs.contains("{...") {
            return whole;
        }
        let addition = match &caps[1] {
            "img" if !attribute_present(attrs, "alt") => EMPTY_ALT,
            "a" if new_tab_target().is_match(attrs) && !attribute_present(attrs, "rel") => {
                SAFE_REL
            }
            _ => return whole,
        };
        format!("<{}{}{}{}>", &caps[1], attrs, addition, &caps[3])
    });
    Ok(out.into_owned())
}
