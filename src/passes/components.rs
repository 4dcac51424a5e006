//! List item keys
//!
//! Markup returned from a `.map()` callback gets a `key`. The key is the
//! item's `id` when the markup already reads it, otherwise the callback's
//! index parameter, which is introduced when the callback does not take one.

use super::{hash_parts, PassBody, PassDescriptor, COMPONENTS, IMPORTS};
use crate::contract::{rules, Contract};
use crate::gate::pattern;
use crate::syntax::{jsx, node_text, SyntaxTree};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;
use tree_sitter::Node;

const INDEX_NAMES: &[&str] = &["index", "idx", "i"];

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(COMPONENTS, "components", PassBody::both(textual, structural))
        .describe("add key props to markup rendered from .map() callbacks")
        .depends_on(&[IMPORTS])
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .precondition(rules::mentions("renders-lists", ".map("))
        .postcondition(rules::syntax_preserved())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let mut unkeyed = Vec::new();
            tree.walk(|node, source| {
                if let Some((_, markup)) = jsx::list_item_markup(node, source) {
                    let keyed = jsx::opening_tag(markup)
                        .map(|tag| jsx::has_attribute(tag, source, "key"))
                        .unwrap_or(true);
                    if !keyed {
                        unkeyed.push(node_text(markup, source).to_string());
                    }
                }
            });
            hash_parts(unkeyed)
        })
}

/// `text` reads `object.property` (and not e.g. `object.properties`).
fn reads_member(text: &str, object: &str, property: &str) -> bool {
    let needle = format!("{object}.{property}");
    text.match_indices(&needle).any(|(at, _)| {
        let before_ok = text[..at]
            .chars()
            .next_back()
            .map(|c| !(c.is_alphanumeric() || c == '_' || c == '$' || c == '.'))
            .unwrap_or(true);
        let after_ok = text[at + needle.len()..]
            .chars()
            .next()
            .map(|c| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(true);
        before_ok && after_ok
    })
}

fn mentions_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .any(|part| part == word)
}

fn fresh_index_name(scope: &str) -> Option<&'static str> {
    INDEX_NAMES.iter().copied().find(|name| !mentions_word(scope, name))
}

/// Parameter nodes and their bound names, in order.
fn parameters<'t>(callback: Node<'t>, source: &str) -> Vec<(Node<'t>, String)> {
    if let Some(single) = callback.child_by_field_name("parameter") {
        return vec![(single, node_text(single, source).to_string())];
    }
    let Some(list) = callback.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut cursor = list.walk();
    list.named_children(&mut cursor)
        .filter(|p| p.kind() != "comment")
        .map(|p| {
            let name = match p.kind() {
                "required_parameter" | "optional_parameter" => p
                    .child_by_field_name("pattern")
                    .map(|pattern| node_text(pattern, source))
                    .unwrap_or(""),
                _ => node_text(p, source),
            };
            (p, name.to_string())
        })
        .collect()
}

pub fn structural(tree: &mut SyntaxTree) -> anyhow::Result<()> {
    tree.traverse(|node, source, edits| {
        let Some((callback, markup)) = jsx::list_item_markup(node, source) else {
            return;
        };
        let Some(tag) = jsx::opening_tag(markup) else {
            return;
        };
        if jsx::has_attribute(tag, source, "key") {
            return;
        }
        let Some(insert_at) = jsx::attribute_insert_offset(tag) else {
            return;
        };

        let params = parameters(callback, source);
        let Some((item_node, item)) = params.first() else {
            return;
        };
        let markup_text = node_text(markup, source);

        let key = if item.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            && reads_member(markup_text, item, "id")
        {
            format!("{item}.id")
        } else if let Some((_, index)) = params.get(1) {
            index.clone()
        } else {
            let Some(index) = fresh_index_name(node_text(callback, source)) else {
                return;
            };
            if callback.child_by_field_name("parameter").is_some() {
                edits.replace(*item_node, format!("({item}, {index})"));
            } else {
                edits.insert_after(*item_node, format!(", {index}"));
            }
            index.to_string()
        };

        edits.replace_range(insert_at..insert_at, format!(" key={{{key}}}"));
    });
    Ok(())
}

fn mapped_markup() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"\.map\(\s*(\(\s*)?([A-Za-z_$][\w$]*)\s*(?:,\s*([A-Za-z_$][\w$]*)\s*)?\)?\s*=>\s*\(?\s*<([A-Za-z][\w.]*)([^>]*?)/?>")
}

fn braces_balanced(text: &str) -> bool {
    text.matches('{').count() == text.matches('}').count()
}

/// Pattern fallback: arrow callbacks with at most two plain parameters whose
/// body starts with markup.
pub fn textual(code: &str) -> anyhow::Result<String> {
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    for caps in mapped_markup().captures_iter(code) {
        let (Some(whole), Some(item), Some(tag), Some(attrs)) =
            (caps.get(0), caps.get(2), caps.get(4), caps.get(5))
        else {
            continue;
        };
        if !braces_balanced(attrs.as_str()) || mentions_word(attrs.as_str(), "key") {
            continue;
        }
        let line_end = code[whole.end()..]
            .find('\n')
            .map(|i| whole.end() + i)
            .unwrap_or(code.len());
        let body = &code[tag.start()..line_end];

        let key = if reads_member(body, item.as_str(), "id") {
            format!("{}.id", item.as_str())
        } else if let Some(index) = caps.get(3) {
            index.as_str().to_string()
        } else {
            let Some(index) = fresh_index_name(&code[whole.start()..line_end]) else {
                continue;
            };
            if caps.get(1).is_some() {
                edits.push((item.end()..item.end(), format!(", {index}")));
            } else {
                edits.push((item.range(), format!("({}, {index})", item.as_str())));
            }
            index.to_string()
        };

        let insert_at = attrs.start() + attrs.as_str().trim_end().len();
        edits.push((insert_at..insert_at, format!(" key={{{key}}}")));
    }

    let mut out = code.to_string();
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    for (range, text) in edits {
        out.replace_range(range, &text);
    }
    Ok(out)
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
    fn test_introduces_index_parameter() {
        let code = "const a = items.map((item) => <li>{item.name}</li>);\n";
        let expected = "const a = items.map((item, index) => <li key={index}>{item.name}</li>);\n";
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_prefers_item_id() {
        let code = "const a = items.map(item => <li>{item.id}</li>);\n";
        let expected = "const a = items.map(item => <li key={item.id}>{item.id}</li>);\n";
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_reuses_existing_index() {
        let code = "const a = items.map((item, i) => <Row item={item} />);\n";
        let expected = "const a = items.map((item, i) => <Row item={item} key={i} />);\n";
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_bare_parameter_gets_parenthesized() {
        let code = "const a = items.map(item => <li>{item.name}</li>);\n";
        let expected = "const a = items.map((item, index) => <li key={index}>{item.name}</li>);\n";
        assert_eq!(run_structural(code), expected);
        assert_eq!(textual(code).unwrap(), expected);
    }

    #[test]
    fn test_keyed_markup_untouched() {
        let code = "const a = items.map((item) => <li key={item.slug}>{item.name}</li>);\n";
        assert_eq!(run_structural(code), code);
        assert_eq!(textual(code).unwrap(), code);
    }

    #[test]
    fn test_index_name_avoids_collisions() {
        let code = "const a = items.map((item) => <li>{item.name}{index}</li>);\n";
        let out = run_structural(code);
        assert!(out.contains("(item, idx) => <li key={idx}>"));
    }

    #[test]
    fn test_reads_member() {
        assert!(reads_member("{item.id}", "item", "id"));
        assert!(!reads_member("{item.identifier}", "item", "id"));
        assert!(!reads_member("{other.item.id}", "item", "id"));
    }
}
