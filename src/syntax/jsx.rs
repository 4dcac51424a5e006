//! Markup node helpers shared by the analyzer and the built-in passes

use super::node_text;
use tree_sitter::Node;

pub fn is_markup(node: Node<'_>) -> bool {
    matches!(node.kind(), "jsx_element" | "jsx_self_closing_element")
}

/// The node that carries the tag name and attributes.
pub fn opening_tag(element: Node<'_>) -> Option<Node<'_>> {
    match element.kind() {
        "jsx_self_closing_element" | "jsx_opening_element" => Some(element),
        "jsx_element" => element
            .child_by_field_name("open_tag")
            .or_else(|| element.named_child(0)),
        _ => None,
    }
}

pub fn tag_name<'s>(tag: Node<'_>, source: &'s str) -> Option<&'s str> {
    tag.child_by_field_name("name")
        .map(|name| node_text(name, source))
}

pub fn attributes(tag: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = tag.walk();
    tag.named_children(&mut cursor)
        .filter(|child| child.kind() == "jsx_attribute")
        .collect()
}

pub fn attribute_name<'s>(attr: Node<'_>, source: &'s str) -> &'s str {
    attr.named_child(0)
        .map(|name| node_text(name, source))
        .unwrap_or("")
}

/// Value node of an attribute (`string`, `jsx_expression`, ...), if any.
pub fn attribute_value(attr: Node<'_>) -> Option<Node<'_>> {
    if attr.named_child_count() > 1 {
        attr.named_child(attr.named_child_count() - 1)
    } else {
        None
    }
}

pub fn find_attribute<'t>(tag: Node<'t>, source: &str, name: &str) -> Option<Node<'t>> {
    attributes(tag)
        .into_iter()
        .find(|attr| attribute_name(*attr, source) == name)
}

pub fn has_attribute(tag: Node<'_>, source: &str, name: &str) -> bool {
    find_attribute(tag, source, name).is_some()
}

/// Byte offset where a new attribute can be inserted (right after the last
/// attribute, or after the tag name).
pub fn attribute_insert_offset(tag: Node<'_>) -> Option<usize> {
    if let Some(last) = attributes(tag).last() {
        return Some(last.end_byte());
    }
    tag.child_by_field_name("name").map(|name| name.end_byte())
}

/// Strip redundant parentheses around an expression.
pub fn unwrap_parens(mut node: Node<'_>) -> Node<'_> {
    while node.kind() == "parenthesized_expression" {
        match node.named_child(0) {
            Some(inner) => node = inner,
            None => break,
        }
    }
    node
}

/// Markup returned by a function-like node: either an expression body or a
/// block whose only statement is a `return`.
pub fn returned_markup(function: Node<'_>) -> Option<Node<'_>> {
    let body = function.child_by_field_name("body")?;
    let candidate = if body.kind() == "statement_block" {
        let mut cursor = body.walk();
        let statements: Vec<Node<'_>> = body
            .named_children(&mut cursor)
            .filter(|n| n.kind() != "comment")
            .collect();
        let [only] = statements.as_slice() else {
            return None;
        };
        if only.kind() != "return_statement" {
            return None;
        }
        only.named_child(0)?
    } else {
        body
    };
    let candidate = unwrap_parens(candidate);
    is_markup(candidate).then_some(candidate)
}

/// For `xs.map(cb)` calls whose callback returns markup, the callback and
/// the returned element.
pub fn list_item_markup<'t>(call: Node<'t>, source: &str) -> Option<(Node<'t>, Node<'t>)> {
    if call.kind() != "call_expression" {
        return None;
    }
    let function = call.child_by_field_name("function")?;
    if function.kind() != "member_expression" {
        return None;
    }
    let property = function.child_by_field_name("property")?;
    if node_text(property, source) != "map" {
        return None;
    }
    let arguments = call.child_by_field_name("arguments")?;
    let callback = arguments.named_child(0)?;
    if !matches!(callback.kind(), "arrow_function" | "function_expression" | "function") {
        return None;
    }
    let markup = returned_markup(callback)?;
    Some((callback, markup))
}
