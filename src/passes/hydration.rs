//! Server-render guards for web storage
//!
//! Calls on `localStorage` / `sessionStorage` that run during render would
//! throw on the server. Unguarded calls are wrapped in a `typeof window`
//! check; calls inside effects, lifecycle methods or an existing guard are
//! left alone.

use super::{hash_parts, PassBody, PassDescriptor, HYDRATION};
use crate::contract::{rules, Contract};
use crate::gate::pattern;
use crate::semantic::is_guarded_global_access;
use crate::syntax::{find_ancestor, node_text, SyntaxTree};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tree_sitter::Node;

const STORAGE_OBJECTS: &[&str] = &[
    "localStorage",
    "sessionStorage",
    "window.localStorage",
    "window.sessionStorage",
];
const EFFECT_CALLS: &[&str] = &["useEffect(", "useLayoutEffect("];

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(HYDRATION, "hydration", PassBody::both(textual, structural))
        .describe("guard web storage calls that would run during server rendering")
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .precondition(rules::mentions("uses-web-storage", "Storage"))
        .postcondition(rules::syntax_preserved())
        .postcondition(rules::no_double_wrapping())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let mut parts = Vec::new();
            tree.walk(|node, source| {
                if needs_guard(node, source) {
                    parts.push(node_text(node, source).to_string());
                }
            });
            hash_parts(parts)
        })
        .with_rollback(unwrap_guards)
}

pub fn guard(call: &str) -> String {
    format!("(typeof window !== \"undefined\" ? {call} : null)")
}

fn is_storage_call(node: Node<'_>, source: &str) -> bool {
    if node.kind() != "call_expression" {
        return false;
    }
    node.child_by_field_name("function")
        .filter(|f| f.kind() == "member_expression")
        .and_then(|f| f.child_by_field_name("object"))
        .map(|object| STORAGE_OBJECTS.contains(&node_text(object, source)))
        .unwrap_or(false)
}

fn needs_guard(node: Node<'_>, source: &str) -> bool {
    is_storage_call(node, source)
        && !is_guarded_global_access(node, source)
        // the outermost storage call carries the guard
        && find_ancestor(node, |a| is_storage_call(a, source)).is_none()
}

pub fn structural(tree: &mut SyntaxTree) -> anyhow::Result<()> {
    tree.traverse(|node, source, edits| {
        if needs_guard(node, source) {
            edits.replace(node, guard(node_text(node, source)));
        }
    });
    Ok(())
}

fn storage_call() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(^|[^.\w$])((?:window\.)?(?:localStorage|sessionStorage)\.\w+\((?:[^()\n]|\([^()\n]*\))*\))")
}

fn guarded_call() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r#"\(typeof window !== "undefined" \? ((?:window\.)?(?:localStorage|sessionStorage)\.[^\n]*?) : null\)"#)
}

/// Pattern fallback. Lines already mentioning `typeof window` are skipped,
/// and so is the body of a `useEffect` / `useLayoutEffect` call, tracked by
/// brace depth.
pub fn textual(code: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(code.len() + 64);
    let mut depth: i64 = 0;
    let mut effect_depth: Option<i64> = None;

    for line in code.split_inclusive('\n') {
        if effect_depth.is_none() && EFFECT_CALLS.iter().any(|call| line.contains(call)) {
            effect_depth = Some(depth);
        }

        if effect_depth.is_some() || line.contains("typeof window") {
            out.push_str(line);
        } else {
            let wrapped = storage_call().replace_all(line, |caps: &Captures<'_>| {
                format!("{}{}", &caps[1], guard(&caps[2]))
            });
            out.push_str(&wrapped);
        }

        depth += line.matches('{').count() as i64 - line.matches('}').count() as i64;
        if effect_depth.is_some_and(|start| depth <= start) {
            effect_depth = None;
        }
    }
    Ok(out)
}

/// Best-effort inverse of the guard.
pub fn unwrap_guards(code: &str) -> anyhow::Result<String> {
    Ok(guarded_call().replace_all(code, "$1").into_owned())
}
