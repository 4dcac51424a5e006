//! Client-rendering directive
//!
//! Modules that hold state, run effects, attach event handlers or call React
//! hooks must opt into client rendering. The directive goes on the first line
//! (after a shebang, if any).

use super::imports::REACT_HOOKS;
use super::{hash_parts, PassBody, PassDescriptor, DIRECTIVES, IMPORTS};
use crate::contract::{rules, Contract};
use crate::gate::{dedupe_directives, directive_prologue, pattern};
use crate::semantic::{analyze_tree, SemanticContext};
use crate::syntax::SyntaxTree;
use regex::Regex;
use std::sync::OnceLock;

pub const USE_CLIENT: &str = "'use client';\n";

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(DIRECTIVES, "directives", PassBody::both(textual, structural))
        .describe("mark interactive modules with 'use client'")
        .depends_on(&[IMPORTS])
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .postcondition(rules::syntax_preserved())
        .postcondition(rules::no_double_wrapping())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let context = analyze_tree(tree);
            let mut parts = context.directives.clone();
            parts.push(needs_client(&context).to_string());
            hash_parts(parts)
        })
        .with_rollback(|code| Ok(dedupe_directives(code)))
}

fn needs_client(context: &SemanticContext) -> bool {
    context.has_state
        || context.has_effects
        || context.has_event_handlers
        || context
            .external_uses
            .iter()
            .any(|name| REACT_HOOKS.contains(&name.as_str()))
}

fn declares_rendering(directives: &[String]) -> bool {
    directives
        .iter()
        .any(|d| d == "use client" || d == "use server")
}

/// Where the directive goes and the text to insert there.
fn insertion(code: &str) -> (usize, String) {
    let at = if code.starts_with("#!") {
        code.find('\n').map(|i| i + 1).unwrap_or(code.len())
    } else {
        0
    };
    if at == code.len() && at > 0 && !code.ends_with('\n') {
        (at, format!("\n{USE_CLIENT}"))
    } else {
        (at, USE_CLIENT.to_string())
    }
}

pub fn structural(tree: &mut SyntaxTree) -> anyhow::Result<()> {
    if declares_rendering(&directive_prologue(tree.source())) {
        return Ok(());
    }
    if !needs_client(&analyze_tree(tree)) {
        return Ok(());
    }
    let (at, text) = insertion(tree.source());
    tree.traverse(|node, _, edits| {
        if node.parent().is_none() {
            edits.replace_range(at..at, text.clone());
        }
    });
    Ok(())
}

/// Hook calls, class state, lifecycle methods and markup event handlers.
fn client_marker() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(
        &CELL,
        r#"(?:^|[^.\w$])use[A-Z]\w*\s*\(|\bthis\.(?:state|setState)\b|\b(?:componentDidMount|componentDidUpdate|componentWillUnmount)\s*\(|\son[A-Z]\w*=\s*[{"']"#,
    )
}

/// Pattern fallback for sources the parser rejects; never parses.
pub fn textual(code: &str) -> anyhow::Result<String> {
    if declares_rendering(&directive_prologue(code)) || !client_marker().is_match(code) {
        return Ok(code.to_string());
    }
    let (at, text) = insertion(code);
    let mut out = String::with_capacity(code.len() + text.len());
    out.push_str(&code[..at]);
    out.push_str(&text);
    out.push_str(&code[at..]);
    Ok(out)
}
