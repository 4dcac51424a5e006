//! Framework configuration cleanup
//!
//! Drops flags that newer framework versions reject or ignore
//! (`experimental.appDir`, `swcMinify`) from config modules, and removes an
//! `experimental` block left empty afterwards.

use super::{hash_parts, PassBody, PassDescriptor, CONFIG};
use crate::contract::{rules, Contract};
use crate::gate::pattern;
use crate::syntax::node_text;
use regex::Regex;
use std::sync::OnceLock;

const DEPRECATED_FLAGS: &[&str] = &["appDir", "swcMinify"];

pub fn descriptor() -> PassDescriptor {
    PassDescriptor::new(CONFIG, "config", PassBody::textual(textual))
        .describe("remove deprecated framework config flags")
}

pub fn contract() -> Contract {
    Contract::always_pass()
        .precondition(rules::non_empty())
        .postcondition(rules::syntax_preserved())
        .postcondition(rules::exports_preserved())
        .with_fingerprint(|tree| {
            let mut deprecated = Vec::new();
            tree.walk(|node, source| {
                if node.kind() != "pair" {
                    return;
                }
                let key = node
                    .child_by_field_name("key")
                    .map(|k| node_text(k, source))
                    .unwrap_or("");
                let value = node
                    .child_by_field_name("value")
                    .map(|v| node_text(v, source))
                    .unwrap_or("");
                if DEPRECATED_FLAGS.contains(&key) && value == "true" {
                    deprecated.push(key.to_string());
                }
            });
            hash_parts(deprecated)
        })
}

fn is_config_module(code: &str) -> bool {
    code.contains("module.exports") || code.contains("nextConfig") || code.contains("defineConfig")
}

fn deprecated_line() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"^\s*(?:appDir|swcMinify)\s*:\s*true\s*,?\s*$")
}

fn empty_experimental() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r"(?m)^[ \t]*experimental\s*:\s*\{\s*\}\s*,?[ \t]*\r?\n?")
}

pub fn textual(code: &str) -> anyhow::Result<String> {
    if !is_config_module(code) {
        return Ok(code.to_string());
    }

    let mut out = String::with_capacity(code.len());
    let mut removed = false;
    for line in code.split_inclusive('\n') {
        if deprecated_line().is_match(line.trim_end_matches(['\r', '\n'])) {
            removed = true;
            continue;
        }
        out.push_str(line);
    }

    if removed {
        out = empty_experimental().replace_all(&out, "").into_owned();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_deprecated_flags() {
        let input = "const nextConfig = {\n  reactStrictMode: true,\n  swcMinify: true,\n  experimental: {\n    appDir: true,\n  },\n};\nmodule.exports = nextConfig;\n";
        let expected = "const nextConfig = {\n  reactStrictMode: true,\n};\nmodule.exports = nextConfig;\n";
        assert_eq!(textual(input).unwrap(), expected);
    }

    #[test]
    fn test_keeps_non_config_modules() {
        let input = "const flags = {\n  appDir: true,\n};\n";
        assert_eq!(textual(input).unwrap(), input);
    }

    #[test]
    fn test_idempotent() {
        let input = "module.exports = {\n  swcMinify: true,\n  images: {},\n};\n";
        let once = textual(input).unwrap();
        assert_eq!(textual(&once).unwrap(), once);
        assert_eq!(once, "module.exports = {\n  images: {},\n};\n");
    }
}
