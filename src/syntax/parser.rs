//! Tree-sitter parser pool for the JavaScript family

use super::{Dialect, ParseError};
use std::cell::RefCell;
use std::time::Duration;
use tree_sitter::{Parser, Tree};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Parsers are expensive to create but reusable across files of the same
// dialect. Each rayon worker gets its own pre-configured set.

thread_local! {
    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A failure here surfaces as ParseError::Language on first use
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });
}

fn saturating(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn parse_with(parser: &RefCell<Parser>, source: &str, timeout: Duration) -> Result<Tree, ParseError> {
    let mut parser = parser.borrow_mut();
    if parser.language().is_none() {
        return Err(ParseError::Language);
    }
    parser.set_timeout_micros(saturating(timeout.as_micros()));
    match parser.parse(source, None) {
        Some(tree) => Ok(tree),
        None => {
            // A cancelled parse resumes on the next call unless reset
            parser.reset();
            Err(ParseError::Timeout {
                millis: saturating(timeout.as_millis()),
            })
        }
    }
}

/// Parse `source` with the pooled parser for `dialect`.
///
/// The returned tree may contain error nodes; strictness is decided by the
/// caller.
pub(super) fn parse_pooled(
    source: &str,
    dialect: Dialect,
    timeout: Duration,
) -> Result<Tree, ParseError> {
    match dialect {
        Dialect::JavaScript => JS_PARSER.with(|p| parse_with(p, source, timeout)),
        Dialect::TypeScript => TS_PARSER.with(|p| parse_with(p, source, timeout)),
        Dialect::Tsx => TSX_PARSER.with(|p| parse_with(p, source, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_timeouts_saturate() {
        assert_eq!(saturating(Duration::from_millis(2_000).as_millis()), 2_000);
        assert_eq!(saturating(Duration::MAX.as_millis()), u64::MAX);
        assert_eq!(saturating(Duration::MAX.as_micros()), u64::MAX);
    }

    #[test]
    fn test_pool_parses_each_dialect() {
        for dialect in [Dialect::JavaScript, Dialect::TypeScript, Dialect::Tsx] {
            let tree = parse_pooled("let a = 1;\n", dialect, Duration::from_secs(1)).unwrap();
            assert!(!tree.root_node().has_error());
        }
    }
}
