//! Quality gate
//!
//! Stateless structural checks run on every pass output. All checks are
//! linear in the size of the source; syntax validation delegates to the
//! tree-sitter layer and never swallows a parser error.

use crate::semantic::analyze_tree;
use crate::syntax::{self, Dialect, ParseError};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateError {
    #[error("syntax error: {message}")]
    Syntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },
    #[error("unbalanced `{delimiter}` at {line}:{column}")]
    Unbalanced {
        delimiter: char,
        line: usize,
        column: usize,
    },
    #[error("malformed event handler introduced")]
    MalformedHandler,
    #[error("guard or directive applied twice")]
    DoubleWrapping,
}

impl GateError {
    pub fn location(&self) -> (Option<usize>, Option<usize>) {
        match self {
            GateError::Syntax { line, column, .. } => (*line, *column),
            GateError::Unbalanced { line, column, .. } => (Some(*line), Some(*column)),
            _ => (None, None),
        }
    }

    /// True for failures that mean the output no longer parses.
    pub fn is_syntax_breaking(&self) -> bool {
        matches!(self, GateError::Syntax { .. } | GateError::Unbalanced { .. })
    }
}

impl From<ParseError> for GateError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Syntax {
                message,
                line,
                column,
            } => GateError::Syntax {
                message,
                line: Some(line),
                column: Some(column),
            },
            other => GateError::Syntax {
                message: other.to_string(),
                line: None,
                column: None,
            },
        }
    }
}

/// Structural checks bound to one dialect and parser budget
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    dialect: Dialect,
    timeout: Duration,
}

impl QualityGate {
    pub fn new(dialect: Dialect, timeout: Duration) -> Self {
        Self { dialect, timeout }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse timeout applied to every parse the gate makes.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn validate_syntax(&self, code: &str) -> Result<(), GateError> {
        syntax::parse(code, self.dialect, self.timeout)
            .map(|_| ())
            .map_err(GateError::from)
    }

    pub fn validate_no_malformed_handlers(&self, code: &str) -> bool {
        validate_no_malformed_handlers(code)
    }

    pub fn validate_no_double_wrapping(&self, code: &str) -> bool {
        validate_no_double_wrapping(code)
    }

    /// Every hook call and capitalized markup component resolves to an
    /// import or a local declaration.
    pub fn validate_import_integrity(&self, code: &str) -> bool {
        self.missing_imports(code).is_empty()
    }

    /// Names behind [`QualityGate::validate_import_integrity`]. Sources that
    /// cannot be parsed at all are not judged.
    pub fn missing_imports(&self, code: &str) -> Vec<String> {
        match syntax::parse_lenient(code, self.dialect, self.timeout) {
            Ok(tree) => analyze_tree(&tree).unresolved_uses(),
            Err(_) => Vec::new(),
        }
    }

    /// Integrity check between a pass input and its output.
    ///
    /// A clean input must stay clean. An input that already failed to parse
    /// is held to delimiter balance instead. A pass may never introduce a
    /// malformed handler or a double guard the input did not have.
    pub fn check_transition(&self, before: &str, after: &str) -> Result<(), GateError> {
        if self.validate_syntax(before).is_ok() {
            self.validate_syntax(after)?;
        } else {
            validate_balanced_delimiters(after)?;
        }

        if validate_no_malformed_handlers(before) && !validate_no_malformed_handlers(after) {
            return Err(GateError::MalformedHandler);
        }
        if validate_no_double_wrapping(before) && !validate_no_double_wrapping(after) {
            return Err(GateError::DoubleWrapping);
        }
        Ok(())
    }
}

/// Compile `source` into `cell` once. Patterns are literals, so a bad one
/// is a programming error.
pub(crate) fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).unwrap_or_else(|e| panic!("invalid pattern {source}: {e}")))
}

fn malformed_handler_patterns() -> [&'static Regex; 3] {
    static EMPTY: OnceLock<Regex> = OnceLock::new();
    static NESTED_ARROW: OnceLock<Regex> = OnceLock::new();
    static STRING_CALL: OnceLock<Regex> = OnceLock::new();
    [
        // onClick={}
        pattern(&EMPTY, r"\bon[A-Z]\w*=\{\s*\}"),
        // onClick={() => () => ...}
        pattern(
            &NESTED_ARROW,
            r"\bon[A-Z]\w*=\{\s*\(\s*\)\s*=>\s*\(\s*\)\s*=>",
        ),
        // onClick="handle()"
        pattern(&STRING_CALL, r#"\bon[A-Z]\w*=["'][^"'\n]*\([^"'\n]*\)["']"#),
    ]
}

pub fn validate_no_malformed_handlers(code: &str) -> bool {
    !malformed_handler_patterns()
        .iter()
        .any(|pattern| pattern.is_match(code))
}

const WINDOW_GUARD: &str = r#"typeof\s+window\s*!==?\s*["']undefined["']"#;

fn double_guard_patterns() -> [&'static Regex; 2] {
    static TERNARY: OnceLock<Regex> = OnceLock::new();
    static NESTED_IF: OnceLock<Regex> = OnceLock::new();
    [
        pattern(
            &TERNARY,
            &format!(r"\(?\s*{g}\s*(?:\?|&&)\s*\(?\s*{g}", g = WINDOW_GUARD),
        ),
        pattern(
            &NESTED_IF,
            &format!(r"if\s*\(\s*{g}\s*\)\s*\{{\s*if\s*\(\s*{g}", g = WINDOW_GUARD),
        ),
    ]
}

/// No guard wrapped in the same guard and no directive repeated in the
/// module prologue.
pub fn validate_no_double_wrapping(code: &str) -> bool {
    if double_guard_patterns()
        .iter()
        .any(|pattern| pattern.is_match(code))
    {
        return false;
    }
    let directives = directive_prologue(code);
    let mut seen: Vec<&String> = Vec::with_capacity(directives.len());
    for directive in &directives {
        if seen.contains(&directive) {
            return false;
        }
        seen.push(directive);
    }
    true
}

fn directive_line() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    pattern(&CELL, r#"^\s*(['"])(use [a-z]+)['"]\s*;?\s*$"#)
}

/// Directives (`'use client'`, `'use server'`, `'use strict'`) in the
/// module prologue, in order. Blank lines, line comments and a shebang are
/// skipped.
pub fn directive_prologue(code: &str) -> Vec<String> {
    let mut directives = Vec::new();
    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("#!") {
            continue;
        }
        match directive_line().captures(line) {
            Some(caps) => directives.push(caps[2].to_string()),
            None => break,
        }
    }
    directives
}

/// Drop repeated directives from the module prologue, keeping the first
/// occurrence of each. Code after the prologue is untouched.
pub fn dedupe_directives(code: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    let mut out = String::with_capacity(code.len());
    let mut in_prologue = true;

    for line in code.split_inclusive('\n') {
        if in_prologue {
            let trimmed = line.trim();
            if let Some(caps) = directive_line().captures(line) {
                if seen.contains(&caps[2].to_string()) {
                    continue;
                }
                seen.push(caps[2].to_string());
            } else if !(trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("#!")) {
                in_prologue = false;
            }
        }
        out.push_str(line);
    }
    out
}

/// String- and comment-aware check that `()[]{}` are balanced.
pub fn validate_balanced_delimiters(code: &str) -> Result<(), GateError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Code,
        LineComment,
        BlockComment,
        Quote(char),
        Template,
    }

    // Stack entries: the opening char and, for `${`, the template to resume.
    let mut stack: Vec<(char, usize, usize, bool)> = Vec::new();
    let mut modes: Vec<Mode> = vec![Mode::Code];
    let mut line = 1usize;
    let mut column = 0usize;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        column += 1;
        if c == '\n' {
            line += 1;
            column = 0;
        }
        let mode = *modes.last().unwrap_or(&Mode::Code);
        match mode {
            Mode::LineComment => {
                if c == '\n' {
                    modes.pop();
                }
            }
            Mode::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    column += 1;
                    modes.pop();
                }
            }
            Mode::Quote(q) => match c {
                '\\' => {
                    chars.next();
                    column += 1;
                }
                // Unterminated quotes (apostrophes in markup text) end at the line
                '\n' => {
                    modes.pop();
                }
                _ if c == q => {
                    modes.pop();
                }
                _ => {}
            },
            Mode::Template => match c {
                '\\' => {
                    chars.next();
                    column += 1;
                }
                '`' => {
                    modes.pop();
                }
                '$' if chars.peek() == Some(&'{') => {
                    chars.next();
                    column += 1;
                    stack.push(('{', line, column, true));
                    modes.push(Mode::Code);
                }
                _ => {}
            },
            Mode::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    column += 1;
                    modes.push(Mode::LineComment);
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    column += 1;
                    modes.push(Mode::BlockComment);
                }
                '\'' | '"' => modes.push(Mode::Quote(c)),
                '`' => modes.push(Mode::Template),
                '(' | '[' | '{' => stack.push((c, line, column, false)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _, _, resumes_template)) if open == expected => {
                            if resumes_template {
                                // leave the `${ }` code mode, back into the template
                                modes.pop();
                            }
                        }
                        _ => {
                            return Err(GateError::Unbalanced {
                                delimiter: c,
                                line,
                                column,
                            })
                        }
                    }
                }
                _ => {}
            },
        }
    }

    match stack.pop() {
        Some((open, line, column, _)) => Err(GateError::Unbalanced {
            delimiter: open,
            line,
            column,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::DEFAULT_PARSE_TIMEOUT;

    fn gate() -> QualityGate {
        QualityGate::new(Dialect::Tsx, DEFAULT_PARSE_TIMEOUT)
    }

    #[test]
    fn test_validate_syntax_surfaces_location() {
        assert!(gate().validate_syntax("const a = <div />;").is_ok());
        let err = gate().validate_syntax("const a = (1;").unwrap_err();
        assert!(err.is_syntax_breaking());
        assert_eq!(err.location().0, Some(1));
    }

    #[test]
    fn test_balanced_delimiters() {
        assert!(validate_balanced_delimiters("<img src={x}>").is_ok());
        assert!(validate_balanced_delimiters("f(`a ${b({})} c`); // )").is_ok());
        assert!(validate_balanced_delimiters("const s = '(';").is_ok());
        assert!(validate_balanced_delimiters("<p>Don't {x}</p>\n").is_ok());
        let err = validate_balanced_delimiters("if (a) {\n  b(\n}").unwrap_err();
        assert_eq!(
            err,
            GateError::Unbalanced {
                delimiter: '}',
                line: 3,
                column: 1
            }
        );
        assert!(validate_balanced_delimiters("{").is_err());
    }

    #[test]
    fn test_malformed_handlers() {
        assert!(validate_no_malformed_handlers("<b onClick={() => go()} />"));
        assert!(!validate_no_malformed_handlers("<b onClick={} />"));
        assert!(!validate_no_malformed_handlers("<b onClick={() => () => go()} />"));
        assert!(!validate_no_malformed_handlers(r#"<b onClick="go()" />"#));
    }

    #[test]
    fn test_double_wrapping() {
        let once = r#"const v = typeof window !== "undefined" ? localStorage.getItem("k") : null;"#;
        assert!(validate_no_double_wrapping(once));
        let twice = r#"const v = typeof window !== "undefined" ? (typeof window !== "undefined" ? localStorage.getItem("k") : null) : null;"#;
        assert!(!validate_no_double_wrapping(twice));
        assert!(!validate_no_double_wrapping("'use client';\n'use client';\nexport {};"));
        assert!(validate_no_double_wrapping("'use client';\n'use strict';\nexport {};"));
    }

    #[test]
    fn test_dedupe_directives() {
        let code = "'use client';\n\"use client\";\n'use strict';\nexport const a = 'use client';\n";
        assert_eq!(
            dedupe_directives(code),
            "'use client';\n'use strict';\nexport const a = 'use client';\n"
        );
        assert!(validate_no_double_wrapping(&dedupe_directives(code)));
    }

    #[test]
    fn test_directive_prologue() {
        let code = "// header\n\"use client\"\n\nimport x from 'y';\n'use server';\n";
        assert_eq!(directive_prologue(code), vec!["use client".to_string()]);
    }

    #[test]
    fn test_import_integrity() {
        let ok = "import { useState } from 'react';\nexport function A() { const [a] = useState(0); return <Card />; }\nfunction Card() { return <div />; }";
        assert!(gate().validate_import_integrity(ok));
        let missing = "export function A() { const [a] = useState(0); return <Card />; }";
        assert_eq!(
            gate().missing_imports(missing),
            vec!["Card".to_string(), "useState".to_string()]
        );
    }

    #[test]
    fn test_transition_from_broken_input_uses_delimiters() {
        assert!(gate()
            .check_transition("<img src={x}>", "<img src={x} alt=\"\">")
            .is_ok());
        assert!(gate().check_transition("<img src={x}>", "<img src={x>").is_err());
    }

    #[test]
    fn test_transition_rejects_new_double_guard() {
        let before = "'use client';\nexport const a = 1;\n";
        let after = "'use client';\n'use client';\nexport const a = 1;\n";
        assert_eq!(
            gate().check_transition(before, after),
            Err(GateError::DoubleWrapping)
        );
    }
}
