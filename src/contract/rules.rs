//! Reusable contract rules

use super::Rule;
use crate::gate::{validate_no_double_wrapping, validate_no_malformed_handlers};
use crate::semantic::analyze_tree;
use crate::syntax;

/// Precondition: there is something to transform.
pub fn non_empty() -> Rule {
    Rule::new("non-empty", "source is empty", |input| {
        Ok(!input.code.trim().is_empty())
    })
}

/// Precondition: the source must contain `needle` for the pass to apply.
pub fn mentions(name: &str, needle: &'static str) -> Rule {
    Rule::new(
        name.to_string(),
        format!("source never mentions `{}`", needle),
        move |input| Ok(input.code.contains(needle)),
    )
}

/// Postcondition: if the input parsed, so does the output.
pub fn syntax_preserved() -> Rule {
    Rule::new(
        "syntax-preserved",
        "output no longer parses",
        |input| {
            let Some(original) = input.original else {
                return Ok(true);
            };
            if input.gate.validate_syntax(original).is_err() {
                return Ok(true);
            }
            Ok(input.gate.validate_syntax(input.code).is_ok())
        },
    )
}

pub fn no_double_wrapping() -> Rule {
    Rule::new(
        "no-double-wrapping",
        "a guard or directive was applied twice",
        |input| Ok(validate_no_double_wrapping(input.code)),
    )
}

pub fn no_malformed_handlers() -> Rule {
    Rule::new(
        "no-malformed-handlers",
        "output contains a malformed event handler",
        |input| Ok(validate_no_malformed_handlers(input.code)),
    )
}

/// Postcondition: the pass may not leave new hook or component uses
/// without an import.
pub fn import_integrity_preserved() -> Rule {
    Rule::new(
        "import-integrity",
        "output uses a hook or component that is not imported",
        |input| {
            let after = input.gate.missing_imports(input.code);
            let before = input
                .original
                .map(|original| input.gate.missing_imports(original))
                .unwrap_or_default();
            Ok(after.iter().all(|name| before.contains(name)))
        },
    )
}

/// Postcondition: every export of the input is still exported.
pub fn exports_preserved() -> Rule {
    Rule::new(
        "exports-preserved",
        "an export was removed",
        |input| {
            let Some(original) = input.original else {
                return Ok(true);
            };
            let dialect = input.gate.dialect();
            let timeout = input.gate.timeout();
            let before = syntax::parse_lenient(original, dialect, timeout)?;
            let after = match input.tree {
                Some(tree) => analyze_tree(tree),
                None => analyze_tree(&syntax::parse_lenient(input.code, dialect, timeout)?),
            };
            let before = analyze_tree(&before);
            Ok(before.exports.iter().all(|name| after.exports.contains(name)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Contract, ContractEngine};
    use crate::gate::QualityGate;
    use crate::syntax::{Dialect, DEFAULT_PARSE_TIMEOUT};
    use std::time::Duration;

    fn engine() -> ContractEngine {
        ContractEngine::new(
            QualityGate::new(Dialect::Tsx, DEFAULT_PARSE_TIMEOUT),
            DEFAULT_PARSE_TIMEOUT,
        )
    }

    #[test]
    fn test_syntax_preserved() {
        let contract = Contract::always_pass().postcondition(syntax_preserved());
        assert!(engine()
            .check_postconditions(&contract, "let a = 1;", "let a = 2;", None)
            .passed);
        assert!(!engine()
            .check_postconditions(&contract, "let a = 1;", "let a = ;", None)
            .passed);
        // Already-broken input is not held to a clean parse
        assert!(engine()
            .check_postconditions(&contract, "let a = ;", "let a = ;;", None)
            .passed);
    }

    #[test]
    fn test_import_integrity_preserved() {
        let contract = Contract::always_pass().postcondition(import_integrity_preserved());
        let before = "import { useState } from 'react';\nexport function A() { useState(0); return null; }";
        let after = "export function A() { useState(0); return null; }";
        let result = engine().check_postconditions(&contract, before, after, None);
        assert_eq!(result.failed_rule_names(), vec!["import-integrity".to_string()]);
    }

    #[test]
    fn test_exports_preserved() {
        let contract = Contract::always_pass().postcondition(exports_preserved());
        assert!(engine()
            .check_postconditions(&contract, "export const a = 1;", "export const a = 2;", None)
            .passed);
        assert!(!engine()
            .check_postconditions(&contract, "export const a = 1;", "const a = 1;", None)
            .passed);
    }

    #[test]
    fn test_exports_preserved_parses_with_the_gate_settings() {
        let tight = Duration::from_micros(1);
        let engine = ContractEngine::new(QualityGate::new(Dialect::Tsx, tight), tight);
        let contract = Contract::always_pass().postcondition(exports_preserved());
        let large = "export const a = 1;\n".repeat(20_000);
        let result = engine.check_postconditions(&contract, &large, &large, None);
        assert_eq!(result.failed_rule_names(), vec!["exports-preserved".to_string()]);
    }

    #[test]
    fn test_non_empty_and_mentions() {
        let contract = Contract::always_pass()
            .precondition(non_empty())
            .precondition(mentions("uses-storage", "localStorage"));
        let result = engine().check_preconditions(&contract, "  \n", None);
        assert_eq!(
            result.failed_rule_names(),
            vec!["non-empty".to_string(), "uses-storage".to_string()]
        );
    }
}
