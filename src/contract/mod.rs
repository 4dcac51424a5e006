//! Transformation contracts
//!
//! A [`Contract`] wraps one pass with named precondition and postcondition
//! rules, an optional fingerprint of the semantically relevant surface of the
//! code, and an optional best-effort rollback. Contracts hold no state and
//! are shared across runs.
//!
//! Every rule is evaluated in isolation: a rule that errors or panics counts
//! as a failed rule, never as a failure of the engine.

pub mod rules;

use crate::error::panic_message;
use crate::gate::QualityGate;
use crate::passes::PassId;
use crate::syntax::{self, SyntaxTree};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub type RuleFn = Arc<dyn Fn(&RuleInput<'_>) -> anyhow::Result<bool> + Send + Sync>;
pub type FingerprintFn = Arc<dyn Fn(&SyntaxTree) -> String + Send + Sync>;
pub type RollbackFn = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// What a rule gets to look at
pub struct RuleInput<'a> {
    /// Pre-pass source; `None` for preconditions
    pub original: Option<&'a str>,
    /// Source under test (the input for preconditions, the output otherwise)
    pub code: &'a str,
    pub tree: Option<&'a SyntaxTree>,
    pub gate: &'a QualityGate,
}

#[derive(Clone)]
pub struct Rule {
    name: String,
    message: String,
    check: RuleFn,
}

impl Rule {
    pub fn new<F>(name: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RuleInput<'_>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            message: message.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

#[derive(Clone, Default)]
pub struct Contract {
    preconditions: Vec<Rule>,
    postconditions: Vec<Rule>,
    fingerprint: Option<FingerprintFn>,
    rollback: Option<RollbackFn>,
}

impl Contract {
    /// A contract with no rules; every check passes.
    pub fn always_pass() -> Self {
        Self::default()
    }

    pub fn precondition(mut self, rule: Rule) -> Self {
        self.preconditions.push(rule);
        self
    }

    pub fn postcondition(mut self, rule: Rule) -> Self {
        self.postconditions.push(rule);
        self
    }

    pub fn with_fingerprint<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyntaxTree) -> String + Send + Sync + 'static,
    {
        self.fingerprint = Some(Arc::new(f));
        self
    }

    pub fn with_rollback<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.rollback = Some(Arc::new(f));
        self
    }

    pub fn preconditions(&self) -> &[Rule] {
        &self.preconditions
    }

    pub fn postconditions(&self) -> &[Rule] {
        &self.postconditions
    }

}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("preconditions", &self.preconditions)
            .field("postconditions", &self.postconditions)
            .field("fingerprint", &self.fingerprint.is_some())
            .field("rollback", &self.rollback.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractResult {
    pub passed: bool,
    pub failed: Vec<RuleFailure>,
    pub fingerprint: Option<String>,
}

impl ContractResult {
    pub fn failed_rule_names(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.rule.clone()).collect()
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.message.clone()).collect()
    }
}

/// Evaluates contracts against source text
#[derive(Debug, Clone, Copy)]
pub struct ContractEngine {
    gate: QualityGate,
    parse_timeout: std::time::Duration,
}

impl ContractEngine {
    pub fn new(gate: QualityGate, parse_timeout: std::time::Duration) -> Self {
        Self {
            gate,
            parse_timeout,
        }
    }

    pub fn check_preconditions(
        &self,
        contract: &Contract,
        code: &str,
        tree: Option<&SyntaxTree>,
    ) -> ContractResult {
        let input = RuleInput {
            original: None,
            code,
            tree,
            gate: &self.gate,
        };
        self.evaluate(&contract.preconditions, &input, contract, code, tree)
    }

    pub fn check_postconditions(
        &self,
        contract: &Contract,
        original: &str,
        transformed: &str,
        tree: Option<&SyntaxTree>,
    ) -> ContractResult {
        let input = RuleInput {
            original: Some(original),
            code: transformed,
            tree,
            gate: &self.gate,
        };
        self.evaluate(&contract.postconditions, &input, contract, transformed, tree)
    }

    fn evaluate(
        &self,
        rules: &[Rule],
        input: &RuleInput<'_>,
        contract: &Contract,
        code: &str,
        tree: Option<&SyntaxTree>,
    ) -> ContractResult {
        let failed: Vec<RuleFailure> = rules
            .iter()
            .filter_map(|rule| evaluate_rule(rule, input).err())
            .collect();

        ContractResult {
            passed: failed.is_empty(),
            failed,
            fingerprint: self.fingerprint(contract, code, tree),
        }
    }

    /// Fingerprint of `code` when the contract declares one. Sources that do
    /// not parse have no fingerprint.
    pub fn fingerprint(
        &self,
        contract: &Contract,
        code: &str,
        tree: Option<&SyntaxTree>,
    ) -> Option<String> {
        let f = contract.fingerprint.as_ref()?;
        let run = |tree: &SyntaxTree| {
            catch_unwind(AssertUnwindSafe(|| f(tree))).ok()
        };
        match tree {
            Some(tree) => run(tree),
            None => {
                let parsed = syntax::parse(code, self.gate.dialect(), self.parse_timeout).ok()?;
                run(&parsed)
            }
        }
    }

    /// Apply the contract's rollback to a transformed source, if it has one.
    pub fn rollback(&self, contract: &Contract, transformed: &str) -> Option<Result<String, String>> {
        let f = contract.rollback.as_ref()?;
        let outcome = match catch_unwind(AssertUnwindSafe(|| f(transformed))) {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(err)) => Err(format!("{:#}", err)),
            Err(payload) => Err(format!("rollback panicked: {}", panic_message(payload.as_ref()))),
        };
        Some(outcome)
    }
}

fn evaluate_rule(rule: &Rule, input: &RuleInput<'_>) -> Result<(), RuleFailure> {
    let failure = |message: String| RuleFailure {
        rule: rule.name.clone(),
        message,
    };
    match catch_unwind(AssertUnwindSafe(|| (rule.check)(input))) {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(failure(rule.message.clone())),
        Ok(Err(err)) => Err(failure(format!("{} (rule errored: {:#})", rule.message, err))),
        Err(payload) => Err(failure(format!(
            "{} (rule panicked: {})",
            rule.message,
            panic_message(payload.as_ref())
        ))),
    }
}

/// Static lookup from pass id to its contract
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: HashMap<PassId, Contract>,
    fallback: Contract,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contracts for the built-in pass catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (id, contract) in crate::passes::builtin_contracts() {
            registry.register(id, contract);
        }
        registry
    }

    pub fn register(&mut self, id: PassId, contract: Contract) {
        self.contracts.insert(id, contract);
    }

    /// The registered contract, or an always-pass one.
    pub fn contract_for(&self, id: PassId) -> &Contract {
        self.contracts.get(&id).unwrap_or(&self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{Dialect, DEFAULT_PARSE_TIMEOUT};

    fn engine() -> ContractEngine {
        ContractEngine::new(
            QualityGate::new(Dialect::Tsx, DEFAULT_PARSE_TIMEOUT),
            DEFAULT_PARSE_TIMEOUT,
        )
    }

    #[test]
    fn test_failing_rule_does_not_abort_others() {
        let contract = Contract::always_pass()
            .precondition(Rule::new("errors", "always errors", |_| {
                anyhow::bail!("no luck")
            }))
            .precondition(Rule::new("panics", "always panics", |_| panic!("boom")))
            .precondition(Rule::new("fine", "never fails", |_| Ok(true)))
            .precondition(Rule::new("false", "returns false", |_| Ok(false)));

        let result = engine().check_preconditions(&contract, "let a = 1;", None);
        assert!(!result.passed);
        assert_eq!(
            result.failed_rule_names(),
            vec!["errors".to_string(), "panics".to_string(), "false".to_string()]
        );
        assert!(result.failed[0].message.contains("no luck"));
        assert!(result.failed[1].message.contains("boom"));
    }

    #[test]
    fn test_fingerprint_computed_once_per_check() {
        let contract = Contract::always_pass().with_fingerprint(|tree| tree.root().kind().to_string());
        let result = engine().check_preconditions(&contract, "let a = 1;", None);
        assert!(result.passed);
        assert_eq!(result.fingerprint.as_deref(), Some("program"));

        let unparsable = engine().check_preconditions(&contract, "let = ;", None);
        assert_eq!(unparsable.fingerprint, None);
    }

    #[test]
    fn test_postconditions_see_original() {
        let contract = Contract::always_pass().postcondition(Rule::new(
            "grew",
            "output must be longer",
            |input| Ok(input.code.len() > input.original.map(str::len).unwrap_or(0)),
        ));
        assert!(engine().check_postconditions(&contract, "a", "ab", None).passed);
        assert!(!engine().check_postconditions(&contract, "ab", "a", None).passed);
    }

    #[test]
    fn test_rollback_isolated() {
        let contract = Contract::always_pass().with_rollback(|_| panic!("nope"));
        let outcome = engine().rollback(&contract, "x").unwrap();
        assert!(outcome.unwrap_err().contains("nope"));
        assert!(engine().rollback(&Contract::always_pass(), "x").is_none());
    }

    #[test]
    fn test_registry_falls_back_to_always_pass() {
        let registry = ContractRegistry::new();
        let contract = registry.contract_for(PassId(42));
        assert!(contract.preconditions().is_empty());
        assert!(contract.postconditions().is_empty());
        assert!(engine().rollback(contract, "x").is_none());
    }
}
