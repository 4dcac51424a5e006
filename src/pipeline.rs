//! Pipeline orchestrator
//!
//! Drives one source through an ordered list of passes. Every pass goes
//! through a precondition check, execution (structural or textual), an
//! integrity check and a postcondition check, and ends committed, reverted,
//! rolled back, failed or skipped. A failing pass never blocks the passes
//! after it; only cancellation or the run deadline stop a run early, and
//! both are honored between passes.

use crate::conflict::{
    ChangeAnalysis, ChangeTracker, Conflict, ConflictResult, DEFAULT_COMPLEXITY_DELTA_THRESHOLD,
};
use crate::contract::{Contract, ContractEngine, ContractRegistry, ContractResult};
use crate::error::{panic_message, ContractPhase, PipelineError};
use crate::gate::{GateError, QualityGate};
use crate::passes::{PassCatalog, PassDescriptor, PassId};
use crate::resolver::{IntelligentResolver, Resolution, ResolutionStrategy};
use crate::rollback::{
    RollbackEvent, RollbackManager, Snapshot, SnapshotMeta, DEFAULT_SNAPSHOT_CAP, INITIAL_SNAPSHOT,
};
use crate::semantic::{self, SemanticAnalyzer, SemanticDelta};
use crate::syntax::{self, Dialect, SyntaxTree, DEFAULT_PARSE_TIMEOUT};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Cooperative cancellation flag, checked between passes
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run structural bodies when a pass has one
    pub prefer_structural: bool,
    pub dialect: Dialect,
    /// Budget for each parser call
    pub parse_timeout: Duration,
    /// Overall deadline, checked between passes
    pub run_timeout: Option<Duration>,
    pub snapshot_cap: usize,
    pub complexity_threshold: u32,
    pub cancel: Option<CancelToken>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            prefer_structural: true,
            dialect: Dialect::default(),
            parse_timeout: DEFAULT_PARSE_TIMEOUT,
            run_timeout: None,
            snapshot_cap: DEFAULT_SNAPSHOT_CAP,
            complexity_threshold: DEFAULT_COMPLEXITY_DELTA_THRESHOLD,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Structural,
    Textual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// Output accepted
    Committed,
    /// The pass ran and changed nothing
    Unchanged,
    /// Output failed a check; the contract's rollback produced the result
    Reverted,
    /// A critical conflict restored an earlier snapshot
    RolledBack,
    /// Output discarded, input carried forward
    Failed,
    /// Preconditions not met
    Skipped,
    /// Run cancelled or timed out first
    NotRun,
}

impl PassStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PassStatus::Committed => "committed",
            PassStatus::Unchanged => "unchanged",
            PassStatus::Reverted => "reverted",
            PassStatus::RolledBack => "rolled back",
            PassStatus::Failed => "failed",
            PassStatus::Skipped => "skipped",
            PassStatus::NotRun => "not run",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PassStatus::Committed | PassStatus::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassOutcome {
    pub pass: PassId,
    pub name: String,
    pub status: PassStatus,
    pub success: bool,
    pub mode: Option<ExecutionMode>,
    pub duration_ms: u64,
    pub change_count: usize,
    pub improvements: Vec<String>,
    pub error: Option<PipelineError>,
    /// Recovered problems (fallbacks, rejected rollbacks) worth showing
    pub notes: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub resolution: Option<Resolution>,
    pub preconditions: Option<ContractResult>,
    pub postconditions: Option<ContractResult>,
    /// Output fingerprint equals the input fingerprint
    pub no_op: bool,
}

impl PassOutcome {
    fn new(pass: &PassDescriptor) -> Self {
        Self {
            pass: pass.id,
            name: pass.name.clone(),
            status: PassStatus::Committed,
            success: false,
            mode: None,
            duration_ms: 0,
            change_count: 0,
            improvements: Vec::new(),
            error: None,
            notes: Vec::new(),
            conflicts: Vec::new(),
            resolution: None,
            preconditions: None,
            postconditions: None,
            no_op: false,
        }
    }

    fn not_run(pass: &PassDescriptor, reason: PipelineError) -> Self {
        let mut outcome = Self::new(pass);
        outcome.status = PassStatus::NotRun;
        outcome.error = Some(reason);
        outcome
    }
}

/// Everything a run produced. Nothing here is kept by the crate afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dialect: Dialect,
    pub final_code: String,
    pub changed: bool,
    /// Effective pass order
    pub schedule: Vec<PassId>,
    pub warnings: Vec<String>,
    pub outcomes: Vec<PassOutcome>,
    pub conflicts: ConflictResult,
    pub changes: ChangeAnalysis,
    pub snapshots: Vec<Snapshot>,
    pub rollbacks: Vec<RollbackEvent>,
    /// Why the run stopped early, if it did
    pub aborted: Option<PipelineError>,
}

impl PipelineReport {
    pub fn outcome(&self, pass: PassId) -> Option<&PassOutcome> {
        self.outcomes.iter().find(|o| o.pass == pass)
    }

    /// Passes whose output survived with at least one change.
    pub fn changed_passes(&self) -> Vec<PassId> {
        self.outcomes
            .iter()
            .filter(|o| {
                o.change_count > 0
                    && matches!(o.status, PassStatus::Committed | PassStatus::Reverted)
            })
            .map(|o| o.pass)
            .collect()
    }

    /// No pass failed and the run was not cut short.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.outcomes.iter().all(|o| o.status != PassStatus::Failed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Immutable pass catalog plus contracts; shareable across threads.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    catalog: PassCatalog,
    contracts: ContractRegistry,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Orchestrator {
    pub fn new(catalog: PassCatalog, contracts: ContractRegistry) -> Self {
        Self { catalog, contracts }
    }

    pub fn builtin() -> Self {
        Self::new(PassCatalog::builtin(), ContractRegistry::builtin())
    }

    pub fn catalog(&self) -> &PassCatalog {
        &self.catalog
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    /// Run `enabled` passes (dependencies added, order resolved) over
    /// `source`. Never fails; every problem lands in the report.
    pub fn run(&self, source: &str, enabled: &[PassId], options: &PipelineOptions) -> PipelineReport {
        let started = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, dialect = options.dialect.label());
        let _enter = span.enter();

        let schedule = self.catalog.resolve(enabled);
        for warning in &schedule.warnings {
            warn!(%warning, "pass schedule adjusted");
        }
        let mut warnings = schedule.warnings.clone();
        let deadline = options.run_timeout.map(|limit| started + limit);

        let mut state = RunState::new(options, source);
        let mut outcomes = Vec::with_capacity(schedule.order.len());
        let mut aborted: Option<PipelineError> = None;

        for id in &schedule.order {
            let Some(pass) = self.catalog.get(*id) else {
                continue;
            };
            if aborted.is_none() {
                if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    info!(pass = %id, "run cancelled");
                    aborted = Some(PipelineError::Cancelled);
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!(pass = %id, "run deadline reached");
                    aborted = Some(PipelineError::Timeout);
                }
            }
            if let Some(reason) = &aborted {
                outcomes.push(PassOutcome::not_run(pass, reason.clone()));
                continue;
            }
            let contract = self.contracts.contract_for(*id);
            outcomes.push(state.step(pass, contract, &mut warnings));
        }

        let report = PipelineReport {
            run_id,
            started_at,
            duration_ms: elapsed_ms(started),
            dialect: options.dialect,
            changed: state.current != source,
            schedule: schedule.order,
            warnings,
            conflicts: state.tracker.detect_conflicts(),
            changes: state.tracker.analysis(),
            snapshots: state.rollback.snapshots().cloned().collect(),
            rollbacks: state.rollback.events().to_vec(),
            final_code: state.current,
            outcomes,
            aborted,
        };
        info!(
            changed = report.changed,
            conflicts = report.conflicts.conflicts.len(),
            duration_ms = report.duration_ms,
            "run finished"
        );
        report
    }
}

/// Run the built-in catalog over one source.
pub fn run(source: &str, enabled: &[PassId], options: &PipelineOptions) -> PipelineReport {
    Orchestrator::builtin().run(source, enabled, options)
}

/// What is left when a pass output fails a check
enum Recovery {
    Reverted(String),
    Fixed(String, Resolution),
    Discarded,
}

/// Per-run mutable state; never shared between runs.
struct RunState<'o> {
    options: &'o PipelineOptions,
    gate: QualityGate,
    engine: ContractEngine,
    analyzer: SemanticAnalyzer,
    resolver: IntelligentResolver,
    tracker: ChangeTracker,
    rollback: RollbackManager,
    current: String,
}

impl<'o> RunState<'o> {
    fn new(options: &'o PipelineOptions, source: &str) -> Self {
        let gate = QualityGate::new(options.dialect, options.parse_timeout);
        let mut rollback = RollbackManager::new(options.snapshot_cap);
        rollback.capture(Snapshot::new(INITIAL_SNAPSHOT, source, SnapshotMeta::default()));
        Self {
            options,
            gate,
            engine: ContractEngine::new(gate, options.parse_timeout),
            analyzer: SemanticAnalyzer::new(options.dialect, options.parse_timeout),
            resolver: IntelligentResolver::new(gate),
            tracker: ChangeTracker::new(options.complexity_threshold),
            rollback,
            current: source.to_string(),
        }
    }

    fn step(&mut self, pass: &PassDescriptor, contract: &Contract, warnings: &mut Vec<String>) -> PassOutcome {
        let span = info_span!("pass", id = %pass.id, name = %pass.name);
        let _enter = span.enter();
        let started = Instant::now();
        let mut outcome = PassOutcome::new(pass);
        let input = self.current.clone();

        let tree = syntax::parse(&input, self.options.dialect, self.options.parse_timeout);
        let pre = self.engine.check_preconditions(contract, &input, tree.as_ref().ok());
        let fingerprint_before = pre.fingerprint.clone();
        if !pre.passed {
            debug!(rules = ?pre.failed_rule_names(), "preconditions not met; skipping");
            outcome.status = PassStatus::Skipped;
            outcome.error = Some(PipelineError::ContractViolation {
                phase: ContractPhase::Precondition,
                rules: pre.failed_rule_names(),
                messages: pre.failure_messages(),
            });
            outcome.preconditions = Some(pre);
            outcome.duration_ms = elapsed_ms(started);
            return outcome;
        }
        outcome.preconditions = Some(pre);

        let attempted = match self.execute(pass, &input, tree, &mut outcome) {
            Ok(code) => code,
            Err(error) => {
                warn!(%error, "pass execution failed; input carried forward");
                outcome.status = PassStatus::Failed;
                outcome.error = Some(error);
                return self.finish(pass, outcome, started, 0);
            }
        };

        if attempted == input {
            debug!("no changes");
            outcome.status = PassStatus::Unchanged;
            outcome.success = true;
            outcome.no_op = true;
            return self.finish(pass, outcome, started, 0);
        }

        let mut output = attempted;
        if let Err(gate_error) = self.gate.check_transition(&input, &output) {
            warn!(error = %gate_error, "integrity check failed");
            let attempt_conflicts = self.tracker.note_attempt(pass.id, &input, &output);
            outcome.conflicts.extend(attempt_conflicts.iter().cloned());
            if gate_error.is_syntax_breaking() {
                outcome
                    .conflicts
                    .push(self.tracker.report_syntax_breaking(pass.id, &gate_error));
            }
            output = match self.recover(pass, contract, &input, &output, &attempt_conflicts, &mut outcome) {
                Recovery::Reverted(code) => {
                    outcome.status = PassStatus::Reverted;
                    outcome.error = Some(integrity_failure(&gate_error));
                    code
                }
                Recovery::Fixed(code, resolution) => {
                    outcome
                        .notes
                        .push(format!("integrity failure repaired: {}", gate_error));
                    outcome.resolution = Some(resolution);
                    code
                }
                Recovery::Discarded => {
                    outcome.status = PassStatus::Failed;
                    outcome.error = Some(integrity_failure(&gate_error));
                    input.clone()
                }
            };
        }

        if output != input && outcome.status != PassStatus::Failed {
            let post = self.engine.check_postconditions(contract, &input, &output, None);
            if !post.passed {
                warn!(rules = ?post.failed_rule_names(), "postconditions violated");
                let violation = PipelineError::ContractViolation {
                    phase: ContractPhase::Postcondition,
                    rules: post.failed_rule_names(),
                    messages: post.failure_messages(),
                };
                let recovered = if outcome.status == PassStatus::Reverted {
                    None
                } else {
                    // the rollback starts from the pass input here
                    self.contract_rollback(contract, &input, &input, &output, &mut outcome)
                };
                match recovered {
                    Some(code) => {
                        outcome.status = PassStatus::Reverted;
                        output = code;
                    }
                    None => {
                        outcome.status = PassStatus::Failed;
                        output = input.clone();
                    }
                }
                if let Some(previous) = outcome.error.replace(violation) {
                    outcome.notes.push(previous.to_string());
                }
            }
            outcome.no_op = fingerprint_before.is_some() && fingerprint_before == post.fingerprint;
            outcome.postconditions = Some(post);
        }

        if output == input {
            self.current = output;
            return self.finish(pass, outcome, started, 0);
        }

        let (changes, overlaps) = self.tracker.record(pass.id, &input, &output);
        let before = self.analyzer.analyze(&input);
        let after = self.analyzer.analyze(&output);
        let deltas = semantic::diff(&before, &after);
        let mut found = overlaps;
        found.extend(self.tracker.record_semantics(pass.id, &before, &after, &deltas));
        outcome.change_count = changes.len();
        outcome.improvements = improvements(&deltas, changes.len());
        for conflict in &found {
            warn!(
                kind = conflict.conflict_type.label(),
                severity = conflict.severity.label(),
                description = %conflict.description,
                "conflict detected"
            );
        }
        outcome.conflicts.extend(found.iter().cloned());

        let strategy = (!found.is_empty()).then(|| IntelligentResolver::choose(&found));
        if let Some(strategy) = strategy.filter(|s| *s != ResolutionStrategy::PriorityBased) {
            debug!(strategy = strategy.label(), "resolving conflicts");
            let resolution =
                self.resolver
                    .resolve(&found, &output, &input, pass.blast_radius, &mut self.rollback);
            output = resolution.code.clone();
            outcome.resolution = Some(resolution);
        }

        self.current = output;
        let conflict_count = found.len();
        let mut outcome = self.finish(pass, outcome, started, conflict_count);

        if strategy == Some(ResolutionStrategy::PriorityBased) {
            let resolution =
                self.resolver
                    .resolve(&found, &self.current, &input, pass.blast_radius, &mut self.rollback);
            self.tracker.forget(pass.id);
            warnings.push(format!("pass {} rolled back: {}", pass.id, resolution.note));

            let result = ConflictResult::from_conflicts(found);
            outcome.error = Some(PipelineError::ConflictDetected {
                count: result.conflicts.len(),
                severity: result.severity.unwrap_or(crate::conflict::Severity::High),
                kinds: result.kinds(),
            });
            outcome.status = PassStatus::RolledBack;
            outcome.success = false;
            outcome.improvements.clear();
            self.current = resolution.code.clone();
            self.rollback.capture(Snapshot::new(
                format!("{}:rollback", pass.name),
                self.current.as_str(),
                SnapshotMeta {
                    pass: Some(pass.id),
                    ..SnapshotMeta::default()
                },
            ));
            outcome.resolution = Some(resolution);
        }
        outcome
    }

    /// Structural body first when allowed, textual body as fallback.
    fn execute(
        &self,
        pass: &PassDescriptor,
        input: &str,
        tree: Result<SyntaxTree, syntax::ParseError>,
        outcome: &mut PassOutcome,
    ) -> Result<String, PipelineError> {
        let mut failure: Option<PipelineError> = None;

        let structural = pass
            .body
            .structural_fn()
            .filter(|_| self.options.prefer_structural);
        if let Some(body) = structural {
            match tree {
                Ok(mut tree) => {
                    debug!("executing structurally");
                    match isolated(|| {
                        body(&mut tree)?;
                        Ok(tree.generate()?)
                    }) {
                        Ok(code) => {
                            outcome.mode = Some(ExecutionMode::Structural);
                            return Ok(code);
                        }
                        Err(error) => {
                            debug!(%error, "structural execution failed");
                            outcome
                                .notes
                                .push(format!("structural execution failed: {}", error));
                            failure = Some(error);
                        }
                    }
                }
                Err(parse_error) => {
                    debug!(error = %parse_error, "input does not parse");
                    outcome
                        .notes
                        .push(format!("structural execution unavailable: {}", parse_error));
                    failure = Some(parse_error.into());
                }
            }
        }

        if let Some(body) = pass.body.textual_fn() {
            debug!("executing textually");
            let code = isolated(|| body(input))?;
            outcome.mode = Some(ExecutionMode::Textual);
            return Ok(code);
        }

        Err(failure.unwrap_or_else(|| {
            PipelineError::execution("structural execution disabled and the pass has no textual body")
        }))
    }

    /// Contract rollback, then automatic fixes, then give up.
    fn recover(
        &mut self,
        pass: &PassDescriptor,
        contract: &Contract,
        input: &str,
        attempted: &str,
        conflicts: &[Conflict],
        outcome: &mut PassOutcome,
    ) -> Recovery {
        if let Some(code) = self.contract_rollback(contract, input, attempted, attempted, outcome) {
            return Recovery::Reverted(code);
        }
        if conflicts.is_empty()
            || IntelligentResolver::choose(conflicts) != ResolutionStrategy::AutomaticFix
        {
            return Recovery::Discarded;
        }
        let resolution =
            self.resolver
                .resolve(conflicts, attempted, input, pass.blast_radius, &mut self.rollback);
        match self.gate.check_transition(input, &resolution.code) {
            Ok(()) if !resolution.applied_fixes.is_empty() => {
                Recovery::Fixed(resolution.code.clone(), resolution)
            }
            Ok(()) => Recovery::Discarded,
            Err(err) => {
                outcome
                    .notes
                    .push(format!("automatic fixes did not repair the output: {}", err));
                Recovery::Discarded
            }
        }
    }

    /// The contract's rollback applied to `base`. The result is kept only
    /// when it differs from the rejected `transformed` output and passes the
    /// integrity check against `input`.
    fn contract_rollback(
        &self,
        contract: &Contract,
        input: &str,
        base: &str,
        transformed: &str,
        outcome: &mut PassOutcome,
    ) -> Option<String> {
        match self.engine.rollback(contract, base)? {
            Ok(reverted) if reverted == transformed => {
                outcome
                    .notes
                    .push("contract rollback left the rejected output in place".to_string());
                None
            }
            Ok(reverted) => match self.gate.check_transition(input, &reverted) {
                Ok(()) => {
                    debug!("contract rollback applied");
                    Some(reverted)
                }
                Err(err) => {
                    outcome
                        .notes
                        .push(format!("contract rollback rejected: {}", err));
                    None
                }
            },
            Err(reason) => {
                warn!(%reason, "contract rollback failed");
                outcome.notes.push(format!("contract rollback failed: {}", reason));
                None
            }
        }
    }

    /// Capture the post-pass snapshot and close the outcome.
    fn finish(
        &mut self,
        pass: &PassDescriptor,
        mut outcome: PassOutcome,
        started: Instant,
        conflict_count: usize,
    ) -> PassOutcome {
        outcome.duration_ms = elapsed_ms(started);
        outcome.success = outcome.status.is_success();
        self.rollback.capture(Snapshot::new(
            pass.name.as_str(),
            self.current.as_str(),
            SnapshotMeta {
                pass: Some(pass.id),
                change_count: outcome.change_count,
                duration_ms: outcome.duration_ms,
                contract_passed: outcome.postconditions.as_ref().map(|p| p.passed),
                conflict_count,
            },
        ));
        debug!(
            status = outcome.status.label(),
            changes = outcome.change_count,
            duration_ms = outcome.duration_ms,
            "pass finished"
        );
        outcome
    }
}

/// Run a pass body, turning errors and panics into [`PipelineError`].
fn isolated<F>(body: F) -> Result<String, PipelineError>
where
    F: FnOnce() -> anyhow::Result<String>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(code)) => Ok(code),
        Ok(Err(err)) => Err(PipelineError::execution(format!("{:#}", err))),
        Err(payload) => Err(PipelineError::execution(format!(
            "pass panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn integrity_failure(error: &GateError) -> PipelineError {
    let (line, column) = error.location();
    PipelineError::IntegrityFailure {
        reason: error.to_string(),
        line,
        column,
    }
}

fn improvements(deltas: &[SemanticDelta], change_count: usize) -> Vec<String> {
    let mut list: Vec<String> = deltas
        .iter()
        .filter(|d| {
            matches!(
                d,
                SemanticDelta::RiskResolved { .. }
                    | SemanticDelta::ImportAdded { .. }
                    | SemanticDelta::DirectiveAdded { .. }
            )
        })
        .map(SemanticDelta::describe)
        .collect();
    if list.is_empty() && change_count > 0 {
        list.push(format!("{} change(s) applied", change_count));
    }
    list
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Rule;
    use crate::passes::{PassBody, ACCESSIBILITY, HYDRATION, IMPORTS};

    fn textual(id: u8, name: &str, f: fn(&str) -> anyhow::Result<String>) -> PassDescriptor {
        PassDescriptor::new(PassId(id), name, PassBody::textual(f))
    }

    fn orchestrator(passes: Vec<PassDescriptor>, contracts: Vec<(PassId, Contract)>) -> Orchestrator {
        let mut catalog = PassCatalog::new();
        for pass in passes {
            catalog.register(pass);
        }
        let mut registry = ContractRegistry::new();
        for (id, contract) in contracts {
            registry.register(id, contract);
        }
        Orchestrator::new(catalog, registry)
    }

    fn append_line(code: &str) -> anyhow::Result<String> {
        Ok(format!("{code}const appended = 1;\n"))
    }

    #[test]
    fn test_failed_precondition_does_not_block_later_passes() {
        let orchestrator = orchestrator(
            vec![
                textual(1, "never", |c| Ok(format!("{c}const never = 1;\n"))),
                textual(2, "append", append_line),
            ],
            vec![(
                PassId(1),
                Contract::always_pass().precondition(Rule::new("impossible", "never holds", |_| Ok(false))),
            )],
        );
        let report = orchestrator.run("const a = 1;\n", &[PassId(1), PassId(2)], &PipelineOptions::default());
        assert_eq!(report.outcomes[0].status, PassStatus::Skipped);
        assert_eq!(report.outcomes[1].status, PassStatus::Committed);
        assert_eq!(report.final_code, "const a = 1;\nconst appended = 1;\n");
        // initial + the pass that ran
        assert_eq!(report.snapshots.len(), 2);
    }

    #[test]
    fn test_panicking_pass_is_contained() {
        let orchestrator = orchestrator(
            vec![
                textual(1, "panics", |_| panic!("leaf bug")),
                textual(2, "append", append_line),
            ],
            vec![],
        );
        let report = orchestrator.run("const a = 1;\n", &[PassId(1), PassId(2)], &PipelineOptions::default());
        let failed = &report.outcomes[0];
        assert_eq!(failed.status, PassStatus::Failed);
        assert!(matches!(
            &failed.error,
            Some(PipelineError::ExecutionError { message }) if message.contains("leaf bug")
        ));
        assert!(report.final_code.ends_with("const appended = 1;\n"));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_broken_output_is_discarded() {
        let orchestrator = orchestrator(vec![textual(1, "breaks", |c| Ok(format!("{c}function (")))], vec![]);
        let source = "const a = 1;\n";
        let report = orchestrator.run(source, &[PassId(1)], &PipelineOptions::default());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PassStatus::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::IntegrityFailure { .. })));
        assert_eq!(report.final_code, source);
        assert!(report
            .conflicts
            .conflicts
            .iter()
            .any(|c| c.conflict_type == crate::conflict::ConflictType::SyntaxBreaking));
    }

    #[test]
    fn test_postcondition_failure_uses_contract_rollback() {
        let orchestrator = orchestrator(
            vec![textual(1, "marker", |c| Ok(format!("{c}// marker\n")))],
            vec![(
                PassId(1),
                Contract::always_pass()
                    .postcondition(Rule::new("no-marker", "marker must not remain", |input| {
                        Ok(!input.code.contains("// marker"))
                    }))
                    .with_rollback(|code| Ok(code.replace("// marker\n", ""))),
            )],
        );
        let report = orchestrator.run("const a = 1;\n", &[PassId(1)], &PipelineOptions::default());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PassStatus::Reverted);
        assert!(matches!(
            &outcome.error,
            Some(PipelineError::ContractViolation { phase: ContractPhase::Postcondition, rules, .. })
                if rules == &vec!["no-marker".to_string()]
        ));
        assert_eq!(report.final_code, "const a = 1;\n");
    }

    #[test]
    fn test_rollback_that_reproduces_the_output_is_refused() {
        let orchestrator = orchestrator(
            vec![textual(1, "marker", |c| Ok(format!("{c}// marker\n")))],
            vec![(
                PassId(1),
                Contract::always_pass()
                    .postcondition(Rule::new("no-marker", "marker must not remain", |input| {
                        Ok(!input.code.contains("// marker"))
                    }))
                    .with_rollback(|code| Ok(format!("{code}// marker\n"))),
            )],
        );
        let report = orchestrator.run("const a = 1;\n", &[PassId(1)], &PipelineOptions::default());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, PassStatus::Failed);
        assert!(outcome.notes.iter().any(|n| n.contains("left the rejected output")));
        assert_eq!(report.final_code, "const a = 1;\n");
    }

    #[test]
    fn test_structural_failure_falls_back_to_textual() {
        let pass = PassDescriptor::new(
            PassId(1),
            "both",
            PassBody::both(append_line, |_tree| anyhow::bail!("tree walk failed")),
        );
        let report = orchestrator(vec![pass], vec![]).run("const a = 1;\n", &[PassId(1)], &PipelineOptions::default());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.mode, Some(ExecutionMode::Textual));
        assert_eq!(outcome.status, PassStatus::Committed);
        assert!(outcome.notes[0].contains("tree walk failed"));
    }

    #[test]
    fn test_cancellation_marks_remaining_passes() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = PipelineOptions {
            cancel: Some(cancel),
            ..PipelineOptions::default()
        };
        let report = run("const a = 1;\n", &[IMPORTS, ACCESSIBILITY], &options);
        assert_eq!(report.aborted, Some(PipelineError::Cancelled));
        assert!(report.outcomes.iter().all(|o| o.status == PassStatus::NotRun));
        assert_eq!(report.final_code, "const a = 1;\n");
    }

    #[test]
    fn test_deadline_stops_between_passes() {
        let options = PipelineOptions {
            run_timeout: Some(Duration::ZERO),
            ..PipelineOptions::default()
        };
        let report = run("const a = 1;\n", &[HYDRATION], &options);
        assert_eq!(report.aborted, Some(PipelineError::Timeout));
        assert_eq!(report.outcomes[0].status, PassStatus::NotRun);
    }

    #[test]
    fn test_builtin_run_fixes_component() {
        let source = r#"export function Gallery({ items }) {
  const [open, setOpen] = useState(false);
  return (
    <ul>
      {items.map((item) => (
        <li><img src={item.src} /></li>
      ))}
    </ul>
  );
}
"#;
        let all: Vec<PassId> = PassCatalog::builtin().ids();
        let report = run(source, &all, &PipelineOptions::default());
        assert!(report.is_clean(), "{:#?}", report.outcomes);
        assert!(report.final_code.starts_with("'use client';\n"));
        assert!(report.final_code.contains("import { useState } from 'react';"));
        assert!(report.final_code.contains("key={"));
        assert!(report.final_code.contains(r#"alt="""#));
        assert!(syntax::parse(&report.final_code, Dialect::Tsx, DEFAULT_PARSE_TIMEOUT).is_ok());
        assert!(report.to_json().is_ok());
    }
}
