//! Conflict resolution policy
//!
//! Decides what to do with the conflicts a committed pass produced:
//! apply mechanical fixes, revert to safety, or keep the output and report.
//! A known-critical conflict is never shipped silently.

use crate::conflict::{AutoFix, Conflict, Severity};
use crate::gate::QualityGate;
use crate::passes::BlastRadius;
use crate::rollback::{RollbackManager, RollbackResult, RollbackStrategy};
use serde::Serialize;
use tracing::{info, warn};

/// Share of auto-fixable conflicts needed before fixes are applied alone.
pub const AUTO_FIX_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    AutomaticFix,
    PriorityBased,
    SemanticMerge,
}

impl ResolutionStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionStrategy::AutomaticFix => "automatic_fix",
            ResolutionStrategy::PriorityBased => "priority_based",
            ResolutionStrategy::SemanticMerge => "semantic_merge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub strategy: ResolutionStrategy,
    #[serde(skip)]
    pub code: String,
    pub applied_fixes: Vec<String>,
    /// Conflicts left for the caller to look at
    pub remaining: Vec<Conflict>,
    /// The pass output was replaced by earlier code
    pub reverted: bool,
    pub rollback: Option<RollbackResult>,
    pub note: String,
}

fn is_critical(conflict: &Conflict) -> bool {
    conflict.severity == Severity::High
}

/// The named target that makes `strategy` land on the snapshot before the
/// latest one. Cascade restores the predecessor of its target; the other
/// strategies restore the target itself.
fn pre_pass_target(rollback: &RollbackManager, strategy: RollbackStrategy) -> Option<String> {
    let latest = rollback.latest()?;
    match strategy {
        RollbackStrategy::Cascade => Some(latest.pass_name.clone()),
        _ => rollback
            .snapshots()
            .nth(rollback.len().checked_sub(2)?)
            .map(|s| s.pass_name.clone()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntelligentResolver {
    gate: QualityGate,
}

impl IntelligentResolver {
    pub fn new(gate: QualityGate) -> Self {
        Self { gate }
    }

    pub fn choose(conflicts: &[Conflict]) -> ResolutionStrategy {
        if conflicts.is_empty() {
            return ResolutionStrategy::SemanticMerge;
        }
        let fixable = conflicts.iter().filter(|c| c.is_auto_fixable()).count();
        let ratio = fixable as f64 / conflicts.len() as f64;
        let critical_unfixed = conflicts
            .iter()
            .any(|c| is_critical(c) && !c.is_auto_fixable());

        if ratio >= AUTO_FIX_RATIO && !critical_unfixed {
            ResolutionStrategy::AutomaticFix
        } else if conflicts.iter().any(is_critical) {
            ResolutionStrategy::PriorityBased
        } else {
            ResolutionStrategy::SemanticMerge
        }
    }

    /// Resolve the conflicts of one pass. `transformed` is the committed
    /// output and `pre_pass` its input; the latest snapshot in `rollback` is
    /// the committed output.
    ///
    /// A priority-based resolution only undoes this pass: the rollback is
    /// aimed at the snapshot just before the latest one, whatever strategy
    /// `determine_strategy` picked.
    pub fn resolve(
        &self,
        conflicts: &[Conflict],
        transformed: &str,
        pre_pass: &str,
        blast_radius: BlastRadius,
        rollback: &mut RollbackManager,
    ) -> Resolution {
        let strategy = Self::choose(conflicts);
        match strategy {
            ResolutionStrategy::AutomaticFix => self.apply_fixes(conflicts, transformed),
            ResolutionStrategy::PriorityBased => {
                let rollback_strategy = RollbackManager::determine_strategy(conflicts, blast_radius);
                let target = pre_pass_target(rollback, rollback_strategy);
                let result = rollback.execute(rollback_strategy, target.as_deref());
                let critical: Vec<&str> = conflicts
                    .iter()
                    .filter(|c| is_critical(c))
                    .map(|c| c.description.as_str())
                    .collect();
                let (code, note) = match (&result.code, result.success) {
                    (Some(code), true) => (
                        code.clone(),
                        format!(
                            "{} rollback to {} after critical conflict: {}",
                            rollback_strategy.label(),
                            result.restored_pass_name.as_deref().unwrap_or("?"),
                            critical.join("; ")
                        ),
                    ),
                    _ => (
                        pre_pass.to_string(),
                        format!(
                            "{} rollback unavailable ({}); kept the pass input after critical conflict: {}",
                            rollback_strategy.label(),
                            result.reason,
                            critical.join("; ")
                        ),
                    ),
                };
                warn!(%note, "critical conflict reverted");
                Resolution {
                    strategy,
                    code,
                    applied_fixes: Vec::new(),
                    remaining: Vec::new(),
                    reverted: true,
                    rollback: Some(result),
                    note,
                }
            }
            ResolutionStrategy::SemanticMerge => Resolution {
                strategy,
                code: transformed.to_string(),
                applied_fixes: Vec::new(),
                remaining: conflicts.to_vec(),
                reverted: false,
                rollback: None,
                note: format!("kept pass output with {} unresolved conflict(s)", conflicts.len()),
            },
        }
    }

    fn apply_fixes(&self, conflicts: &[Conflict], transformed: &str) -> Resolution {
        let mut fixes: Vec<&AutoFix> = Vec::new();
        for fix in conflicts.iter().filter_map(|c| c.auto_fix.as_ref()) {
            if !fixes.contains(&fix) {
                fixes.push(fix);
            }
        }

        let mut code = transformed.to_string();
        for fix in &fixes {
            code = fix.apply(&code);
        }
        let remaining: Vec<Conflict> = conflicts
            .iter()
            .filter(|c| !c.is_auto_fixable())
            .cloned()
            .collect();

        if code != transformed {
            if let Err(err) = self.gate.check_transition(transformed, &code) {
                warn!(error = %err, "automatic fixes rejected by the quality gate");
                return Resolution {
                    strategy: ResolutionStrategy::AutomaticFix,
                    code: transformed.to_string(),
                    applied_fixes: Vec::new(),
                    remaining: conflicts.to_vec(),
                    reverted: false,
                    rollback: None,
                    note: format!("automatic fixes rejected: {}", err),
                };
            }
        }

        let applied: Vec<String> = fixes.iter().map(|f| f.describe()).collect();
        info!(fixes = applied.len(), "automatic fixes applied");
        Resolution {
            strategy: ResolutionStrategy::AutomaticFix,
            code,
            note: format!("applied {} automatic fix(es)", applied.len()),
            applied_fixes: applied,
            remaining,
            reverted: false,
            rollback: None,
        }
    }
}
