//! Snapshot history and rollback strategies
//!
//! One [`RollbackManager`] per run. It keeps a bounded, ordered list of
//! whole-source snapshots (oldest evicted first) plus a pinned copy of the
//! initial source, so a complete rollback works no matter how many passes
//! ran.

use crate::conflict::{Conflict, Severity};
use crate::passes::{hash_parts, BlastRadius, PassId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const DEFAULT_SNAPSHOT_CAP: usize = 10;
pub const INITIAL_SNAPSHOT: &str = "initial";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotMeta {
    pub pass: Option<PassId>,
    pub change_count: usize,
    pub duration_ms: u64,
    /// `None` when no contract was evaluated (initial snapshot, skipped pass)
    pub contract_passed: Option<bool>,
    pub conflict_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub pass_name: String,
    #[serde(skip)]
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: String,
    pub meta: SnapshotMeta,
}

impl Snapshot {
    pub fn new(pass_name: impl Into<String>, code: impl Into<String>, meta: SnapshotMeta) -> Self {
        let code = code.into();
        Self {
            pass_name: pass_name.into(),
            fingerprint: hash_parts([code.as_str()]),
            code,
            timestamp: Utc::now(),
            meta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    SingleLayer,
    Cascade,
    Selective,
    Complete,
}

impl RollbackStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            RollbackStrategy::SingleLayer => "single_layer",
            RollbackStrategy::Cascade => "cascade",
            RollbackStrategy::Selective => "selective",
            RollbackStrategy::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub success: bool,
    pub strategy: RollbackStrategy,
    pub restored_pass_name: Option<String>,
    #[serde(skip)]
    pub code: Option<String>,
    pub reason: String,
}

/// One executed rollback, kept for the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackEvent {
    pub strategy: RollbackStrategy,
    pub target: Option<String>,
    pub success: bool,
    pub restored_pass_name: Option<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RollbackManager {
    snapshots: VecDeque<Snapshot>,
    initial: Option<Snapshot>,
    cap: usize,
    events: Vec<RollbackEvent>,
}

impl Default for RollbackManager {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAP)
    }
}

impl RollbackManager {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            snapshots: VecDeque::with_capacity(cap),
            initial: None,
            cap,
            events: Vec::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Append a snapshot, evicting the oldest beyond the cap. The first
    /// snapshot ever captured is also pinned as the initial one.
    pub fn capture(&mut self, snapshot: Snapshot) {
        if self.initial.is_none() {
            self.initial = Some(snapshot.clone());
        }
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.cap {
            if let Some(evicted) = self.snapshots.pop_front() {
                debug!(pass = %evicted.pass_name, "snapshot evicted");
            }
        }
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn initial(&self) -> Option<&Snapshot> {
        self.initial.as_ref()
    }

    pub fn events(&self) -> &[RollbackEvent] {
        &self.events
    }

    /// Pick a strategy for a failure of a pass with the given blast radius.
    pub fn determine_strategy(conflicts: &[Conflict], blast_radius: BlastRadius) -> RollbackStrategy {
        let any_high = conflicts.iter().any(|c| c.severity == Severity::High);
        if any_high || blast_radius == BlastRadius::Wide {
            RollbackStrategy::Cascade
        } else if conflicts.len() > 1 {
            RollbackStrategy::Selective
        } else {
            RollbackStrategy::SingleLayer
        }
    }

    /// Restore an earlier snapshot. The history itself is not modified; a
    /// failed lookup is reported in the result, never silently ignored.
    pub fn execute(&mut self, strategy: RollbackStrategy, target: Option<&str>) -> RollbackResult {
        let outcome = match strategy {
            RollbackStrategy::SingleLayer => self.single_layer(target),
            RollbackStrategy::Cascade => self.cascade(target),
            RollbackStrategy::Selective => self.selective(target),
            RollbackStrategy::Complete => self
                .initial
                .as_ref()
                .ok_or_else(|| "no initial snapshot".to_string()),
        };

        let result = match outcome {
            Ok(snapshot) => RollbackResult {
                success: true,
                strategy,
                restored_pass_name: Some(snapshot.pass_name.clone()),
                code: Some(snapshot.code.clone()),
                reason: format!("restored snapshot after {}", snapshot.pass_name),
            },
            Err(reason) => {
                warn!(strategy = strategy.label(), %reason, "rollback failed");
                RollbackResult {
                    success: false,
                    strategy,
                    restored_pass_name: None,
                    code: None,
                    reason,
                }
            }
        };

        self.events.push(RollbackEvent {
            strategy,
            target: target.map(str::to_string),
            success: result.success,
            restored_pass_name: result.restored_pass_name.clone(),
            reason: result.reason.clone(),
            at: Utc::now(),
        });
        result
    }

    fn position(&self, name: &str) -> Result<usize, String> {
        self.snapshots
            .iter()
            .rposition(|s| s.pass_name == name)
            .ok_or_else(|| format!("no snapshot named '{}'", name))
    }

    fn tip_name(&self) -> String {
        self.latest()
            .map(|s| s.pass_name.clone())
            .unwrap_or_else(|| "nothing".to_string())
    }

    fn single_layer(&self, target: Option<&str>) -> Result<&Snapshot, String> {
        let index = match target {
            Some(name) => self.position(name)?,
            None => self
                .snapshots
                .len()
                .checked_sub(2)
                .ok_or_else(|| format!("no snapshot before {}", self.tip_name()))?,
        };
        self.snapshots
            .get(index)
            .ok_or_else(|| "snapshot index out of range".to_string())
    }

    /// Two snapshots back from the tip, clamped to the oldest retained one,
    /// or the predecessor of a named target.
    fn cascade(&self, target: Option<&str>) -> Result<&Snapshot, String> {
        let index = match target {
            Some(name) => {
                let at = self.position(name)?;
                at.checked_sub(1)
                    .ok_or_else(|| format!("no snapshot before '{}'", name))?
            }
            None => {
                if self.snapshots.len() < 2 {
                    return Err(format!("no snapshot before {}", self.tip_name()));
                }
                self.snapshots.len().saturating_sub(3)
            }
        };
        self.snapshots
            .get(index)
            .ok_or_else(|| "snapshot index out of range".to_string())
    }

    /// The latest snapshot before the tip that was captured conflict-free.
    fn selective(&self, target: Option<&str>) -> Result<&Snapshot, String> {
        if target.is_some() {
            return self.single_layer(target);
        }
        let below_tip = self.snapshots.len().saturating_sub(1);
        self.snapshots
            .iter()
            .take(below_tip)
            .rev()
            .find(|s| s.meta.conflict_count == 0)
            .ok_or_else(|| format!("no conflict-free snapshot before {}", self.tip_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictType, LineRange};

    fn manager_with(names: &[&str]) -> RollbackManager {
        let mut manager = RollbackManager::default();
        for name in names {
            manager.capture(Snapshot::new(*name, format!("code after {name}"), SnapshotMeta::default()));
        }
        manager
    }

    fn conflict(severity: Severity) -> Conflict {
        Conflict {
            conflict_type: ConflictType::OverlappingEdit,
            passes: vec![PassId(1), PassId(2)],
            location: Some(LineRange::new(1, 1)),
            column: None,
            severity,
            description: String::new(),
            suggestion: None,
            auto_fix: None,
        }
    }

    #[test]
    fn test_history_is_bounded_and_keeps_latest() {
        let names: Vec<String> = (0..15).map(|i| format!("p{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let manager = manager_with(&refs);
        assert_eq!(manager.len(), DEFAULT_SNAPSHOT_CAP);
        let kept: Vec<&str> = manager.snapshots().map(|s| s.pass_name.as_str()).collect();
        assert_eq!(kept, refs[5..].to_vec());
        assert_eq!(manager.initial().map(|s| s.pass_name.as_str()), Some("p0"));
    }

    #[test]
    fn test_determine_strategy() {
        assert_eq!(
            RollbackManager::determine_strategy(&[conflict(Severity::High)], BlastRadius::Narrow),
            RollbackStrategy::Cascade
        );
        assert_eq!(
            RollbackManager::determine_strategy(&[], BlastRadius::Wide),
            RollbackStrategy::Cascade
        );
        assert_eq!(
            RollbackManager::determine_strategy(
                &[conflict(Severity::Low), conflict(Severity::Medium)],
                BlastRadius::Narrow
            ),
            RollbackStrategy::Selective
        );
        assert_eq!(
            RollbackManager::determine_strategy(&[conflict(Severity::Medium)], BlastRadius::Narrow),
            RollbackStrategy::SingleLayer
        );
    }

    #[test]
    fn test_single_layer_and_cascade() {
        let mut manager = manager_with(&[INITIAL_SNAPSHOT, "config", "imports", "hydration"]);
        let single = manager.execute(RollbackStrategy::SingleLayer, None);
        assert!(single.success);
        assert_eq!(single.restored_pass_name.as_deref(), Some("imports"));

        let cascade = manager.execute(RollbackStrategy::Cascade, None);
        assert_eq!(cascade.restored_pass_name.as_deref(), Some("config"));
        assert_eq!(cascade.code.as_deref(), Some("code after config"));

        let named = manager.execute(RollbackStrategy::Cascade, Some("imports"));
        assert_eq!(named.restored_pass_name.as_deref(), Some("config"));

        let complete = manager.execute(RollbackStrategy::Complete, None);
        assert_eq!(complete.restored_pass_name.as_deref(), Some(INITIAL_SNAPSHOT));
        assert_eq!(manager.events().len(), 4);
        assert_eq!(manager.len(), 4);
    }

    #[test]
    fn test_cascade_clamps_to_oldest() {
        let mut manager = manager_with(&[INITIAL_SNAPSHOT, "imports"]);
        let result = manager.execute(RollbackStrategy::Cascade, None);
        assert_eq!(result.restored_pass_name.as_deref(), Some(INITIAL_SNAPSHOT));
    }

    #[test]
    fn test_missing_snapshot_is_reported() {
        let mut manager = manager_with(&[INITIAL_SNAPSHOT]);
        let result = manager.execute(RollbackStrategy::SingleLayer, None);
        assert!(!result.success);
        assert!(result.code.is_none());
        assert!(result.reason.contains("no snapshot before"));

        let named = manager.execute(RollbackStrategy::SingleLayer, Some("missing"));
        assert!(!named.success);
        assert!(manager.events().iter().all(|e| !e.success));
    }

    #[test]
    fn test_selective_skips_conflicted_snapshots() {
        let mut manager = RollbackManager::default();
        manager.capture(Snapshot::new(INITIAL_SNAPSHOT, "a", SnapshotMeta::default()));
        manager.capture(Snapshot::new(
            "imports",
            "b",
            SnapshotMeta {
                conflict_count: 1,
                ..SnapshotMeta::default()
            },
        ));
        manager.capture(Snapshot::new("hydration", "c", SnapshotMeta::default()));
        let result = manager.execute(RollbackStrategy::Selective, None);
        assert_eq!(result.code.as_deref(), Some("a"));
    }
}
