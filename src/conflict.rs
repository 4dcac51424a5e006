//! Change tracking and cross-pass conflict detection
//!
//! Every committed pass is line-diffed against its input. The resulting
//! [`CodeChange`]s are kept in a shared coordinate frame: after each pass,
//! ranges recorded for earlier passes are mapped through that pass's hunks,
//! so a later edit can be compared against the current position of an
//! earlier one.
//!
//! Overlaps are reported unless both sides added byte-identical content.
//! That exemption is a heuristic: two passes that produce identical text for
//! different reasons are not told apart.

use crate::gate::{dedupe_directives, directive_prologue, pattern, GateError};
use crate::passes::PassId;
use crate::semantic::{SemanticContext, SemanticDelta};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

/// LCS tables larger than this fall back to one whole-region change.
const MAX_DIFF_CELLS: usize = 4_000_000;

pub const DEFAULT_COMPLEXITY_DELTA_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Addition,
    Modification,
    Deletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    Import,
    HookCall,
    Function,
    Markup,
    TypeDeclaration,
    Unclassified,
}

/// 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &LineRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "line {}", self.start)
        } else {
            write!(f, "lines {}-{}", self.start, self.end)
        }
    }
}

/// One detected edit. Additions and modifications are located in the pass
/// output; deletions in the pass input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeChange {
    pub change_type: ChangeType,
    pub lines: LineRange,
    pub content: String,
    pub pass: PassId,
    pub class: ChangeClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    OverlappingEdit,
    SemanticConflict,
    ImportConflict,
    SyntaxBreaking,
}

impl ConflictType {
    pub fn label(&self) -> &'static str {
        match self {
            ConflictType::OverlappingEdit => "overlapping-edit",
            ConflictType::SemanticConflict => "semantic-conflict",
            ConflictType::ImportConflict => "import-conflict",
            ConflictType::SyntaxBreaking => "syntax-breaking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// A mechanical fix the resolver may apply on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoFix {
    DeduplicateDirective { directive: String },
}

impl AutoFix {
    pub fn apply(&self, code: &str) -> String {
        match self {
            AutoFix::DeduplicateDirective { .. } => dedupe_directives(code),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AutoFix::DeduplicateDirective { directive } => {
                format!("deduplicate '{}' directive", directive)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub passes: Vec<PassId>,
    pub location: Option<LineRange>,
    pub column: Option<usize>,
    pub severity: Severity,
    pub description: String,
    pub suggestion: Option<String>,
    pub auto_fix: Option<AutoFix>,
}

impl Conflict {
    pub fn is_auto_fixable(&self) -> bool {
        self.auto_fix.is_some()
    }

    pub fn involves(&self, pass: PassId) -> bool {
        self.passes.contains(&pass)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictResult {
    pub has_conflicts: bool,
    pub conflicts: Vec<Conflict>,
    /// Maximum over all conflicts; `None` when there are none
    pub severity: Option<Severity>,
}

impl ConflictResult {
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        let severity = conflicts.iter().map(|c| c.severity).max();
        Self {
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            severity,
        }
    }

    pub fn kinds(&self) -> Vec<ConflictType> {
        let mut kinds: Vec<ConflictType> = Vec::new();
        for conflict in &self.conflicts {
            if !kinds.contains(&conflict.conflict_type) {
                kinds.push(conflict.conflict_type);
            }
        }
        kinds
    }
}

/// Aggregate view of every change recorded in a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeAnalysis {
    pub total_changes: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_class: BTreeMap<String, usize>,
    pub by_pass: BTreeMap<PassId, usize>,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// A single line in a line diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A contiguous changed region; starts are 1-based. For a pure insertion
/// `old_start` is the input line the new lines were inserted before, and for
/// a pure deletion `new_start` is the output line that followed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
}

/// Line diff of `before` against `after`.
///
/// The common prefix and suffix are trimmed before an LCS over the middle;
/// a middle too large for the table budget is reported as one replaced
/// block.
pub fn line_diff(before: &str, after: &str) -> Vec<DiffLine> {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut out: Vec<DiffLine> = Vec::with_capacity(old.len().max(new.len()));
    out.extend(old[..prefix].iter().map(|l| DiffLine::Context(l.to_string())));

    let cells = (old_mid.len() + 1).saturating_mul(new_mid.len() + 1);
    if cells > MAX_DIFF_CELLS {
        out.extend(old_mid.iter().map(|l| DiffLine::Remove(l.to_string())));
        out.extend(new_mid.iter().map(|l| DiffLine::Add(l.to_string())));
    } else {
        lcs_diff(old_mid, new_mid, &mut out);
    }

    out.extend(
        old[old.len() - suffix..]
            .iter()
            .map(|l| DiffLine::Context(l.to_string())),
    );
    out
}

fn lcs_diff(old: &[&str], new: &[&str], out: &mut Vec<DiffLine>) {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(DiffLine::Context(old[i].to_string()));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            out.push(DiffLine::Remove(old[i].to_string()));
            i += 1;
        } else {
            out.push(DiffLine::Add(new[j].to_string()));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| DiffLine::Remove(l.to_string())));
    out.extend(new[j..].iter().map(|l| DiffLine::Add(l.to_string())));
}

/// Group a line diff into hunks, each with its removed and added text.
fn hunks(diff: &[DiffLine]) -> Vec<(DiffHunk, Vec<&str>, Vec<&str>)> {
    let mut result = Vec::new();
    let (mut old_line, mut new_line) = (0usize, 0usize);
    let mut current: Option<(DiffHunk, Vec<&str>, Vec<&str>)> = None;

    for line in diff {
        match line {
            DiffLine::Context(_) => {
                if let Some(done) = current.take() {
                    result.push(done);
                }
                old_line += 1;
                new_line += 1;
            }
            DiffLine::Remove(text) | DiffLine::Add(text) => {
                let entry = current.get_or_insert_with(|| {
                    (
                        DiffHunk {
                            old_start: old_line + 1,
                            old_count: 0,
                            new_start: new_line + 1,
                            new_count: 0,
                        },
                        Vec::new(),
                        Vec::new(),
                    )
                });
                if matches!(line, DiffLine::Remove(_)) {
                    entry.0.old_count += 1;
                    entry.1.push(text.as_str());
                    old_line += 1;
                } else {
                    entry.0.new_count += 1;
                    entry.2.push(text.as_str());
                    new_line += 1;
                }
            }
        }
    }
    if let Some(done) = current {
        result.push(done);
    }
    result
}

/// Position of an input line after a pass; `prefer_end` picks the line
/// before a deleted region instead of the one after it.
fn map_line(hunks: &[DiffHunk], line: usize, prefer_end: bool) -> usize {
    let mut shift: isize = 0;
    for hunk in hunks {
        if line < hunk.old_start {
            break;
        }
        if line < hunk.old_start + hunk.old_count {
            if hunk.new_count == 0 {
                return if prefer_end {
                    hunk.new_start.saturating_sub(1)
                } else {
                    hunk.new_start
                };
            }
            return hunk.new_start + (line - hunk.old_start).min(hunk.new_count - 1);
        }
        shift += hunk.new_count as isize - hunk.old_count as isize;
    }
    (line as isize + shift).max(0) as usize
}

fn map_range(hunks: &[DiffHunk], range: LineRange) -> Option<LineRange> {
    let start = map_line(hunks, range.start, false);
    let end = map_line(hunks, range.end, true);
    (start <= end && end > 0).then_some(LineRange::new(start, end))
}

/// Classify changed text by its first non-blank line.
pub fn classify(content: &str) -> ChangeClass {
    static IMPORT: OnceLock<Regex> = OnceLock::new();
    static TYPE_DECL: OnceLock<Regex> = OnceLock::new();
    static HOOK: OnceLock<Regex> = OnceLock::new();
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    static FUNCTION: OnceLock<Regex> = OnceLock::new();

    let Some(line) = content.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return ChangeClass::Unclassified;
    };
    if pattern(&IMPORT, r#"^import\b|\brequire\(\s*['"]"#).is_match(line) {
        ChangeClass::Import
    } else if pattern(&TYPE_DECL, r"^(?:export\s+)?(?:declare\s+)?(?:interface|type|enum)\s+\w").is_match(line) {
        ChangeClass::TypeDeclaration
    } else if pattern(&HOOK, r"\buse[A-Z]\w*\s*\(").is_match(line) {
        ChangeClass::HookCall
    } else if pattern(&MARKUP, r"^<|</\w|/>").is_match(line) {
        ChangeClass::Markup
    } else if pattern(&FUNCTION, r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\b|=>").is_match(line) {
        ChangeClass::Function
    } else {
        ChangeClass::Unclassified
    }
}

/// A recorded change and where it sits in the latest output
#[derive(Debug, Clone)]
struct Tracked {
    change: CodeChange,
    current: Option<LineRange>,
}

/// Records per-pass changes and accumulates conflicts for one run
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    tracked: Vec<Tracked>,
    conflicts: Vec<Conflict>,
    directive_owners: BTreeMap<String, BTreeSet<PassId>>,
    reported_directives: BTreeSet<String>,
    complexity_threshold: u32,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLEXITY_DELTA_THRESHOLD)
    }
}

impl ChangeTracker {
    pub fn new(complexity_threshold: u32) -> Self {
        Self {
            tracked: Vec::new(),
            conflicts: Vec::new(),
            directive_owners: BTreeMap::new(),
            reported_directives: BTreeSet::new(),
            complexity_threshold,
        }
    }

    /// Diff one pass, check the new changes against earlier passes and
    /// return them. Returns the conflicts found as the second element.
    pub fn record(&mut self, pass: PassId, before: &str, after: &str) -> (Vec<CodeChange>, Vec<Conflict>) {
        if before == after {
            return (Vec::new(), Vec::new());
        }
        let diff = line_diff(before, after);
        let hunks = hunks(&diff);
        let mut changes = Vec::with_capacity(hunks.len());
        let mut found = Vec::new();

        for (hunk, removed, added) in &hunks {
            let change = if hunk.old_count == 0 {
                CodeChange {
                    change_type: ChangeType::Addition,
                    lines: LineRange::new(hunk.new_start, hunk.new_start + hunk.new_count - 1),
                    content: added.join("\n"),
                    pass,
                    class: classify(&added.join("\n")),
                }
            } else if hunk.new_count == 0 {
                CodeChange {
                    change_type: ChangeType::Deletion,
                    lines: LineRange::new(hunk.old_start, hunk.old_start + hunk.old_count - 1),
                    content: removed.join("\n"),
                    pass,
                    class: classify(&removed.join("\n")),
                }
            } else {
                let class = match classify(&added.join("\n")) {
                    ChangeClass::Unclassified => classify(&removed.join("\n")),
                    class => class,
                };
                CodeChange {
                    change_type: ChangeType::Modification,
                    lines: LineRange::new(hunk.new_start, hunk.new_start + hunk.new_count - 1),
                    content: added.join("\n"),
                    pass,
                    class,
                }
            };

            for earlier in &self.tracked {
                if earlier.change.pass == pass {
                    continue;
                }
                let Some(current) = earlier.current else {
                    continue;
                };
                if !touches(hunk, current) {
                    continue;
                }
                if is_benign(&earlier.change, &change) {
                    continue;
                }
                found.push(overlap_conflict(&earlier.change, &change));
            }
            changes.push(change);
        }

        let spans: Vec<DiffHunk> = hunks.iter().map(|(h, _, _)| *h).collect();
        for entry in &mut self.tracked {
            entry.current = entry.current.and_then(|range| map_range(&spans, range));
        }
        for change in &changes {
            let current = match change.change_type {
                ChangeType::Deletion => None,
                _ => Some(change.lines),
            };
            self.tracked.push(Tracked {
                change: change.clone(),
                current,
            });
        }

        self.conflicts.extend(found.iter().cloned());
        (changes, found)
    }

    /// Remember directives an attempted output introduced, even when the
    /// output itself is discarded. Returns any conflict this completes.
    pub fn note_attempt(&mut self, pass: PassId, before: &str, attempted: &str) -> Vec<Conflict> {
        let introduced = introduced_directives(&directive_prologue(before), &directive_prologue(attempted));
        self.claim_directives(pass, introduced)
    }

    /// Semantic conflicts between a pass's input and output contexts.
    pub fn record_semantics(
        &mut self,
        pass: PassId,
        before: &SemanticContext,
        after: &SemanticContext,
        deltas: &[SemanticDelta],
    ) -> Vec<Conflict> {
        let introduced = introduced_directives(&before.directives, &after.directives);
        let mut found = self.claim_directives(pass, introduced);
        let mut semantic = Vec::new();

        for delta in deltas {
            match delta {
                SemanticDelta::ComplexityChanged { delta, .. }
                    if *delta > i64::from(self.complexity_threshold) =>
                {
                    semantic.push(Conflict {
                        conflict_type: ConflictType::SemanticConflict,
                        passes: vec![pass],
                        location: None,
                        column: None,
                        severity: Severity::Medium,
                        description: format!(
                            "pass {} raised complexity by {} (threshold {})",
                            pass, delta, self.complexity_threshold
                        ),
                        suggestion: Some("review the pass output for unintended structure".to_string()),
                        auto_fix: None,
                    });
                }
                SemanticDelta::ImportRemoved { name, source }
                    if after.references_name(name) || after.external_uses.contains(name) =>
                {
                    semantic.push(Conflict {
                        conflict_type: ConflictType::ImportConflict,
                        passes: vec![pass],
                        location: None,
                        column: None,
                        severity: Severity::High,
                        description: format!(
                            "pass {} removed import `{}` from '{}' but it is still referenced",
                            pass, name, source
                        ),
                        suggestion: Some(format!("restore the import of `{}`", name)),
                        auto_fix: None,
                    });
                }
                _ => {}
            }
        }

        self.conflicts.extend(semantic.iter().cloned());
        found.extend(semantic);
        found
    }

    /// The quality gate found the pass output structurally broken.
    pub fn report_syntax_breaking(&mut self, pass: PassId, error: &GateError) -> Conflict {
        let (line, column) = error.location();
        let conflict = Conflict {
            conflict_type: ConflictType::SyntaxBreaking,
            passes: vec![pass],
            location: line.map(|l| LineRange::new(l, l)),
            column,
            severity: Severity::High,
            description: format!("pass {} produced invalid output: {}", pass, error),
            suggestion: Some("the output was rolled back or discarded".to_string()),
            auto_fix: None,
        };
        self.conflicts.push(conflict.clone());
        conflict
    }

    fn claim_directives(&mut self, pass: PassId, introduced: Vec<String>) -> Vec<Conflict> {
        let mut found = Vec::new();
        for directive in introduced {
            let owners = self.directive_owners.entry(directive.clone()).or_default();
            owners.insert(pass);
            if owners.len() < 2 || self.reported_directives.contains(&directive) {
                continue;
            }
            self.reported_directives.insert(directive.clone());
            let passes: Vec<PassId> = owners.iter().copied().collect();
            let conflict = Conflict {
                conflict_type: ConflictType::SemanticConflict,
                passes: passes.clone(),
                location: Some(LineRange::new(1, 1)),
                column: None,
                severity: Severity::Low,
                description: format!(
                    "directive '{}' introduced by passes {}",
                    directive,
                    passes.iter().map(PassId::to_string).collect::<Vec<_>>().join(", ")
                ),
                suggestion: Some("keep a single copy of the directive".to_string()),
                auto_fix: Some(AutoFix::DeduplicateDirective { directive }),
            };
            self.conflicts.push(conflict.clone());
            found.push(conflict);
        }
        found
    }

    /// All conflicts found so far.
    pub fn detect_conflicts(&self) -> ConflictResult {
        ConflictResult::from_conflicts(self.conflicts.clone())
    }

    /// Drop what a pass recorded, used when its output is rolled back.
    pub fn forget(&mut self, pass: PassId) {
        self.tracked.retain(|t| t.change.pass != pass);
    }

    pub fn analysis(&self) -> ChangeAnalysis {
        let mut analysis = ChangeAnalysis::default();
        for Tracked { change, .. } in &self.tracked {
            analysis.total_changes += 1;
            let type_key = serde_json::to_value(change.change_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let class_key = serde_json::to_value(change.class)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            *analysis.by_type.entry(type_key).or_default() += 1;
            *analysis.by_class.entry(class_key).or_default() += 1;
            *analysis.by_pass.entry(change.pass).or_default() += 1;
            let lines = change.lines.end + 1 - change.lines.start;
            match change.change_type {
                ChangeType::Addition => analysis.lines_added += lines,
                ChangeType::Deletion => analysis.lines_removed += lines,
                ChangeType::Modification => analysis.lines_added += lines,
            }
        }
        analysis
    }
}

/// Whether a hunk of the current pass touches a range (both in the frame
/// of the pass input). A pure insertion only counts when it splits the
/// range.
fn touches(hunk: &DiffHunk, range: LineRange) -> bool {
    if hunk.old_count == 0 {
        range.start < hunk.old_start && hunk.old_start <= range.end
    } else {
        LineRange::new(hunk.old_start, hunk.old_start + hunk.old_count - 1).overlaps(&range)
    }
}

fn is_benign(a: &CodeChange, b: &CodeChange) -> bool {
    a.change_type == ChangeType::Addition
        && b.change_type == ChangeType::Addition
        && a.content == b.content
}

fn overlap_conflict(earlier: &CodeChange, later: &CodeChange) -> Conflict {
    let involves_import = earlier.class == ChangeClass::Import || later.class == ChangeClass::Import;
    let conflict_type = if involves_import {
        ConflictType::ImportConflict
    } else {
        ConflictType::OverlappingEdit
    };
    Conflict {
        conflict_type,
        passes: vec![earlier.pass, later.pass],
        location: Some(later.lines),
        column: None,
        severity: Severity::Medium,
        description: format!(
            "pass {} rewrote {} that pass {} had just changed",
            later.pass, later.lines, earlier.pass
        ),
        suggestion: Some("check that both edits survived".to_string()),
        auto_fix: None,
    }
}

fn introduced_directives(before: &[String], after: &[String]) -> Vec<String> {
    let mut introduced = Vec::new();
    for directive in after {
        let was = before.iter().filter(|d| *d == directive).count();
        let is = after.iter().filter(|d| *d == directive).count();
        if is > was && !introduced.contains(directive) {
            introduced.push(directive.clone());
        }
    }
    introduced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{diff, SemanticAnalyzer};
    use crate::syntax::{Dialect, DEFAULT_PARSE_TIMEOUT};

    fn analyzer() -> SemanticAnalyzer {
        SemanticAnalyzer::new(Dialect::Tsx, DEFAULT_PARSE_TIMEOUT)
    }

    #[test]
    fn test_line_diff_trims_common_edges() {
        let diff = line_diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(
            diff,
            vec![
                DiffLine::Context("a".into()),
                DiffLine::Remove("b".into()),
                DiffLine::Add("B".into()),
                DiffLine::Context("c".into()),
            ]
        );
    }

    #[test]
    fn test_record_classifies_changes() {
        let mut tracker = ChangeTracker::default();
        let before = "const a = 1;\nfunction f() {}\n<div />\n";
        let after = "import x from 'x';\nconst a = 1;\n<div />\n";
        let (changes, conflicts) = tracker.record(PassId(1), before, after);
        assert!(conflicts.is_empty());
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change_type, ChangeType::Addition);
        assert_eq!(changes[0].class, ChangeClass::Import);
        assert_eq!(changes[0].lines, LineRange::new(1, 1));
        assert_eq!(changes[1].change_type, ChangeType::Deletion);
        assert_eq!(changes[1].class, ChangeClass::Function);
        assert_eq!(changes[1].lines, LineRange::new(2, 2));
    }

    #[test]
    fn test_overlap_between_passes() {
        let mut tracker = ChangeTracker::default();
        tracker.record(PassId(1), "a\nb\nc\n", "a\nB\nc\n");
        // an insertion above shifts pass 1's edit down by one line
        let (_, none) = tracker.record(PassId(2), "a\nB\nc\n", "z\na\nB\nc\n");
        assert!(none.is_empty());
        let (_, found) = tracker.record(PassId(3), "z\na\nB\nc\n", "z\na\nBB\nc\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].conflict_type, ConflictType::OverlappingEdit);
        assert_eq!(found[0].passes, vec![PassId(1), PassId(3)]);
        assert_eq!(found[0].severity, Severity::Medium);
    }

    #[test]
    fn test_identical_additions_are_benign() {
        let a = CodeChange {
            change_type: ChangeType::Addition,
            lines: LineRange::new(1, 1),
            content: "'use client';".into(),
            pass: PassId(1),
            class: ChangeClass::Unclassified,
        };
        let b = CodeChange {
            pass: PassId(2),
            ..a.clone()
        };
        assert!(is_benign(&a, &b));
        let c = CodeChange {
            content: "'use server';".into(),
            ..b
        };
        assert!(!is_benign(&a, &c));
    }

    #[test]
    fn test_duplicate_directive_is_low_and_fixable() {
        let mut tracker = ChangeTracker::default();
        let plain = "export const a = 1;\n";
        let once = "'use client';\nexport const a = 1;\n";
        let twice = "'use client';\n'use client';\nexport const a = 1;\n";

        let before = analyzer().analyze(plain);
        let after = analyzer().analyze(once);
        let deltas = diff(&before, &after);
        assert!(tracker.record_semantics(PassId(6), &before, &after, &deltas).is_empty());

        let found = tracker.note_attempt(PassId(7), once, twice);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Low);
        assert_eq!(found[0].passes, vec![PassId(6), PassId(7)]);
        let fix = found[0].auto_fix.clone().unwrap();
        assert_eq!(fix.apply(twice), once);

        let result = tracker.detect_conflicts();
        assert_eq!(result.severity, Some(Severity::Low));
    }

    #[test]
    fn test_removed_import_still_referenced_is_high() {
        let mut tracker = ChangeTracker::default();
        let before_code = "import { format } from './fmt';\nexport const a = format(1);\n";
        let after_code = "export const a = format(1);\n";
        let before = analyzer().analyze(before_code);
        let after = analyzer().analyze(after_code);
        let deltas = diff(&before, &after);
        let found = tracker.record_semantics(PassId(3), &before, &after, &deltas);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].conflict_type, ConflictType::ImportConflict);
        assert_eq!(found[0].severity, Severity::High);
        assert_eq!(tracker.detect_conflicts().severity, Some(Severity::High));
    }

    #[test]
    fn test_complexity_threshold() {
        let mut tracker = ChangeTracker::new(2);
        let before = analyzer().analyze("export const a = 1;\n");
        let after = analyzer().analyze(
            "export const a = (x) => { if (x) { for (;;) {} } while (x) {} return x ? 1 : 2; };\n",
        );
        let deltas = diff(&before, &after);
        let found = tracker.record_semantics(PassId(2), &before, &after, &deltas);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
    }

    #[test]
    fn test_map_line_through_hunks() {
        // insert two lines before line 3, delete old line 5
        let hunks = [
            DiffHunk { old_start: 3, old_count: 0, new_start: 3, new_count: 2 },
            DiffHunk { old_start: 5, old_count: 1, new_start: 7, new_count: 0 },
        ];
        assert_eq!(map_line(&hunks, 2, false), 2);
        assert_eq!(map_line(&hunks, 3, false), 5);
        assert_eq!(map_line(&hunks, 6, false), 7);
        assert_eq!(map_range(&hunks, LineRange::new(5, 5)), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("import a from 'a';"), ChangeClass::Import);
        assert_eq!(classify("  const [a, setA] = useState(0);"), ChangeClass::HookCall);
        assert_eq!(classify("export interface Props {"), ChangeClass::TypeDeclaration);
        assert_eq!(classify("<li key={i}>"), ChangeClass::Markup);
        assert_eq!(classify("const f = () => 1;"), ChangeClass::Function);
        assert_eq!(classify("let a = 1;"), ChangeClass::Unclassified);
    }
}
