use layerfix::conflict::{ConflictType, Severity};
use layerfix::contract::ContractRegistry;
use layerfix::gate::directive_prologue;
use layerfix::passes::{PassBody, PassCatalog, PassDescriptor, PassId, ACCESSIBILITY};
use layerfix::resolver::ResolutionStrategy;
use layerfix::rollback::{RollbackManager, RollbackStrategy};
use layerfix::{run, Orchestrator, PassStatus, PipelineOptions};

fn custom(passes: Vec<PassDescriptor>) -> Orchestrator {
    let mut catalog = PassCatalog::new();
    for pass in passes {
        catalog.register(pass);
    }
    Orchestrator::new(catalog, ContractRegistry::new())
}

#[test]
fn unclosed_img_gets_empty_alt_without_conflicts() {
    let report = run("<img src={x}>", &[ACCESSIBILITY], &PipelineOptions::default());

    assert_eq!(report.final_code, r#"<img src={x} alt="">"#);
    assert!(!report.conflicts.has_conflicts);
    assert!(report.conflicts.conflicts.is_empty());
    let outcome = report.outcome(ACCESSIBILITY).unwrap();
    assert_eq!(outcome.status, PassStatus::Committed);
    assert_eq!(outcome.change_count, 1);
}

#[test]
fn duplicate_client_directive_is_low_severity_and_kept_once() {
    fn add_directive(code: &str) -> anyhow::Result<String> {
        Ok(format!("'use client';\n{code}"))
    }
    let orchestrator = custom(vec![
        PassDescriptor::new(PassId(1), "client-a", PassBody::textual(add_directive)),
        PassDescriptor::new(PassId(2), "client-b", PassBody::textual(add_directive)),
    ]);
    let source = "export function A() { return <button onClick={go}>go</button>; }\n";
    let report = orchestrator.run(source, &[PassId(1), PassId(2)], &PipelineOptions::default());

    assert_eq!(directive_prologue(&report.final_code), vec!["use client".to_string()]);
    assert_eq!(report.final_code.matches("'use client';").count(), 1);

    let conflicts = &report.conflicts.conflicts;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::SemanticConflict);
    assert_eq!(conflicts[0].severity, Severity::Low);
    assert_eq!(conflicts[0].passes, vec![PassId(1), PassId(2)]);
    assert_eq!(report.conflicts.severity, Some(Severity::Low));

    let second = report.outcome(PassId(2)).unwrap();
    assert_ne!(second.status, PassStatus::Failed);
    assert_eq!(
        second.resolution.as_ref().map(|r| r.strategy),
        Some(ResolutionStrategy::AutomaticFix)
    );
}

#[test]
fn removing_a_referenced_import_is_high_and_cascades() {
    fn annotate(code: &str) -> anyhow::Result<String> {
        Ok(format!("{code}// reviewed\n"))
    }
    fn drop_import(code: &str) -> anyhow::Result<String> {
        Ok(code.replace("import { helper } from './helper';\n", ""))
    }
    let orchestrator = custom(vec![
        PassDescriptor::new(PassId(1), "annotate", PassBody::textual(annotate)),
        PassDescriptor::new(PassId(2), "drop-import", PassBody::textual(drop_import)),
    ]);
    let source = "import { helper } from './helper';\nexport const value = helper();\n";
    let report = orchestrator.run(source, &[PassId(1), PassId(2)], &PipelineOptions::default());

    let outcome = report.outcome(PassId(2)).unwrap();
    let high: Vec<_> = outcome
        .conflicts
        .iter()
        .filter(|c| c.severity == Severity::High)
        .collect();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].conflict_type, ConflictType::ImportConflict);
    assert_eq!(report.conflicts.severity, Some(Severity::High));

    assert_eq!(
        RollbackManager::determine_strategy(&outcome.conflicts, Default::default()),
        RollbackStrategy::Cascade
    );
    assert_eq!(outcome.status, PassStatus::RolledBack);
    let resolution = outcome.resolution.as_ref().unwrap();
    assert_eq!(resolution.strategy, ResolutionStrategy::PriorityBased);
    assert_eq!(
        resolution.rollback.as_ref().map(|r| r.strategy),
        Some(RollbackStrategy::Cascade)
    );
    assert_eq!(report.rollbacks.len(), 1);
    assert!(report.rollbacks[0].success);

    // only the import removal is undone; the earlier pass keeps its work
    assert_eq!(report.final_code, format!("{source}// reviewed\n"));
    assert_eq!(report.outcome(PassId(1)).unwrap().status, PassStatus::Committed);
    assert_eq!(
        resolution.rollback.as_ref().and_then(|r| r.restored_pass_name.as_deref()),
        Some("annotate")
    );
    assert!(report.warnings.iter().any(|w| w.contains("pass 2 rolled back")));
}
