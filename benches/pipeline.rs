use criterion::{black_box, criterion_group, criterion_main, Criterion};
use layerfix::conflict::ChangeTracker;
use layerfix::passes::{PassCatalog, PassId};
use layerfix::semantic::SemanticAnalyzer;
use layerfix::syntax::{Dialect, DEFAULT_PARSE_TIMEOUT};
use layerfix::{Orchestrator, PipelineOptions};
use std::fmt::Write;

fn synthetic_component(items: usize) -> String {
    let mut code = String::from("export function Dashboard({ rows }) {\n");
    code.push_str("  const [filter, setFilter] = useState('');\n");
    code.push_str("  useEffect(() => { localStorage.setItem('filter', filter); }, [filter]);\n");
    for i in 0..items {
        let _ = writeln!(
            code,
            "  const section{i} = rows.map((row) => <li onClick={{() => setFilter(row.name)}}><img src={{row.icon{i}}} /></li>);"
        );
        let _ = writeln!(code, "  console.log('rendered section {i}');");
    }
    code.push_str("  const saved = localStorage.getItem('filter');\n");
    code.push_str("  return <section><a href=\"/help\" target=\"_blank\">help</a>{saved}</section>;\n}\n");
    code
}

fn bench_full_pipeline(c: &mut Criterion) {
    let source = synthetic_component(60);
    let orchestrator = Orchestrator::builtin();
    let all: Vec<PassId> = PassCatalog::builtin().ids();
    let structural = PipelineOptions::default();
    let textual = PipelineOptions {
        prefer_structural: false,
        ..PipelineOptions::default()
    };

    c.bench_function("pipeline_all_passes_structural", |b| {
        b.iter(|| {
            let report = orchestrator.run(black_box(&source), &all, &structural);
            black_box(report.final_code.len());
        });
    });

    c.bench_function("pipeline_all_passes_textual", |b| {
        b.iter(|| {
            let report = orchestrator.run(black_box(&source), &all, &textual);
            black_box(report.final_code.len());
        });
    });
}

fn bench_semantic_analysis(c: &mut Criterion) {
    let source = synthetic_component(200);
    let analyzer = SemanticAnalyzer::new(Dialect::Tsx, DEFAULT_PARSE_TIMEOUT);
    c.bench_function("semantic_analyze", |b| {
        b.iter(|| black_box(analyzer.analyze(black_box(&source)).complexity));
    });
}

fn bench_change_tracking(c: &mut Criterion) {
    let before = synthetic_component(400);
    let after = before.replace("console.log", "console.debug");
    c.bench_function("change_tracker_record", |b| {
        b.iter(|| {
            let mut tracker = ChangeTracker::default();
            let (changes, _) = tracker.record(PassId(2), black_box(&before), black_box(&after));
            black_box(changes.len());
        });
    });
}

criterion_group!(
    pipeline,
    bench_full_pipeline,
    bench_semantic_analysis,
    bench_change_tracking
);
criterion_main!(pipeline);
