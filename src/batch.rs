//! Batch runs over files and directories
//!
//! Each file is an independent run with its own snapshot history and
//! change tracker, so files are processed in parallel on the rayon pool.

use crate::passes::PassId;
use crate::pipeline::{Orchestrator, PipelineOptions, PipelineReport};
use crate::syntax::Dialect;
use anyhow::Context;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Files above this size are reported, not transformed
pub const MAX_FILE_BYTES: u64 = 1_000_000;

const SKIPPED_DIRS: [&str; 5] = ["node_modules", ".git", "dist", "build", ".next"];

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub pipeline: PipelineOptions,
    pub enabled: Vec<PassId>,
    /// Write changed files back in place
    pub write: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub report: Option<PipelineReport>,
    pub error: Option<String>,
    pub written: bool,
}

impl FileReport {
    pub fn changed(&self) -> bool {
        self.report.as_ref().is_some_and(|r| r.changed)
    }
}

fn is_skipped_dir(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    SKIPPED_DIRS.contains(&name)
}

/// Expand files and directories into the source files to process.
/// Explicit file arguments are kept even when their extension is unknown.
pub fn collect_sources(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let meta = fs::metadata(path).with_context(|| format!("Cannot access {}", path.display()))?;
        if meta.is_file() {
            files.push(path.clone());
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && is_skipped_dir(e.path())))
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && Dialect::from_path(entry.path()).is_some() {
                files.push(entry.into_path());
            }
        }
    }
    files.dedup();
    Ok(files)
}

/// Run the built-in pipeline over every source under `paths`.
pub fn run_files(paths: &[PathBuf], options: &BatchOptions) -> anyhow::Result<Vec<FileReport>> {
    let files = collect_sources(paths)?;
    let orchestrator = Orchestrator::builtin();
    Ok(run_collected(&orchestrator, &files, options))
}

/// Run `orchestrator` over already collected files, in input order.
pub fn run_collected(orchestrator: &Orchestrator, files: &[PathBuf], options: &BatchOptions) -> Vec<FileReport> {
    files
        .par_iter()
        .map(|path| match run_file(orchestrator, path, options) {
            Ok(report) => report,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{:#}", err), "file skipped");
                FileReport {
                    path: path.clone(),
                    report: None,
                    error: Some(format!("{:#}", err)),
                    written: false,
                }
            }
        })
        .collect()
}

fn run_file(orchestrator: &Orchestrator, path: &Path, options: &BatchOptions) -> anyhow::Result<FileReport> {
    let size = fs::metadata(path)
        .with_context(|| format!("Cannot access {}", path.display()))?
        .len();
    if size > MAX_FILE_BYTES {
        anyhow::bail!("{} is larger than {} bytes", path.display(), MAX_FILE_BYTES);
    }
    let source = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut pipeline = options.pipeline.clone();
    if let Some(dialect) = Dialect::from_path(path) {
        pipeline.dialect = dialect;
    }
    debug!(path = %path.display(), dialect = pipeline.dialect.label(), "running pipeline");
    let report = orchestrator.run(&source, &options.enabled, &pipeline);

    let written = options.write && report.changed;
    if written {
        fs::write(path, &report.final_code).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(FileReport {
        path: path.to_path_buf(),
        report: Some(report),
        error: None,
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::ACCESSIBILITY;

    fn options(write: bool) -> BatchOptions {
        BatchOptions {
            pipeline: PipelineOptions::default(),
            enabled: vec![ACCESSIBILITY],
            write,
        }
    }

    #[test]
    fn test_collect_skips_vendor_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".next")).unwrap();
        fs::write(root.join("src/a.tsx"), "export const a = 1;\n").unwrap();
        fs::write(root.join("src/notes.md"), "# notes\n").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "module.exports = 1;\n").unwrap();
        fs::write(root.join(".next/chunk.js"), "x();\n").unwrap();

        let files = collect_sources(&[root.to_path_buf()]).unwrap();
        assert_eq!(files, vec![root.join("src/a.tsx")]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_sources(&[dir.path().join("missing")]).is_err());
    }

    #[test]
    fn test_run_files_writes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let fixed = dir.path().join("a.jsx");
        let clean = dir.path().join("b.jsx");
        fs::write(&fixed, "export const A = () => <img src=\"a.png\" />;\n").unwrap();
        fs::write(&clean, "export const B = () => <p>b</p>;\n").unwrap();

        let reports = run_files(&[dir.path().to_path_buf()], &options(true)).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].written);
        assert!(!reports[1].written);
        assert_eq!(
            fs::read_to_string(&fixed).unwrap(),
            "export const A = () => <img src=\"a.png\" alt=\"\" />;\n"
        );
    }

    #[test]
    fn test_dry_run_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jsx");
        let source = "export const A = () => <img src=\"a.png\" />;\n";
        fs::write(&file, source).unwrap();

        let reports = run_files(&[file.clone()], &options(false)).unwrap();
        assert!(reports[0].changed());
        assert!(!reports[0].written);
        assert_eq!(fs::read_to_string(&file).unwrap(), source);
    }
}
