//! layerfix library crate
//!
//! A multi-pass rewriting engine for JavaScript, TypeScript and JSX. Passes
//! run in dependency order; each one is wrapped in a contract, checked by a
//! quality gate, diffed for cross-pass conflicts and can be rolled back to
//! an earlier snapshot. The binary is a thin CLI over [`batch`].

pub mod batch;
pub mod config;
pub mod conflict;
pub mod contract;
pub mod error;
pub mod gate;
pub mod passes;
pub mod pipeline;
pub mod resolver;
pub mod rollback;
pub mod semantic;
pub mod syntax;

pub use error::PipelineError;
pub use pipeline::{run, CancelToken, Orchestrator, PassOutcome, PassStatus, PipelineOptions, PipelineReport};
