//! Pass catalog
//!
//! A pass is one nameable rewriting step. Its body is textual
//! (`code -> code`), structural (mutates a [`SyntaxTree`]) or both; the
//! orchestrator picks which to run. Descriptors are immutable once the
//! catalog is built.

pub mod accessibility;
pub mod components;
pub mod config;
pub mod directives;
pub mod hydration;
pub mod imports;
pub mod patterns;

use crate::contract::Contract;
use crate::syntax::SyntaxTree;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Ordinal pass id; passes run in dependency order, ties broken by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassId(pub u8);

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const CONFIG: PassId = PassId(1);
pub const PATTERNS: PassId = PassId(2);
pub const IMPORTS: PassId = PassId(3);
pub const COMPONENTS: PassId = PassId(4);
pub const ACCESSIBILITY: PassId = PassId(5);
pub const HYDRATION: PassId = PassId(6);
pub const DIRECTIVES: PassId = PassId(7);

pub type TextualFn = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;
pub type StructuralFn = Arc<dyn Fn(&mut SyntaxTree) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub enum PassBody {
    Textual(TextualFn),
    Structural(StructuralFn),
    Both {
        textual: TextualFn,
        structural: StructuralFn,
    },
}

impl PassBody {
    pub fn textual<F>(f: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        PassBody::Textual(Arc::new(f))
    }

    pub fn structural<F>(f: F) -> Self
    where
        F: Fn(&mut SyntaxTree) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        PassBody::Structural(Arc::new(f))
    }

    pub fn both<T, S>(textual: T, structural: S) -> Self
    where
        T: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
        S: Fn(&mut SyntaxTree) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        PassBody::Both {
            textual: Arc::new(textual),
            structural: Arc::new(structural),
        }
    }

    pub fn textual_fn(&self) -> Option<&TextualFn> {
        match self {
            PassBody::Textual(f) | PassBody::Both { textual: f, .. } => Some(f),
            PassBody::Structural(_) => None,
        }
    }

    pub fn structural_fn(&self) -> Option<&StructuralFn> {
        match self {
            PassBody::Structural(f) | PassBody::Both { structural: f, .. } => Some(f),
            PassBody::Textual(_) => None,
        }
    }

    pub fn supports_structural(&self) -> bool {
        self.structural_fn().is_some()
    }
}

impl fmt::Debug for PassBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PassBody::Textual(_) => "Textual",
            PassBody::Structural(_) => "Structural",
            PassBody::Both { .. } => "Both",
        };
        f.write_str(label)
    }
}

/// How much of the file a pass's output can invalidate for later passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlastRadius {
    #[default]
    Narrow,
    /// Rewrites module-level structure (imports, directives); a failure
    /// here warrants a cascade rollback.
    Wide,
}

#[derive(Debug, Clone)]
pub struct PassDescriptor {
    pub id: PassId,
    pub name: String,
    pub description: String,
    pub body: PassBody,
    pub dependencies: Vec<PassId>,
    pub blast_radius: BlastRadius,
}

impl PassDescriptor {
    pub fn new(id: PassId, name: impl Into<String>, body: PassBody) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            body,
            dependencies: Vec::new(),
            blast_radius: BlastRadius::Narrow,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, deps: &[PassId]) -> Self {
        self.dependencies = deps.to_vec();
        self
    }

    pub fn blast_radius(mut self, radius: BlastRadius) -> Self {
        self.blast_radius = radius;
        self
    }

    pub fn supports_structural(&self) -> bool {
        self.body.supports_structural()
    }
}

/// The effective pass order for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub order: Vec<PassId>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PassCatalog {
    passes: BTreeMap<PassId, PassDescriptor>,
}

impl PassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The seven built-in passes.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for descriptor in [
            config::descriptor(),
            patterns::descriptor(),
            imports::descriptor(),
            components::descriptor(),
            accessibility::descriptor(),
            hydration::descriptor(),
            directives::descriptor(),
        ] {
            catalog.register(descriptor);
        }
        catalog
    }

    /// Add or replace a pass.
    pub fn register(&mut self, descriptor: PassDescriptor) {
        self.passes.insert(descriptor.id, descriptor);
    }

    pub fn get(&self, id: PassId) -> Option<&PassDescriptor> {
        self.passes.get(&id)
    }

    pub fn ids(&self) -> Vec<PassId> {
        self.passes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PassDescriptor> {
        self.passes.values()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    fn label(&self, id: PassId) -> String {
        match self.get(id) {
            Some(pass) => format!("{} ({})", id, pass.name),
            None => id.to_string(),
        }
    }

    /// Validate requested ids, pull in missing dependencies and order the
    /// result so every pass runs after the passes it depends on.
    pub fn resolve(&self, requested: &[PassId]) -> Schedule {
        let mut warnings = Vec::new();
        let mut selected: BTreeSet<PassId> = BTreeSet::new();
        let mut pending: Vec<PassId> = Vec::new();

        for id in requested {
            if self.get(*id).is_none() {
                warnings.push(format!("unknown pass {} ignored", id));
                continue;
            }
            if selected.insert(*id) {
                pending.push(*id);
            }
        }

        while let Some(id) = pending.pop() {
            let Some(pass) = self.get(id) else {
                continue;
            };
            for dep in &pass.dependencies {
                if self.get(*dep).is_none() {
                    warnings.push(format!(
                        "pass {} depends on unknown pass {}",
                        self.label(id),
                        dep
                    ));
                    continue;
                }
                if selected.insert(*dep) {
                    warnings.push(format!(
                        "pass {} requires pass {}; enabled automatically",
                        self.label(id),
                        self.label(*dep)
                    ));
                    pending.push(*dep);
                }
            }
        }

        // Kahn's algorithm; the ready set is ordered so ties run by id
        let mut remaining: BTreeMap<PassId, BTreeSet<PassId>> = selected
            .iter()
            .map(|id| {
                let deps = self
                    .get(*id)
                    .map(|p| {
                        p.dependencies
                            .iter()
                            .copied()
                            .filter(|d| selected.contains(d))
                            .collect()
                    })
                    .unwrap_or_default();
                (*id, deps)
            })
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        loop {
            let ready: Option<PassId> = remaining
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id);
            let Some(next) = ready else {
                break;
            };
            remaining.remove(&next);
            for deps in remaining.values_mut() {
                deps.remove(&next);
            }
            order.push(next);
        }

        if !remaining.is_empty() {
            let cyclic: Vec<String> = remaining.keys().map(|id| self.label(*id)).collect();
            warnings.push(format!(
                "dependency cycle between passes {}; running them by id",
                cyclic.join(", ")
            ));
            order.extend(remaining.keys().copied());
        }

        Schedule { order, warnings }
    }
}

/// Contracts for the built-in catalog, keyed by pass id.
pub fn builtin_contracts() -> Vec<(PassId, Contract)> {
    vec![
        (CONFIG, config::contract()),
        (PATTERNS, patterns::contract()),
        (IMPORTS, imports::contract()),
        (COMPONENTS, components::contract()),
        (ACCESSIBILITY, accessibility::contract()),
        (HYDRATION, hydration::contract()),
        (DIRECTIVES, directives::contract()),
    ]
}

/// Byte range covering `range` plus its own line when nothing else shares
/// that line, so removals do not leave blank lines behind.
pub(crate) fn line_extent(source: &str, range: std::ops::Range<usize>) -> std::ops::Range<usize> {
    let line_start = source[..range.start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = source[range.end..]
        .find('\n')
        .map(|i| range.end + i + 1)
        .unwrap_or(source.len());
    let before_blank = source[line_start..range.start].trim().is_empty();
    let after_blank = source[range.end..line_end].trim().is_empty();
    if before_blank && after_blank {
        line_start..line_end
    } else {
        range
    }
}

/// Stable short hash used by pass fingerprints.
pub(crate) fn hash_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.as_ref().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
