//! Parse / traverse / generate layer over tree-sitter
//!
//! Structural passes never touch raw text directly: they walk a
//! [`SyntaxTree`] and queue byte-range edits, which [`SyntaxTree::generate`]
//! applies back to the owned source.

pub mod jsx;
mod parser;

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tree_sitter::{Node, Tree};

/// Default budget for a single parse call.
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Grammar used to parse a source unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    JavaScript,
    TypeScript,
    /// TypeScript with markup; the default since it accepts both TS and JSX.
    #[default]
    Tsx,
}

impl Dialect {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Some(Dialect::JavaScript),
            "ts" | "mts" | "cts" => Some(Dialect::TypeScript),
            "tsx" => Some(Dialect::Tsx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dialect::JavaScript => "javascript",
            Dialect::TypeScript => "typescript",
            Dialect::Tsx => "tsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("parser timed out after {millis}ms")]
    Timeout { millis: u64 },
    #[error("grammar could not be loaded")]
    Language,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("overlapping edits at bytes {first:?} and {second:?}")]
    OverlappingEdits {
        first: Range<usize>,
        second: Range<usize>,
    },
    #[error("edit range {0:?} is outside the source")]
    OutOfBounds(Range<usize>),
}

/// A queued byte-range replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub text: String,
}

/// Edits collected while visiting a tree
#[derive(Debug, Default)]
pub struct EditBuffer {
    edits: Vec<Edit>,
}

impl EditBuffer {
    pub fn replace(&mut self, node: Node<'_>, text: impl Into<String>) {
        self.replace_range(node.byte_range(), text);
    }

    pub fn replace_range(&mut self, range: Range<usize>, text: impl Into<String>) {
        self.edits.push(Edit {
            range,
            text: text.into(),
        });
    }

    pub fn insert_before(&mut self, node: Node<'_>, text: impl Into<String>) {
        let at = node.start_byte();
        self.replace_range(at..at, text);
    }

    pub fn insert_after(&mut self, node: Node<'_>, text: impl Into<String>) {
        let at = node.end_byte();
        self.replace_range(at..at, text);
    }

    pub fn remove(&mut self, range: Range<usize>) {
        self.replace_range(range, String::new());
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }
}

/// A parsed source unit that owns its text and pending edits
pub struct SyntaxTree {
    source: String,
    tree: Tree,
    dialect: Dialect,
    edits: Vec<Edit>,
}

impl std::fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("dialect", &self.dialect)
            .field("len", &self.source.len())
            .field("pending_edits", &self.edits.len())
            .finish()
    }
}

/// Strict parse: any ERROR or MISSING node is reported as a syntax error.
pub fn parse(source: &str, dialect: Dialect, timeout: Duration) -> Result<SyntaxTree, ParseError> {
    let tree = parser::parse_pooled(source, dialect, timeout)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(first_error(root, source));
    }
    Ok(SyntaxTree {
        source: source.to_string(),
        tree,
        dialect,
        edits: Vec::new(),
    })
}

/// Lenient parse: error-recovered trees are accepted. Only a timeout or a
/// missing grammar fails.
pub fn parse_lenient(
    source: &str,
    dialect: Dialect,
    timeout: Duration,
) -> Result<SyntaxTree, ParseError> {
    let tree = parser::parse_pooled(source, dialect, timeout)?;
    Ok(SyntaxTree {
        source: source.to_string(),
        tree,
        dialect,
        edits: Vec::new(),
    })
}

fn first_error(root: Node<'_>, source: &str) -> ParseError {
    let mut node = root;
    'descend: loop {
        if node.is_error() || node.is_missing() {
            break;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.is_error() || child.is_missing() || child.has_error() {
                node = child;
                continue 'descend;
            }
        }
        break;
    }

    let pos = node.start_position();
    let message = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        let snippet: String = source[node.byte_range()].chars().take(40).collect();
        if snippet.trim().is_empty() {
            "unexpected token".to_string()
        } else {
            format!("unexpected `{}`", snippet.trim())
        }
    };

    ParseError::Syntax {
        message,
        line: pos.row + 1,
        column: pos.column + 1,
    }
}

impl SyntaxTree {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: Node<'_>) -> &str {
        node_text(node, &self.source)
    }

    pub fn has_pending_edits(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Read-only pre-order walk over every node.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(Node<'_>, &str),
    {
        let mut cursor = self.tree.walk();
        loop {
            visit(cursor.node(), &self.source);

            if cursor.goto_first_child() {
                continue;
            }

            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    return;
                }
            }
        }
    }

    /// Pre-order walk that lets the visitor queue edits.
    ///
    /// Edits are applied only by [`SyntaxTree::generate`], so the tree seen
    /// by the visitor stays consistent for the whole walk.
    pub fn traverse<F>(&mut self, mut visit: F)
    where
        F: FnMut(Node<'_>, &str, &mut EditBuffer),
    {
        let mut buffer = EditBuffer::default();
        {
            let source = self.source.as_str();
            let mut cursor = self.tree.walk();
            'walk: loop {
                visit(cursor.node(), source, &mut buffer);

                if cursor.goto_first_child() {
                    continue;
                }

                while !cursor.goto_next_sibling() {
                    if !cursor.goto_parent() {
                        break 'walk;
                    }
                }
            }
        }
        self.edits.extend(buffer.edits);
    }

    /// Apply queued edits and return the regenerated source.
    pub fn generate(&self) -> Result<String, GenerateError> {
        apply_edits(&self.source, &self.edits)
    }
}

/// Source text covered by `node`.
pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Walk up from `node` and return the first ancestor matching `pred`.
pub fn find_ancestor<'t, F>(node: Node<'t>, mut pred: F) -> Option<Node<'t>>
where
    F: FnMut(Node<'t>) -> bool,
{
    let mut current = node.parent();
    while let Some(parent) = current {
        if pred(parent) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

fn apply_edits(source: &str, edits: &[Edit]) -> Result<String, GenerateError> {
    if edits.is_empty() {
        return Ok(source.to_string());
    }

    let mut ordered: Vec<&Edit> = edits.iter().collect();
    // Stable: insertions at one offset keep their queue order
    ordered.sort_by_key(|e| (e.range.start, e.range.end));

    let mut out = String::with_capacity(source.len() + 64);
    let mut cursor = 0usize;
    let mut previous: Option<&Range<usize>> = None;

    for edit in ordered {
        if edit.range.end > source.len() || edit.range.start > edit.range.end {
            return Err(GenerateError::OutOfBounds(edit.range.clone()));
        }
        if edit.range.start < cursor {
            return Err(GenerateError::OverlappingEdits {
                first: previous.cloned().unwrap_or(0..cursor),
                second: edit.range.clone(),
            });
        }
        let between = source
            .get(cursor..edit.range.start)
            .ok_or_else(|| GenerateError::OutOfBounds(edit.range.clone()))?;
        out.push_str(between);
        out.push_str(&edit.text);
        cursor = edit.range.end;
        previous = Some(&edit.range);
    }

    out.push_str(source.get(cursor..).unwrap_or(""));
    Ok(out)
}
