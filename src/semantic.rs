//! Semantic fingerprint of a source unit
//!
//! One pre-order walk over the tree produces a [`SemanticContext`]: what kind
//! of unit this is, whether it holds state or runs effects, its import and
//! export surface, a weighted complexity score and a set of risk factors.
//! Contexts computed before and after a pass are compared with [`diff`] to
//! feed conflict detection.

use crate::gate::directive_prologue;
use crate::syntax::{self, find_ancestor, jsx, node_text, Dialect, SyntaxTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tree_sitter::Node;

/// Every unit starts at this score before construct weights are added.
pub const BASE_COMPLEXITY: u32 = 1;

const BROWSER_GLOBALS: &[&str] = &[
    "window",
    "document",
    "localStorage",
    "sessionStorage",
    "navigator",
];

const STATE_HOOKS: &[&str] = &["useState", "useReducer"];
const EFFECT_HOOKS: &[&str] = &["useEffect", "useLayoutEffect", "useInsertionEffect"];
const LIFECYCLE_METHODS: &[&str] = &[
    "componentDidMount",
    "componentDidUpdate",
    "componentWillUnmount",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    FunctionComponent,
    ClassComponent,
    Hook,
    #[default]
    Utility,
}

impl UnitKind {
    pub fn label(&self) -> &'static str {
        match self {
            UnitKind::FunctionComponent => "function component",
            UnitKind::ClassComponent => "class component",
            UnitKind::Hook => "hook",
            UnitKind::Utility => "utility",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskFactor {
    UnguardedGlobalAccess,
    InlineObjectInHotPath,
    AsyncWithoutErrorHandling,
    MissingListKey,
    /// The unit only parsed with error recovery.
    Unparseable,
}

impl RiskFactor {
    pub fn label(&self) -> &'static str {
        match self {
            RiskFactor::UnguardedGlobalAccess => "unguarded-global-access",
            RiskFactor::InlineObjectInHotPath => "inline-object-in-hot-path",
            RiskFactor::AsyncWithoutErrorHandling => "async-without-error-handling",
            RiskFactor::MissingListKey => "missing-list-key",
            RiskFactor::Unparseable => "unparseable",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticContext {
    pub unit_kind: UnitKind,
    pub has_state: bool,
    pub has_effects: bool,
    pub has_event_handlers: bool,
    /// Local binding name → module specifier
    pub imports: BTreeMap<String, String>,
    pub exports: Vec<String>,
    /// Relative module specifiers this unit imports from
    pub dependencies: Vec<String>,
    pub complexity: u32,
    pub risk_factors: BTreeSet<RiskFactor>,
    /// Names bound by declarations, parameters or imports
    pub declarations: BTreeSet<String>,
    /// Identifiers read anywhere outside import statements
    pub references: BTreeSet<String>,
    /// Hook calls and capitalized markup components; these must resolve to
    /// an import or a local declaration
    pub external_uses: BTreeSet<String>,
    pub directives: Vec<String>,
}

impl SemanticContext {
    /// Hooks and components used but never imported or declared.
    pub fn unresolved_uses(&self) -> Vec<String> {
        self.external_uses
            .iter()
            .filter(|name| !self.imports.contains_key(*name) && !self.declarations.contains(*name))
            .cloned()
            .collect()
    }

    pub fn references_name(&self, name: &str) -> bool {
        self.references.contains(name)
    }
}

/// One observable difference between two contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SemanticDelta {
    UnitKindChanged { from: UnitKind, to: UnitKind },
    StateIntroduced,
    StateRemoved,
    EffectsIntroduced,
    EffectsRemoved,
    HandlersIntroduced,
    HandlersRemoved,
    ComplexityChanged { from: u32, to: u32, delta: i64 },
    ImportAdded { name: String, source: String },
    ImportRemoved { name: String, source: String },
    ExportAdded { name: String },
    ExportRemoved { name: String },
    RiskIntroduced { factor: RiskFactor },
    RiskResolved { factor: RiskFactor },
    DirectiveAdded { directive: String },
    DirectiveRemoved { directive: String },
}

impl SemanticDelta {
    pub fn describe(&self) -> String {
        match self {
            SemanticDelta::UnitKindChanged { from, to } => {
                format!("unit changed from {} to {}", from.label(), to.label())
            }
            SemanticDelta::StateIntroduced => "state introduced".to_string(),
            SemanticDelta::StateRemoved => "state removed".to_string(),
            SemanticDelta::EffectsIntroduced => "effects introduced".to_string(),
            SemanticDelta::EffectsRemoved => "effects removed".to_string(),
            SemanticDelta::HandlersIntroduced => "event handlers introduced".to_string(),
            SemanticDelta::HandlersRemoved => "event handlers removed".to_string(),
            SemanticDelta::ComplexityChanged { delta, .. } if *delta >= 0 => {
                format!("complexity increased by {}", delta)
            }
            SemanticDelta::ComplexityChanged { delta, .. } => {
                format!("complexity decreased by {}", -delta)
            }
            SemanticDelta::ImportAdded { name, source } => {
                format!("import `{}` from '{}' added", name, source)
            }
            SemanticDelta::ImportRemoved { name, source } => {
                format!("import `{}` from '{}' removed", name, source)
            }
            SemanticDelta::ExportAdded { name } => format!("export `{}` added", name),
            SemanticDelta::ExportRemoved { name } => format!("export `{}` removed", name),
            SemanticDelta::RiskIntroduced { factor } => format!("risk introduced: {}", factor.label()),
            SemanticDelta::RiskResolved { factor } => format!("risk resolved: {}", factor.label()),
            SemanticDelta::DirectiveAdded { directive } => format!("directive '{}' added", directive),
            SemanticDelta::DirectiveRemoved { directive } => {
                format!("directive '{}' removed", directive)
            }
        }
    }
}

/// Builds [`SemanticContext`]s for one dialect
#[derive(Debug, Clone, Copy)]
pub struct SemanticAnalyzer {
    dialect: Dialect,
    timeout: Duration,
}

impl SemanticAnalyzer {
    pub fn new(dialect: Dialect, timeout: Duration) -> Self {
        Self { dialect, timeout }
    }

    /// Analyze source text. A parser timeout yields a context flagged
    /// [`RiskFactor::Unparseable`] rather than an error.
    pub fn analyze(&self, code: &str) -> SemanticContext {
        match syntax::parse_lenient(code, self.dialect, self.timeout) {
            Ok(tree) => analyze_tree(&tree),
            Err(_) => {
                let mut context = SemanticContext {
                    complexity: BASE_COMPLEXITY,
                    directives: directive_prologue(code),
                    ..SemanticContext::default()
                };
                context.risk_factors.insert(RiskFactor::Unparseable);
                context
            }
        }
    }
}

#[derive(Default)]
struct Accumulator {
    context: SemanticContext,
    has_class_component: bool,
    has_function_component: bool,
    has_hook: bool,
}

/// Analyze an already-parsed tree.
pub fn analyze_tree(tree: &SyntaxTree) -> SemanticContext {
    let mut acc = Accumulator::default();
    acc.context.complexity = BASE_COMPLEXITY;

    tree.walk(|node, source| visit(node, source, &mut acc));

    let mut context = acc.context;
    context.unit_kind = if acc.has_class_component {
        UnitKind::ClassComponent
    } else if acc.has_function_component {
        UnitKind::FunctionComponent
    } else if acc.has_hook {
        UnitKind::Hook
    } else {
        UnitKind::Utility
    };
    if tree.root().has_error() {
        context.risk_factors.insert(RiskFactor::Unparseable);
    }
    context.directives = directive_prologue(tree.source());
    context
}

fn visit(node: Node<'_>, source: &str, acc: &mut Accumulator) {
    acc.context.complexity += construct_weight(node, source);

    match node.kind() {
        "import_statement" => collect_import(node, source, &mut acc.context),
        "export_statement" => collect_exports(node, source, &mut acc.context),
        "class_declaration" | "class" => {
            if let Some(name) = node.child_by_field_name("name") {
                acc.context
                    .declarations
                    .insert(node_text(name, source).to_string());
            }
            if extends_component(node, source) {
                acc.has_class_component = true;
            }
        }
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = node.child_by_field_name("name") {
                let name = node_text(name, source);
                acc.context.declarations.insert(name.to_string());
                if is_hook_name(name) {
                    acc.has_hook = true;
                }
            }
        }
        "variable_declarator" => {
            if let Some(name) = node.child_by_field_name("name") {
                collect_pattern_names(name, source, &mut acc.context.declarations);
                let is_function_value = node
                    .child_by_field_name("value")
                    .map(|v| is_function_like(v))
                    .unwrap_or(false);
                if is_function_value && is_hook_name(node_text(name, source)) {
                    acc.has_hook = true;
                }
            }
        }
        "formal_parameters" | "catch_clause" => {
            let target = if node.kind() == "catch_clause" {
                node.child_by_field_name("parameter")
            } else {
                Some(node)
            };
            if let Some(target) = target {
                collect_pattern_names(target, source, &mut acc.context.declarations);
            }
        }
        "arrow_function" => {
            // `x => ...` has a bare identifier parameter
            if let Some(param) = node.child_by_field_name("parameter") {
                collect_pattern_names(param, source, &mut acc.context.declarations);
            }
        }
        "method_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                if LIFECYCLE_METHODS.contains(&node_text(name, source)) {
                    acc.context.has_effects = true;
                }
            }
        }
        "call_expression" => visit_call(node, source, acc),
        "member_expression" => visit_member(node, source, &mut acc.context),
        "jsx_element" | "jsx_self_closing_element" => visit_markup(node, source, acc),
        "jsx_attribute" => visit_attribute(node, source, &mut acc.context),
        "await_expression" => {
            if !await_is_handled(node, source) {
                acc.context
                    .risk_factors
                    .insert(RiskFactor::AsyncWithoutErrorHandling);
            }
        }
        "identifier" | "shorthand_property_identifier" => {
            if is_reference(node) {
                acc.context
                    .references
                    .insert(node_text(node, source).to_string());
            }
        }
        _ => {}
    }
}

/// Fixed weight per construct kind.
fn construct_weight(node: Node<'_>, source: &str) -> u32 {
    match node.kind() {
        "if_statement" | "ternary_expression" | "switch_case" | "catch_clause" => 1,
        "for_statement" | "for_in_statement" | "while_statement" | "do_statement" => 2,
        "arrow_function" | "function_expression" | "function" => 1,
        "jsx_element" | "jsx_self_closing_element" => 1,
        "binary_expression" => {
            let op = node
                .child_by_field_name("operator")
                .map(|op| node_text(op, source))
                .unwrap_or("");
            u32::from(matches!(op, "&&" | "||" | "??"))
        }
        _ => 0,
    }
}

fn is_hook_name(name: &str) -> bool {
    name.len() > 3
        && name.starts_with("use")
        && name[3..].chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn is_component_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn is_function_like(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "function_declaration"
    )
}

fn extends_component(class: Node<'_>, source: &str) -> bool {
    let mut cursor = class.walk();
    let found = class.children(&mut cursor).any(|child| {
        if child.kind() != "class_heritage" {
            return false;
        }
        let text = node_text(child, source);
        text.contains("Component") || text.contains("PureComponent")
    });
    found
}

/// The callee name of a call: `useState` for both `useState()` and
/// `React.useState()`.
pub(crate) fn callee_name<'s>(call: Node<'_>, source: &'s str) -> Option<&'s str> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "member_expression" => function
            .child_by_field_name("property")
            .map(|p| node_text(p, source)),
        _ => None,
    }
}

fn visit_call(node: Node<'_>, source: &str, acc: &mut Accumulator) {
    if let Some(name) = callee_name(node, source) {
        if STATE_HOOKS.contains(&name) {
            acc.context.has_state = true;
        }
        if EFFECT_HOOKS.contains(&name) {
            acc.context.has_effects = true;
        }
        let bare = node
            .child_by_field_name("function")
            .is_some_and(|f| f.kind() == "identifier");
        if bare && is_hook_name(name) {
            acc.context.external_uses.insert(name.to_string());
        }
    }

    if let Some((_, markup)) = jsx::list_item_markup(node, source) {
        let has_key = jsx::opening_tag(markup)
            .map(|tag| jsx::has_attribute(tag, source, "key"))
            .unwrap_or(true);
        if !has_key {
            acc.context.risk_factors.insert(RiskFactor::MissingListKey);
        }
    }
}

fn visit_member(node: Node<'_>, source: &str, context: &mut SemanticContext) {
    let Some(object) = node.child_by_field_name("object") else {
        return;
    };
    let object_text = node_text(object, source);

    if object.kind() == "this" {
        let property = node
            .child_by_field_name("property")
            .map(|p| node_text(p, source))
            .unwrap_or("");
        if property == "state" || property == "setState" {
            context.has_state = true;
        }
        return;
    }

    if object.kind() == "identifier"
        && BROWSER_GLOBALS.contains(&object_text)
        && !is_guarded_global_access(node, source)
    {
        context.risk_factors.insert(RiskFactor::UnguardedGlobalAccess);
    }
}

/// A browser global is considered safe inside a `typeof window` guard, an
/// effect callback, or a lifecycle method.
pub(crate) fn is_guarded_global_access(node: Node<'_>, source: &str) -> bool {
    find_ancestor(node, |ancestor| match ancestor.kind() {
        "if_statement" | "ternary_expression" => ancestor
            .child_by_field_name("condition")
            .map(|c| is_environment_check(node_text(c, source)))
            .unwrap_or(false),
        "binary_expression" => {
            let left = ancestor
                .child_by_field_name("left")
                .map(|l| node_text(l, source))
                .unwrap_or("");
            is_environment_check(left)
        }
        "call_expression" => callee_name(ancestor, source)
            .map(|name| EFFECT_HOOKS.contains(&name))
            .unwrap_or(false),
        "method_definition" => ancestor
            .child_by_field_name("name")
            .map(|n| LIFECYCLE_METHODS.contains(&node_text(n, source)))
            .unwrap_or(false),
        "unary_expression" => node_text(ancestor, source).starts_with("typeof"),
        _ => false,
    })
    .is_some()
}

fn is_environment_check(text: &str) -> bool {
    text.contains("typeof window") || text.contains("typeof document")
}

fn visit_markup(node: Node<'_>, source: &str, acc: &mut Accumulator) {
    if let Some(tag) = jsx::opening_tag(node) {
        if let Some(name_node) = tag.child_by_field_name("name") {
            let name = node_text(name_node, source);
            let root = name.split('.').next().unwrap_or(name);
            if is_component_name(root) {
                acc.context.external_uses.insert(root.to_string());
            }
        }
    }

    let owner = find_ancestor(node, is_function_like);
    if let Some(owner) = owner {
        if let Some(name) = function_name(owner, source) {
            if is_component_name(name) {
                acc.has_function_component = true;
            }
        }
    }
}

/// Declared name of a function-like node, looking through `const X = () =>`.
fn function_name<'s>(function: Node<'_>, source: &'s str) -> Option<&'s str> {
    if let Some(name) = function.child_by_field_name("name") {
        return Some(node_text(name, source));
    }
    let parent = function.parent()?;
    if parent.kind() == "variable_declarator" {
        return parent
            .child_by_field_name("name")
            .map(|n| node_text(n, source));
    }
    None
}

fn visit_attribute(node: Node<'_>, source: &str, context: &mut SemanticContext) {
    let name = jsx::attribute_name(node, source);
    if name.len() > 2
        && name.starts_with("on")
        && name[2..].chars().next().is_some_and(|c| c.is_ascii_uppercase())
    {
        context.has_event_handlers = true;
    }

    if let Some(value) = jsx::attribute_value(node) {
        if value.kind() == "jsx_expression" {
            let inline = value
                .named_child(0)
                .map(|inner| matches!(inner.kind(), "object" | "array"))
                .unwrap_or(false);
            if inline {
                context.risk_factors.insert(RiskFactor::InlineObjectInHotPath);
            }
        }
    }
}

fn await_is_handled(node: Node<'_>, source: &str) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "try_statement" => return true,
            kind if is_function_like(parent) || kind == "method_definition" => {
                return node_text(parent, source).contains(".catch(");
            }
            _ => {}
        }
        current = parent.parent();
    }
    false
}

fn is_reference(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    if find_ancestor(node, |a| a.kind() == "import_statement").is_some() {
        return false;
    }
    match parent.kind() {
        "variable_declarator" | "function_declaration" | "class_declaration" => parent
            .child_by_field_name("name")
            .map(|n| n.id() != node.id())
            .unwrap_or(true),
        "formal_parameters" | "required_parameter" | "optional_parameter" | "array_pattern"
        | "rest_pattern" => false,
        _ => true,
    }
}

fn collect_import(node: Node<'_>, source: &str, context: &mut SemanticContext) {
    let Some(specifier) = node
        .child_by_field_name("source")
        .map(|s| strip_quotes(node_text(s, source)).to_string())
    else {
        return;
    };

    if is_relative_specifier(&specifier) && !context.dependencies.contains(&specifier) {
        context.dependencies.push(specifier.clone());
    }

    let mut names = Vec::new();
    collect_import_bindings(node, source, &mut names);
    for name in names {
        context.declarations.insert(name.clone());
        context.imports.insert(name, specifier.clone());
    }
}

fn collect_import_bindings(node: Node<'_>, source: &str, names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_clause" | "named_imports" => collect_import_bindings(child, source, names),
            "identifier" if node.kind() == "import_clause" => {
                names.push(node_text(child, source).to_string());
            }
            "namespace_import" => {
                if let Some(ident) = child.named_child(0) {
                    names.push(node_text(ident, source).to_string());
                }
            }
            "import_specifier" => {
                let local = child
                    .child_by_field_name("alias")
                    .or_else(|| child.child_by_field_name("name"));
                if let Some(local) = local {
                    names.push(node_text(local, source).to_string());
                }
            }
            _ => {}
        }
    }
}

fn collect_exports(node: Node<'_>, source: &str, context: &mut SemanticContext) {
    if node_text(node, source).starts_with("export default") {
        context.exports.push("default".to_string());
        return;
    }

    if let Some(declaration) = node.child_by_field_name("declaration") {
        if let Some(name) = declaration.child_by_field_name("name") {
            context.exports.push(node_text(name, source).to_string());
            return;
        }
        let mut cursor = declaration.walk();
        for declarator in declaration.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            if let Some(name) = declarator.child_by_field_name("name") {
                context.exports.push(node_text(name, source).to_string());
            }
        }
        return;
    }

    let mut cursor = node.walk();
    for clause in node.named_children(&mut cursor) {
        if clause.kind() != "export_clause" {
            continue;
        }
        let mut inner = clause.walk();
        for spec in clause.named_children(&mut inner) {
            let exported = spec
                .child_by_field_name("alias")
                .or_else(|| spec.child_by_field_name("name"));
            if let Some(exported) = exported {
                context.exports.push(node_text(exported, source).to_string());
            }
        }
    }
}

fn collect_pattern_names(node: Node<'_>, source: &str, out: &mut BTreeSet<String>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            out.insert(node_text(node, source).to_string());
        }
        // Type annotations and default values hold no bindings
        "type_annotation" | "number" | "string" | "call_expression" => {}
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "pair_pattern" {
                    if let Some(value) = child.child_by_field_name("value") {
                        collect_pattern_names(value, source, out);
                    }
                    continue;
                }
                if child.kind() == "assignment_pattern" {
                    if let Some(left) = child.child_by_field_name("left") {
                        collect_pattern_names(left, source, out);
                    }
                    continue;
                }
                collect_pattern_names(child, source, out);
            }
        }
    }
}

pub(crate) fn strip_quotes(text: &str) -> &str {
    text.trim_matches(|c| c == '\'' || c == '"' || c == '`')
}

fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with('.') || specifier.starts_with('/') || specifier.starts_with("@/")
}

/// Compare two contexts.
pub fn diff(before: &SemanticContext, after: &SemanticContext) -> Vec<SemanticDelta> {
    let mut deltas = Vec::new();

    if before.unit_kind != after.unit_kind {
        deltas.push(SemanticDelta::UnitKindChanged {
            from: before.unit_kind,
            to: after.unit_kind,
        });
    }

    for (was, is, introduced, removed) in [
        (
            before.has_state,
            after.has_state,
            SemanticDelta::StateIntroduced,
            SemanticDelta::StateRemoved,
        ),
        (
            before.has_effects,
            after.has_effects,
            SemanticDelta::EffectsIntroduced,
            SemanticDelta::EffectsRemoved,
        ),
        (
            before.has_event_handlers,
            after.has_event_handlers,
            SemanticDelta::HandlersIntroduced,
            SemanticDelta::HandlersRemoved,
        ),
    ] {
        match (was, is) {
            (false, true) => deltas.push(introduced),
            (true, false) => deltas.push(removed),
            _ => {}
        }
    }

    if before.complexity != after.complexity {
        deltas.push(SemanticDelta::ComplexityChanged {
            from: before.complexity,
            to: after.complexity,
            delta: i64::from(after.complexity) - i64::from(before.complexity),
        });
    }

    for (name, source) in &after.imports {
        if !before.imports.contains_key(name) {
            deltas.push(SemanticDelta::ImportAdded {
                name: name.clone(),
                source: source.clone(),
            });
        }
    }
    for (name, source) in &before.imports {
        if !after.imports.contains_key(name) {
            deltas.push(SemanticDelta::ImportRemoved {
                name: name.clone(),
                source: source.clone(),
            });
        }
    }

    for name in &after.exports {
        if !before.exports.contains(name) {
            deltas.push(SemanticDelta::ExportAdded { name: name.clone() });
        }
    }
    for name in &before.exports {
        if !after.exports.contains(name) {
            deltas.push(SemanticDelta::ExportRemoved { name: name.clone() });
        }
    }

    for factor in after.risk_factors.difference(&before.risk_factors) {
        deltas.push(SemanticDelta::RiskIntroduced { factor: *factor });
    }
    for factor in before.risk_factors.difference(&after.risk_factors) {
        deltas.push(SemanticDelta::RiskResolved { factor: *factor });
    }

    for directive in &after.directives {
        let was = before.directives.iter().filter(|d| *d == directive).count();
        let is = after.directives.iter().filter(|d| *d == directive).count();
        if is > was && !deltas.iter().any(|d| matches!(d, SemanticDelta::DirectiveAdded { directive: existing } if existing == directive)) {
            deltas.push(SemanticDelta::DirectiveAdded {
                directive: directive.clone(),
            });
        }
    }
    for directive in &before.directives {
        if !after.directives.contains(directive)
            && !deltas.iter().any(|d| matches!(d, SemanticDelta::DirectiveRemoved { directive: existing } if existing == directive))
        {
            deltas.push(SemanticDelta::DirectiveRemoved {
                directive: directive.clone(),
            });
        }
    }

    deltas
}
