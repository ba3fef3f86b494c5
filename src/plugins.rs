//! The invocation plugin registry (§6): maps `(holder, name, arg-types)` to
//! a handler invoked during graph building, replacing the reflective
//! method-substitution/macro-intrinsic lookup DESIGN NOTES §9 calls out as
//! needing re-architecture.

use std::collections::HashMap;

use crate::ir::graph::Graph;
use crate::ir::NodeId;

/// A type signature key for registry lookups. `*` (the empty vec sentinel
/// via `variadic`) matches signature-polymorphic entries such as method
/// handle invokers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PluginKey {
    /// Fully-qualified holder class name.
    pub holder: String,
    /// Method name.
    pub name: String,
    /// Erased argument type names; ignored (any arity/types match) when
    /// `variadic` is set on the registered entry.
    pub arg_types: Vec<String>,
}

impl PluginKey {
    /// Build a lookup key for a concrete call site.
    pub fn new(
        holder: impl Into<String>,
        name: impl Into<String>,
        arg_types: Vec<String>,
    ) -> Self {
        Self {
            holder: holder.into(),
            name: name.into(),
            arg_types,
        }
    }
}

/// What a plugin handler decided to do with the call it was offered.
pub enum PluginOutcome {
    /// The handler spliced a value-producing subgraph in place of the call;
    /// this node now stands in for the call's result (or there is no
    /// result, for a void substitution).
    Handled(Option<NodeId>),
    /// The handler declined; the invoke proceeds through ordinary
    /// processing (inlining decision, regular call lowering, ...).
    NotHandled,
}

/// A plugin handler. Takes the graph being built and the already-resolved
/// argument nodes, and returns whether it substituted the call.
pub type PluginHandler = Box<dyn Fn(&mut Graph, &[NodeId]) -> PluginOutcome + Send + Sync>;

/// Registered entry: a handler plus whether it accepts any argument list
/// (signature-polymorphic, e.g. method-handle invokers) or only the exact
/// arity/types it was registered with.
struct PluginEntry {
    handler: PluginHandler,
    variadic: bool,
}

/// Registry of invocation plugins, populated once at compiler construction
/// and consulted read-only thereafter during graph building.
#[derive(Default)]
pub struct InvocationPluginRegistry {
    exact: HashMap<(String, String, Vec<String>), PluginEntry>,
    /// Signature-polymorphic entries, keyed by `(holder, name)` only.
    variadic: HashMap<(String, String), PluginEntry>,
}

impl InvocationPluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact `(holder, name, arg_types)` triple.
    pub fn register(&mut self, key: PluginKey, handler: PluginHandler) {
        self.exact.insert(
            (key.holder, key.name, key.arg_types),
            PluginEntry {
                handler,
                variadic: false,
            },
        );
    }

    /// Register a signature-polymorphic handler, matched by `(holder, name)`
    /// regardless of argument count or types.
    pub fn register_variadic(
        &mut self,
        holder: impl Into<String>,
        name: impl Into<String>,
        handler: PluginHandler,
    ) {
        self.variadic.insert(
            (holder.into(), name.into()),
            PluginEntry {
                handler,
                variadic: true,
            },
        );
    }

    /// Look up and invoke a handler for `key`, if one is registered. Exact
    /// matches take priority over variadic ones.
    pub fn try_handle(&self, key: &PluginKey, graph: &mut Graph, args: &[NodeId]) -> PluginOutcome {
        let exact_key = (key.holder.clone(), key.name.clone(), key.arg_types.clone());
        if let Some(entry) = self.exact.get(&exact_key) {
            return (entry.handler)(graph, args);
        }
        let variadic_key = (key.holder.clone(), key.name.clone());
        if let Some(entry) = self.variadic.get(&variadic_key) {
            debug_assert!(entry.variadic);
            return (entry.handler)(graph, args);
        }
        PluginOutcome::NotHandled
    }

    /// Number of registered entries (exact + variadic), mostly for tests.
    pub fn len(&self) -> usize {
        self.exact.len() + self.variadic.len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
