//! Debug scopes, metric counters/timers, and dump sinks.
//!
//! Mirrors cranelift-codegen's `timing`/debug-context machinery: each
//! compilation thread owns a stack of named scopes, metrics and timers
//! aggregate across threads via atomic counters keyed by `(scope, name)`,
//! and dump handlers receive the IR at phase boundaries. None of this is
//! visible outside the crate's own logging; it exists so a host can observe
//! what the compiler is doing without the compiler depending on a specific
//! observability stack.

use std::cell::RefCell;
use crate::fx::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

/// A snapshot of the debug scope stack, captured at the point an error was
/// raised. Cheap to clone; scope names are `&'static str`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeTrace(Vec<&'static str>);

impl ScopeTrace {
    /// An empty trace (used when no scope was active).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Capture the calling thread's current scope stack.
    pub fn capture() -> Self {
        SCOPE_STACK.with(|s| Self(s.borrow().clone()))
    }

    /// The innermost (most specific) scope name, if any.
    pub fn innermost(&self) -> Option<&'static str> {
        self.0.last().copied()
    }
}

impl fmt::Display for ScopeTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<no scope>");
        }
        for (i, s) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(s)?;
        }
        Ok(())
    }
}

/// RAII guard pushing a named scope for the lifetime of the guard. Scopes
/// nest: entering "inline" inside "compile" gives a trace of
/// `compile/inline`.
pub struct ScopeGuard {
    _private: (),
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Enter a named debug scope on the current thread. The scope is popped
/// when the returned guard is dropped.
pub fn enter_scope(name: &'static str) -> ScopeGuard {
    SCOPE_STACK.with(|s| s.borrow_mut().push(name));
    ScopeGuard { _private: () }
}

/// The current thread's scope trace, for embedding in an error.
pub fn current_trace() -> ScopeTrace {
    ScopeTrace::capture()
}

/// A named, process-wide counter or timer. Counters registered under the
/// same `(scope, name)` pair from different threads aggregate into one
/// value; this is the only piece of global mutable state in the crate
/// besides configuration flags (see `crate::config`).
#[derive(Default)]
pub struct MetricRegistry {
    counters: Mutex<FxHashMap<(&'static str, &'static str), AtomicU64>>,
}

impl MetricRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the named counter, creating it at zero if needed.
    pub fn add(&self, scope: &'static str, name: &'static str, amount: u64) {
        let mut map = self.counters.lock().unwrap();
        map.entry((scope, name))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(amount, AtomicOrdering::Relaxed);
    }

    /// Increment the named counter by one.
    pub fn increment(&self, scope: &'static str, name: &'static str) {
        self.add(scope, name, 1);
    }

    /// Read the current value of a counter, or zero if it has never been touched.
    pub fn get(&self, scope: &'static str, name: &'static str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&(scope, name))
            .map(|c| c.load(AtomicOrdering::Relaxed))
            .unwrap_or(0)
    }
}

/// A metric's liveness. `Unconditional` metrics are always recorded;
/// `Conditional` ones are only meaningful when their owning scope is
/// active, so a sink may choose to suppress them otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// Always recorded regardless of active scopes.
    Unconditional,
    /// Only meaningful while the owning scope is active.
    Conditional,
}

/// What a dump handler receives at a phase boundary. Kept as an owned
/// string (a textual dump) rather than a borrowed graph reference so sinks
/// can buffer or ship dumps off-thread without lifetime contortions.
pub struct DumpEvent<'a> {
    /// The pass that just ran.
    pub phase: &'a str,
    /// A textual rendering of the IR or LIR at this point.
    pub rendering: &'a str,
}

/// A sink for counters, timers, and IR dumps. The default `NullSink` drops
/// everything, so tests never need to wire up a real one.
pub trait MetricSink: Send + Sync {
    /// Record a named counter increment/add.
    fn record(&self, scope: &'static str, name: &'static str, kind: MetricKind, amount: u64);

    /// Receive a dump at a phase boundary.
    fn dump(&self, event: &DumpEvent<'_>);
}

/// A `MetricSink` that discards everything.
pub struct NullSink;

impl MetricSink for NullSink {
    fn record(&self, _scope: &'static str, _name: &'static str, _kind: MetricKind, _amount: u64) {
    }

    fn dump(&self, _event: &DumpEvent<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_nest_and_pop() {
        assert_eq!(current_trace().to_string(), "<no scope>");
        {
            let _outer = enter_scope("compile");
            assert_eq!(current_trace().to_string(), "compile");
            {
                let _inner = enter_scope("inline");
                assert_eq!(current_trace().to_string(), "compile/inline");
            }
            assert_eq!(current_trace().to_string(), "compile");
        }
        assert_eq!(current_trace().to_string(), "<no scope>");
    }

    #[test]
    fn counters_aggregate() {
        let reg = MetricRegistry::new();
        reg.increment("regalloc", "spill_moves");
        reg.add("regalloc", "spill_moves", 2);
        assert_eq!(reg.get("regalloc", "spill_moves"), 3);
        assert_eq!(reg.get("regalloc", "reg_moves"), 0);
    }
}
