//! The configuration surface: named, typed options that govern pass
//! selection and thresholds. Modeled on cranelift-codegen's
//! `settings::Flags` — options are registered once, frozen into an
//! immutable snapshot at compilation start, and per-scope overrides derive
//! a new snapshot rather than mutating the process-wide defaults.

use crate::fx::FxHashMap;
use std::sync::Arc;

/// A typed option value.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    /// A boolean flag.
    Bool(bool),
    /// A signed integer threshold.
    Int(i64),
    /// A floating-point threshold (e.g. a probability cutoff).
    Float(f64),
    /// A free-form string (e.g. a dump filter pattern).
    Str(String),
}

impl OptionValue {
    /// Unwrap a bool, panicking with a descriptive message on a type
    /// mismatch — a mismatch here is a registration bug, not user input.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            other => panic!("expected bool option, found {other:?}"),
        }
    }

    /// Unwrap an int.
    pub fn as_int(&self) -> i64 {
        match self {
            Self::Int(i) => *i,
            other => panic!("expected int option, found {other:?}"),
        }
    }

    /// Unwrap a float.
    pub fn as_float(&self) -> f64 {
        match self {
            Self::Float(f) => *f,
            other => panic!("expected float option, found {other:?}"),
        }
    }

    /// Unwrap a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Str(s) => s,
            other => panic!("expected string option, found {other:?}"),
        }
    }
}

/// The compile-time default values for every option this crate defines.
/// Thresholds here are deliberately conservative; a production embedding is
/// expected to tune them via `ConfigBuilder::set`.
fn builtin_defaults() -> FxHashMap<&'static str, OptionValue> {
    let mut m = FxHashMap::default();
    m.insert("inline.max-depth", OptionValue::Int(9));
    m.insert("inline.max-callee-size", OptionValue::Int(325));
    m.insert("inline.min-frequency", OptionValue::Float(0.01));
    m.insert("escape-analysis.enabled", OptionValue::Bool(true));
    m.insert("conditional-elimination.enabled", OptionValue::Bool(true));
    m.insert("scheduler.memory-mode", OptionValue::Str("optimal".into()));
    m.insert("regalloc.callee-saved-budget", OptionValue::Int(6));
    m.insert("opt-level", OptionValue::Str("speed".into()));
    m
}

/// Builds a `Config` by layering overrides on top of built-in defaults.
/// Precedence, highest first: explicit scope override > process flag >
/// compiled-in default. Each layer is just a `HashMap` merged in order, so
/// the precedence rule falls out of merge order rather than being special
/// cased per option.
#[derive(Clone, Default)]
pub struct ConfigBuilder {
    process_flags: FxHashMap<String, OptionValue>,
}

impl ConfigBuilder {
    /// A builder with no process-level overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a process-wide flag, overriding the compiled-in default.
    pub fn set(&mut self, name: impl Into<String>, value: OptionValue) -> &mut Self {
        self.process_flags.insert(name.into(), value);
        self
    }

    /// Freeze into an immutable `Config` snapshot. Mid-run changes to this
    /// builder (or a future builder) never affect a `Config` already
    /// handed to an in-flight compilation.
    pub fn freeze(&self) -> Config {
        let mut values = builtin_defaults();
        for (k, v) in &self.process_flags {
            values.insert(Box::leak(k.clone().into_boxed_str()), v.clone());
        }
        Config {
            values: Arc::new(values),
        }
    }
}

/// An immutable, cheaply-cloneable snapshot of configuration. Passed by
/// value (it's an `Arc` internally) to every pass and to per-scope
/// overrides alike.
#[derive(Clone)]
pub struct Config {
    values: Arc<FxHashMap<&'static str, OptionValue>>,
}

impl Config {
    /// Build a `Config` from only the compiled-in defaults.
    pub fn defaults() -> Self {
        ConfigBuilder::new().freeze()
    }

    /// Look up a named option, panicking if it was never registered —
    /// looking up an unknown option name is a programming error, not a
    /// configuration error.
    fn get(&self, name: &str) -> &OptionValue {
        self.values
            .get(name)
            .unwrap_or_else(|| panic!("unregistered option {name:?}"))
    }

    /// Derive a new `Config` with a single named override for the lifetime
    /// of a sub-pipeline (a "scope override"), without touching `self`.
    pub fn with_override(&self, name: &'static str, value: OptionValue) -> Self {
        let mut values = (*self.values).clone();
        values.insert(name, value);
        Self {
            values: Arc::new(values),
        }
    }

    /// `inline.max-depth` — the fatal depth cap on recursive inlining.
    pub fn inline_max_depth(&self) -> i64 {
        self.get("inline.max-depth").as_int()
    }

    /// `inline.max-callee-size` — the method-size threshold.
    pub fn inline_max_callee_size(&self) -> i64 {
        self.get("inline.max-callee-size").as_int()
    }

    /// `inline.min-frequency` — the call-site frequency threshold below
    /// which inlining is not attempted.
    pub fn inline_min_frequency(&self) -> f64 {
        self.get("inline.min-frequency").as_float()
    }

    /// `escape-analysis.enabled`.
    pub fn escape_analysis_enabled(&self) -> bool {
        self.get("escape-analysis.enabled").as_bool()
    }

    /// `conditional-elimination.enabled`.
    pub fn conditional_elimination_enabled(&self) -> bool {
        self.get("conditional-elimination.enabled").as_bool()
    }

    /// `scheduler.memory-mode` — `"none"` or `"optimal"`.
    pub fn scheduler_memory_mode(&self) -> &str {
        self.get("scheduler.memory-mode").as_str()
    }

    /// `regalloc.callee-saved-budget` — how many callee-saved registers the
    /// target is assumed to have available at safepoints.
    pub fn regalloc_callee_saved_budget(&self) -> i64 {
        self.get("regalloc.callee-saved-budget").as_int()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated() {
        let cfg = Config::defaults();
        assert_eq!(cfg.inline_max_depth(), 9);
        assert!(cfg.escape_analysis_enabled());
    }

    #[test]
    fn process_flag_overrides_default() {
        let mut b = ConfigBuilder::new();
        b.set("inline.max-depth", OptionValue::Int(3));
        let cfg = b.freeze();
        assert_eq!(cfg.inline_max_depth(), 3);
    }

    #[test]
    fn scope_override_does_not_mutate_parent() {
        let base = Config::defaults();
        let scoped = base.with_override("inline.max-depth", OptionValue::Int(1));
        assert_eq!(scoped.inline_max_depth(), 1);
        assert_eq!(base.inline_max_depth(), 9);
    }
}
