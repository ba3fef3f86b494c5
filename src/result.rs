//! Compilation results and error kinds.
//!
//! Mirrors cranelift-codegen's own `CodegenResult`/`CodegenError`: a plain
//! enum with hand-written `Display`/`Error` impls instead of a derive macro,
//! since propagating a typed failure through every pass boundary is on the
//! hot path of every compilation and we'd rather not pull in a dependency
//! for it.

use std::fmt;

use crate::debug::ScopeTrace;
use crate::ir::AnyEntity;

/// The result type returned by every pass function.
pub type CompileResult<T> = Result<T, CompileError>;

/// Internal invariant violations. These never happen on valid input; if one
/// is observed the bug is in the compiler, not the method being compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalErrorKind {
    /// A node refers to an input that has been deleted from the graph.
    DanglingInput,
    /// A phi's input count does not match its merge's end count.
    PhiArityMismatch,
    /// A fixed node's successor is not a fixed begin node.
    BadSuccessor,
    /// A structural invariant checked by `Graph::verify` failed.
    GraphInvariant,
    /// A scheduling invariant (dominance of producer over consumer) failed.
    SchedulingInvariant,
    /// An LIR operand used a mode/flag combination outside the validity table.
    InvalidOperand,
    /// The register allocator could not satisfy a safepoint's live-in set.
    InsufficientRegisters,
}

impl fmt::Display for InternalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DanglingInput => "dangling input to a deleted node",
            Self::PhiArityMismatch => "phi input count does not match merge end count",
            Self::BadSuccessor => "fixed node successor is not a begin node",
            Self::GraphInvariant => "graph structural invariant violated",
            Self::SchedulingInvariant => "scheduling dominance invariant violated",
            Self::InvalidOperand => "LIR operand mode/flag pair is not valid",
            Self::InsufficientRegisters => "insufficient registers for safepoint live-in set",
        };
        f.write_str(s)
    }
}

/// Bailouts: the input triggered a configured limit. Recoverable at the
/// compilation boundary — the driver discards this method's compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BailoutKind {
    /// Inlining recursed past the configured depth cap.
    InliningDepthExceeded,
    /// A bytecode pattern this compiler does not support was encountered.
    UnsupportedBytecode,
    /// Expression recursion (e.g. building a deeply nested stamp) went too deep.
    ExpressionTooDeep,
    /// The driver cancelled this compilation between passes.
    Cancelled,
}

impl fmt::Display for BailoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InliningDepthExceeded => "inlining depth cap exceeded",
            Self::UnsupportedBytecode => "unsupported bytecode pattern",
            Self::ExpressionTooDeep => "expression recursion too deep",
            Self::Cancelled => "compilation cancelled",
        };
        f.write_str(s)
    }
}

/// A single verifier-reported defect, with the entity it was found on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifierError {
    /// The entity (node, block, ...) the defect was found on.
    pub location: AnyEntity,
    /// Human-readable description of the defect.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// A non-empty collection of verifier errors. Used as a test oracle as well
/// as a real compile-time failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// An empty error set, i.e. verification passed.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a defect.
    pub fn report(&mut self, location: impl Into<AnyEntity>, message: impl Into<String>) {
        self.0.push(VerifierError {
            location: location.into(),
            message: message.into(),
        });
    }

    /// Did verification find anything?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Turn this into a `CompileResult`, `Ok(())` if no errors were recorded.
    pub fn into_result(self) -> CompileResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CompileError::Verification(self))
        }
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

/// The top-level error type every pass and the driver communicate through.
#[derive(Debug)]
pub enum CompileError {
    /// An invariant violation. Fatal; aborts the compilation.
    Internal {
        /// Which invariant was violated.
        kind: InternalErrorKind,
        /// Extra context.
        message: String,
        /// The debug scope stack active when the violation was detected.
        scope: ScopeTrace,
    },
    /// A configured limit was exceeded. Recovered at the compilation boundary.
    Bailout {
        /// Which limit.
        kind: BailoutKind,
        /// Extra context.
        message: String,
    },
    /// A post-pass verifier found defects.
    Verification(VerifierErrors),
    /// The runtime oracle could not resolve a referenced class.
    Linkage {
        /// The unresolved reference, in a host-defined textual form.
        reference: String,
        /// Extra context.
        message: String,
    },
}

impl CompileError {
    /// Construct an internal error with the current (empty, by default)
    /// scope trace. Callers inside a pass normally go through
    /// `DebugScopes::current_trace` instead so the active scopes are
    /// captured.
    pub fn internal(kind: InternalErrorKind, message: impl Into<String>) -> Self {
        Self::Internal {
            kind,
            message: message.into(),
            scope: ScopeTrace::empty(),
        }
    }

    /// Construct a bailout.
    pub fn bailout(kind: BailoutKind, message: impl Into<String>) -> Self {
        Self::Bailout {
            kind,
            message: message.into(),
        }
    }

    /// Is this a bailout (recoverable at the driver boundary), as opposed to
    /// an internal error or a verification failure (both fatal)?
    pub fn is_bailout(&self) -> bool {
        matches!(self, Self::Bailout { .. })
    }

    /// The compilation phase name, when known, for structured reporting.
    pub fn phase_hint(&self) -> Option<&'static str> {
        match self {
            Self::Internal { scope, .. } => scope.innermost(),
            _ => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal {
                kind,
                message,
                scope,
            } => {
                write!(f, "internal error: {kind}: {message} (in {scope})")
            }
            Self::Bailout { kind, message } => write!(f, "bailout: {kind}: {message}"),
            Self::Verification(errors) => write!(f, "verification failed:\n{errors}"),
            Self::Linkage {
                reference,
                message,
            } => write!(f, "linkage error resolving {reference}: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// A structured, user-visible failure record: `{method, phase, kind, message, scope}`.
#[derive(Clone, Debug)]
pub struct FailureRecord {
    /// Name of the method being compiled, if known.
    pub method: Option<String>,
    /// The phase in which the failure occurred.
    pub phase: String,
    /// A short machine-readable kind tag.
    pub kind: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl FailureRecord {
    /// Build a failure record from a `CompileError`, filling in `phase` from
    /// the error's own scope trace when available, falling back to
    /// `fallback_phase` (normally the name of the pass that was running).
    pub fn from_error(method: Option<String>, fallback_phase: &str, err: &CompileError) -> Self {
        let phase = err
            .phase_hint()
            .map(str::to_owned)
            .unwrap_or_else(|| fallback_phase.to_owned());
        let kind = match err {
            CompileError::Internal { .. } => "internal",
            CompileError::Bailout { .. } => "bailout",
            CompileError::Verification(_) => "verification",
            CompileError::Linkage { .. } => "linkage",
        };
        Self {
            method,
            phase,
            kind,
            message: err.to_string(),
        }
    }
}
