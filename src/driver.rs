//! Compilation driver (§5, §6): pass ordering, a small worker pool sharing
//! a read-only oracle across compilations, cooperative cancellation
//! between passes, and the `Context`-style object that owns debug scopes
//! and per-compilation options. Grounded on `cranelift-codegen`'s own
//! `Context::compile` (`cranelift/codegen/src/context.rs`): one `Context`
//! per in-flight compilation, reused passes invoked in a fixed order, a
//! verifier run after every IR-mutating pass in debug builds.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use crate::analysis::Analysis;
use crate::config::Config;
use crate::debug::{self, MetricRegistry};
use crate::ir::graph::Graph;
use crate::lir::Lir;
use crate::oracle::{MethodRef, OracleHandle};
use crate::plugins::InvocationPluginRegistry;
use crate::regalloc::{self, AllocationResult};
use crate::result::{CompileError, CompileResult, FailureRecord};
use crate::scheduler::{self, MemorySchedule, ScheduleStrategy};
use crate::timing::{self, Pass};
use crate::{canonicalize, conditional_elimination, escape_analysis, inliner, memory_phase};

/// Supplies an already-built graph for a method to be compiled, and a
/// callee's graph for inlining — the same external-contract shape
/// `inliner::CalleeGraphSource` already specifies; `Context` just needs
/// both ends of it (the method under compilation, and any callee it might
/// inline) from one place.
pub trait MethodGraphSource: inliner::CalleeGraphSource {
    /// The initial graph for `method`, as already built by the host's
    /// bytecode frontend (out of this crate's scope). `None` if the method
    /// cannot be compiled (e.g. native, or the host declines).
    fn method_graph(&self, method: MethodRef) -> Option<Graph>;
}

/// A fully compiled method: block-scheduled, register-allocated LIR ready
/// for a target-specific backend to encode (encoding itself is out of
/// scope). Nothing below this level is target-independent anymore.
pub struct CompiledMethod {
    pub method: MethodRef,
    pub lir: Lir,
    pub allocation: AllocationResult,
}

/// Cooperative cancellation token. Passes don't poll a kernel primitive;
/// `Context` checks this between pipeline stages and turns a set flag into
/// `BailoutKind::Cancelled` at the next checkpoint, matching §5's "no
/// suspension points inside core algorithms, cancellation checked between
/// passes" contract.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }

    fn check(&self) -> CompileResult<()> {
        if self.is_cancelled() {
            Err(CompileError::bailout(
                crate::result::BailoutKind::Cancelled,
                "compilation cancelled between passes",
            ))
        } else {
            Ok(())
        }
    }
}

/// Owns everything a single compilation needs that outlives any one pass:
/// the frozen option snapshot, the shared oracle, the plugin registry, and
/// the metrics sink every pass reports into. One `Context` is built per
/// compilation by `Driver::compile_one`/`compile_all`; nothing here is
/// shared between concurrent compilations except the `Arc`-held
/// oracle/plugins/metrics themselves (all `Send + Sync`, per §5/§6).
pub struct Context {
    pub config: Config,
    pub oracle: OracleHandle,
    pub plugins: Arc<InvocationPluginRegistry>,
    pub metrics: Arc<MetricRegistry>,
    cancel: CancellationToken,
}

impl Context {
    fn schedule_strategy(&self) -> ScheduleStrategy {
        ScheduleStrategy::LatestOutOfLoops
    }

    fn memory_schedule(&self) -> MemorySchedule {
        match self.config.scheduler_memory_mode() {
            "optimal" => MemorySchedule::Optimal,
            _ => MemorySchedule::None,
        }
    }

    /// Run the declared, deterministic pass pipeline over `graph` in place,
    /// then generate and register-allocate its LIR. This is the one
    /// sequence §2's component table names, in order: canonicalize,
    /// inline (iterating canonicalize/escape-analysis as its own
    /// post-inline step), conditional elimination, escape analysis, the
    /// lowering/memory phases, scheduling, LIR generation, register
    /// allocation.
    fn compile_graph(
        &self,
        method: MethodRef,
        mut graph: Graph,
        callees: &dyn inliner::CalleeGraphSource,
    ) -> CompileResult<CompiledMethod> {
        let _scope = debug::enter_scope("compile");

        {
            let _t = timing::start(Pass::Canonicalize);
            let _scope = debug::enter_scope("canonicalize");
            canonicalize::canonicalize(&mut graph, &self.oracle)?;
            graph.verify()?;
        }
        self.cancel.check()?;

        {
            let _t = timing::start(Pass::Inline);
            let _scope = debug::enter_scope("inline");
            let config = self.config.clone();
            let oracle = self.oracle.clone();
            inliner::run(&mut graph, &oracle, callees, &config, |g| {
                canonicalize::canonicalize(g, &oracle)?;
                if config.escape_analysis_enabled() {
                    escape_analysis::run(g)?;
                }
                g.verify()
            })?;
        }
        self.cancel.check()?;

        let mut analysis = Analysis::compute(&graph)?;

        if self.config.conditional_elimination_enabled() {
            let _t = timing::start(Pass::ConditionalElimination);
            let _scope = debug::enter_scope("conditional-elimination");
            conditional_elimination::eliminate(&mut graph, &analysis, &self.oracle)?;
            graph.verify()?;
            analysis = Analysis::compute(&graph)?;
        }
        self.cancel.check()?;

        if self.config.escape_analysis_enabled() {
            let _t = timing::start(Pass::EscapeAnalysis);
            let _scope = debug::enter_scope("escape-analysis");
            escape_analysis::run(&mut graph)?;
            graph.verify()?;
            analysis = Analysis::compute(&graph)?;
        }
        self.cancel.check()?;

        {
            let _t = timing::start(Pass::Lowering);
            let _scope = debug::enter_scope("lowering");
            memory_phase::run(&mut graph)?;
            graph.verify()?;
            analysis = Analysis::compute(&graph)?;
        }
        self.cancel.check()?;

        let schedule = {
            let _t = timing::start(Pass::Scheduling);
            let _scope = debug::enter_scope("scheduling");
            scheduler::schedule(&graph, &analysis, self.schedule_strategy(), self.memory_schedule())?
        };
        self.cancel.check()?;

        let mut lir = {
            let _t = timing::start(Pass::LirGen);
            let _scope = debug::enter_scope("lir-gen");
            crate::lir::generate(&graph, &analysis, &schedule)?
        };
        self.cancel.check()?;

        let allocation = {
            let _t = timing::start(Pass::RegisterAllocation);
            let _scope = debug::enter_scope("regalloc");
            regalloc::renumber(&mut lir);
            regalloc::allocate(&lir, &self.config, &self.metrics)?
        };

        Ok(CompiledMethod {
            method,
            lir,
            allocation,
        })
    }
}

/// Orchestrates compilation across a small fixed-size worker pool, matching
/// §5's "multiple compilations run on a driver-owned worker pool sharing
/// read-only oracles" contract. No external thread-pool crate — `std::thread`
/// plus an `mpsc` channel is enough for the scope this crate owns (a
/// production scheduler is the host's concern).
pub struct Driver {
    oracle: OracleHandle,
    plugins: Arc<InvocationPluginRegistry>,
    metrics: Arc<MetricRegistry>,
    config: Config,
    workers: usize,
}

impl Driver {
    pub fn new(oracle: OracleHandle, plugins: InvocationPluginRegistry, config: Config) -> Self {
        Self {
            oracle,
            plugins: Arc::new(plugins),
            metrics: Arc::new(MetricRegistry::new()),
            config,
            workers: 4,
        }
    }

    /// Override the worker pool size (default 4).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// A fresh, unattached cancellation token a caller can hold onto and
    /// trigger from another thread to cancel an in-flight `compile_all`.
    pub fn new_cancellation_token(&self) -> CancellationToken {
        CancellationToken::new()
    }

    /// Build a `Context` for a single compilation, snapshotting `self`'s
    /// shared resources plus the given `CancellationToken`.
    pub fn context(&self, cancel: CancellationToken) -> Context {
        Context {
            config: self.config.clone(),
            oracle: self.oracle.clone(),
            plugins: self.plugins.clone(),
            metrics: self.metrics.clone(),
            cancel,
        }
    }

    /// Compile one method to completion, synchronously on the calling
    /// thread. `compile_all` is the batched, worker-pool entry point; this
    /// is the single-method escape hatch every test and a simple embedder
    /// both want.
    pub fn compile_one<S: MethodGraphSource>(
        &self,
        method: MethodRef,
        source: &S,
        cancel: CancellationToken,
    ) -> Result<CompiledMethod, FailureRecord> {
        let ctx = self.context(cancel);
        let graph = source.method_graph(method).ok_or_else(|| FailureRecord {
            method: Some(format!("{method:?}")),
            phase: "frontend".to_owned(),
            kind: "linkage",
            message: "host declined to supply a graph for this method".to_owned(),
        })?;
        ctx.compile_graph(method, graph, source)
            .map_err(|e| FailureRecord::from_error(Some(format!("{method:?}")), "compile", &e))
    }

    /// Compile every method in `methods` across the worker pool, each on
    /// its own `Context` (so options/oracle/plugins are shared read-only,
    /// but no mutable compilation state crosses a thread boundary). Methods
    /// that fail produce a `FailureRecord` rather than aborting the batch —
    /// §5's "oracles are read-only... compilation of one method failing
    /// must not corrupt another's" boundary.
    pub fn compile_all<S: MethodGraphSource + Send + Sync>(
        &self,
        methods: Vec<MethodRef>,
        source: Arc<S>,
        cancel: CancellationToken,
    ) -> Vec<Result<CompiledMethod, FailureRecord>> {
        let (tx, rx) = mpsc::channel();
        let work: Arc<Mutex<std::vec::IntoIter<MethodRef>>> = Arc::new(Mutex::new(methods.into_iter()));

        thread::scope(|scope| {
            for _ in 0..self.workers {
                let tx = tx.clone();
                let work = work.clone();
                let source = source.clone();
                let ctx = self.context(cancel.clone());
                scope.spawn(move || loop {
                    let next = { work.lock().unwrap().next() };
                    let Some(method) = next else { break };
                    let result = source
                        .method_graph(method)
                        .ok_or_else(|| FailureRecord {
                            method: Some(format!("{method:?}")),
                            phase: "frontend".to_owned(),
                            kind: "linkage",
                            message: "host declined to supply a graph for this method".to_owned(),
                        })
                        .and_then(|graph| {
                            ctx.compile_graph(method, graph, source.as_ref())
                                .map_err(|e| FailureRecord::from_error(Some(format!("{method:?}")), "compile", &e))
                        });
                    let _ = tx.send(result);
                });
            }
        });
        drop(tx);
        rx.into_iter().collect()
    }
}
