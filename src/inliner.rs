//! Inlining with type guards and method-handle monomorphization (§4.7).
//!
//! This crate never parses bytecode (a Non-goal), so it has no way to build
//! a callee's graph from scratch; a callee's already-built body is supplied
//! by the host through [`CalleeGraphSource`], the same external-contract
//! pattern [`crate::oracle::RuntimeOracle`] and
//! [`crate::plugins::InvocationPluginRegistry`] use elsewhere in this crate.
//! Method-substitution/macro-intrinsic plugins are applied by the host at
//! the point it builds an `Invoke` in the first place (`plugins.rs`'s own
//! doc comment: "called during graph building"); by the time this pass sees
//! an `Invoke`, the registry has already had its chance, so this module
//! only handles the inlining decision and splice itself (see DESIGN.md).
//!
//! Iterative mode loops inline -> canonicalize -> escape-analyze until a
//! round inlines nothing or the depth cap is reached; the depth cap is a
//! fatal [`crate::result::BailoutKind::InliningDepthExceeded`] bailout, not
//! a recoverable per-call decision (§4.7).

use crate::config::Config;
use crate::fx::FxHashMap;
use crate::ir::entities::NodeId;
use crate::ir::graph::Graph;
use crate::ir::node::{DeoptReason, DispatchKind, NodeKind, NodeList};
use crate::oracle::{ConstantValue, MethodRef, OracleHandle, TypeRef};
use crate::result::{BailoutKind, CompileError, CompileResult};
use crate::stamp::{ObjectStamp, Stamp};

/// Supplies an already-built callee graph for a resolved method. Building
/// this graph from the method's bytecode is the host's job; this crate only
/// consumes the result.
pub trait CalleeGraphSource {
    /// The callee's graph, or `None` if it isn't available for inlining
    /// (native method, not yet compiled to this IR, etc).
    fn callee_graph(&self, method: MethodRef) -> Option<Graph>;

    /// Estimated size of the callee (e.g. bytecode length), compared against
    /// `inline.max-callee-size`.
    fn callee_size(&self, method: MethodRef) -> u32;
}

/// Run the inliner to a fixpoint: inline every profitable call site found in
/// the current graph, then re-run `post_inline` (canonicalize +
/// escape-analyze, passed in by the caller since this module doesn't own
/// those passes) before looking for more, until a round inlines nothing or
/// `depth` exceeds `config.inline_max_depth()`.
pub fn run(
    graph: &mut Graph,
    oracle: &OracleHandle,
    callees: &dyn CalleeGraphSource,
    config: &Config,
    mut post_inline: impl FnMut(&mut Graph) -> CompileResult<()>,
) -> CompileResult<()> {
    let mut depth = 0i64;
    loop {
        let inlined_any = inline_round(graph, oracle, callees, config, depth)?;
        if !inlined_any {
            return Ok(());
        }
        depth += 1;
        if depth > config.inline_max_depth() {
            return Err(CompileError::bailout(
                BailoutKind::InliningDepthExceeded,
                format!("inlining recursed past depth {}", config.inline_max_depth()),
            ));
        }
        post_inline(graph)?;
    }
}

/// One round: consider every currently-live `Invoke`, inline the ones
/// profitable by this round's size/frequency thresholds. Returns whether
/// anything was inlined.
fn inline_round(
    graph: &mut Graph,
    oracle: &OracleHandle,
    callees: &dyn CalleeGraphSource,
    config: &Config,
    depth: i64,
) -> CompileResult<bool> {
    let invokes: Vec<NodeId> = graph.iterate(|k| matches!(k, NodeKind::Invoke { .. }));
    let mut inlined_any = false;

    for invoke in invokes {
        if !graph.is_live(invoke) {
            continue;
        }
        let (method, dispatch) = match &graph.node(invoke).kind {
            NodeKind::Invoke { method, dispatch } => (*method, *dispatch),
            _ => continue,
        };

        let bci = graph.node(invoke).loc;
        let profile = oracle.profile(method, bci.bits());

        let size = callees.callee_size(method);
        if size as i64 > config.inline_max_callee_size() {
            continue;
        }

        // `inline.min-frequency` doubles as the monomorphic-receiver
        // confidence threshold: a virtual call site profiled as
        // monomorphic less often than this isn't worth guarding for.
        let monomorphic_threshold = 1.0 - config.inline_min_frequency();
        let target = match dispatch {
            DispatchKind::Static | DispatchKind::Special => Some((method, None)),
            DispatchKind::Virtual | DispatchKind::Interface => {
                match profile.monomorphic_receiver(monomorphic_threshold) {
                    Some(ty) => Some((method, Some(ty))),
                    None => None,
                }
            }
        };
        let Some((target_method, guard_ty)) = target else {
            continue;
        };

        let Some(callee) = callees.callee_graph(target_method) else {
            continue;
        };

        inline_one(graph, invoke, &callee, guard_ty, oracle, depth)?;
        inlined_any = true;
    }

    Ok(inlined_any)
}

/// Inline a single call. If `guard_ty` is `Some`, the receiver is not
/// statically known to be that exact type, so a type guard is emitted
/// first: `LoadHub` the receiver, `Compare` against the expected hub,
/// `Guard` with `TypeCheckedInliningViolated`, then an anchored-receiver
/// `Pi` narrowing the receiver's stamp for the inlined body.
fn inline_one(
    graph: &mut Graph,
    invoke: NodeId,
    callee: &Graph,
    guard_ty: Option<TypeRef>,
    oracle: &OracleHandle,
    depth: i64,
) -> CompileResult<()> {
    log::debug!("inliner: inlining invoke {:?} at depth {}", invoke, depth);
    let loc = graph.node(invoke).loc;
    let args = graph.inputs(invoke).to_vec();

    let receiver_arg = if args.is_empty() { None } else { Some(args[0]) };
    let effective_receiver = if let (Some(ty), Some(receiver)) = (guard_ty, receiver_arg) {
        Some(emit_type_guard(graph, invoke, receiver, ty, oracle, loc)?)
    } else {
        receiver_arg
    };

    let mut callee_args = args.clone();
    if let Some(r) = effective_receiver {
        callee_args[0] = r;
    }

    splice_callee(graph, invoke, callee, &callee_args)
}

/// `load_hub(receiver); compare(hub, object_hub(ty)); guard(cmp,
/// TypeCheckedInliningViolated); pi(receiver)` spliced in as the invoke's
/// immediate predecessor chain. Returns the `Pi` node standing in for the
/// receiver inside the inlined body.
fn emit_type_guard(
    graph: &mut Graph,
    invoke: NodeId,
    receiver: NodeId,
    ty: TypeRef,
    oracle: &OracleHandle,
    loc: crate::ir::sourceloc::BciLoc,
) -> CompileResult<NodeId> {
    let mut hub_inputs = NodeList::new();
    hub_inputs.push(receiver);
    let hub = graph.add(NodeKind::LoadHub, hub_inputs, loc)?;

    let expected_hub = graph.add(NodeKind::Constant(oracle.object_hub(ty)), NodeList::new(), loc)?;

    let mut cmp_inputs = NodeList::new();
    cmp_inputs.push(hub);
    cmp_inputs.push(expected_hub);
    let cmp = graph.add(
        NodeKind::Compare {
            int_cc: Some(crate::ir::condcodes::IntCC::Equal),
            float_cc: None,
        },
        cmp_inputs,
        loc,
    )?;

    let mut guard_inputs = NodeList::new();
    guard_inputs.push(cmp);
    let guard = graph.add(
        NodeKind::Guard {
            reason: DeoptReason::TypeCheckedInliningViolated,
            negated: false,
        },
        guard_inputs,
        loc,
    )?;

    // Splice guard in as invoke's immediate predecessor: whatever used to
    // point at `invoke` now points at `guard` instead, and `guard`'s single
    // successor is `invoke`.
    let preds: Vec<NodeId> = graph
        .all_live_nodes()
        .into_iter()
        .filter(|&p| p != invoke && p != guard && graph.node(p).successors.iter().any(|&s| s == invoke))
        .collect();
    for p in preds {
        for s in graph.node_mut(p).successors.iter_mut() {
            if *s == invoke {
                *s = guard;
            }
        }
    }
    graph.node_mut(guard).successors.push(invoke);

    let mut pi_inputs = NodeList::new();
    pi_inputs.push(receiver);
    let pi = graph.add(NodeKind::Pi, pi_inputs, loc)?;
    graph.node_mut(pi).stamp = Stamp::Object(ObjectStamp::declared(ty, true, true));
    Ok(pi)
}

/// Copy every live node of `callee` into `graph`, remapping its `Start` to
/// `graph.start()` (this IR treats `Start` as a shared universal memory
/// origin rather than per-method, §4.8's memory-SSA phase walks through it
/// either way) and its `Parameter{index}` nodes to `args[index]`, then
/// splice the callee's entry in place of `invoke` and its `Return`s back
/// into `invoke`'s old position.
fn splice_callee(graph: &mut Graph, invoke: NodeId, callee: &Graph, args: &[NodeId]) -> CompileResult<()> {
    let callee_start = callee.start();
    let mut remap: FxHashMap<NodeId, NodeId> = FxHashMap::default();

    let live: Vec<NodeId> = callee.all_live_nodes();
    for &old in &live {
        if Some(old) == callee_start {
            if let Some(s) = graph.start() {
                remap.insert(old, s);
            }
            continue;
        }
        if let NodeKind::Parameter { index } = &callee.node(old).kind {
            if let Some(&a) = args.get(*index as usize) {
                remap.insert(old, a);
                continue;
            }
        }
        let placeholder = graph.add(NodeKind::Unreachable, NodeList::new(), callee.node(old).loc)?;
        remap.insert(old, placeholder);
    }

    for &old in &live {
        if Some(old) == callee_start {
            continue;
        }
        if matches!(callee.node(old).kind, NodeKind::Parameter { .. }) {
            // Either resolved directly to a caller-side argument node above
            // (the common case), or — if `args` didn't cover this index, a
            // malformed call this pass doesn't try to recover from — left
            // as an inert placeholder; no node of our own to populate.
            continue;
        }
        let new_id = remap[&old];
        let new_inputs: Vec<NodeId> = callee.inputs(old).iter().map(|i| remap[i]).collect();
        let new_successors: Vec<NodeId> = callee
            .node(old)
            .successors
            .iter()
            .map(|s| remap[s])
            .collect();

        let node = graph.node_mut(new_id);
        node.kind = callee.node(old).kind.clone();
        node.stamp = callee.node(old).stamp;
        node.dirty = true;
        node.successors.clear();
        node.successors.extend(new_successors);
        for input in new_inputs {
            graph.add_input(new_id, input);
        }
    }

    let entry_begin = callee_start
        .and_then(|s| callee.node(s).successors.first().copied())
        .map(|b| remap[&b]);

    let old_succ = graph.node(invoke).successors.first().copied();
    let preds: Vec<NodeId> = graph
        .all_live_nodes()
        .into_iter()
        .filter(|&p| p != invoke && graph.node(p).successors.iter().any(|&s| s == invoke))
        .collect();
    if let Some(entry) = entry_begin {
        for p in preds {
            for s in graph.node_mut(p).successors.iter_mut() {
                if *s == invoke {
                    *s = entry;
                }
            }
        }
    }

    let returns: Vec<NodeId> = live
        .iter()
        .filter(|&&old| matches!(callee.node(old).kind, NodeKind::Return))
        .map(|&old| remap[&old])
        .collect();

    let result = if returns.len() == 1 {
        let ret = returns[0];
        let value = graph.inputs(ret).first().copied();
        redirect_predecessor_of(graph, ret, old_succ);
        graph.node_mut(ret).successors.clear();
        graph.safe_delete(ret)?;
        value
    } else if returns.len() > 1 {
        let merge = graph.add(NodeKind::Merge { is_loop_header: false }, NodeList::new(), graph.node(invoke).loc)?;
        if let Some(succ) = old_succ {
            graph.node_mut(merge).successors.push(succ);
        }
        let mut phi_inputs = NodeList::new();
        let mut any_value = false;
        for &ret in &returns {
            if let Some(&v) = graph.inputs(ret).first() {
                phi_inputs.push(v);
                any_value = true;
            }
            redirect_predecessor_of(graph, ret, Some(merge));
            graph.node_mut(ret).successors.clear();
            graph.safe_delete(ret)?;
        }
        if any_value {
            Some(graph.add(NodeKind::Phi, phi_inputs, graph.node(merge).loc)?)
        } else {
            None
        }
    } else {
        None
    };

    if let Some(v) = result {
        graph.replace_at_usages(invoke, v);
    }
    graph.node_mut(invoke).successors.clear();
    graph.safe_delete(invoke)?;
    Ok(())
}

/// Repoint whatever live node's successor list names `old` so it instead
/// names `new` (or drops the edge entirely if `new` is `None`).
fn redirect_predecessor_of(graph: &mut Graph, old: NodeId, new: Option<NodeId>) {
    let preds: Vec<NodeId> = graph
        .all_live_nodes()
        .into_iter()
        .filter(|&p| p != old && graph.node(p).successors.iter().any(|&s| s == old))
        .collect();
    for p in preds {
        if let Some(n) = new {
            for s in graph.node_mut(p).successors.iter_mut() {
                if *s == old {
                    *s = n;
                }
            }
        } else {
            graph.node_mut(p).successors.retain(|&s| s != old);
        }
    }
}
