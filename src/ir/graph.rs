//! The sea-of-nodes graph arena (§4.2). Grounded on cranelift-codegen's
//! `DataFlowGraph`: a `PrimaryMap<NodeId, Node>` owns storage, usage lists
//! are maintained incrementally rather than recomputed, and a generation
//! counter lets derived structures (`ControlFlowGraph`, `DominatorTree`)
//! assert they haven't gone stale (`cranelift/codegen/src/context.rs`'s own
//! cfg/domtree-recompute-once-per-compilation discipline).

use crate::fx::FxHashMap;

use cranelift_entity::PrimaryMap;

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::node::{BinaryOpKind, Node, NodeKind, NodeList, UnaryOpKind};
use crate::ir::sourceloc::BciLoc;
use crate::oracle::{ConstantValue, TypeRef};
use crate::result::{CompileResult, InternalErrorKind, VerifierErrors};
use crate::stamp::Stamp;

use super::entities::{AnyEntity, NodeId};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ConstantKey {
    Int(u8, i64),
    Float(u8, u64),
    Null,
    Object(TypeRef, bool),
    Hub(TypeRef),
}

fn constant_key(c: &ConstantValue) -> ConstantKey {
    match c {
        ConstantValue::Int { bits, value } => ConstantKey::Int(*bits, *value),
        ConstantValue::Float { bits, value } => ConstantKey::Float(*bits, value.to_bits()),
        ConstantValue::Null => ConstantKey::Null,
        ConstantValue::Object { ty, exact } => ConstantKey::Object(*ty, *exact),
        ConstantValue::Hub(ty) => ConstantKey::Hub(*ty),
    }
}

/// Structural key used to deduplicate value-numberable nodes (§4.2 `add`:
/// "deduplicates only for nodes explicitly marked value-numberable").
#[derive(Clone, PartialEq, Eq, Hash)]
enum ValueNumberKey {
    Constant(ConstantKey),
    Parameter(u32),
    Unary(UnaryOpKind, NodeId),
    Binary(BinaryOpKind, NodeId, NodeId),
    Compare(Option<IntCC>, Option<FloatCC>, NodeId, NodeId),
    LoadHub(NodeId),
}

fn value_number_key(kind: &NodeKind, inputs: &NodeList) -> Option<ValueNumberKey> {
    if !kind.is_value_numberable() {
        return None;
    }
    match kind {
        NodeKind::Constant(c) => Some(ValueNumberKey::Constant(constant_key(c))),
        NodeKind::Parameter { index } => Some(ValueNumberKey::Parameter(*index)),
        NodeKind::UnaryOp(op) => Some(ValueNumberKey::Unary(*op, inputs[0])),
        NodeKind::BinaryOp(op) => Some(ValueNumberKey::Binary(*op, inputs[0], inputs[1])),
        NodeKind::Compare { int_cc, float_cc } => Some(ValueNumberKey::Compare(
            *int_cc, *float_cc, inputs[0], inputs[1],
        )),
        NodeKind::LoadHub => Some(ValueNumberKey::LoadHub(inputs[0])),
        _ => None,
    }
}

/// The owning arena for one method's graph. See spec §3 ("Graph") and §4.2.
pub struct Graph {
    nodes: PrimaryMap<NodeId, Node>,
    /// Reverse edges: for each node, the set of nodes that reference it in
    /// their `inputs`. Maintained incrementally by `add`/`set_input`/
    /// `replace_at_usages` rather than recomputed, mirroring how cranelift's
    /// `Uses`/`value_to_def` side tables stay in sync with the main arena.
    usages: FxHashMap<NodeId, Vec<NodeId>>,
    value_numbers: FxHashMap<ValueNumberKey, NodeId>,
    start: Option<NodeId>,
    /// Bumped by any structural mutation (add/delete/set_input on a fixed
    /// node or its successors); `ControlFlowGraph`/`DominatorTree` recompute
    /// from this to detect staleness in debug builds (SPEC_FULL §4.3).
    generation: u64,
}

impl Graph {
    /// An empty graph with no start node yet.
    pub fn new() -> Self {
        Self {
            nodes: PrimaryMap::new(),
            usages: FxHashMap::default(),
            value_numbers: FxHashMap::default(),
            start: None,
            generation: 0,
        }
    }

    /// Current mutation generation; derived analyses stash this at
    /// computation time and assert it's unchanged before trusting cached
    /// results.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// The graph's unique entry node, once added.
    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    /// Add a node. Rejects an input-count mismatch against the kind's
    /// structural expectations (only checked where the kind fixes an exact
    /// arity — `BinaryOp`/`Compare` need exactly 2, `UnaryOp`/`LoadHub`
    /// need exactly 1). Deduplicates value-numberable nodes: if a
    /// structurally identical node already exists, its id is returned and
    /// no new node is created.
    pub fn add(&mut self, kind: NodeKind, inputs: NodeList, loc: BciLoc) -> CompileResult<NodeId> {
        let expected_arity = match &kind {
            NodeKind::UnaryOp(_) | NodeKind::LoadHub => Some(1),
            NodeKind::BinaryOp(_) | NodeKind::Compare { .. } => Some(2),
            _ => None,
        };
        if let Some(n) = expected_arity {
            if inputs.len() != n {
                return Err(crate::result::CompileError::internal(
                    InternalErrorKind::InvalidOperand,
                    format!(
                        "{} expects {} input(s), got {}",
                        kind.mnemonic(),
                        n,
                        inputs.len()
                    ),
                ));
            }
        }

        if let Some(key) = value_number_key(&kind, &inputs) {
            if let Some(&existing) = self.value_numbers.get(&key) {
                return Ok(existing);
            }
            let is_start = matches!(kind, NodeKind::Start);
            let id = self.nodes.push(Node::new(kind, inputs.clone(), loc));
            self.value_numbers.insert(key, id);
            self.record_usages(id, &inputs);
            if is_start {
                self.start = Some(id);
            }
            self.bump_generation();
            return Ok(id);
        }

        let is_start = matches!(kind, NodeKind::Start);
        let id = self.nodes.push(Node::new(kind, inputs.clone(), loc));
        self.record_usages(id, &inputs);
        if is_start {
            self.start = Some(id);
        }
        self.bump_generation();
        Ok(id)
    }

    fn record_usages(&mut self, user: NodeId, inputs: &NodeList) {
        for &input in inputs {
            self.usages.entry(input).or_default().push(user);
        }
    }

    fn remove_usage(&mut self, used: NodeId, user: NodeId) {
        if let Some(list) = self.usages.get_mut(&used) {
            if let Some(pos) = list.iter().position(|&u| u == user) {
                list.swap_remove(pos);
            }
        }
    }

    /// Is `n` present and not yet deleted?
    pub fn is_live(&self, n: NodeId) -> bool {
        self.nodes.get(n).map(|node| !node.deleted).unwrap_or(false)
    }

    /// Borrow a node's data.
    pub fn node(&self, n: NodeId) -> &Node {
        &self.nodes[n]
    }

    /// Mutably borrow a node's data. Callers that change `inputs` must keep
    /// usage lists coherent via `set_input` instead of mutating directly
    /// where possible.
    pub fn node_mut(&mut self, n: NodeId) -> &mut Node {
        &mut self.nodes[n]
    }

    /// Every input of `n`, in order.
    pub fn inputs(&self, n: NodeId) -> &[NodeId] {
        &self.nodes[n].inputs
    }

    /// Every live node currently referencing `n` as an input. A snapshot
    /// (`Vec`, not a live iterator): "mutation during iteration is undefined
    /// unless explicitly snapshotted" (§4.2) — this method always hands
    /// back a snapshot, so callers never need the unsafe live form.
    pub fn usages(&self, n: NodeId) -> Vec<NodeId> {
        self.usages
            .get(&n)
            .map(|v| v.iter().copied().filter(|&u| self.is_live(u)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live node of the given kind discriminant, tested
    /// with `matches!`-style predicate `pred`.
    pub fn iterate(&self, mut pred: impl FnMut(&NodeKind) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| !node.deleted && pred(&node.kind))
            .map(|(id, _)| id)
            .collect()
    }

    /// Snapshot of every live node id.
    pub fn all_live_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| !node.deleted)
            .map(|(id, _)| id)
            .collect()
    }

    /// Replace every live usage of `old` with `new`, rewiring inputs and
    /// usage lists. Does not delete `old`; callers that want that call
    /// `safe_delete` afterward.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        let users = self.usages(old);
        for user in users {
            let inputs_snapshot = self.nodes[user].inputs.clone();
            for (slot, input) in inputs_snapshot.iter().enumerate() {
                if *input == old {
                    self.nodes[user].inputs[slot] = new;
                }
            }
            self.remove_usage(old, user);
            self.usages.entry(new).or_default().push(user);
            self.nodes[user].dirty = true;
        }
        self.bump_generation();
    }

    /// Replace a single input slot of `user` (its `old` input) with `new`,
    /// rewiring only that edge rather than every usage of `old`.
    pub fn replace_at_predecessor(&mut self, user: NodeId, old: NodeId, new: NodeId) {
        let mut replaced = false;
        for slot in self.nodes[user].inputs.iter_mut() {
            if *slot == old {
                *slot = new;
                replaced = true;
            }
        }
        if replaced {
            self.remove_usage(old, user);
            self.usages.entry(new).or_default().push(user);
            self.nodes[user].dirty = true;
            self.bump_generation();
        }
    }

    /// Append `new_input` as an additional input edge on `n`, updating
    /// usage tracking. For passes that attach an edge after a node was
    /// first built instead of wiring it at `add` time (frame-state
    /// assignment appending a deoptimizing node's reaching `FrameState`).
    pub fn add_input(&mut self, n: NodeId, new_input: NodeId) {
        self.nodes[n].inputs.push(new_input);
        self.usages.entry(new_input).or_default().push(n);
        self.nodes[n].dirty = true;
        self.bump_generation();
    }

    /// Mark `n` deleted. Fails if `n` still has live usages — deleting a
    /// node still in use is a caller bug, not a recoverable condition
    /// (§4.2: "fail if deleting a node still in use").
    pub fn safe_delete(&mut self, n: NodeId) -> CompileResult<()> {
        if !self.usages(n).is_empty() {
            return Err(crate::result::CompileError::internal(
                InternalErrorKind::GraphInvariant,
                format!("cannot delete {n}: still has live usages"),
            ));
        }
        let inputs_snapshot = self.nodes[n].inputs.clone();
        for input in inputs_snapshot {
            self.remove_usage(input, n);
        }
        self.nodes[n].deleted = true;
        self.usages.remove(&n);
        self.bump_generation();
        Ok(())
    }

    /// Recompute `n`'s stamp from its inputs' stamps according to its kind,
    /// using `types` for object-stamp meet/join (§4.2 `inferStamp`).
    /// Idempotent: calling this again on an already-fixpointed node is a
    /// no-op (by construction — the rule is a pure function of the
    /// inputs' current stamps).
    pub fn infer_stamp(&self, n: NodeId, types: &dyn crate::stamp::TypeHierarchy) -> Stamp {
        let node = &self.nodes[n];
        match &node.kind {
            NodeKind::Constant(c) => Stamp::constant(c, types),
            NodeKind::Parameter { .. } => node.stamp,
            NodeKind::Phi => {
                let mut acc: Option<Stamp> = None;
                for &input in &node.inputs {
                    let s = self.nodes[input].stamp;
                    acc = Some(match acc {
                        Some(prev) => prev.meet(&s, types),
                        None => s,
                    });
                }
                acc.unwrap_or(Stamp::Void)
            }
            NodeKind::UnaryOp(_) => self.nodes[node.inputs[0]].stamp,
            NodeKind::BinaryOp(_) => {
                let a = self.nodes[node.inputs[0]].stamp;
                let b = self.nodes[node.inputs[1]].stamp;
                a.meet(&b, types)
            }
            NodeKind::Pi => self.nodes[node.inputs[0]].stamp,
            NodeKind::LoadHub => Stamp::RawPointer,
            _ => Stamp::Void,
        }
    }

    /// Run the structural invariants from §3/§4.2:
    /// - every live input is itself live,
    /// - every successor of a control split (`If`) is itself a `Begin` —
    ///   the only point §3's "successors of a fixed node are begin-nodes"
    ///   rule is load-bearing, since an ordinary fixed node (`Guard`,
    ///   `Invoke`, `Store`, ...) chains straight to the next fixed node in
    ///   program order and only control splits or the method's terminators
    ///   actually cross into a new block,
    /// - every successor id exists.
    pub fn verify(&self) -> CompileResult<()> {
        let mut errors = VerifierErrors::new();
        for (id, node) in self.nodes.iter() {
            if node.deleted {
                continue;
            }
            for &input in &node.inputs {
                if !self.is_live(input) {
                    errors.report(AnyEntity::Node(id), format!("input {input} is not live"));
                }
            }
            for &succ in &node.successors {
                match self.nodes.get(succ) {
                    Some(succ_node) => {
                        if matches!(node.kind, NodeKind::If { .. })
                            && !matches!(succ_node.kind, NodeKind::Begin)
                        {
                            errors.report(
                                AnyEntity::Node(id),
                                format!("if-successor {succ} is not a begin-node"),
                            );
                        }
                    }
                    None => {
                        errors.report(AnyEntity::Node(id), format!("successor {succ} does not exist"));
                    }
                }
            }
        }
        errors.into_result()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// A serializable snapshot of a `Graph` (§8 encode/decode round trip).
/// `usages` and `value_numbers` are caches derived from `nodes`, not
/// independent state, so only `nodes` and `start` are persisted;
/// `from_snapshot` rebuilds the rest.
#[cfg(feature = "enable-serde")]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct GraphSnapshot {
    nodes: Vec<Node>,
    start: Option<NodeId>,
}

#[cfg(feature = "enable-serde")]
impl Graph {
    /// Capture every live and deleted node in arena order, so decoding
    /// reproduces identical `NodeId`s.
    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.values().cloned().collect(),
            start: self.start,
        }
    }

    /// Rebuild a `Graph` from a snapshot, recomputing `usages` and
    /// `value_numbers` from `nodes`. `generation` resets to 0: a freshly
    /// decoded graph has no stale analysis computed against it yet.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Graph {
        let mut nodes = PrimaryMap::new();
        for node in snapshot.nodes {
            nodes.push(node);
        }
        let mut usages: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        let mut value_numbers: FxHashMap<ValueNumberKey, NodeId> = FxHashMap::default();
        for (id, node) in nodes.iter() {
            if node.deleted {
                continue;
            }
            for &input in &node.inputs {
                usages.entry(input).or_default().push(id);
            }
            if let Some(key) = value_number_key(&node.kind, &node.inputs) {
                value_numbers.entry(key).or_insert(id);
            }
        }
        Graph {
            nodes,
            usages,
            value_numbers,
            start: snapshot.start,
            generation: 0,
        }
    }
}
