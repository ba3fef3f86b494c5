//! Control-flow graph construction (§4.3): groups the graph's fixed nodes
//! into blocks. Grounded on cranelift-codegen's `flowgraph.rs`
//! (`ControlFlowGraph`, `BlockPredecessor`) but built by walking node
//! successors rather than a pre-existing block-structured layout, since
//! this crate's graph has no blocks until this pass creates them.

use cranelift_entity::PrimaryMap;

use crate::fx::FxHashMap;
use crate::ir::entities::{BlockId, NodeId};
use crate::ir::graph::Graph;
use crate::ir::node::NodeKind;
use crate::result::{CompileError, CompileResult, InternalErrorKind};

/// One scheduled block: its header (a `Begin`, `Merge`, or the method
/// entry), the ordered fixed nodes inside it, and its place in the CFG.
#[derive(Clone, Debug)]
pub struct BlockData {
    /// The fixed node heading this block.
    pub header: NodeId,
    /// Every fixed node in the block, in program order, `header` first.
    pub fixed_nodes: Vec<NodeId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    /// Reverse-postorder number, assigned by `compute_cfg`. `0` is the
    /// entry block.
    pub rpo_number: u32,
    /// Product of edge probabilities from the entry block (§4.3).
    pub probability: f64,
}

impl BlockData {
    /// Is this block's single fixed successor-chain terminated without any
    /// successor block (a `Return`/`Throw`/`Unreachable`)?
    pub fn is_exit(&self) -> bool {
        self.successors.is_empty()
    }
}

/// The control-flow graph derived from a `Graph`'s fixed-node skeleton.
pub struct ControlFlowGraph {
    blocks: PrimaryMap<BlockId, BlockData>,
    node_to_block: FxHashMap<NodeId, BlockId>,
    entry: BlockId,
    /// `Graph::generation` at the time this CFG was built; staleness check
    /// for the discipline in SPEC_FULL §4.3.
    built_at_generation: u64,
}

impl ControlFlowGraph {
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn block(&self, b: BlockId) -> &BlockData {
        &self.blocks[b]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks_in_rpo(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self.blocks.keys().collect();
        ids.sort_by_key(|&b| self.blocks[b].rpo_number);
        ids
    }

    pub fn block_of(&self, n: NodeId) -> Option<BlockId> {
        self.node_to_block.get(&n).copied()
    }

    /// Assert this CFG was built from `graph` at its current generation —
    /// the "recompute once, assert staleness in debug builds" discipline
    /// (SPEC_FULL §4.3).
    pub fn assert_fresh(&self, graph: &Graph) {
        debug_assert_eq!(
            self.built_at_generation,
            graph.generation(),
            "ControlFlowGraph used after the graph it was built from was mutated"
        );
    }
}

fn is_block_terminator(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::If { .. } | NodeKind::Return | NodeKind::Throw | NodeKind::Unreachable
    )
}

fn is_explicit_header_kind(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::Begin | NodeKind::Merge { .. })
}

/// Build the CFG from `graph`'s current fixed-node skeleton (§4.3).
pub fn compute_cfg(graph: &Graph) -> CompileResult<ControlFlowGraph> {
    let start = graph.start().ok_or_else(|| {
        CompileError::internal(InternalErrorKind::GraphInvariant, "graph has no start node")
    })?;
    let entry_header = *graph
        .node(start)
        .successors
        .first()
        .ok_or_else(|| {
            CompileError::internal(InternalErrorKind::GraphInvariant, "start node has no successor")
        })?;

    // Pass 1: count fixed predecessors of every fixed node reachable from
    // the entry, so join points (more than one predecessor) are detected
    // even when not explicitly tagged `Merge`.
    let mut predecessor_counts: FxHashMap<NodeId, u32> = FxHashMap::default();
    let mut visited = FxHashMap::default();
    let mut stack = vec![entry_header];
    visited.insert(entry_header, ());
    while let Some(n) = stack.pop() {
        let node = graph.node(n);
        for &succ in &node.successors {
            *predecessor_counts.entry(succ).or_insert(0) += 1;
            if visited.insert(succ, ()).is_none() {
                stack.push(succ);
            }
        }
    }

    let is_header = |n: NodeId| -> bool {
        if n == entry_header {
            return true;
        }
        let node = graph.node(n);
        is_explicit_header_kind(&node.kind) || predecessor_counts.get(&n).copied().unwrap_or(0) != 1
    };

    // Pass 2: walk forward from each header, building its straight-line
    // fixed-node run until a terminator or the next header.
    let mut blocks: PrimaryMap<BlockId, BlockData> = PrimaryMap::new();
    let mut header_to_block: FxHashMap<NodeId, BlockId> = FxHashMap::default();
    let mut node_to_block: FxHashMap<NodeId, BlockId> = FxHashMap::default();
    let mut pending = vec![entry_header];
    let mut seen_headers: FxHashMap<NodeId, ()> = FxHashMap::default();
    seen_headers.insert(entry_header, ());

    // Reserve block ids up front so successor block ids are known while
    // still walking (headers discovered mid-walk get queued).
    while let Some(header) = pending.pop() {
        if header_to_block.contains_key(&header) {
            continue;
        }
        let mut fixed_nodes = vec![header];
        node_to_block.insert(header, BlockId::from_u32(0)); // patched below
        let mut cur = header;
        let mut block_successors: Vec<NodeId> = Vec::new();
        loop {
            let node = graph.node(cur);
            if is_block_terminator(&node.kind) {
                for &s in &node.successors {
                    block_successors.push(s);
                    if seen_headers.insert(s, ()).is_none() {
                        pending.push(s);
                    }
                }
                break;
            }
            match node.successors.first() {
                None => break,
                Some(&next) => {
                    if is_header(next) {
                        block_successors.push(next);
                        if seen_headers.insert(next, ()).is_none() {
                            pending.push(next);
                        }
                        break;
                    }
                    fixed_nodes.push(next);
                    node_to_block.insert(next, BlockId::from_u32(0));
                    cur = next;
                }
            }
        }
        let id = blocks.push(BlockData {
            header,
            fixed_nodes,
            predecessors: Vec::new(),
            successors: Vec::new(),
            rpo_number: 0,
            probability: 0.0,
        });
        header_to_block.insert(header, id);
        for n in blocks[id].fixed_nodes.clone() {
            node_to_block.insert(n, id);
        }
        blocks[id].successors = block_successors
            .iter()
            .map(|n| *header_to_block.get(n).unwrap_or(&BlockId::from_u32(u32::MAX)))
            .collect();
        // Successor block ids for not-yet-built headers are patched in a
        // final pass below (we only have the header NodeId until its block
        // is built).
    }

    // Patch successor block ids now that every header has a block id.
    let header_ids: Vec<(BlockId, Vec<NodeId>)> = blocks
        .iter()
        .map(|(id, b)| {
            let node = graph.node(*b.fixed_nodes.last().unwrap());
            let succs: Vec<NodeId> = if is_block_terminator(&node.kind) {
                node.successors.to_vec()
            } else {
                node.successors.first().copied().into_iter().collect()
            };
            (id, succs)
        })
        .collect();
    for (id, succ_headers) in header_ids {
        let succ_blocks: Vec<BlockId> = succ_headers
            .iter()
            .filter_map(|h| header_to_block.get(h).copied())
            .collect();
        blocks[id].successors = succ_blocks;
    }
    for id in blocks.keys().collect::<Vec<_>>() {
        let succs = blocks[id].successors.clone();
        for s in succs {
            blocks[s].predecessors.push(id);
        }
    }

    let entry = *header_to_block.get(&entry_header).ok_or_else(|| {
        CompileError::internal(InternalErrorKind::GraphInvariant, "entry block not built")
    })?;

    assign_rpo(&mut blocks, entry);
    assign_probabilities(&mut blocks, entry);

    Ok(ControlFlowGraph {
        blocks,
        node_to_block,
        entry,
        built_at_generation: graph.generation(),
    })
}

fn assign_rpo(blocks: &mut PrimaryMap<BlockId, BlockData>, entry: BlockId) {
    enum St {
        Enter(BlockId),
        Leave(BlockId),
    }
    let mut visited: FxHashMap<BlockId, ()> = FxHashMap::default();
    let mut postorder = Vec::new();
    let mut stack = vec![St::Enter(entry)];
    visited.insert(entry, ());
    while let Some(item) = stack.pop() {
        match item {
            St::Enter(b) => {
                stack.push(St::Leave(b));
                for &s in blocks[b].successors.iter().rev() {
                    if visited.insert(s, ()).is_none() {
                        stack.push(St::Enter(s));
                    }
                }
            }
            St::Leave(b) => postorder.push(b),
        }
    }
    let n = postorder.len();
    for (i, b) in postorder.into_iter().enumerate() {
        blocks[b].rpo_number = (n - 1 - i) as u32;
    }
}

fn assign_probabilities(blocks: &mut PrimaryMap<BlockId, BlockData>, entry: BlockId) {
    let order: Vec<BlockId> = {
        let mut ids: Vec<BlockId> = blocks.keys().collect();
        ids.sort_by_key(|&b| blocks[b].rpo_number);
        ids
    };
    for &id in &order {
        if id == entry {
            blocks[id].probability = 1.0;
            continue;
        }
        let preds = blocks[id].predecessors.clone();
        let mut total = 0.0;
        for p in preds {
            let fanout = blocks[p].successors.len().max(1) as f64;
            total += blocks[p].probability / fanout;
        }
        blocks[id].probability = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::NodeList;
    use crate::ir::sourceloc::BciLoc;
    use crate::oracle::ConstantValue;

    fn diamond_graph() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let entry_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        let start = g
            .add(NodeKind::Start, NodeList::new(), BciLoc::default())
            .unwrap();
        g.node_mut(start).successors.push(entry_begin);

        let cond = g
            .add(
                NodeKind::Constant(ConstantValue::Int { bits: 32, value: 1 }),
                NodeList::new(),
                BciLoc::default(),
            )
            .unwrap();
        let mut if_inputs = NodeList::new();
        if_inputs.push(cond);
        let if_node = g
            .add(NodeKind::If { negated: false }, if_inputs, BciLoc::default())
            .unwrap();
        g.node_mut(entry_begin).successors.push(if_node);

        let then_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        let else_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(if_node).successors.push(then_begin);
        g.node_mut(if_node).successors.push(else_begin);

        let merge = g
            .add(
                NodeKind::Merge {
                    is_loop_header: false,
                },
                NodeList::new(),
                BciLoc::default(),
            )
            .unwrap();
        g.node_mut(then_begin).successors.push(merge);
        g.node_mut(else_begin).successors.push(merge);

        let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
        g.node_mut(merge).successors.push(ret);

        (g, entry_begin, then_begin, else_begin, merge)
    }

    #[test]
    fn diamond_has_four_blocks_in_rpo_order() {
        let (g, entry_begin, then_begin, else_begin, merge) = diamond_graph();
        let cfg = compute_cfg(&g).unwrap();
        // entry+if, then, else, merge+return — a straight-line fixed-node
        // run only breaks at an explicit header (join or `Begin`/`Merge`).
        assert_eq!(cfg.num_blocks(), 4);
        let order = cfg.blocks_in_rpo();
        assert_eq!(cfg.block(order[0]).header, entry_begin);
        let then_rpo = cfg.block(cfg.block_of(then_begin).unwrap()).rpo_number;
        let else_rpo = cfg.block(cfg.block_of(else_begin).unwrap()).rpo_number;
        let merge_rpo = cfg.block(cfg.block_of(merge).unwrap()).rpo_number;
        assert!(then_rpo < merge_rpo);
        assert!(else_rpo < merge_rpo);
    }

    #[test]
    fn merge_block_has_two_predecessors() {
        let (g, _, _, _, merge) = diamond_graph();
        let cfg = compute_cfg(&g).unwrap();
        let merge_block = cfg.block_of(merge).unwrap();
        assert_eq!(cfg.block(merge_block).predecessors.len(), 2);
    }

    #[test]
    fn probabilities_split_evenly_across_an_if() {
        let (g, _, then_begin, else_begin, _) = diamond_graph();
        let cfg = compute_cfg(&g).unwrap();
        let then_p = cfg.block(cfg.block_of(then_begin).unwrap()).probability;
        let else_p = cfg.block(cfg.block_of(else_begin).unwrap()).probability;
        assert!((then_p - 0.5).abs() < 1e-9);
        assert!((else_p - 0.5).abs() < 1e-9);
    }
}
