//! End-to-end: dominator-stamp conditional elimination proves a `Guard`
//! redundant against the branch it's dominated by.
//!
//! `start -> begin -> if(cond) -> then_begin -> guard(cond) -> return`,
//! with `if`'s "then" edge (edge 0, not negated) implying `cond` is true.
//! A `Guard { negated: false }` on the same `cond` inside that arm proves
//! nothing new, so `eliminate` rewires it straight to the `If`. `Guard`
//! nodes carry no data consumers in this IR (they're pure control-flow
//! side effects), so the only node-local signal of the rewrite is an
//! empty usages set — matching the library's own redundant-guard test.

use meridian_jit::analysis::Analysis;
use meridian_jit::conditional_elimination::eliminate;
use meridian_jit::ir::graph::Graph;
use meridian_jit::ir::node::{DeoptReason, NodeKind, NodeList};
use meridian_jit::ir::sourceloc::BciLoc;
use meridian_jit::oracle::TypeRef;
use meridian_jit::stamp::TypeHierarchy;

struct DummyTypes;
impl TypeHierarchy for DummyTypes {
    fn assignable_from(&self, sub: TypeRef, sup: TypeRef) -> bool {
        sub == sup
    }
    fn least_common_ancestor(&self, _a: TypeRef, _b: TypeRef) -> Option<TypeRef> {
        None
    }
    fn is_interface(&self, _t: TypeRef) -> bool {
        false
    }
    fn is_concrete(&self, _t: TypeRef) -> bool {
        true
    }
}

#[test]
fn guard_redundant_with_branch_implied_fact_is_rewired_to_the_if() {
    let mut g = Graph::new();
    let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
    let begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(start).successors.push(begin);

    let cond = g.add(NodeKind::Parameter { index: 0 }, NodeList::new(), BciLoc::default()).unwrap();
    let mut if_inputs = NodeList::new();
    if_inputs.push(cond);
    let if_node = g.add(NodeKind::If { negated: false }, if_inputs, BciLoc::default()).unwrap();
    g.node_mut(begin).successors.push(if_node);

    let then_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
    let else_begin = g.add(NodeKind::Begin, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(if_node).successors.push(then_begin);
    g.node_mut(if_node).successors.push(else_begin);

    let mut guard_inputs = NodeList::new();
    guard_inputs.push(cond);
    let guard = g
        .add(
            NodeKind::Guard {
                reason: DeoptReason::NullCheckException,
                negated: false,
            },
            guard_inputs,
            BciLoc::default(),
        )
        .unwrap();
    g.node_mut(then_begin).successors.push(guard);
    let ret_then = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(guard).successors.push(ret_then);

    let ret_else = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(else_begin).successors.push(ret_else);

    let analysis = Analysis::compute(&g).unwrap();
    let types = DummyTypes;
    eliminate(&mut g, &analysis, &types).unwrap();

    assert!(g.usages(guard).is_empty());
    assert!(g.verify().is_ok());
}
