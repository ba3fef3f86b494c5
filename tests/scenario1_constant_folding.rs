//! End-to-end: constant folding across a control-flow merge point.
//!
//! `canonicalize` has no correlated-branch/Phi simplification (it never
//! inspects `Phi` nodes at all), so a diamond where both arms compute the
//! same constant by different arithmetic does not collapse to a single
//! `Constant` downstream of the `Phi`. What it does prove, per arm: each
//! branch's arithmetic folds to a bare `Constant`, with no
//! `BinaryOp(Add)` surviving. Since constants are value-numbered, both
//! arms' folded `42` end up as the identical node.

use meridian_jit::canonicalize::canonicalize;
use meridian_jit::ir::graph::Graph;
use meridian_jit::ir::node::{BinaryOpKind, NodeKind, NodeList};
use meridian_jit::ir::sourceloc::BciLoc;
use meridian_jit::oracle::{ConstantValue, TypeRef};
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

fn int_const(g: &mut Graph, v: i64) -> meridian_jit::ir::entities::NodeId {
    g.add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: v }), NodeList::new(), BciLoc::default())
        .unwrap()
}

#[test]
fn each_diamond_arm_folds_and_the_merge_phi_sees_bare_constants() {
    let types = DummyTypes;
    let mut g = Graph::new();
    let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();

    // then arm: 20 + 22
    let then_a = int_const(&mut g, 20);
    let then_b = int_const(&mut g, 22);
    let mut then_inputs = NodeList::new();
    then_inputs.push(then_a);
    then_inputs.push(then_b);
    let then_add = g.add(NodeKind::BinaryOp(BinaryOpKind::Add), then_inputs, BciLoc::default()).unwrap();

    // else arm: 50 + (-8)
    let else_a = int_const(&mut g, 50);
    let else_b = int_const(&mut g, -8);
    let mut else_inputs = NodeList::new();
    else_inputs.push(else_a);
    else_inputs.push(else_b);
    let else_add = g.add(NodeKind::BinaryOp(BinaryOpKind::Add), else_inputs, BciLoc::default()).unwrap();

    let mut phi_inputs = NodeList::new();
    phi_inputs.push(then_add);
    phi_inputs.push(else_add);
    let phi = g.add(NodeKind::Phi, phi_inputs, BciLoc::default()).unwrap();

    let mut ret_inputs = NodeList::new();
    ret_inputs.push(phi);
    let _ret = g.add(NodeKind::Return, ret_inputs, BciLoc::default()).unwrap();
    let _ = start;

    canonicalize(&mut g, &types).unwrap();

    assert!(!g.is_live(then_add));
    assert!(!g.is_live(else_add));
    assert!(g.iterate(|k| matches!(k, NodeKind::BinaryOp(BinaryOpKind::Add))).is_empty());

    let folded: Vec<_> = g.inputs(phi).to_vec();
    assert_eq!(folded.len(), 2);
    for &n in &folded {
        assert_eq!(g.node(n).kind, NodeKind::Constant(ConstantValue::Int { bits: 32, value: 42 }));
    }
    // Both arms fold to the same value, so value-numbering collapses them
    // to one node; the Phi ends up with two identical inputs rather than
    // a single value, since this pass never simplifies Phis themselves.
    assert_eq!(folded[0], folded[1]);
}
