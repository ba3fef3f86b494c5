//! End-to-end: partial escape analysis scalar-replaces a non-escaping box.
//!
//! `new T; store f=101; x = load f; return x` never lets the allocation
//! escape, so the allocation and its field accesses fold away entirely and
//! the method effectively returns the stored constant directly.

use meridian_jit::escape_analysis::run;
use meridian_jit::ir::graph::Graph;
use meridian_jit::ir::node::{MemoryLocation, NodeKind, NodeList, UnaryOpKind};
use meridian_jit::ir::sourceloc::BciLoc;
use meridian_jit::oracle::{ConstantValue, TypeRef};

fn int_const(g: &mut Graph, v: i64) -> meridian_jit::ir::entities::NodeId {
    g.add(NodeKind::Constant(ConstantValue::Int { bits: 32, value: v }), NodeList::new(), BciLoc::default())
        .unwrap()
}

#[test]
fn non_escaping_box_folds_to_its_stored_constant() {
    let mut g = Graph::new();
    let start = g.add(NodeKind::Start, NodeList::new(), BciLoc::default()).unwrap();
    let alloc = g.add(NodeKind::NewInstance { ty: TypeRef(0) }, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(start).successors.push(alloc);
    let ret = g.add(NodeKind::Return, NodeList::new(), BciLoc::default()).unwrap();
    g.node_mut(alloc).successors.push(ret);

    let stored = int_const(&mut g, 101);
    let mut store_inputs = NodeList::new();
    store_inputs.push(alloc);
    store_inputs.push(stored);
    store_inputs.push(start);
    let store = g
        .add(NodeKind::Store { location: MemoryLocation(1) }, store_inputs, BciLoc::default())
        .unwrap();

    let mut load_inputs = NodeList::new();
    load_inputs.push(alloc);
    load_inputs.push(store);
    let load = g.add(NodeKind::Load { location: MemoryLocation(1) }, load_inputs, BciLoc::default()).unwrap();

    let mut user_inputs = NodeList::new();
    user_inputs.push(load);
    let user = g.add(NodeKind::UnaryOp(UnaryOpKind::Neg), user_inputs, BciLoc::default()).unwrap();
    g.node_mut(ret).successors.push(user);

    run(&mut g).unwrap();

    assert!(!g.is_live(load));
    assert!(!g.is_live(store));
    assert!(!g.is_live(alloc));
    assert_eq!(g.inputs(user)[0], stored);
    assert_eq!(g.node(stored).kind, NodeKind::Constant(ConstantValue::Int { bits: 32, value: 101 }));
}
