//! Jump cross-linking: incoming lists, reference counts, removal

mod common;

use common::{new_builder, Call, Recorder, JE, JMP, MOV};

use mortar::emitter::{Emitter, InstOptions, Operand, Reg};
use mortar::ir::{Builder, NodeFlags, NodeId};

/// Jumps reachable from the label's incoming list, head first.
fn incoming_jumps(cb: &Builder, label_node: NodeId) -> Vec<NodeId> {
    let mut jumps = Vec::new();
    let mut cursor = cb
        .node(label_node)
        .and_then(|node| node.label_data())
        .and_then(|data| data.from);
    while let Some(id) = cursor {
        jumps.push(id);
        cursor = cb
            .node(id)
            .and_then(|node| node.kind().as_jump())
            .and_then(|jump| jump.jump_next);
    }
    jumps
}

/// Every jump in the list targeting `label_node`, by scanning all nodes.
fn jumps_targeting(cb: &Builder, label_node: NodeId) -> Vec<NodeId> {
    cb.list_iter()
        .filter(|&id| {
            cb.node(id)
                .and_then(|node| node.kind().as_jump())
                .is_some_and(|jump| jump.target == Some(label_node))
        })
        .collect()
}

fn num_refs(cb: &Builder, label_node: NodeId) -> u32 {
    cb.node(label_node)
        .and_then(|node| node.label_data())
        .map_or(0, |data| data.num_refs)
}

#[test]
fn forward_jump_cross_links() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();

    cb.emit(JMP, &[Operand::Label(label)]).unwrap();
    cb.bind(label).unwrap();

    let label_node = cb.label_node_id(label).unwrap();
    let jump_node = cb.first_node().unwrap();

    assert_eq!(num_refs(&cb, label_node), 1);
    assert_eq!(incoming_jumps(&cb, label_node), vec![jump_node]);

    let jump = cb.node(jump_node).unwrap().kind().as_jump().unwrap();
    assert_eq!(jump.target, Some(label_node));

    // Serialization replays the jump before the bind.
    let mut recorder = Recorder::new();
    cb.serialize(&mut recorder).unwrap();
    let observable = recorder.observable();
    assert!(matches!(observable[0], Call::Emit { inst, .. } if inst == JMP));
    assert_eq!(observable[1], Call::Bind(label));
}

#[test]
fn removing_a_jump_unlinks_it() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();
    cb.emit(JMP, &[Operand::Label(label)]).unwrap();
    cb.bind(label).unwrap();

    let label_node = cb.label_node_id(label).unwrap();
    let jump_node = cb.first_node().unwrap();

    cb.remove_node(jump_node);

    assert_eq!(num_refs(&cb, label_node), 0);
    assert!(incoming_jumps(&cb, label_node).is_empty());

    let mut recorder = Recorder::new();
    cb.serialize(&mut recorder).unwrap();
    assert_eq!(recorder.observable(), vec![Call::Bind(label)]);
}

#[test]
fn incoming_list_matches_targeting_set() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();

    // Three jumps to the same label, interleaved with plain code.
    for _ in 0..3 {
        cb.emit(MOV, &[Operand::Reg(Reg::gp(0)), Operand::from(1i64)])
            .unwrap();
        cb.emit(JE, &[Operand::Label(label)]).unwrap();
    }
    cb.bind(label).unwrap();

    let label_node = cb.label_node_id(label).unwrap();
    let mut incoming = incoming_jumps(&cb, label_node);
    let mut targeting = jumps_targeting(&cb, label_node);

    assert_eq!(num_refs(&cb, label_node), 3);
    incoming.sort();
    targeting.sort();
    assert_eq!(incoming, targeting);
}

#[test]
fn removing_a_middle_jump_keeps_the_chain() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();

    let mut jump_nodes = Vec::new();
    for _ in 0..3 {
        cb.emit(JE, &[Operand::Label(label)]).unwrap();
        jump_nodes.push(cb.cursor().unwrap());
    }
    cb.bind(label).unwrap();
    let label_node = cb.label_node_id(label).unwrap();

    // The incoming list is head-inserted: newest jump first.
    assert_eq!(
        incoming_jumps(&cb, label_node),
        vec![jump_nodes[2], jump_nodes[1], jump_nodes[0]]
    );

    cb.remove_node(jump_nodes[1]);
    assert_eq!(num_refs(&cb, label_node), 2);
    assert_eq!(
        incoming_jumps(&cb, label_node),
        vec![jump_nodes[2], jump_nodes[0]]
    );
}

#[test]
fn unconditional_jump_flags() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();
    cb.emit(JMP, &[Operand::Label(label)]).unwrap();

    let node = cb.node(cb.cursor().unwrap()).unwrap();
    assert!(node.flags().contains(NodeFlags::JMP));
    assert!(node.flags().contains(NodeFlags::TAKEN));
    assert!(!node.flags().contains(NodeFlags::JCC));
}

#[test]
fn conditional_jump_flags_and_taken_hint() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();

    cb.emit(JE, &[Operand::Label(label)]).unwrap();
    let plain = cb.node(cb.cursor().unwrap()).unwrap();
    assert!(plain.flags().contains(NodeFlags::JCC));
    assert!(!plain.flags().contains(NodeFlags::TAKEN));

    cb.add_options(InstOptions::TAKEN);
    cb.emit(JE, &[Operand::Label(label)]).unwrap();
    let hinted = cb.node(cb.cursor().unwrap()).unwrap();
    assert!(hinted.flags().contains(NodeFlags::JCC));
    assert!(hinted.flags().contains(NodeFlags::TAKEN));
}

#[test]
fn jump_to_non_label_operand_is_unfollowed() {
    let (_code, mut cb) = new_builder();
    cb.emit(JMP, &[Operand::Reg(Reg::gp(3))]).unwrap();

    let node = cb.node(cb.cursor().unwrap()).unwrap();
    let jump = node.kind().as_jump().unwrap();
    assert_eq!(jump.target, None);
    assert!(jump.inst.options.contains(InstOptions::UNFOLLOW));
}

#[test]
fn unfollow_option_skips_cross_linking() {
    let (_code, mut cb) = new_builder();
    let label = cb.new_label();

    cb.add_options(InstOptions::UNFOLLOW);
    cb.emit(JMP, &[Operand::Label(label)]).unwrap();
    cb.bind(label).unwrap();

    let label_node = cb.label_node_id(label).unwrap();
    assert_eq!(num_refs(&cb, label_node), 0);
    assert!(incoming_jumps(&cb, label_node).is_empty());
}

#[test]
fn plain_instructions_are_not_jumps() {
    let (_code, mut cb) = new_builder();
    cb.emit(MOV, &[Operand::Reg(Reg::gp(0)), Operand::from(7i64)])
        .unwrap();
    let node = cb.node(cb.cursor().unwrap()).unwrap();
    assert!(!node.is_jmp_or_jcc());
    assert!(node.kind().is_inst());
}
