//! Function nodes, calls, returns, and const-pool scopes

mod common;

use common::{new_builder, Call, Recorder, ADD, CALL, MOV};

use mortar::code::CallConvId;
use mortar::emitter::{Emitter, Operand, Reg};
use mortar::error::Error;
use mortar::ir::{ArgSlot, ConstScope, FuncSignature, NodeKind, TypeId};

fn sig2() -> FuncSignature {
    FuncSignature::new(CallConvId::SysV64)
        .with_ret(TypeId::I64)
        .with_arg(TypeId::I64)
        .with_arg(TypeId::I32)
}

#[test]
fn add_func_splices_frame_and_parks_cursor() {
    let (_code, mut cb) = new_builder();
    let func = cb.add_func(&sig2()).unwrap();

    let (exit, end) = {
        let data = cb.node(func).unwrap().kind().as_func().unwrap();
        (data.exit, data.end)
    };

    assert_eq!(cb.list_iter().collect::<Vec<_>>(), vec![func, exit, end]);
    // Cursor parked on the function node: the body goes before `exit`.
    assert_eq!(cb.cursor(), Some(func));

    cb.emit(MOV, &[Operand::Reg(Reg::virt(0)), Operand::from(1i64)])
        .unwrap();
    let body = cb.cursor().unwrap();
    assert_eq!(
        cb.list_iter().collect::<Vec<_>>(),
        vec![func, body, exit, end]
    );
}

#[test]
fn func_is_a_registered_label() {
    let (code, mut cb) = new_builder();
    let func = cb.add_func(&sig2()).unwrap();

    let label = cb.node(func).unwrap().label_data().unwrap().label;
    assert!(code.is_label_valid(label));
    assert_eq!(cb.label_node_id(label), Some(func));
}

#[test]
fn end_func_finishes_and_moves_to_end() {
    let (_code, mut cb) = new_builder();
    let func = cb.add_func(&sig2()).unwrap();
    cb.emit(ADD, &[Operand::Reg(Reg::virt(0)), Operand::from(2i64)])
        .unwrap();

    let end = cb.end_func().unwrap();

    let data = cb.node(func).unwrap().kind().as_func().unwrap();
    assert!(data.finished);
    assert_eq!(data.end, end);
    assert_eq!(cb.cursor(), Some(end));
    assert!(cb.current_func().is_none());
}

#[test]
fn end_func_without_open_function_fails() {
    let (_code, mut cb) = new_builder();
    assert_eq!(cb.end_func(), Err(Error::InvalidState));
}

#[test]
fn only_one_function_open_at_a_time() {
    let (_code, mut cb) = new_builder();
    cb.add_func(&sig2()).unwrap();
    assert_eq!(cb.add_func(&sig2()), Err(Error::InvalidState));
}

#[test]
fn set_arg_requires_virtual_registers() {
    let (_code, mut cb) = new_builder();
    assert_eq!(cb.set_arg(0, Reg::virt(0)), Err(Error::InvalidState));
    cb.reset_last_error();

    let func = cb.add_func(&sig2()).unwrap();
    assert_eq!(cb.set_arg(0, Reg::gp(5)), Err(Error::InvalidVirtId));
    cb.reset_last_error();

    cb.set_arg(0, Reg::virt(3)).unwrap();
    cb.set_arg(1, Reg::virt(4)).unwrap();
    assert_eq!(cb.set_arg(2, Reg::virt(5)), Err(Error::InvalidArgument));
    cb.reset_last_error();

    let data = cb.node(func).unwrap().kind().as_func().unwrap();
    assert_eq!(data.args[0], Some(Reg::virt(3).virt_id()));
    assert_eq!(data.args[1], Some(Reg::virt(4).virt_id()));
}

#[test]
fn code_info_overrides_natural_stack_alignment() {
    // The holder is set up with stack alignment 16; Cdecl's own natural
    // alignment (4) must be replaced.
    let (_code, mut cb) = new_builder();
    let func = cb
        .add_func(&FuncSignature::new(CallConvId::Cdecl).with_ret(TypeId::I32))
        .unwrap();

    let data = cb.node(func).unwrap().kind().as_func().unwrap();
    assert_eq!(data.detail.call_conv.natural_stack_alignment, 16);
}

#[test]
fn signature_layout_assigns_stack_slots() {
    let (_code, mut cb) = new_builder();
    let sign = FuncSignature::new(CallConvId::SysV64)
        .with_arg(TypeId::I8)
        .with_arg(TypeId::I64)
        .with_arg(TypeId::I32);
    let func = cb.add_func(&sign).unwrap();

    let detail = &cb.node(func).unwrap().kind().as_func().unwrap().detail;
    let slots: Vec<_> = detail.args.iter().map(|arg| arg.slot).collect();
    assert_eq!(
        slots,
        vec![ArgSlot::Stack(0), ArgSlot::Stack(8), ArgSlot::Stack(16)]
    );
    assert_eq!(detail.arg_stack_size, 20);
}

#[test]
fn unknown_calling_convention_is_rejected() {
    let (_code, mut cb) = new_builder();
    let sign = FuncSignature::new(CallConvId::None);
    assert_eq!(cb.add_func(&sign), Err(Error::InvalidArgument));
}

#[test]
fn call_nodes_carry_args_and_replay() {
    let (_code, mut cb) = new_builder();
    let target = Operand::Reg(Reg::gp(11));
    let call = cb.add_call(CALL, target, &sig2()).unwrap();

    cb.set_call_arg(call, 0, Operand::Reg(Reg::virt(1))).unwrap();
    cb.set_call_arg(call, 1, Operand::from(42i64)).unwrap();
    cb.set_call_ret(call, 0, Operand::Reg(Reg::virt(2))).unwrap();
    assert_eq!(
        cb.set_call_arg(call, 2, Operand::None),
        Err(Error::InvalidArgument)
    );

    let data = cb.node(call).unwrap().kind().as_call().unwrap();
    assert_eq!(data.args.len(), 2);
    assert_eq!(data.args[1], Operand::from(42i64));
    assert_eq!(data.rets[0], Operand::Reg(Reg::virt(2)));

    let mut recorder = Recorder::new();
    cb.serialize(&mut recorder).unwrap();
    match recorder.observable().first() {
        Some(Call::Emit { inst, ops, .. }) => {
            assert_eq!(*inst, CALL);
            assert_eq!(ops[0], target);
        }
        other => panic!("expected the call, got {other:?}"),
    }
}

#[test]
fn ret_nodes_replay_to_nothing() {
    let (_code, mut cb) = new_builder();
    cb.add_func(&sig2()).unwrap();
    cb.add_ret(Operand::Reg(Reg::virt(0)), Operand::None).unwrap();
    cb.end_func().unwrap();

    let mut recorder = Recorder::new();
    cb.serialize(&mut recorder).unwrap();

    // Only the function label and exit label are observable.
    let observable = recorder.observable();
    assert_eq!(observable.len(), 2);
    assert!(matches!(observable[0], Call::Bind(_)));
    assert!(matches!(observable[1], Call::Bind(_)));
}

#[test]
fn local_constants_need_an_open_function() {
    let (_code, mut cb) = new_builder();
    assert_eq!(
        cb.embed_constant(ConstScope::Local, &7u32.to_le_bytes()),
        Err(Error::InvalidState)
    );
}

#[test]
fn local_pool_flushes_at_end_func() {
    let (_code, mut cb) = new_builder();
    let func = cb.add_func(&sig2()).unwrap();

    let (label, first) = cb
        .embed_constant(ConstScope::Local, &7u64.to_le_bytes())
        .unwrap();
    let (_, dup) = cb
        .embed_constant(ConstScope::Local, &7u64.to_le_bytes())
        .unwrap();
    let (_, second) = cb
        .embed_constant(ConstScope::Local, &9u64.to_le_bytes())
        .unwrap();
    assert_eq!(first, dup);
    assert_ne!(first, second);

    cb.end_func().unwrap();

    // The pool node sits right after the exit label.
    let exit = cb.node(func).unwrap().kind().as_func().unwrap().exit;
    let pool_node = cb.node(exit).unwrap().next().unwrap();
    let pool = cb.node(pool_node).unwrap().kind().as_const_pool().unwrap();
    assert_eq!(pool.label.label, label);
    assert_eq!(pool.pool.size(), 16);
}

#[test]
fn global_pool_flushes_at_finalize() {
    let (_code, mut cb) = new_builder();
    let (label, offset) = cb
        .embed_constant(ConstScope::Global, &3u32.to_le_bytes())
        .unwrap();
    assert_eq!(offset, 0);

    // Not in the list until finalize.
    assert!(!cb
        .list_iter()
        .any(|id| cb.node(id).unwrap().kind().is_const_pool()));

    cb.finalize().unwrap();

    let pool_node = cb.last_node().unwrap();
    match cb.node(pool_node).unwrap().kind() {
        NodeKind::ConstPool(data) => assert_eq!(data.label.label, label),
        _ => panic!("expected a const pool node at the end"),
    }

    // Replay materializes it as align + bind + embed.
    let mut recorder = Recorder::new();
    cb.serialize(&mut recorder).unwrap();
    assert_eq!(
        recorder.observable(),
        vec![Call::EmbedConstPool(label, 4)]
    );
}
