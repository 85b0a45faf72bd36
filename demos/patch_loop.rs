//! Edit recorded IR in place: reposition the cursor, insert a new
//! instruction mid-stream, drop a jump, and watch the target label's
//! reference count follow.

use mortar::code::{ArchKind, CodeHolder, CodeInfo, JumpRange};
use mortar::emitter::{Emitter, InstId, Operand, Reg};
use mortar::ir::{Builder, NodeKind};

const MOV: InstId = InstId(0x01);
const ADD: InstId = InstId(0x02);
const JMP: InstId = InstId(0x100);

fn dump(tag: &str, cb: &Builder) {
    print!("{tag}:");
    for id in cb.list_iter() {
        let node = cb.node(id).expect("listed node");
        let what = match node.kind() {
            NodeKind::Label(data) => {
                format!("{:?}(refs={})", data.label, data.num_refs)
            }
            NodeKind::Inst(data) => format!("{:?}", data.inst),
            NodeKind::Jump(data) => format!("{:?}->", data.inst.inst),
            _ => "?".to_owned(),
        };
        print!(" {what}");
    }
    println!();
}

fn main() -> anyhow::Result<()> {
    let info = CodeInfo::new(ArchKind::X64)
        .with_jump_range(JumpRange::new(0x100, 0x11F, 0x100));
    let code = CodeHolder::with_info(info)?;
    let mut cb = Builder::attached(&code)?;

    let top = cb.new_label();
    cb.emit(MOV, &[Operand::Reg(Reg::gp(0)), Operand::from(0i64)])?;
    cb.bind(top)?;
    cb.emit(ADD, &[Operand::Reg(Reg::gp(0)), Operand::from(1i64)])?;
    cb.emit(JMP, &[Operand::Label(top)])?;
    dump("recorded", &cb);

    // Insert another increment right after the label: park the cursor
    // on the label node and emit.
    let label_node = cb.label_node_id(top).expect("label node");
    cb.set_cursor(Some(label_node));
    cb.emit(ADD, &[Operand::Reg(Reg::gp(1)), Operand::from(2i64)])?;
    dump("patched ", &cb);

    // Drop the back-edge; the label's reference count goes to zero.
    let jump = cb
        .list_iter()
        .find(|&id| {
            cb.node(id).is_some_and(|node| node.kind().as_jump().is_some())
        })
        .expect("the jump");
    cb.remove_node(jump);
    dump("unlinked", &cb);

    Ok(())
}
