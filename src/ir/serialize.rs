//! Replay a recorded list onto another emitter
//!
//! Serialization walks the list front to back and re-issues each node as
//! the emitter call that created it, carrying over inline comments,
//! instruction options, and the extra operand slots. Order is preserved
//! exactly; the destination sees the same call stream it would have seen
//! live.

use crate::emitter::{Emitter, Operand};
use crate::error::Error;
use crate::ir::builder::Builder;
use crate::ir::node::{InstData, NodeKind};

impl Builder {
    /// Replay every node onto `dst`. The first non-ok error aborts the
    /// walk and is returned.
    ///
    /// Sentinels and return nodes replay to nothing; a compiler pass is
    /// expected to have lowered returns before handing the list to an
    /// encoding emitter.
    pub fn serialize(&self, dst: &mut dyn Emitter) -> Result<(), Error> {
        let mut cursor = self.first;
        while let Some(id) = cursor {
            let node = &self.nodes[id.index()];

            match node.inline_comment {
                Some(span) => dst.set_inline_comment(self.data_zone.text(span)),
                None => dst.reset_inline_comment(),
            }

            match &node.kind {
                NodeKind::Align(data) => {
                    dst.align(data.mode, data.alignment)?;
                }
                NodeKind::Data(body) => {
                    dst.embed(self.data_bytes(body))?;
                }
                NodeKind::Label(data) => {
                    dst.bind(data.label)?;
                }
                NodeKind::Func(data) => {
                    dst.bind(data.label.label)?;
                }
                NodeKind::ConstPool(data) => {
                    dst.embed_const_pool(data.label.label, &data.pool)?;
                }
                NodeKind::Inst(data) => {
                    replay_inst(dst, data)?;
                }
                NodeKind::Jump(data) => {
                    replay_inst(dst, &data.inst)?;
                }
                NodeKind::Call(data) => {
                    replay_inst(dst, &data.inst)?;
                }
                NodeKind::Comment => {
                    let text = node
                        .inline_comment
                        .map(|span| self.data_zone.text(span))
                        .unwrap_or("");
                    dst.comment(text)?;
                }
                NodeKind::Sentinel | NodeKind::Ret(_) => {}
            }

            cursor = node.next;
        }
        Ok(())
    }
}

/// Re-issue one instruction-like node: extra slots first, then the
/// recorded options (which carry the `HAS_OP4`/`HAS_OP5` bits), then
/// the 4-slot primitive padded with none-operands.
fn replay_inst(dst: &mut dyn Emitter, data: &InstData) -> Result<(), Error> {
    let ops = &data.ops;
    if ops.len() > 4 {
        dst.set_op4(ops[4]);
    }
    if ops.len() > 5 {
        dst.set_op5(ops[5]);
    }
    dst.set_options(data.options);

    let pick = |index: usize| ops.get(index).copied().unwrap_or(Operand::None);
    dst.emit_inst(data.inst, pick(0), pick(1), pick(2), pick(3))
}
