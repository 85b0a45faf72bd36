//! Function, call, and return nodes on top of the builder
//!
//! A function is a label node with extras: an exit label, an end
//! sentinel, the resolved signature detail, and the argument
//! virtual-register array a register allocator fills in later. The
//! allocator itself lives outside this crate; only the node lifecycle
//! (`add_func` .. `end_func`) is managed here.

use crate::code::{CallConvId, CodeInfo};
use crate::emitter::{Emitter, InstId, InstOptions, Label, Operand, Reg};
use crate::error::Error;
use crate::ir::builder::Builder;
use crate::ir::node::{
    CallData,
    FuncData,
    InstData,
    LabelData,
    NodeFlags,
    NodeId,
    NodeKind,
    RetData,
};
use crate::util::misc::align_up;

use smallvec::SmallVec;

/// Value types a signature can carry.
#[derive(Eq, Hash, Copy, Clone, Debug, PartialEq)]
pub enum TypeId {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Pointer-sized integer.
    Ptr,
}

impl TypeId {
    #[must_use]
    pub const fn size(self, gp_size: u8) -> u32 {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
            Self::Ptr => gp_size as u32,
        }
    }
}

/// Declared shape of a function: convention, return type, arguments.
#[derive(Clone, Debug, Default)]
pub struct FuncSignature {
    pub call_conv: CallConvId,
    pub ret: Option<TypeId>,
    pub args: SmallVec<[TypeId; 8]>,
}

impl FuncSignature {
    #[must_use]
    pub fn new(call_conv: CallConvId) -> Self {
        Self { call_conv, ret: None, args: SmallVec::new() }
    }

    #[must_use]
    pub fn with_ret(mut self, ty: TypeId) -> Self {
        self.ret = Some(ty);
        self
    }

    #[must_use]
    pub fn with_arg(mut self, ty: TypeId) -> Self {
        self.args.push(ty);
        self
    }

    #[must_use]
    #[inline(always)]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Resolved calling convention.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub struct CallConv {
    pub id: CallConvId,
    /// Stack alignment the convention guarantees at function entry.
    /// Overridden with the holder's `CodeInfo` alignment on function
    /// creation.
    pub natural_stack_alignment: u8,
}

impl CallConv {
    pub fn from_id(id: CallConvId) -> Result<Self, Error> {
        let natural_stack_alignment = match id {
            CallConvId::None => return Err(Error::InvalidArgument),
            CallConvId::Cdecl | CallConvId::StdCall | CallConvId::FastCall => {
                4
            }
            CallConvId::SysV64 | CallConvId::Win64 => 16,
        };
        Ok(Self { id, natural_stack_alignment })
    }
}

/// Where an argument or return value lives before register assignment.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub enum ArgSlot {
    /// Not assigned yet (register allocation pending).
    Unassigned,
    /// Stack slot at the given offset from the incoming frame.
    Stack(u32),
}

/// One argument or return value of a resolved signature.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub struct FuncValue {
    pub ty: TypeId,
    pub slot: ArgSlot,
}

/// A signature resolved against a target: convention, per-argument
/// layout, and the stack space the arguments cover.
#[derive(Clone, Debug)]
pub struct FuncDetail {
    pub call_conv: CallConv,
    pub ret: Option<FuncValue>,
    pub args: SmallVec<[FuncValue; 8]>,
    pub arg_stack_size: u32,
}

impl FuncDetail {
    /// Resolve `sign`: pick the convention and lay arguments out on the
    /// incoming stack, each aligned to its own size. Register
    /// assignment is the allocator's pass, not ours.
    pub fn init(sign: &FuncSignature, info: &CodeInfo) -> Result<Self, Error> {
        let call_conv = CallConv::from_id(sign.call_conv)?;
        let gp_size = info.arch.gp_size();

        let mut args = SmallVec::new();
        let mut offset = 0u32;
        for &ty in &sign.args {
            let size = ty.size(gp_size);
            offset = align_up(offset as usize, size as usize) as u32;
            args.push(FuncValue { ty, slot: ArgSlot::Stack(offset) });
            offset += size;
        }

        Ok(Self {
            call_conv,
            ret: sign
                .ret
                .map(|ty| FuncValue { ty, slot: ArgSlot::Unassigned }),
            args,
            arg_stack_size: offset,
        })
    }

    #[must_use]
    #[inline(always)]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Which const pool a constant goes into.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub enum ConstScope {
    /// Flushed at `end_func`, right after the exit label.
    Local,
    /// Flushed at `finalize`.
    Global,
}

impl Builder {
    /// Allocate a function node with its exit label, end sentinel, and
    /// resolved detail. Nothing is spliced yet; see
    /// [`Builder::add_func`].
    pub fn new_func(&mut self, sign: &FuncSignature) -> Result<NodeId, Error> {
        if let Some(err) = self.core.last_error {
            return Err(err);
        }

        let mut detail = match FuncDetail::init(sign, &self.core.info) {
            Ok(detail) => detail,
            Err(err) => return Err(self.raise(err, "signature resolution")),
        };
        // The holder's target description wins over the convention.
        detail.call_conv.natural_stack_alignment =
            self.core.info.stack_alignment;

        let end = match self.new_sentinel_node() {
            Ok(end) => end,
            Err(err) => return Err(self.raise(err, "function end marker")),
        };
        let exit = match self.new_label_node() {
            Ok(exit) => exit,
            Err(err) => return Err(self.raise(err, "function exit label")),
        };

        let args = vec![None; detail.arg_count()].into_boxed_slice();
        let data = FuncData {
            label: LabelData::new(Label::INVALID),
            exit,
            end,
            detail,
            args,
            finished: false,
        };
        let id = match self.alloc_func_node(data) {
            Ok(id) => id,
            Err(err) => return Err(self.raise(err, "function node")),
        };
        Ok(id)
    }

    fn alloc_func_node(&mut self, data: FuncData) -> Result<NodeId, Error> {
        let id = self
            .alloc_node(NodeKind::Func(data), NodeFlags::empty())
            .ok_or(Error::NoHeapMemory)?;
        self.register_label_node(id, None)?;
        Ok(id)
    }

    /// Splice `[func, exit, end]` at the cursor and leave the cursor on
    /// the function node, so the body lands between it and the exit
    /// label. Only one function may be open at a time.
    pub fn add_func(&mut self, sign: &FuncSignature) -> Result<NodeId, Error> {
        self.check_ready()?;
        if self.func.is_some() {
            return Err(
                self.raise(Error::InvalidState, "function already open")
            );
        }

        let func = self.new_func(sign)?;
        let (exit, end) = match self.node(func).and_then(|n| n.kind.as_func())
        {
            Some(data) => (data.exit, data.end),
            None => return Err(Error::InvalidState),
        };

        self.add_node(func);
        let cursor = self.cursor();
        self.add_node(exit);
        self.add_node(end);
        self.set_cursor(cursor);

        self.func = Some(func);
        Ok(func)
    }

    /// Close the open function: flush its local const pool after the
    /// exit label, mark it finished, and park the cursor on the end
    /// sentinel. The only `Open -> Finished` transition.
    pub fn end_func(&mut self) -> Result<NodeId, Error> {
        self.check_ready()?;
        let Some(func) = self.func else {
            return Err(self.raise(Error::InvalidState, "no open function"));
        };

        let (exit, end) = match self.node(func).and_then(|n| n.kind.as_func())
        {
            Some(data) => (data.exit, data.end),
            None => return Err(Error::InvalidState),
        };

        self.set_cursor(Some(exit));
        if let Some(pool) = self.local_const_pool.take() {
            self.add_node(pool);
        }

        if let Some(data) =
            self.node_mut(func).and_then(|n| n.kind.as_func_mut())
        {
            data.finished = true;
        }
        self.func = None;

        self.set_cursor(Some(end));
        Ok(end)
    }

    /// The open function node, if any.
    #[must_use]
    pub fn current_func(&self) -> Option<NodeId> {
        self.func
    }

    /// Record the virtual register backing argument `index` of the open
    /// function.
    pub fn set_arg(&mut self, index: usize, reg: Reg) -> Result<(), Error> {
        self.check_ready()?;
        let Some(func) = self.func else {
            return Err(self.raise(Error::InvalidState, "no open function"));
        };
        if !reg.is_virt() {
            return Err(self.raise(
                Error::InvalidVirtId,
                "arguments bind to virtual registers",
            ));
        }
        match self.node_mut(func).and_then(|n| n.kind.as_func_mut()) {
            Some(data) if index < data.args.len() => {
                data.args[index] = Some(reg.virt_id());
                Ok(())
            }
            _ => Err(self
                .raise(Error::InvalidArgument, "argument index out of range")),
        }
    }

    /// Allocate a return node carrying up to two value operands.
    pub fn new_ret(
        &mut self,
        o0: Operand,
        o1: Operand,
    ) -> Result<NodeId, Error> {
        if let Some(err) = self.core.last_error {
            return Err(err);
        }
        match self.alloc_node(
            NodeKind::Ret(RetData { ops: [o0, o1] }),
            NodeFlags::RET,
        ) {
            Some(id) => Ok(id),
            None => Err(self.raise(Error::NoHeapMemory, "return node")),
        }
    }

    /// Allocate and splice a return node at the cursor.
    pub fn add_ret(
        &mut self,
        o0: Operand,
        o1: Operand,
    ) -> Result<NodeId, Error> {
        self.check_ready()?;
        let id = self.new_ret(o0, o1)?;
        self.add_node(id);
        Ok(id)
    }

    /// Allocate a call node: `inst` applied to `target`, with the
    /// resolved signature and an argument slot per declared argument.
    pub fn new_call(
        &mut self,
        inst: InstId,
        target: Operand,
        sign: &FuncSignature,
    ) -> Result<NodeId, Error> {
        if let Some(err) = self.core.last_error {
            return Err(err);
        }

        let detail = match FuncDetail::init(sign, &self.core.info) {
            Ok(detail) => detail,
            Err(err) => return Err(self.raise(err, "call signature")),
        };

        let mut ops: SmallVec<[Operand; 4]> = SmallVec::new();
        ops.push(target);
        let data = CallData {
            inst: InstData { inst, options: InstOptions::empty(), ops },
            args: vec![Operand::None; sign.arg_count()].into_boxed_slice(),
            rets: [Operand::None; 2],
            detail,
        };
        match self.alloc_node(NodeKind::Call(data), NodeFlags::CODE) {
            Some(id) => Ok(id),
            None => Err(self.raise(Error::NoHeapMemory, "call node")),
        }
    }

    /// Allocate and splice a call node at the cursor.
    pub fn add_call(
        &mut self,
        inst: InstId,
        target: Operand,
        sign: &FuncSignature,
    ) -> Result<NodeId, Error> {
        self.check_ready()?;
        let id = self.new_call(inst, target, sign)?;
        self.add_node(id);
        Ok(id)
    }

    /// Set the operand passed as call argument `index`.
    pub fn set_call_arg(
        &mut self,
        call: NodeId,
        index: usize,
        op: Operand,
    ) -> Result<(), Error> {
        match self.node_mut(call).and_then(|n| n.kind.as_call_mut()) {
            Some(data) if index < data.args.len() => {
                data.args[index] = op;
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Set the operand receiving call return value `index` (0 or 1).
    pub fn set_call_ret(
        &mut self,
        call: NodeId,
        index: usize,
        op: Operand,
    ) -> Result<(), Error> {
        match self.node_mut(call).and_then(|n| n.kind.as_call_mut()) {
            Some(data) if index < data.rets.len() => {
                data.rets[index] = op;
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Add `bytes` to the local or global const pool, creating the pool
    /// node on first use. Returns the pool's label and the constant's
    /// offset under it.
    pub fn embed_constant(
        &mut self,
        scope: ConstScope,
        bytes: &[u8],
    ) -> Result<(Label, u32), Error> {
        self.check_ready()?;

        let slot = match scope {
            ConstScope::Local => {
                if self.func.is_none() {
                    return Err(self.raise(
                        Error::InvalidState,
                        "local pool needs an open function",
                    ));
                }
                self.local_const_pool
            }
            ConstScope::Global => self.global_const_pool,
        };

        let node = match slot {
            Some(node) => node,
            None => {
                let node = match self.new_const_pool_node() {
                    Ok(node) => node,
                    Err(err) => return Err(self.raise(err, "pool node")),
                };
                match scope {
                    ConstScope::Local => self.local_const_pool = Some(node),
                    ConstScope::Global => self.global_const_pool = Some(node),
                }
                node
            }
        };

        let result = match self
            .node_mut(node)
            .and_then(|n| n.kind.as_const_pool_mut())
        {
            Some(data) => data
                .pool
                .add(bytes)
                .map(|offset| (data.label.label, offset)),
            None => Err(Error::InvalidState),
        };
        result.map_err(|err| self.raise(err, "pool constant"))
    }
}
