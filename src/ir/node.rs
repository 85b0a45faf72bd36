//! IR nodes: one heterogeneous record per emitter call
//!
//! Nodes live in the builder's pool and point at each other by index, so
//! the doubly linked list, the cursor, and the jump cross-links are all
//! `Option<NodeId>` pairs co-validated by the pool's lifetime. A node is
//! never freed individually; removal only detaches it from the list.

use crate::const_pool::ConstPool;
use crate::emitter::{InstId, InstOptions, Label, Operand, VirtId};
use crate::ir::func::FuncDetail;
use crate::zone::ZoneSpan;

use bitflags::bitflags;

use smallvec::SmallVec;

/// Index of a node inside one builder's pool.
///
/// Valid until that builder resets or detaches.
#[derive(Eq, Ord, Hash, Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[must_use]
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Node attribute bits.
    #[derive(Eq, Copy, Clone, Debug, PartialEq, Default)]
    pub struct NodeFlags: u16 {
        /// Contributes executable bytes when replayed.
        const CODE        = 0x0001;
        /// Contributes data bytes when replayed.
        const DATA        = 0x0002;
        /// Replays to nothing (comments, sentinels).
        const INFORMATIVE = 0x0004;
        /// Safe for passes to remove.
        const REMOVABLE   = 0x0008;
        /// Unconditional jump.
        const JMP         = 0x0010;
        /// Conditional jump.
        const JCC         = 0x0020;
        /// Branch predicted taken.
        const TAKEN       = 0x0040;
        /// Function return.
        const RET         = 0x0080;
    }
}

/// Data payloads up to this size are stored inline in the node; larger
/// ones spill to the builder's data zone.
pub const INLINE_DATA_SIZE: usize = 16;

/// Payload of a label-like node (also embedded in const-pool and
/// function nodes, which are labels with extras).
#[derive(Clone, Debug)]
pub struct LabelData {
    pub label: Label,
    /// Head of the intrusive list of jumps targeting this label,
    /// threaded through [`JumpData::jump_next`].
    pub from: Option<NodeId>,
    /// Number of jumps in that list.
    pub num_refs: u32,
}

impl LabelData {
    #[must_use]
    #[inline(always)]
    pub(crate) const fn new(label: Label) -> Self {
        Self { label, from: None, num_refs: 0 }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct AlignData {
    pub mode: crate::emitter::AlignMode,
    pub alignment: u32,
}

/// Bytes recorded by `embed`.
#[derive(Clone, Debug)]
pub enum DataBody {
    Inline { buf: [u8; INLINE_DATA_SIZE], len: u8 },
    Spilled(ZoneSpan),
}

impl DataBody {
    #[must_use]
    #[inline(always)]
    pub fn len(&self) -> usize {
        match self {
            Self::Inline { len, .. } => *len as usize,
            Self::Spilled(span) => span.len(),
        }
    }

    #[must_use]
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

/// Payload shared by plain instructions, jumps, and calls.
#[derive(Clone, Debug)]
pub struct InstData {
    pub inst: InstId,
    pub options: InstOptions,
    pub ops: SmallVec<[Operand; 4]>,
}

impl InstData {
    #[must_use]
    #[inline(always)]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Clone, Debug)]
pub struct JumpData {
    pub inst: InstData,
    /// Canonical label node of the target, or `None` for an unfollowed
    /// jump (non-label operand or `UNFOLLOW` option).
    pub target: Option<NodeId>,
    /// Next jump in the target's incoming list.
    pub jump_next: Option<NodeId>,
}

#[derive(Clone)]
pub struct CallData {
    pub inst: InstData,
    pub detail: FuncDetail,
    /// Argument operands, one slot per signature argument.
    pub args: Box<[Operand]>,
    /// Return-value operands.
    pub rets: [Operand; 2],
}

pub struct ConstPoolData {
    pub label: LabelData,
    pub pool: ConstPool,
}

pub struct FuncData {
    pub label: LabelData,
    /// Label node bound at the function's epilogue position.
    pub exit: NodeId,
    /// Sentinel closing the function's body in the list.
    pub end: NodeId,
    pub detail: FuncDetail,
    /// Virtual registers assigned to arguments via `set_arg`.
    pub args: Box<[Option<VirtId>]>,
    pub finished: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct RetData {
    pub ops: [Operand; 2],
}

/// The tagged variant a node carries.
pub enum NodeKind {
    /// Boundary marker; replays to nothing.
    Sentinel,
    Label(LabelData),
    Align(AlignData),
    Data(DataBody),
    ConstPool(ConstPoolData),
    /// Standalone comment; the text sits in the node's inline-comment
    /// slot.
    Comment,
    Inst(InstData),
    Jump(JumpData),
    Call(CallData),
    Func(FuncData),
    Ret(RetData),
}

variant_accessors! {
    NodeKind,
    Label => label: LabelData,
    Align => align: AlignData,
    Data => data: DataBody,
    ConstPool => const_pool: ConstPoolData,
    Inst => inst: InstData,
    Jump => jump: JumpData,
    Call => call: CallData,
    Func => func: FuncData,
    Ret => ret: RetData,
}

impl NodeKind {
    #[must_use]
    #[inline(always)]
    pub const fn is_comment(&self) -> bool {
        matches!(self, Self::Comment)
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel)
    }
}

/// One IR node: intrusive list header plus the tagged payload.
pub struct Node {
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    pub(crate) flags: NodeFlags,
    /// Position scratch maintained by later passes (flow analysis).
    pub(crate) flow_id: u16,
    /// Annotation carried to the replayed emitter call. For a comment
    /// node this is the comment text itself.
    pub(crate) inline_comment: Option<ZoneSpan>,
    pub(crate) kind: NodeKind,
}

impl Node {
    #[must_use]
    pub(crate) fn new(kind: NodeKind, flags: NodeFlags) -> Self {
        Self {
            prev: None,
            next: None,
            flags,
            flow_id: 0,
            inline_comment: None,
            kind,
        }
    }

    #[must_use]
    #[inline(always)]
    pub fn prev(&self) -> Option<NodeId> {
        self.prev
    }

    #[must_use]
    #[inline(always)]
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    #[must_use]
    #[inline(always)]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    #[inline(always)]
    pub fn add_flags(&mut self, flags: NodeFlags) {
        self.flags |= flags;
    }

    #[must_use]
    #[inline(always)]
    pub fn flow_id(&self) -> u16 {
        self.flow_id
    }

    #[inline(always)]
    pub fn set_flow_id(&mut self, flow_id: u16) {
        self.flow_id = flow_id;
    }

    #[must_use]
    #[inline(always)]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    #[inline(always)]
    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    #[must_use]
    #[inline(always)]
    pub fn is_jmp_or_jcc(&self) -> bool {
        self.flags.intersects(NodeFlags::JMP | NodeFlags::JCC)
    }

    /// Label payload of label-like nodes (label, const pool, function).
    #[must_use]
    pub fn label_data(&self) -> Option<&LabelData> {
        match &self.kind {
            NodeKind::Label(data) => Some(data),
            NodeKind::ConstPool(data) => Some(&data.label),
            NodeKind::Func(data) => Some(&data.label),
            _ => None,
        }
    }

    pub(crate) fn label_data_mut(&mut self) -> Option<&mut LabelData> {
        match &mut self.kind {
            NodeKind::Label(data) => Some(data),
            NodeKind::ConstPool(data) => Some(&mut data.label),
            NodeKind::Func(data) => Some(&mut data.label),
            _ => None,
        }
    }

    /// Instruction payload of instruction-like nodes (inst, jump, call).
    #[must_use]
    pub fn inst_data(&self) -> Option<&InstData> {
        match &self.kind {
            NodeKind::Inst(data) => Some(data),
            NodeKind::Jump(data) => Some(&data.inst),
            NodeKind::Call(data) => Some(&data.inst),
            _ => None,
        }
    }

    pub(crate) fn inst_data_mut(&mut self) -> Option<&mut InstData> {
        match &mut self.kind {
            NodeKind::Inst(data) => Some(data),
            NodeKind::Jump(data) => Some(&mut data.inst),
            NodeKind::Call(data) => Some(&mut data.inst),
            _ => None,
        }
    }
}
