//! The abstract emission surface shared by all code generators
//!
//! An emitter is anything that accepts the `emit`/`bind`/`align`/`embed`
//! family of calls: an encoding assembler, the recording
//! [`Builder`](crate::ir::Builder), or a register-allocating compiler on
//! top of it. The shared per-emitter state lives in [`EmitterCore`];
//! implementations expose it through [`Emitter::core`] and get the
//! common behavior (one-shot next-instruction state, the error latch,
//! attach bookkeeping) as provided methods.

pub mod operand;

pub use operand::{
    Imm,
    InstId,
    Label,
    Mem,
    Operand,
    Reg,
    RegKind,
    VirtId,
};

use crate::code::{CodeHolder, CodeInfo};
use crate::const_pool::ConstPool;
use crate::error::Error;

use bitflags::bitflags;

bitflags! {
    /// Global hints that shape machine-code generation downstream.
    #[derive(Eq, Copy, Clone, Debug, PartialEq, Default)]
    pub struct Hints: u32 {
        /// Emit optimized code-alignment sequences.
        const OPTIMIZED_ALIGN = 0x0000_0001;
        /// Emit jump-prediction prefixes where the target supports them.
        const PREDICTED_JUMPS = 0x0000_0002;
    }
}

bitflags! {
    /// Options merged into the next emitted instruction.
    #[derive(Eq, Copy, Clone, Debug, PartialEq, Default)]
    pub struct InstOptions: u32 {
        /// Validate the instruction before recording/encoding it.
        /// Consumed by the validating layer; never stored on IR nodes.
        const STRICT_VALIDATION = 0x0000_0002;

        /// The 5th operand slot (`op4`) is in use.
        const HAS_OP4 = 0x0000_0020;
        /// The 6th operand slot (`op5`) is in use.
        const HAS_OP5 = 0x0000_0040;
        /// The write-mask operand slot is in use.
        const HAS_OP_MASK = 0x0000_0080;

        /// Don't cross-link this jump to its target label.
        const UNFOLLOW = 0x0000_0100;
        /// Branch-taken hint for conditional jumps.
        const TAKEN = 0x0000_0200;
        /// The destination register is fully overwritten (liveness hint).
        const OVERWRITE = 0x0000_0400;
    }
}

/// What kind of emitter an implementation is.
#[derive(Eq, Copy, Clone, Debug, PartialEq, Default)]
pub enum EmitterKind {
    #[default]
    None,
    /// Encodes bytes immediately.
    Assembler,
    /// Records IR nodes for later replay.
    Builder,
    /// Builder plus register allocation.
    Compiler,
}

/// Align-mode of an [`Emitter::align`] request.
#[derive(Eq, Copy, Clone, Debug, PartialEq)]
pub enum AlignMode {
    /// Align executable code (target may use multi-byte nops).
    Code,
    /// Align non-executable data.
    Data,
    /// Align with a plain zero fill.
    Zero,
}

/// State every emitter carries: the holder attachment, the error latch,
/// and the one-shot fields applied to the next instruction only.
#[derive(Default)]
pub struct EmitterCore {
    pub(crate) kind: EmitterKind,

    pub(crate) code: Option<CodeHolder>,
    pub(crate) emitter_id: u32,
    pub(crate) attach_gen: u64,
    pub(crate) info: CodeInfo,

    pub(crate) last_error: Option<Error>,
    pub(crate) finalized: bool,

    pub(crate) global_hints: Hints,
    pub(crate) global_options: InstOptions,

    // One-shot state, consumed and cleared by every `emit_inst`.
    // Public: emitter implementations outside this crate service it.
    pub options: InstOptions,
    pub op4: Operand,
    pub op5: Operand,
    pub op_mask: Operand,
    pub inline_comment: Option<Box<str>>,
}

impl EmitterCore {
    #[must_use]
    pub fn new(kind: EmitterKind) -> Self {
        Self { kind, ..Self::default() }
    }

    #[must_use]
    #[inline(always)]
    pub fn code(&self) -> Option<&CodeHolder> {
        self.code.as_ref()
    }

    #[must_use]
    #[inline(always)]
    pub fn emitter_id(&self) -> u32 {
        self.emitter_id
    }

    #[must_use]
    #[inline(always)]
    pub fn info(&self) -> &CodeInfo {
        &self.info
    }

    /// Whether `finalize` completed on this emitter.
    #[must_use]
    #[inline(always)]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    #[must_use]
    #[inline(always)]
    pub fn global_hints(&self) -> Hints {
        self.global_hints
    }

    #[must_use]
    #[inline(always)]
    pub fn global_options(&self) -> InstOptions {
        self.global_options
    }

    pub(crate) fn begin_attach(
        &mut self,
        code: CodeHolder,
        emitter_id: u32,
        attach_gen: u64,
        info: CodeInfo,
        global_hints: Hints,
        global_options: InstOptions,
    ) {
        self.code = Some(code);
        self.emitter_id = emitter_id;
        self.attach_gen = attach_gen;
        self.info = info;
        self.global_hints = global_hints;
        self.global_options = global_options;
        self.finalized = false;
    }

    pub(crate) fn end_detach(&mut self) {
        self.code = None;
        self.emitter_id = 0;
        self.attach_gen = 0;
        self.info.reset();
        self.clear_one_shot();
    }

    /// Reset the next-instruction state. Every `emit_inst`
    /// implementation calls this after consuming it.
    pub fn clear_one_shot(&mut self) {
        self.options = InstOptions::empty();
        self.op4 = Operand::None;
        self.op5 = Operand::None;
        self.op_mask = Operand::None;
        self.inline_comment = None;
    }
}

/// The abstract emission surface. Object-safe: the serializer replays
/// onto `&mut dyn Emitter`.
pub trait Emitter {
    fn core(&self) -> &EmitterCore;
    fn core_mut(&mut self) -> &mut EmitterCore;

    // ----- EVENTS -----

    /// Called by [`CodeHolder::attach`] after the core attachment state
    /// is in place. Reject here (e.g. wrong architecture) to abort.
    fn on_attach(&mut self, code: &CodeHolder) -> Result<(), Error>;

    /// Called on detach; drops emitter-local state.
    fn on_detach(&mut self) -> Result<(), Error>;

    // ----- CODE GENERATION -----

    /// The atomic emission primitive: four positional operands, with
    /// positions 4-5 and the write-mask taken from the one-shot slots.
    /// Consumes and clears all one-shot state.
    fn emit_inst(
        &mut self,
        inst: InstId,
        o0: Operand,
        o1: Operand,
        o2: Operand,
        o3: Operand,
    ) -> Result<(), Error>;

    /// Create a new label registered with the holder. Returns
    /// [`Label::INVALID`] (and latches an error) on failure.
    #[track_caller]
    fn new_label(&mut self) -> Label;

    /// Bind `label` at the current position.
    fn bind(&mut self, label: Label) -> Result<(), Error>;

    /// Align the current position.
    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error>;

    /// Embed raw bytes.
    fn embed(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Align to the pool's requirement, bind `label`, embed the pool.
    fn embed_const_pool(
        &mut self,
        label: Label,
        pool: &ConstPool,
    ) -> Result<(), Error>;

    /// Emit a standalone comment.
    fn comment(&mut self, text: &str) -> Result<(), Error>;

    /// Signal end of emission.
    fn finalize(&mut self) -> Result<(), Error>;

    // ----- PROVIDED: IDENTITY & ATTACHMENT -----

    #[inline(always)]
    fn kind(&self) -> EmitterKind {
        self.core().kind
    }

    /// The holder this emitter is attached to, if any.
    #[inline(always)]
    fn code(&self) -> Option<CodeHolder> {
        self.core().code.clone()
    }

    /// Resolve the attached holder, detecting a holder-side `reset`:
    /// a stale attachment runs `on_detach` cleanup and reports
    /// [`Error::InvalidState`]; a missing one reports
    /// [`Error::NotInitialized`].
    fn check_attached(&mut self) -> Result<CodeHolder, Error> {
        let stale = match self.core().code() {
            None => return Err(Error::NotInitialized),
            Some(code) => code.generation() != self.core().attach_gen,
        };
        if stale {
            let _ = self.on_detach();
            self.core_mut().end_detach();
            return Err(Error::InvalidState);
        }
        Ok(self.core().code.clone().expect("attachment checked above"))
    }

    /// Detach from the current holder.
    fn detach(&mut self) -> Result<(), Error>
    where
        Self: Sized,
    {
        let code = self.code().ok_or(Error::NotInitialized)?;
        code.detach(self)
    }

    #[inline(always)]
    fn is_label_valid(&self, label: Label) -> bool {
        self.core()
            .code()
            .is_some_and(|code| code.is_label_valid(label))
    }

    // ----- PROVIDED: ERROR LATCH -----

    #[inline(always)]
    fn last_error(&self) -> Option<Error> {
        self.core().last_error
    }

    /// Report `err` through the holder's error handler; unless the
    /// handler claims it, latch it as the last error. Returns `err`
    /// either way.
    fn raise(&mut self, err: Error, message: &str) -> Error {
        let handled = self
            .core()
            .code
            .clone()
            .is_some_and(|code| code.handle_error(err, message));
        if !handled {
            self.core_mut().last_error = Some(err);
        }
        err
    }

    /// Leave the error state.
    #[inline(always)]
    fn reset_last_error(&mut self) {
        self.core_mut().last_error = None;
    }

    // ----- PROVIDED: ONE-SHOT NEXT-INSTRUCTION STATE -----

    #[inline(always)]
    fn options(&self) -> InstOptions {
        self.core().options
    }

    #[inline(always)]
    fn set_options(&mut self, options: InstOptions) {
        self.core_mut().options = options;
    }

    #[inline(always)]
    fn add_options(&mut self, options: InstOptions) {
        self.core_mut().options |= options;
    }

    #[inline(always)]
    fn reset_options(&mut self) {
        self.core_mut().options = InstOptions::empty();
    }

    #[inline(always)]
    fn has_op4(&self) -> bool {
        self.options().contains(InstOptions::HAS_OP4)
    }

    #[inline(always)]
    fn has_op5(&self) -> bool {
        self.options().contains(InstOptions::HAS_OP5)
    }

    #[inline(always)]
    fn has_op_mask(&self) -> bool {
        self.options().contains(InstOptions::HAS_OP_MASK)
    }

    #[inline(always)]
    fn op4(&self) -> Operand {
        self.core().op4
    }

    #[inline(always)]
    fn op5(&self) -> Operand {
        self.core().op5
    }

    #[inline(always)]
    fn op_mask(&self) -> Operand {
        self.core().op_mask
    }

    #[inline(always)]
    fn set_op4(&mut self, op: Operand) {
        let core = self.core_mut();
        core.options |= InstOptions::HAS_OP4;
        core.op4 = op;
    }

    #[inline(always)]
    fn set_op5(&mut self, op: Operand) {
        let core = self.core_mut();
        core.options |= InstOptions::HAS_OP5;
        core.op5 = op;
    }

    #[inline(always)]
    fn set_op_mask(&mut self, op: Operand) {
        let core = self.core_mut();
        core.options |= InstOptions::HAS_OP_MASK;
        core.op_mask = op;
    }

    #[inline(always)]
    fn inline_comment(&self) -> Option<&str> {
        self.core().inline_comment.as_deref()
    }

    /// Annotate the next instruction. Cleared by every `emit_inst`.
    #[inline(always)]
    fn set_inline_comment(&mut self, text: &str) {
        self.core_mut().inline_comment = Some(text.into());
    }

    #[inline(always)]
    fn reset_inline_comment(&mut self) {
        self.core_mut().inline_comment = None;
    }

    // ----- PROVIDED: CONVENIENCE EMIT -----

    /// Emit with 0 to 6 operands; positions 4-5 route through the
    /// one-shot extra slots exactly as if set by hand.
    fn emit(&mut self, inst: InstId, ops: &[Operand]) -> Result<(), Error> {
        if ops.len() > 6 {
            return Err(self.raise(
                Error::InvalidArgument,
                "at most 6 operands per instruction",
            ));
        }
        if ops.len() > 4 {
            self.set_op4(ops[4]);
        }
        if ops.len() > 5 {
            self.set_op5(ops[5]);
        }
        let pick =
            |index: usize| ops.get(index).copied().unwrap_or(Operand::None);
        self.emit_inst(inst, pick(0), pick(1), pick(2), pick(3))
    }
}
