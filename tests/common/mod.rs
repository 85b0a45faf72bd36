//! Shared test fixtures: a recording emitter and holder setup

#![allow(dead_code)]

use mortar::code::{
    ArchKind,
    CodeHolder,
    CodeInfo,
    JumpRange,
    SectionId,
};
use mortar::const_pool::ConstPool;
use mortar::emitter::{
    AlignMode,
    Emitter,
    EmitterCore,
    EmitterKind,
    InstId,
    Label,
    Operand,
};
use mortar::error::Error;
use mortar::ir::Builder;

/// Instruction-id namespace used by the tests: ids 0x100..=0x11F are
/// branches, 0x100 is the unconditional jump.
pub const JMP: InstId = InstId(0x100);
pub const JE: InstId = InstId(0x101);
pub const MOV: InstId = InstId(0x001);
pub const ADD: InstId = InstId(0x002);
pub const CALL: InstId = InstId(0x050);

pub fn test_info() -> CodeInfo {
    CodeInfo::new(ArchKind::X64)
        .with_stack_alignment(16)
        .with_jump_range(JumpRange::new(0x100, 0x11F, 0x100))
}

pub fn new_code() -> CodeHolder {
    CodeHolder::with_info(test_info()).expect("holder init")
}

pub fn new_builder() -> (CodeHolder, Builder) {
    let code = new_code();
    let cb = Builder::attached(&code).expect("attach builder");
    (code, cb)
}

/// One observable call the recorder saw.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    SetInlineComment(Option<String>),
    SetOp4(Operand),
    SetOp5(Operand),
    SetOptions(u32),
    Align(AlignMode, u32),
    Embed(Vec<u8>),
    Bind(Label),
    EmbedConstPool(Label, usize),
    Comment(String),
    Emit {
        inst: InstId,
        ops: [Operand; 4],
        op4: Operand,
        op5: Operand,
        options: u32,
        comment: Option<String>,
    },
    Finalize,
}

impl Call {
    /// Whether the call is part of the emission stream proper (and not
    /// one-shot state plumbing).
    pub fn is_observable(&self) -> bool {
        !matches!(
            self,
            Call::SetInlineComment(_)
                | Call::SetOp4(_)
                | Call::SetOp5(_)
                | Call::SetOptions(_)
        )
    }
}

/// An emitter that records the call stream instead of encoding.
///
/// With `bind_through_holder` set, `bind` also goes through the holder
/// registry, which enforces one-way binding like a real assembler.
pub struct Recorder {
    core: EmitterCore,
    pub calls: Vec<Call>,
    pub bind_through_holder: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            core: EmitterCore::new(EmitterKind::Assembler),
            calls: Vec::new(),
            bind_through_holder: false,
        }
    }

    pub fn attached(code: &CodeHolder) -> Self {
        let mut recorder = Self::new();
        code.attach(&mut recorder).expect("attach recorder");
        recorder
    }

    /// Only the emission stream, without one-shot plumbing calls.
    pub fn observable(&self) -> Vec<Call> {
        self.calls
            .iter()
            .filter(|call| call.is_observable())
            .cloned()
            .collect()
    }
}

impl Emitter for Recorder {
    fn core(&self) -> &EmitterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EmitterCore {
        &mut self.core
    }

    fn on_attach(&mut self, _code: &CodeHolder) -> Result<(), Error> {
        Ok(())
    }

    fn on_detach(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn set_inline_comment(&mut self, text: &str) {
        self.calls
            .push(Call::SetInlineComment(Some(text.to_owned())));
        self.core.inline_comment = Some(text.into());
    }

    fn reset_inline_comment(&mut self) {
        self.calls.push(Call::SetInlineComment(None));
        self.core.inline_comment = None;
    }

    fn set_op4(&mut self, op: Operand) {
        self.calls.push(Call::SetOp4(op));
        self.core.options |= mortar::InstOptions::HAS_OP4;
        self.core.op4 = op;
    }

    fn set_op5(&mut self, op: Operand) {
        self.calls.push(Call::SetOp5(op));
        self.core.options |= mortar::InstOptions::HAS_OP5;
        self.core.op5 = op;
    }

    fn set_options(&mut self, options: mortar::InstOptions) {
        self.calls.push(Call::SetOptions(options.bits()));
        self.core.options = options;
    }

    fn emit_inst(
        &mut self,
        inst: InstId,
        o0: Operand,
        o1: Operand,
        o2: Operand,
        o3: Operand,
    ) -> Result<(), Error> {
        let call = Call::Emit {
            inst,
            ops: [o0, o1, o2, o3],
            op4: self.core.op4,
            op5: self.core.op5,
            options: self.core.options.bits(),
            comment: self.core.inline_comment.as_deref().map(str::to_owned),
        };
        self.calls.push(call);
        self.core.clear_one_shot();
        Ok(())
    }

    fn new_label(&mut self) -> Label {
        match self.code() {
            Some(code) => code.new_label_id().unwrap_or(Label::INVALID),
            None => Label::INVALID,
        }
    }

    fn bind(&mut self, label: Label) -> Result<(), Error> {
        self.calls.push(Call::Bind(label));
        if self.bind_through_holder {
            let code = self.code().ok_or(Error::NotInitialized)?;
            code.bind_label(label, SectionId::DEFAULT, 0)?;
        }
        Ok(())
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error> {
        self.calls.push(Call::Align(mode, alignment));
        Ok(())
    }

    fn embed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.calls.push(Call::Embed(data.to_vec()));
        Ok(())
    }

    fn embed_const_pool(
        &mut self,
        label: Label,
        pool: &ConstPool,
    ) -> Result<(), Error> {
        self.calls.push(Call::EmbedConstPool(label, pool.size()));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.calls.push(Call::Comment(text.to_owned()));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), Error> {
        self.calls.push(Call::Finalize);
        Ok(())
    }
}
