//! Record a small countdown loop as IR, then replay it through a
//! printing emitter to show the exact call stream an encoder would see.

use mortar::code::{ArchKind, CodeHolder, CodeInfo, JumpRange};
use mortar::const_pool::ConstPool;
use mortar::emitter::{
    AlignMode,
    Emitter,
    EmitterCore,
    EmitterKind,
    InstId,
    Label,
    Operand,
    Reg,
};
use mortar::error::Error;
use mortar::ir::Builder;

const MOV: InstId = InstId(0x01);
const SUB: InstId = InstId(0x02);
const JNZ: InstId = InstId(0x101);

fn demo_info() -> CodeInfo {
    CodeInfo::new(ArchKind::X64)
        .with_stack_alignment(16)
        .with_jump_range(JumpRange::new(0x100, 0x11F, 0x100))
}

/// An emitter that prints every call instead of encoding it.
struct Printer {
    core: EmitterCore,
}

impl Printer {
    fn new() -> Self {
        Self { core: EmitterCore::new(EmitterKind::Assembler) }
    }
}

impl Emitter for Printer {
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

    fn emit_inst(
        &mut self,
        inst: InstId,
        o0: Operand,
        o1: Operand,
        o2: Operand,
        o3: Operand,
    ) -> Result<(), Error> {
        let annotation = self
            .core
            .inline_comment
            .as_deref()
            .map(|text| format!("  ; {text}"))
            .unwrap_or_default();
        println!("  {inst:?} {o0:?}, {o1:?}, {o2:?}, {o3:?}{annotation}");
        self.core.clear_one_shot();
        Ok(())
    }

    fn new_label(&mut self) -> Label {
        Label::INVALID
    }

    fn bind(&mut self, label: Label) -> Result<(), Error> {
        println!("{label:?}:");
        Ok(())
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error> {
        println!("  .align {mode:?} {alignment}");
        Ok(())
    }

    fn embed(&mut self, data: &[u8]) -> Result<(), Error> {
        println!("  .bytes {data:02X?}");
        Ok(())
    }

    fn embed_const_pool(
        &mut self,
        label: Label,
        pool: &ConstPool,
    ) -> Result<(), Error> {
        println!("  .pool {label:?} ({size} bytes)", size = pool.size());
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        println!("  ; {text}");
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let code = CodeHolder::with_info(demo_info())?;
    let mut cb = Builder::attached(&code)?;

    let counter = Reg::gp(0);
    let top = cb.new_label();

    cb.align(AlignMode::Code, 16)?;
    cb.set_inline_comment("counter = 10");
    cb.emit(MOV, &[Operand::Reg(counter), Operand::from(10i64)])?;
    cb.bind(top)?;
    cb.emit(SUB, &[Operand::Reg(counter), Operand::from(1i64)])?;
    cb.emit(JNZ, &[Operand::Label(top)])?;
    cb.comment("loop done")?;
    cb.embed(&[0xDE, 0xAD, 0xBE, 0xEF])?;

    cb.finalize()?;

    println!("recorded {count} nodes; replaying:", count = cb.list_len());
    let mut printer = Printer::new();
    cb.serialize(&mut printer)?;

    Ok(())
}
