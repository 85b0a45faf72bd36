#[macro_use]
pub mod util;

pub mod error;
pub mod zone;
pub mod const_pool;
pub mod code;
pub mod emitter;
pub mod ir;

pub use error::{Error, ErrorHandler};
pub use code::{ArchKind, CodeHolder, CodeInfo, JumpRange};
pub use const_pool::ConstPool;
pub use emitter::{
    AlignMode,
    Emitter,
    EmitterKind,
    Imm,
    InstId,
    InstOptions,
    Label,
    Mem,
    Operand,
    Reg,
};
pub use ir::Builder;
