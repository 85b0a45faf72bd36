pub mod info;
pub mod section;
pub mod label;
pub mod reloc;
pub mod holder;

pub use info::{Arch, ArchKind, ArchMode, CallConvId, CodeInfo, JumpRange};
pub use section::{CodeBuffer, Section, SectionFlags, SectionId};
pub use label::{Label, LabelEntry, LabelLink, LinkId, UNBOUND_OFFSET};
pub use reloc::{RelocEntry, RelocMode, RelocSize};
pub use holder::CodeHolder;
