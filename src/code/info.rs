//! Target description shared by the holder and every attached emitter

/// A CPU architecture family.
#[derive(Eq, Hash, Copy, Clone, Debug, PartialEq, Default)]
pub enum ArchKind {
    /// Not set. A holder whose arch is `None` is uninitialized.
    #[default]
    None,
    X86,
    X64,
    A64,
    Riscv64,
}

impl ArchKind {
    /// The size of a GP register in bytes.
    #[inline(always)]
    pub const fn gp_size(self) -> u8 {
        match self {
            Self::None => 0,
            Self::X86 => 4,
            Self::X64 | Self::A64 | Self::Riscv64 => 8,
        }
    }

    /// Number of addressable GP registers.
    #[inline(always)]
    pub const fn gp_count(self) -> u8 {
        match self {
            Self::None => 0,
            Self::X86 => 8,
            Self::X64 => 16,
            Self::A64 | Self::Riscv64 => 32,
        }
    }
}

/// Sub-mode of an architecture (addressing width, compressed encodings).
/// Interpreted by the architecture layer; the IR only stores it.
#[derive(Eq, Hash, Copy, Clone, Debug, PartialEq, Default)]
pub struct ArchMode(pub u8);

/// Architecture type, mode, and derived register geometry.
#[derive(Eq, Hash, Copy, Clone, Debug, PartialEq, Default)]
pub struct Arch {
    pub kind: ArchKind,
    pub mode: ArchMode,
}

impl Arch {
    #[must_use]
    #[inline(always)]
    pub const fn new(kind: ArchKind) -> Self {
        Self { kind, mode: ArchMode(0) }
    }

    #[inline(always)]
    pub const fn gp_size(self) -> u8 {
        self.kind.gp_size()
    }

    #[inline(always)]
    pub const fn gp_count(self) -> u8 {
        self.kind.gp_count()
    }
}

/// Default calling-convention identifiers recorded in [`CodeInfo`].
#[derive(Eq, Hash, Copy, Clone, Debug, PartialEq, Default)]
pub enum CallConvId {
    #[default]
    None,
    Cdecl,
    StdCall,
    FastCall,
    SysV64,
    Win64,
}

/// The slice of an architecture's instruction-id namespace that encodes
/// branches, declared by the architecture layer so the IR can build jump
/// nodes without interpreting ids itself.
#[derive(Eq, Hash, Copy, Clone, Debug, PartialEq)]
pub struct JumpRange {
    /// First branch id (inclusive).
    pub lo: u32,
    /// Last branch id (inclusive).
    pub hi: u32,
    /// The unconditional jump id inside the range.
    pub uncond: u32,
}

impl JumpRange {
    /// Empty range: no instruction id builds a jump node.
    pub const NONE: Self = Self { lo: 1, hi: 0, uncond: 0 };

    #[must_use]
    #[inline(always)]
    pub const fn new(lo: u32, hi: u32, uncond: u32) -> Self {
        Self { lo, hi, uncond }
    }

    #[must_use]
    #[inline(always)]
    pub const fn contains(&self, id: u32) -> bool {
        self.lo <= id && id <= self.hi
    }
}

impl Default for JumpRange {
    #[inline(always)]
    fn default() -> Self {
        Self::NONE
    }
}

/// Everything the emitters need to know about the target. A plain value
/// compared field by field.
#[derive(Eq, Copy, Clone, Debug, PartialEq, Default)]
pub struct CodeInfo {
    pub arch: Arch,
    /// Natural stack alignment the target mandates (0 if unknown).
    pub stack_alignment: u8,
    pub cdecl_conv: CallConvId,
    pub std_conv: CallConvId,
    pub fast_conv: CallConvId,
    pub base_address: Option<u64>,
    pub jump_range: JumpRange,
}

impl CodeInfo {
    #[must_use]
    pub fn new(kind: ArchKind) -> Self {
        Self { arch: Arch::new(kind), ..Self::default() }
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_initialized(&self) -> bool {
        !matches!(self.arch.kind, ArchKind::None)
    }

    #[must_use]
    #[inline(always)]
    pub fn with_stack_alignment(mut self, alignment: u8) -> Self {
        self.stack_alignment = alignment;
        self
    }

    #[must_use]
    #[inline(always)]
    pub fn with_base_address(mut self, address: u64) -> Self {
        self.base_address = Some(address);
        self
    }

    #[must_use]
    #[inline(always)]
    pub fn with_jump_range(mut self, range: JumpRange) -> Self {
        self.jump_range = range;
        self
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
