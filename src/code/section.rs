//! Sections and their code buffers

use crate::error::Error;

use smallvec::SmallVec;

use bitflags::bitflags;

bitflags! {
    /// Section attribute bits.
    #[derive(Eq, Copy, Clone, Debug, PartialEq, Default)]
    pub struct SectionFlags: u32 {
        /// Executable (.text-like).
        const EXEC  = 0x0000_0001;
        /// Read-only.
        const CONST = 0x0000_0002;
        /// Zero-initialized by the loader (BSS-like).
        const ZERO  = 0x0000_0004;
        /// Informative / comment section, not loaded.
        const INFO  = 0x0000_0008;
    }
}

/// Longest section name the holder accepts (PE allows 8, ELF is free;
/// the buffer holds 35 + NUL like the original tooling this mirrors).
pub const SECTION_NAME_MAX: usize = 35;

/// Identifier of a section inside one holder.
#[derive(Eq, Ord, Hash, Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct SectionId(pub u32);

impl SectionId {
    /// The statically-present default section.
    pub const DEFAULT: Self = Self(0);
}

/// Raw byte storage of one section.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    data: Vec<u8>,
    /// A fixed-size buffer refuses to grow past its current capacity.
    fixed_size: bool,
}

impl CodeBuffer {
    #[must_use]
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[must_use]
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline(always)]
    pub fn set_fixed_size(&mut self, fixed: bool) {
        self.fixed_size = fixed;
    }

    /// Make room for `n` more bytes of content.
    pub fn grow(&mut self, n: usize) -> Result<(), Error> {
        self.reserve(self.data.len() + n)
    }

    /// Ensure capacity for at least `n` bytes total.
    pub fn reserve(&mut self, n: usize) -> Result<(), Error> {
        if n <= self.data.capacity() {
            return Ok(());
        }
        if self.fixed_size {
            return Err(Error::NoHeapMemory);
        }
        self.data.reserve(n - self.data.len());
        Ok(())
    }

    /// Append bytes, growing as needed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.grow(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append `n` copies of `fill`.
    pub fn append_fill(&mut self, n: usize, fill: u8) -> Result<(), Error> {
        self.grow(n)?;
        self.data.resize(self.data.len() + n, fill);
        Ok(())
    }
}

/// A section descriptor plus its byte buffer.
#[derive(Debug)]
pub struct Section {
    id: SectionId,
    flags: SectionFlags,
    /// Required alignment, 0 when the section has no requirement.
    alignment: u32,
    name: SmallVec<[u8; 36]>,
    pub buffer: CodeBuffer,
}

impl Section {
    pub(crate) fn new(
        id: SectionId,
        name: &[u8],
        flags: SectionFlags,
        alignment: u32,
    ) -> Result<Self, Error> {
        if name.len() > SECTION_NAME_MAX {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            id,
            flags,
            alignment,
            name: SmallVec::from_slice(name),
            buffer: CodeBuffer::default(),
        })
    }

    #[must_use]
    #[inline(always)]
    pub fn id(&self) -> SectionId {
        self.id
    }

    #[must_use]
    #[inline(always)]
    pub fn flags(&self) -> SectionFlags {
        self.flags
    }

    #[must_use]
    #[inline(always)]
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    #[must_use]
    #[inline(always)]
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}
