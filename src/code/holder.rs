//! Code holder: the hub that owns sections, labels, and relocations
//!
//! Emitters attach to a holder and go through it for every label or
//! section operation. The holder is handed around as a cheap clone of a
//! shared handle; the cooperative single-threaded model makes interior
//! mutability through `RefCell` safe here.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::code::info::CodeInfo;
use crate::code::label::{Label, LabelEntry, LabelLink, LinkId};
use crate::code::reloc::RelocEntry;
use crate::code::section::{Section, SectionFlags, SectionId};
use crate::emitter::{Emitter, EmitterKind, Hints, InstOptions};
use crate::error::{Error, ErrorHandler};

use smallvec::SmallVec;

struct Inner {
    info: CodeInfo,
    /// Settings are frozen while any emitter is attached.
    locked: bool,

    global_hints: Hints,
    global_options: InstOptions,

    attached: Vec<u32>,
    next_emitter_id: u32,
    /// Bumped by `reset`; emitters holding an older value know they were
    /// mass-detached and clean themselves up on their next operation.
    generation: u64,
    /// Id of the attached byte-encoding emitter, if one registered.
    primary_emitter: Option<u32>,

    error_handler: Option<Box<dyn ErrorHandler>>,

    trampolines_size: u32,

    sections: Vec<Section>,
    labels: Vec<LabelEntry>,
    links: Vec<LabelLink>,
    free_links: Vec<LinkId>,
    relocations: Vec<RelocEntry>,
}

impl Inner {
    fn new() -> Self {
        Self {
            info: CodeInfo::default(),
            locked: false,
            global_hints: Hints::OPTIMIZED_ALIGN,
            global_options: InstOptions::empty(),
            attached: Vec::new(),
            next_emitter_id: 1,
            generation: 0,
            primary_emitter: None,
            error_handler: None,
            trampolines_size: 0,
            sections: Vec::new(),
            labels: Vec::new(),
            links: Vec::new(),
            free_links: Vec::new(),
            relocations: Vec::new(),
        }
    }
}

/// Shared handle to the code state. Clones refer to the same holder.
#[derive(Clone)]
pub struct CodeHolder {
    inner: Rc<RefCell<Inner>>,
}

impl Default for CodeHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeHolder {
    /// An uninitialized holder; call [`CodeHolder::init`] before use.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(Inner::new())) }
    }

    /// A holder initialized for `info` in one step.
    pub fn with_info(info: CodeInfo) -> Result<Self, Error> {
        let holder = Self::new();
        holder.init(info)?;
        Ok(holder)
    }

    /// Whether `self` and `other` are handles to the same holder.
    #[must_use]
    #[inline(always)]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ----- INIT / RESET -----

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.borrow().info.is_initialized()
    }

    /// Store the code info and create the default section.
    pub fn init(&self, info: CodeInfo) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.info.is_initialized() {
            return Err(Error::AlreadyInitialized);
        }
        if !info.is_initialized() {
            return Err(Error::InvalidArch);
        }
        inner.info = info;
        if inner.sections.is_empty() {
            let section = Section::new(
                SectionId::DEFAULT,
                b".text",
                SectionFlags::EXEC | SectionFlags::CONST,
                0,
            )?;
            inner.sections.push(section);
        }
        Ok(())
    }

    /// Drop all code state and mass-detach emitters.
    ///
    /// Emitters cannot be reached from here; instead the holder's
    /// generation is bumped and each previously attached emitter detects
    /// the stale generation on its next operation, runs its own
    /// `on_detach` cleanup, and reports [`Error::InvalidState`].
    pub fn reset(&self, release_memory: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.generation += 1;
        inner.attached.clear();
        inner.primary_emitter = None;
        inner.locked = false;

        inner.info.reset();
        inner.global_options = InstOptions::empty();
        inner.trampolines_size = 0;
        inner.labels.clear();
        inner.links.clear();
        inner.free_links.clear();
        inner.relocations.clear();
        inner.sections.clear();
        if release_memory {
            inner.labels.shrink_to_fit();
            inner.links.shrink_to_fit();
            inner.relocations.shrink_to_fit();
            inner.sections.shrink_to_fit();
        }
    }

    // ----- ATTACH / DETACH -----

    /// Attach `emitter` to this holder.
    ///
    /// Fails with [`Error::InvalidState`] if the emitter is already
    /// attached anywhere, and with whatever `on_attach` reports (for
    /// example [`Error::InvalidArch`] against an uninitialized holder).
    pub fn attach(&self, emitter: &mut dyn Emitter) -> Result<(), Error> {
        if emitter.core().code().is_some() {
            return Err(Error::InvalidState);
        }

        let (id, generation, info, hints, options) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_emitter_id;
            inner.next_emitter_id += 1;
            (
                id,
                inner.generation,
                inner.info,
                inner.global_hints,
                inner.global_options,
            )
        };

        emitter
            .core_mut()
            .begin_attach(self.clone(), id, generation, info, hints, options);

        if let Err(err) = emitter.on_attach(self) {
            emitter.core_mut().end_detach();
            return Err(err);
        }

        let mut inner = self.inner.borrow_mut();
        inner.attached.push(id);
        inner.locked = true;
        if inner.primary_emitter.is_none()
            && emitter.kind() == EmitterKind::Assembler
        {
            inner.primary_emitter = Some(id);
        }
        Ok(())
    }

    /// Detach `emitter` from this holder, running its `on_detach`.
    pub fn detach(&self, emitter: &mut dyn Emitter) -> Result<(), Error> {
        let attached_here = emitter
            .core()
            .code()
            .is_some_and(|code| code.ptr_eq(self));
        if !attached_here {
            return Err(Error::InvalidState);
        }

        let id = emitter.core().emitter_id();
        emitter.on_detach()?;
        emitter.core_mut().end_detach();

        let mut inner = self.inner.borrow_mut();
        inner.attached.retain(|&attached| attached != id);
        if inner.primary_emitter == Some(id) {
            inner.primary_emitter = None;
        }
        if inner.attached.is_empty() {
            inner.locked = false;
        }
        Ok(())
    }

    /// Ask attached emitters to flush lazy state.
    ///
    /// Every emitter in this crate writes through the shared handle, so
    /// there is nothing to flush; the hook exists for emitters that
    /// buffer (an encoding assembler caching its write cursor would
    /// override this behavior on its side).
    pub fn sync(&self) {}

    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.inner.borrow().attached.len()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    #[must_use]
    pub fn primary_emitter(&self) -> Option<u32> {
        self.inner.borrow().primary_emitter
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.borrow().locked
    }

    // ----- CODE INFORMATION -----

    #[must_use]
    pub fn info(&self) -> CodeInfo {
        self.inner.borrow().info
    }

    #[must_use]
    pub fn base_address(&self) -> Option<u64> {
        self.inner.borrow().info.base_address
    }

    /// Change the base address. Refused while emitters are attached.
    pub fn set_base_address(&self, address: u64) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.locked {
            return Err(Error::InvalidState);
        }
        inner.info.base_address = Some(address);
        Ok(())
    }

    #[must_use]
    pub fn global_hints(&self) -> Hints {
        self.inner.borrow().global_hints
    }

    pub fn set_global_hints(&self, hints: Hints) {
        self.inner.borrow_mut().global_hints = hints;
    }

    #[must_use]
    pub fn global_options(&self) -> InstOptions {
        self.inner.borrow().global_options
    }

    pub fn set_global_options(&self, options: InstOptions) {
        self.inner.borrow_mut().global_options = options;
    }

    /// Total bytes across all section buffers.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.inner
            .borrow()
            .sections
            .iter()
            .map(|section| section.buffer.len())
            .sum()
    }

    #[must_use]
    pub fn trampolines_size(&self) -> u32 {
        self.inner.borrow().trampolines_size
    }

    pub fn add_trampoline_size(&self, size: u32) {
        self.inner.borrow_mut().trampolines_size += size;
    }

    // ----- ERROR HANDLING -----

    pub fn set_error_handler(&self, handler: Box<dyn ErrorHandler>) {
        self.inner.borrow_mut().error_handler = Some(handler);
    }

    pub fn reset_error_handler(&self) {
        self.inner.borrow_mut().error_handler = None;
    }

    #[must_use]
    pub fn has_error_handler(&self) -> bool {
        self.inner.borrow().error_handler.is_some()
    }

    /// Run the registered handler. Returns whether it reported the error
    /// as handled. The handler is moved out for the call so it may call
    /// back into the holder.
    pub fn handle_error(&self, err: Error, message: &str) -> bool {
        let mut handler = self.inner.borrow_mut().error_handler.take();
        let handled = handler
            .as_mut()
            .is_some_and(|h| h.handle_error(err, message));
        let mut inner = self.inner.borrow_mut();
        if inner.error_handler.is_none() {
            inner.error_handler = handler;
        }
        handled
    }

    // ----- SECTIONS -----

    #[must_use]
    pub fn section_count(&self) -> usize {
        self.inner.borrow().sections.len()
    }

    /// Add a section. The default section exists from `init` on.
    pub fn add_section(
        &self,
        name: &[u8],
        flags: SectionFlags,
        alignment: u32,
    ) -> Result<SectionId, Error> {
        let mut inner = self.inner.borrow_mut();
        if !inner.info.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let id = SectionId(inner.sections.len() as u32);
        let section = Section::new(id, name, flags, alignment)?;
        inner.sections.push(section);
        Ok(id)
    }

    #[must_use]
    pub fn section_len(&self, id: SectionId) -> Option<usize> {
        let inner = self.inner.borrow();
        inner
            .sections
            .get(id.0 as usize)
            .map(|section| section.buffer.len())
    }

    /// Borrow a section's bytes for reading.
    pub fn section_bytes(&self, id: SectionId) -> Option<Ref<'_, [u8]>> {
        let inner = self.inner.borrow();
        if (id.0 as usize) >= inner.sections.len() {
            return None;
        }
        Some(Ref::map(inner, |inner| {
            inner.sections[id.0 as usize].buffer.data()
        }))
    }

    /// Append bytes to a section. Returns the offset they landed at.
    pub fn append_to_section(
        &self,
        id: SectionId,
        bytes: &[u8],
    ) -> Result<u64, Error> {
        let mut inner = self.inner.borrow_mut();
        let section = inner
            .sections
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidArgument)?;
        let offset = section.buffer.len() as u64;
        section.buffer.append(bytes)?;
        Ok(offset)
    }

    /// Append `n` copies of `fill` to a section.
    pub fn fill_section(
        &self,
        id: SectionId,
        n: usize,
        fill: u8,
    ) -> Result<u64, Error> {
        let mut inner = self.inner.borrow_mut();
        let section = inner
            .sections
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidArgument)?;
        let offset = section.buffer.len() as u64;
        section.buffer.append_fill(n, fill)?;
        Ok(offset)
    }

    pub fn grow_buffer(&self, id: SectionId, n: usize) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner
            .sections
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidArgument)?
            .buffer
            .grow(n)
    }

    pub fn reserve_buffer(&self, id: SectionId, n: usize) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner
            .sections
            .get_mut(id.0 as usize)
            .ok_or(Error::InvalidArgument)?
            .buffer
            .reserve(n)
    }

    // ----- LABELS -----

    /// Register a fresh label: offset unbound, no pending links.
    ///
    /// Never routes through the error handler; callers that need the
    /// latch behavior add it themselves.
    pub fn new_label_id(&self) -> Result<Label, Error> {
        let mut inner = self.inner.borrow_mut();
        let index = inner.labels.len() as u32;
        let label = Label::from_index(index);
        if !label.is_valid() {
            return Err(Error::InvalidLabel);
        }
        inner.labels.push(LabelEntry::new());
        Ok(label)
    }

    #[must_use]
    pub fn labels_count(&self) -> usize {
        self.inner.borrow().labels.len()
    }

    #[must_use]
    pub fn is_label_valid(&self, label: Label) -> bool {
        label.is_valid()
            && (label.index() as usize) < self.inner.borrow().labels.len()
    }

    #[must_use]
    pub fn is_label_bound(&self, label: Label) -> bool {
        label.is_valid()
            && self
                .inner
                .borrow()
                .labels
                .get(label.index() as usize)
                .is_some_and(LabelEntry::is_bound)
    }

    /// Bound offset of `label`, `None` while unbound or unknown.
    #[must_use]
    pub fn label_offset(&self, label: Label) -> Option<u64> {
        if !label.is_valid() {
            return None;
        }
        let inner = self.inner.borrow();
        let entry = inner.labels.get(label.index() as usize)?;
        entry.is_bound().then_some(entry.offset as u64)
    }

    #[must_use]
    pub fn label_entry(&self, label: Label) -> Option<LabelEntry> {
        if !label.is_valid() {
            return None;
        }
        self.inner
            .borrow()
            .labels
            .get(label.index() as usize)
            .copied()
    }

    /// Bind `label` at `offset` inside `section`.
    ///
    /// Binding is one-way: a second bind fails with
    /// [`Error::InvalidState`]. The offset must not point past the
    /// section's current length.
    pub fn bind_label(
        &self,
        label: Label,
        section: SectionId,
        offset: u64,
    ) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        let section_len = inner
            .sections
            .get(section.0 as usize)
            .ok_or(Error::InvalidArgument)?
            .buffer
            .len() as u64;
        if offset > section_len {
            return Err(Error::InvalidArgument);
        }
        if !label.is_valid() {
            return Err(Error::InvalidLabel);
        }
        let entry = inner
            .labels
            .get_mut(label.index() as usize)
            .ok_or(Error::InvalidLabel)?;
        if entry.is_bound() {
            return Err(Error::InvalidState);
        }
        entry.offset = offset as i64;
        Ok(())
    }

    // ----- LABEL LINKS -----

    /// Take a zeroed link from the free list, or allocate one.
    pub fn new_label_link(&self) -> LinkId {
        let mut inner = self.inner.borrow_mut();
        match inner.free_links.pop() {
            Some(id) => {
                inner.links[id.0 as usize] = LabelLink::default();
                id
            }
            None => {
                let id = LinkId(inner.links.len() as u32);
                inner.links.push(LabelLink::default());
                id
            }
        }
    }

    /// Record a pending reference against an unbound `label`.
    pub fn push_label_link(
        &self,
        label: Label,
        offset: u64,
        displacement: i64,
        reloc_id: Option<u32>,
    ) -> Result<LinkId, Error> {
        if !self.is_label_valid(label) {
            return Err(Error::InvalidLabel);
        }
        let id = self.new_label_link();
        let mut inner = self.inner.borrow_mut();
        let entry = &mut inner.labels[label.index() as usize];
        let prev = entry.links;
        entry.links = Some(id);
        inner.links[id.0 as usize] =
            LabelLink { prev, offset, displacement, reloc_id };
        Ok(id)
    }

    /// Detach `label`'s pending links, newest first, recycling them into
    /// the free list. The returned copies are for the consumer to patch.
    pub fn take_label_links(
        &self,
        label: Label,
    ) -> SmallVec<[LabelLink; 4]> {
        let mut taken = SmallVec::new();
        if !self.is_label_valid(label) {
            return taken;
        }
        let mut inner = self.inner.borrow_mut();
        let mut cursor =
            inner.labels[label.index() as usize].links.take();
        while let Some(id) = cursor {
            let link = inner.links[id.0 as usize];
            cursor = link.prev;
            inner.free_links.push(id);
            taken.push(link);
        }
        taken
    }

    // ----- RELOCATIONS -----

    /// Append a relocation record; returns its id.
    pub fn add_reloc(&self, entry: RelocEntry) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.relocations.len() as u32;
        inner.relocations.push(entry);
        id
    }

    #[must_use]
    pub fn reloc_count(&self) -> usize {
        self.inner.borrow().relocations.len()
    }

    #[must_use]
    pub fn reloc_entry(&self, id: u32) -> Option<RelocEntry> {
        self.inner.borrow().relocations.get(id as usize).copied()
    }
}
