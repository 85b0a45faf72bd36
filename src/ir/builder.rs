//! The recording emitter: every call becomes a node in an editable list
//!
//! The builder keeps a doubly linked node list with a cursor marking the
//! insertion point. Branches are cross-linked to their target labels.
//! Nothing is encoded; a finished list is replayed onto a real emitter
//! with [`Builder::serialize`].

use std::panic::Location;

use crate::code::CodeHolder;
use crate::emitter::{
    AlignMode,
    Emitter,
    EmitterCore,
    EmitterKind,
    InstId,
    InstOptions,
    Label,
    Operand,
};
use crate::const_pool::ConstPool;
use crate::error::Error;
use crate::ir::node::{
    AlignData,
    DataBody,
    InstData,
    JumpData,
    LabelData,
    Node,
    NodeFlags,
    NodeId,
    NodeKind,
    INLINE_DATA_SIZE,
};
use crate::zone::{Zone, DATA_BLOCK_SIZE};

use smallvec::SmallVec;

/// Records emitter calls as IR nodes for later editing and replay.
///
/// # Examples
///
/// ```
/// use mortar::code::{ArchKind, CodeHolder, CodeInfo};
/// use mortar::emitter::{AlignMode, Emitter};
/// use mortar::ir::Builder;
///
/// let code = CodeHolder::with_info(CodeInfo::new(ArchKind::X64))?;
/// let mut cb = Builder::attached(&code)?;
///
/// let label = cb.new_label();
/// cb.align(AlignMode::Code, 16)?;
/// cb.bind(label)?;
/// cb.embed(&[0xAA, 0xBB])?;
/// assert_eq!(cb.list_len(), 3);
/// # Ok::<(), mortar::error::Error>(())
/// ```
pub struct Builder {
    pub(crate) core: EmitterCore,

    pub(crate) nodes: Vec<Node>,
    /// Optional cap on the node pool; exceeding it reports
    /// [`Error::NoHeapMemory`] like any arena exhaustion.
    node_budget: Option<usize>,
    pub(crate) data_zone: Zone,

    pub(crate) first: Option<NodeId>,
    pub(crate) last: Option<NodeId>,
    pub(crate) cursor: Option<NodeId>,

    /// Dense label index -> canonical label node.
    pub(crate) label_nodes: Vec<Option<NodeId>>,
    /// Where each label was created, for unbound-label reports.
    pub(crate) label_origins: Vec<Option<&'static Location<'static>>>,

    /// Flow id stamped on newly created nodes.
    flow_id: u16,
    /// Flags stamped on newly created nodes (used by passes).
    node_flags: NodeFlags,

    /// Currently open function node.
    pub(crate) func: Option<NodeId>,
    pub(crate) local_const_pool: Option<NodeId>,
    pub(crate) global_const_pool: Option<NodeId>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// A detached builder; attach it with [`CodeHolder::attach`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: EmitterCore::new(EmitterKind::Builder),
            nodes: Vec::new(),
            node_budget: None,
            data_zone: Zone::new(DATA_BLOCK_SIZE),
            first: None,
            last: None,
            cursor: None,
            label_nodes: Vec::new(),
            label_origins: Vec::new(),
            flow_id: 0,
            node_flags: NodeFlags::empty(),
            func: None,
            local_const_pool: None,
            global_const_pool: None,
        }
    }

    /// A builder already attached to `code`.
    pub fn attached(code: &CodeHolder) -> Result<Self, Error> {
        let mut builder = Self::new();
        code.attach(&mut builder)?;
        Ok(builder)
    }

    /// Cap the node pool. `None` removes the cap.
    pub fn set_node_budget(&mut self, budget: Option<usize>) {
        self.node_budget = budget;
    }

    /// Cap the data zone (comments, spilled data bytes).
    pub fn set_data_budget(&mut self, budget: Option<usize>) {
        self.data_zone.set_limit(budget);
    }

    /// Drop all recorded nodes and auxiliary data. Every previously
    /// obtained [`NodeId`] becomes invalid. The attachment (if any) and
    /// the holder-side label registry are untouched.
    pub fn reset(&mut self, release_memory: bool) {
        self.nodes.clear();
        if release_memory {
            self.nodes.shrink_to_fit();
        }
        self.data_zone.reset(release_memory);
        self.first = None;
        self.last = None;
        self.cursor = None;
        self.label_nodes.clear();
        self.label_origins.clear();
        self.flow_id = 0;
        self.node_flags = NodeFlags::empty();
        self.func = None;
        self.local_const_pool = None;
        self.global_const_pool = None;
        self.core.clear_one_shot();
        self.core.last_error = None;
        self.core.finalized = false;
    }

    // ----- NODE POOL -----

    #[inline(always)]
    fn n(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline(always)]
    fn n_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Look up a node. `None` after the pool was reset under the id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Mutable node access for passes that rewrite operands in place.
    #[must_use]
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// Number of nodes ever allocated (including detached ones).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn alloc_node(
        &mut self,
        kind: NodeKind,
        flags: NodeFlags,
    ) -> Option<NodeId> {
        if let Some(budget) = self.node_budget {
            if self.nodes.len() >= budget {
                return None;
            }
        }
        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(kind, flags | self.node_flags);
        node.flow_id = self.flow_id;
        self.nodes.push(node);
        Some(id)
    }

    // ----- NODE FACTORIES -----

    /// Allocate and register a fresh label node.
    ///
    /// Non-failure-propagating: errors are returned but never routed
    /// through the error handler, so this stays usable from other
    /// no-fail paths.
    pub fn new_label_node(&mut self) -> Result<NodeId, Error> {
        self.new_label_node_at(None)
    }

    fn new_label_node_at(
        &mut self,
        origin: Option<&'static Location<'static>>,
    ) -> Result<NodeId, Error> {
        let id = self
            .alloc_node(
                NodeKind::Label(LabelData::new(Label::INVALID)),
                NodeFlags::empty(),
            )
            .ok_or(Error::NoHeapMemory)?;
        self.register_label_node(id, origin)?;
        Ok(id)
    }

    /// Assign a fresh holder label id to a label-like node and record it
    /// as the canonical node for that id.
    pub(crate) fn register_label_node(
        &mut self,
        id: NodeId,
        origin: Option<&'static Location<'static>>,
    ) -> Result<(), Error> {
        let code = self.core.code.clone().ok_or(Error::NotInitialized)?;
        let label = code.new_label_id()?;
        let index = label.index() as usize;

        // The id was just handed out, so the slot cannot exist yet.
        debug_assert!(self.label_nodes.len() <= index);
        if self.label_nodes.len() <= index {
            self.label_nodes.resize(index + 1, None);
            self.label_origins.resize(index + 1, None);
        }
        self.label_nodes[index] = Some(id);
        self.label_origins[index] = origin;

        if let Some(data) = self.n_mut(id).label_data_mut() {
            data.label = label;
        }
        Ok(())
    }

    /// The canonical label node for `label`, creating it on first use.
    /// There is at most one label node per label id.
    pub fn label_node(&mut self, label: Label) -> Result<NodeId, Error> {
        if let Some(err) = self.core.last_error {
            return Err(err);
        }
        let code = self.core.code.clone().ok_or(Error::NotInitialized)?;
        if !label.is_valid()
            || label.index() as usize >= code.labels_count()
        {
            return Err(Error::InvalidLabel);
        }

        let index = label.index() as usize;
        if self.label_nodes.len() <= index {
            self.label_nodes.resize(index + 1, None);
            self.label_origins.resize(index + 1, None);
        }
        if let Some(existing) = self.label_nodes[index] {
            return Ok(existing);
        }

        let id = self
            .alloc_node(
                NodeKind::Label(LabelData::new(label)),
                NodeFlags::empty(),
            )
            .ok_or(Error::NoHeapMemory)?;
        self.label_nodes[index] = Some(id);
        Ok(id)
    }

    /// The canonical label node if one was ever materialized.
    #[must_use]
    pub fn label_node_id(&self, label: Label) -> Option<NodeId> {
        if !label.is_valid() {
            return None;
        }
        self.label_nodes
            .get(label.index() as usize)
            .copied()
            .flatten()
    }

    pub fn new_align_node(
        &mut self,
        mode: AlignMode,
        alignment: u32,
    ) -> Result<NodeId, Error> {
        self.alloc_node(
            NodeKind::Align(AlignData { mode, alignment }),
            NodeFlags::CODE,
        )
        .ok_or(Error::NoHeapMemory)
    }

    /// Allocate a data node. `data == None` leaves the payload zeroed
    /// (the caller will fill it); payloads over [`INLINE_DATA_SIZE`]
    /// spill to the data zone.
    pub fn new_data_node(
        &mut self,
        data: Option<&[u8]>,
        size: usize,
    ) -> Result<NodeId, Error> {
        let body = if size <= INLINE_DATA_SIZE {
            let mut buf = [0u8; INLINE_DATA_SIZE];
            if let Some(bytes) = data {
                buf[..size].copy_from_slice(&bytes[..size]);
            }
            DataBody::Inline { buf, len: size as u8 }
        } else {
            let span = match data {
                Some(bytes) => self.data_zone.dup(&bytes[..size]),
                None => self.data_zone.alloc(size),
            }
            .ok_or(Error::NoHeapMemory)?;
            DataBody::Spilled(span)
        };

        self.alloc_node(NodeKind::Data(body), NodeFlags::DATA)
            .ok_or(Error::NoHeapMemory)
    }

    /// Allocate and register a const-pool node (a label with a payload).
    pub fn new_const_pool_node(&mut self) -> Result<NodeId, Error> {
        let id = self
            .alloc_node(
                NodeKind::ConstPool(crate::ir::node::ConstPoolData {
                    label: LabelData::new(Label::INVALID),
                    pool: ConstPool::default(),
                }),
                NodeFlags::DATA,
            )
            .ok_or(Error::NoHeapMemory)?;
        self.register_label_node(id, None)?;
        Ok(id)
    }

    /// Allocate a comment node; the text is duplicated into the data
    /// zone. `None` stays empty.
    pub fn new_comment_node(
        &mut self,
        text: Option<&str>,
    ) -> Result<NodeId, Error> {
        let span = match text {
            Some(text) => {
                Some(self.data_zone.dup_str(text).ok_or(Error::NoHeapMemory)?)
            }
            None => None,
        };
        let id = self
            .alloc_node(
                NodeKind::Comment,
                NodeFlags::INFORMATIVE | NodeFlags::REMOVABLE,
            )
            .ok_or(Error::NoHeapMemory)?;
        self.n_mut(id).inline_comment = span;
        Ok(id)
    }

    pub fn new_sentinel_node(&mut self) -> Result<NodeId, Error> {
        self.alloc_node(NodeKind::Sentinel, NodeFlags::INFORMATIVE)
            .ok_or(Error::NoHeapMemory)
    }

    // ----- LIST / CURSOR -----

    #[must_use]
    #[inline(always)]
    pub fn first_node(&self) -> Option<NodeId> {
        self.first
    }

    #[must_use]
    #[inline(always)]
    pub fn last_node(&self) -> Option<NodeId> {
        self.last
    }

    #[must_use]
    #[inline(always)]
    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    /// Move the cursor; returns the previous one. `None` means "before
    /// the first node".
    pub fn set_cursor(&mut self, node: Option<NodeId>) -> Option<NodeId> {
        std::mem::replace(&mut self.cursor, node)
    }

    /// Nodes currently in the list, front to back.
    pub fn list_iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.first;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.n(id).next;
            Some(id)
        })
    }

    /// Number of nodes currently linked into the list.
    #[must_use]
    pub fn list_len(&self) -> usize {
        self.list_iter().count()
    }

    /// Splice an unlinked node at the cursor:
    /// - empty list, no cursor: the node becomes first and last;
    /// - no cursor otherwise: the node is prepended;
    /// - else: inserted right after the cursor.
    ///
    /// The cursor moves to the inserted node.
    pub fn add_node(&mut self, id: NodeId) -> NodeId {
        debug_assert!(self.n(id).prev.is_none());
        debug_assert!(self.n(id).next.is_none());

        match self.cursor {
            None => match self.first {
                None => {
                    self.first = Some(id);
                    self.last = Some(id);
                }
                Some(first) => {
                    self.n_mut(id).next = Some(first);
                    self.n_mut(first).prev = Some(id);
                    self.first = Some(id);
                }
            },
            Some(cursor) => {
                let next = self.n(cursor).next;
                self.n_mut(id).prev = Some(cursor);
                self.n_mut(id).next = next;
                self.n_mut(cursor).next = Some(id);
                match next {
                    Some(next) => self.n_mut(next).prev = Some(id),
                    None => self.last = Some(id),
                }
            }
        }

        self.cursor = Some(id);
        id
    }

    /// Splice an unlinked node right after `reference`. The cursor does
    /// not move.
    pub fn add_after(&mut self, id: NodeId, reference: NodeId) -> NodeId {
        debug_assert!(self.n(id).prev.is_none());
        debug_assert!(self.n(id).next.is_none());

        let next = self.n(reference).next;
        self.n_mut(id).prev = Some(reference);
        self.n_mut(id).next = next;
        self.n_mut(reference).next = Some(id);
        match next {
            Some(next) => self.n_mut(next).prev = Some(id),
            None => self.last = Some(id),
        }
        id
    }

    /// Splice an unlinked node right before `reference`. The cursor does
    /// not move.
    pub fn add_before(&mut self, id: NodeId, reference: NodeId) -> NodeId {
        debug_assert!(self.n(id).prev.is_none());
        debug_assert!(self.n(id).next.is_none());

        let prev = self.n(reference).prev;
        self.n_mut(id).prev = prev;
        self.n_mut(id).next = Some(reference);
        self.n_mut(reference).prev = Some(id);
        match prev {
            Some(prev) => self.n_mut(prev).next = Some(id),
            None => self.first = Some(id),
        }
        id
    }

    /// Unlink a node. Its memory stays in the pool until reset. If the
    /// cursor pointed at it, the cursor moves to its predecessor. A
    /// removed jump is also unlinked from its target's incoming list.
    pub fn remove_node(&mut self, id: NodeId) -> NodeId {
        let prev = self.n(id).prev;
        let next = self.n(id).next;

        if self.first == Some(id) {
            self.first = next;
        } else if let Some(prev) = prev {
            self.n_mut(prev).next = next;
        }
        if self.last == Some(id) {
            self.last = prev;
        } else if let Some(next) = next {
            self.n_mut(next).prev = prev;
        }

        self.n_mut(id).prev = None;
        self.n_mut(id).next = None;

        if self.cursor == Some(id) {
            self.cursor = prev;
        }
        self.on_node_removed(id);
        id
    }

    /// Unlink the contiguous span `first..=last`. The list stays
    /// well-formed throughout; each removed jump is cross-unlinked.
    pub fn remove_nodes(&mut self, first: NodeId, last: NodeId) {
        if first == last {
            self.remove_node(first);
            return;
        }

        let prev = self.n(first).prev;
        let next = self.n(last).next;

        if self.first == Some(first) {
            self.first = next;
        } else if let Some(prev) = prev {
            self.n_mut(prev).next = next;
        }
        if self.last == Some(last) {
            self.last = prev;
        } else if let Some(next) = next {
            self.n_mut(next).prev = prev;
        }

        let mut node = first;
        loop {
            // Capture the successor before the links are cleared.
            let follow = self.n(node).next;

            self.n_mut(node).prev = None;
            self.n_mut(node).next = None;
            if self.cursor == Some(node) {
                self.cursor = prev;
            }
            self.on_node_removed(node);

            if node == last {
                break;
            }
            match follow {
                Some(follow) => node = follow,
                None => {
                    debug_assert!(false, "span ended before `last`");
                    break;
                }
            }
        }
    }

    /// Jump removal side effect: splice the node out of its target's
    /// incoming list and drop the reference count. No other node type
    /// has removal side effects.
    fn on_node_removed(&mut self, id: NodeId) {
        if !self.n(id).is_jmp_or_jcc() {
            return;
        }
        let (target, removed_next) = match self.n(id).kind.as_jump() {
            Some(jump) => (jump.target, jump.jump_next),
            None => return,
        };
        let Some(target) = target else { return };

        let head = self.n(target).label_data().and_then(|data| data.from);
        if head == Some(id) {
            if let Some(data) = self.n_mut(target).label_data_mut() {
                data.from = removed_next;
                data.num_refs = data.num_refs.saturating_sub(1);
            }
            return;
        }

        let mut cursor = head;
        let mut found = false;
        while let Some(current) = cursor {
            let current_next =
                self.n(current).kind.as_jump().and_then(|j| j.jump_next);
            if current_next == Some(id) {
                if let Some(jump) = self.n_mut(current).kind.as_jump_mut() {
                    jump.jump_next = removed_next;
                }
                found = true;
                break;
            }
            cursor = current_next;
        }
        debug_assert!(found, "jump missing from its target's incoming list");
        if found {
            if let Some(data) = self.n_mut(target).label_data_mut() {
                data.num_refs = data.num_refs.saturating_sub(1);
            }
        }
    }

    // ----- DATA EMISSION HELPERS -----

    fn embed_scalar<'a>(
        &mut self,
        value: impl crate::util::into_bytes::IntoBytes<'a>,
    ) -> Result<(), Error> {
        let bytes = value.into_bytes();
        self.embed(&bytes)
    }

    /// Embed a single byte.
    #[inline(always)]
    pub fn embed_u8(&mut self, value: u8) -> Result<(), Error> {
        self.embed_scalar(value)
    }

    /// Embed a little-endian halfword.
    #[inline(always)]
    pub fn embed_u16(&mut self, value: u16) -> Result<(), Error> {
        self.embed_scalar(value)
    }

    /// Embed a little-endian word.
    #[inline(always)]
    pub fn embed_u32(&mut self, value: u32) -> Result<(), Error> {
        self.embed_scalar(value)
    }

    /// Embed a little-endian doubleword.
    #[inline(always)]
    pub fn embed_u64(&mut self, value: u64) -> Result<(), Error> {
        self.embed_scalar(value)
    }

    /// Embed a string's bytes (no terminator).
    #[inline(always)]
    pub fn embed_str(&mut self, value: &str) -> Result<(), Error> {
        self.embed_scalar(value)
    }

    /// Embed `count` zero bytes without staging a buffer.
    pub fn embed_zeros(&mut self, count: usize) -> Result<(), Error> {
        self.check_ready()?;
        let node = match self.new_data_node(None, count) {
            Ok(node) => node,
            Err(err) => return Err(self.raise(err, "data node allocation")),
        };
        self.add_node(node);
        Ok(())
    }

    // ----- HELPERS -----

    /// Bytes of a data payload, wherever they live.
    #[must_use]
    pub fn data_bytes<'a>(&'a self, body: &'a DataBody) -> &'a [u8] {
        match body {
            DataBody::Inline { buf, len } => &buf[..*len as usize],
            DataBody::Spilled(span) => self.data_zone.bytes(*span),
        }
    }

    /// Text of a node's inline comment.
    #[must_use]
    pub fn comment_text(&self, id: NodeId) -> Option<&str> {
        self.nodes
            .get(id.index())
            .and_then(|node| node.inline_comment)
            .map(|span| self.data_zone.text(span))
    }

    /// Whether a node is currently linked into the list.
    #[must_use]
    pub fn node_in_list(&self, id: NodeId) -> bool {
        self.first == Some(id)
            || self
                .node(id)
                .is_some_and(|n| n.prev.is_some() || n.next.is_some())
    }

    pub(crate) fn check_ready(&mut self) -> Result<CodeHolder, Error> {
        if let Some(err) = self.core.last_error {
            return Err(err);
        }
        self.check_attached()
    }

    /// Count positional operands the way the original does: each
    /// non-none among the four slots, overridden when extras are set.
    fn positional_count(
        options: InstOptions,
        o0: &Operand,
        o1: &Operand,
        o2: &Operand,
        o3: &Operand,
    ) -> usize {
        let mut count = usize::from(!o0.is_none())
            + usize::from(!o1.is_none())
            + usize::from(!o2.is_none())
            + usize::from(!o3.is_none());
        if options.contains(InstOptions::HAS_OP4) {
            count = 5;
        }
        if options.contains(InstOptions::HAS_OP5) {
            count = 6;
        }
        count
    }
}

impl Emitter for Builder {
    #[inline(always)]
    fn core(&self) -> &EmitterCore {
        &self.core
    }

    #[inline(always)]
    fn core_mut(&mut self) -> &mut EmitterCore {
        &mut self.core
    }

    fn on_attach(&mut self, code: &CodeHolder) -> Result<(), Error> {
        if !code.is_initialized() {
            return Err(Error::InvalidArch);
        }
        Ok(())
    }

    fn on_detach(&mut self) -> Result<(), Error> {
        self.reset(false);
        Ok(())
    }

    #[track_caller]
    fn new_label(&mut self) -> Label {
        let origin = Location::caller();
        if self.core.last_error.is_some() || self.check_attached().is_err() {
            return Label::INVALID;
        }
        match self.new_label_node_at(Some(origin)) {
            Ok(id) => self
                .n(id)
                .label_data()
                .map_or(Label::INVALID, |data| data.label),
            Err(err) => {
                self.raise(err, "label registration failed");
                Label::INVALID
            }
        }
    }

    fn bind(&mut self, label: Label) -> Result<(), Error> {
        self.check_ready()?;
        let node = match self.label_node(label) {
            Ok(node) => node,
            Err(err) => return Err(self.raise(err, "cannot bind label")),
        };
        self.add_node(node);
        Ok(())
    }

    fn align(&mut self, mode: AlignMode, alignment: u32) -> Result<(), Error> {
        self.check_ready()?;
        let node = match self.new_align_node(mode, alignment) {
            Ok(node) => node,
            Err(err) => return Err(self.raise(err, "align node allocation")),
        };
        self.add_node(node);
        Ok(())
    }

    fn embed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_ready()?;
        let node = match self.new_data_node(Some(data), data.len()) {
            Ok(node) => node,
            Err(err) => return Err(self.raise(err, "data node allocation")),
        };
        self.add_node(node);
        Ok(())
    }

    /// Materialize `pool` in three recorded steps: align to the pool's
    /// requirement (data mode), bind `label` there, embed the image.
    fn embed_const_pool(
        &mut self,
        label: Label,
        pool: &ConstPool,
    ) -> Result<(), Error> {
        let code = self.check_ready()?;
        if !code.is_label_valid(label) {
            return Err(self.raise(Error::InvalidLabel, "unknown pool label"));
        }

        self.align(AlignMode::Data, pool.alignment() as u32)?;
        self.bind(label)?;

        let node = match self.new_data_node(None, pool.size()) {
            Ok(node) => node,
            Err(err) => return Err(self.raise(err, "pool node allocation")),
        };

        let spilled = match self.n(node).kind.as_data() {
            Some(DataBody::Spilled(span)) => Some(*span),
            _ => None,
        };
        let filled = match spilled {
            Some(span) => pool.fill(self.data_zone.bytes_mut(span)),
            None => match self.n_mut(node).kind.as_data_mut() {
                Some(DataBody::Inline { buf, len }) => {
                    let len = *len as usize;
                    pool.fill(&mut buf[..len])
                }
                _ => Ok(()),
            },
        };
        if let Err(err) = filled {
            return Err(self.raise(err, "pool image fill"));
        }

        self.add_node(node);
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), Error> {
        self.check_ready()?;
        let node = match self.new_comment_node(Some(text)) {
            Ok(node) => node,
            Err(err) => {
                return Err(self.raise(err, "comment node allocation"))
            }
        };
        self.add_node(node);
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
        self.check_ready()?;

        let mut options = self.core.options | self.core.global_options;
        let op_count = Self::positional_count(options, &o0, &o1, &o2, &o3);

        // Validation is owned by the layer above; never recorded.
        options.remove(InstOptions::STRICT_VALIDATION);

        // Consume the one-shot state up front; a failed emit discards it.
        let op4 = self.core.op4;
        let op5 = self.core.op5;
        let pending_comment = self.core.inline_comment.take();
        self.core.clear_one_shot();

        let comment_span = match &pending_comment {
            Some(text) => match self.data_zone.dup_str(text) {
                Some(span) => Some(span),
                None => {
                    return Err(
                        self.raise(Error::NoHeapMemory, "comment duplication")
                    )
                }
            },
            None => None,
        };

        let mut ops: SmallVec<[Operand; 4]> = SmallVec::new();
        let positional = [o0, o1, o2, o3, op4, op5];
        for slot in positional.iter().take(op_count) {
            ops.push(*slot);
        }

        let jump_range = self.core.info.jump_range;
        let id = if jump_range.contains(inst.0) {
            // Target resolution comes first; a failed emit must splice
            // nothing.
            let mut target = None;
            if !options.contains(InstOptions::UNFOLLOW) {
                match ops.first() {
                    Some(Operand::Label(label)) => {
                        let label = *label;
                        match self.label_node(label) {
                            Ok(node) => target = Some(node),
                            Err(err) => {
                                return Err(
                                    self.raise(err, "jump target lookup")
                                )
                            }
                        }
                    }
                    _ => options |= InstOptions::UNFOLLOW,
                }
            }

            let mut flags = NodeFlags::CODE;
            if inst.0 == jump_range.uncond {
                flags |= NodeFlags::JMP | NodeFlags::TAKEN;
            } else {
                flags |= NodeFlags::JCC;
                if options.contains(InstOptions::TAKEN) {
                    flags |= NodeFlags::TAKEN;
                }
            }

            let data = JumpData {
                inst: InstData { inst, options, ops },
                target,
                jump_next: None,
            };
            let id = match self.alloc_node(NodeKind::Jump(data), flags) {
                Some(id) => id,
                None => {
                    return Err(
                        self.raise(Error::NoHeapMemory, "jump node allocation")
                    )
                }
            };

            // Head-insert into the target's incoming list.
            if let Some(target) = target {
                let head =
                    self.n(target).label_data().and_then(|data| data.from);
                if let Some(jump) = self.n_mut(id).kind.as_jump_mut() {
                    jump.jump_next = head;
                }
                if let Some(data) = self.n_mut(target).label_data_mut() {
                    data.from = Some(id);
                    data.num_refs += 1;
                }
            }
            id
        } else {
            let data = InstData { inst, options, ops };
            match self.alloc_node(
                NodeKind::Inst(data),
                NodeFlags::CODE | NodeFlags::REMOVABLE,
            ) {
                Some(id) => id,
                None => {
                    return Err(
                        self.raise(Error::NoHeapMemory, "inst node allocation")
                    )
                }
            }
        };

        self.n_mut(id).inline_comment = comment_span;
        self.add_node(id);
        Ok(())
    }

    /// Flush the global const pool and verify that every jump target
    /// got bound somewhere in the list.
    fn finalize(&mut self) -> Result<(), Error> {
        self.check_ready()?;

        if let Some(pool) = self.global_const_pool.take() {
            self.add_node(pool);
        }

        if !self.unbound_labels().is_empty() {
            return Err(self.raise(
                Error::UnboundLabel,
                "jump targets left unbound at finalize",
            ));
        }

        self.core.finalized = true;
        Ok(())
    }
}
