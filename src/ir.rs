//! The node IR the register-allocation context operates on.
//!
//! A [Func] owns one function's nodes in an arena vector; the program order
//! is a doubly-linked list threaded through the arena with `Option<NodeIdx>`
//! links. Earlier pipeline stages append nodes through a cursor; the
//! register-allocation passes only ever unlink nodes and attach per-node
//! work-data, they never reorder anything.
//!
//! Control flow is deliberately minimal: a jump node names a single target
//! label. A label aggregates every jump that targets it in an intrusive
//! chain (the label's `from` points at the most recently bound jump, and
//! each jump's `jump_next` at the previous one). That chain is the
//! reverse-CFG successor list the liveness solver iterates.
//!
//! Nodes are cheap and opaque here: the back-end decides what an `Inst`
//! actually is. The only per-node payload this crate interprets is the
//! attached [RaData].

use crate::{bits::Bits, ra::cells::CellIdx};
use smallvec::SmallVec;
use std::fmt;

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
}

index_vec::define_index_type! {
    pub struct VregIdx = u32;
}

index_vec::define_index_type! {
    /// The dense per-function id of a vreg tracked by the context. Position
    /// in the context's local table, and bit position in liveness sets.
    pub struct LocalIdx = u32;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JumpKind {
    /// An unconditional jump: control never falls through to the next node.
    Uncond,
    /// A conditional jump: control may fall through.
    Cond,
}

#[derive(Debug)]
pub enum NodeKind {
    /// The function entry. Always the first node.
    Func,
    /// The function end. `stop`, the sweep/walk sentinel, is whatever
    /// follows this node (usually nothing).
    End,
    Label {
        /// How many jumps target this label.
        num_refs: u32,
        /// Head of the intrusive chain of jumps targeting this label.
        from: Option<NodeIdx>,
    },
    Jump {
        target: NodeIdx,
        /// The next jump sharing this jump's target.
        jump_next: Option<NodeIdx>,
        kind: JumpKind,
    },
    /// An ordinary instruction. Its encoding is the back-end's business.
    Inst,
    /// An assembler directive. Survives the unreachable sweep.
    Directive,
    /// A purely informational node. Survives the unreachable sweep.
    Comment,
}

/// One use of a vreg by the node it is attached to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TiedReg {
    pub vreg: VregIdx,
    pub flags: u8,
}

impl TiedReg {
    /// The node reads the vreg.
    pub const R_ALL: u8 = 1 << 0;
    /// The node writes the vreg.
    pub const W_ALL: u8 = 1 << 1;
    /// The vreg's value is dead after this node.
    pub const UNUSE: u8 = 1 << 2;

    pub fn new(vreg: VregIdx, flags: u8) -> Self {
        Self { vreg, flags }
    }

    pub fn reads(&self) -> bool {
        self.flags & Self::R_ALL != 0
    }

    pub fn writes(&self) -> bool {
        self.flags & Self::W_ALL != 0
    }

    pub fn is_unuse(&self) -> bool {
        self.flags & Self::UNUSE != 0
    }

    /// A write that reads nothing kills the vreg: nothing upstream of this
    /// node can observe the old value through it.
    pub fn is_write_only(&self) -> bool {
        self.writes() && !self.reads()
    }
}

/// Work-data attached to a node by the back-end's `fetch` pass. Nodes
/// without work-data were never reached by instruction selection and are,
/// as far as the context is concerned, dead.
#[derive(Debug)]
pub struct RaData {
    pub(crate) tied: SmallVec<[TiedReg; 4]>,
    /// The node's live-in set, filled in by the liveness solver.
    pub(crate) liveness: Option<Bits>,
}

impl RaData {
    pub fn tied(&self) -> &[TiedReg] {
        &self.tied
    }

    pub fn liveness(&self) -> Option<Bits> {
        self.liveness
    }
}

/// A per-function virtual register descriptor. The vreg itself is created
/// and owned by the front-end; `local_id`, `phys_id` and `cell` are scratch
/// fields written by the register allocator and cleared by
/// [cleanup](crate::RaContext::cleanup).
#[derive(Debug)]
pub struct VirtReg {
    size: u32,
    alignment: u32,
    is_stack: bool,
    pub(crate) local_id: Option<LocalIdx>,
    pub(crate) phys_id: Option<u8>,
    pub(crate) cell: Option<CellIdx>,
}

impl VirtReg {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Must this vreg live in memory (e.g. it is address-taken)?
    pub fn is_stack(&self) -> bool {
        self.is_stack
    }

    pub fn local_id(&self) -> Option<LocalIdx> {
        self.local_id
    }

    pub fn phys_id(&self) -> Option<u8> {
        self.phys_id
    }

    pub fn cell(&self) -> Option<CellIdx> {
        self.cell
    }
}

#[derive(Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    removable: bool,
    comment: Option<String>,
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
    work: Option<RaData>,
}

impl Node {
    fn new(kind: NodeKind, removable: bool) -> Self {
        Self {
            kind,
            removable,
            comment: None,
            prev: None,
            next: None,
            work: None,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn prev(&self) -> Option<NodeIdx> {
        self.prev
    }

    pub fn next(&self) -> Option<NodeIdx> {
        self.next
    }

    pub fn is_removable(&self) -> bool {
        self.removable
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, NodeKind::Label { .. })
    }

    /// An unconditional jump; the only node kind that blocks fallthrough
    /// into a following label.
    pub fn is_jmp(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Jump {
                kind: JumpKind::Uncond,
                ..
            }
        )
    }

    pub fn work(&self) -> Option<&RaData> {
        self.work.as_ref()
    }

    pub(crate) fn work_mut(&mut self) -> Option<&mut RaData> {
        self.work.as_mut()
    }

    pub fn has_work(&self) -> bool {
        self.work.is_some()
    }
}

/// One function's node list plus its virtual registers.
#[derive(Debug)]
pub struct Func {
    nodes: index_vec::IndexVec<NodeIdx, Node>,
    vregs: index_vec::IndexVec<VregIdx, VirtReg>,
    entry: NodeIdx,
    end: NodeIdx,
    /// Appends insert after this node. `None` once compilation has finished:
    /// nodes may disappear during compilation and appending afterwards is
    /// forbidden.
    cursor: Option<NodeIdx>,
}

impl Func {
    pub fn new() -> Self {
        let mut nodes: index_vec::IndexVec<NodeIdx, Node> = index_vec::IndexVec::new();
        let entry = nodes.push(Node::new(NodeKind::Func, false));
        let end = nodes.push(Node::new(NodeKind::End, false));
        nodes[entry].next = Some(end);
        nodes[end].prev = Some(entry);
        Self {
            nodes,
            vregs: index_vec::IndexVec::new(),
            entry,
            end,
            cursor: Some(entry),
        }
    }

    pub fn entry(&self) -> NodeIdx {
        self.entry
    }

    pub fn end(&self) -> NodeIdx {
        self.end
    }

    /// The sweep sentinel: the node following the function end, if any.
    pub fn stop(&self) -> Option<NodeIdx> {
        self.nodes[self.end].next
    }

    pub fn node(&self, n: NodeIdx) -> &Node {
        &self.nodes[n]
    }

    pub(crate) fn node_mut(&mut self, n: NodeIdx) -> &mut Node {
        &mut self.nodes[n]
    }

    pub fn vreg(&self, v: VregIdx) -> &VirtReg {
        &self.vregs[v]
    }

    pub(crate) fn vreg_mut(&mut self, v: VregIdx) -> &mut VirtReg {
        &mut self.vregs[v]
    }

    pub fn vregs_len(&self) -> usize {
        self.vregs.len()
    }

    pub fn new_vreg(&mut self, size: u32, alignment: u32, is_stack: bool) -> VregIdx {
        self.vregs.push(VirtReg {
            size,
            alignment,
            is_stack,
            local_id: None,
            phys_id: None,
            cell: None,
        })
    }

    /// Create a label node without placing it, so it can be jumped to before
    /// it is bound into the list.
    pub fn new_label(&mut self) -> NodeIdx {
        self.nodes.push(Node::new(
            NodeKind::Label {
                num_refs: 0,
                from: None,
            },
            false,
        ))
    }

    /// Bind a label created with [new_label](Func::new_label) at the cursor.
    pub fn place_label(&mut self, l: NodeIdx) {
        debug_assert!(self.nodes[l].is_label() && self.nodes[l].prev.is_none());
        self.link_at_cursor(l);
    }

    /// Append a jump to `target`, threading it onto the label's jump chain.
    pub fn jump(&mut self, target: NodeIdx, kind: JumpKind) -> NodeIdx {
        let head = match &self.nodes[target].kind {
            NodeKind::Label { from, .. } => *from,
            _ => panic!("jump target must be a label"),
        };
        let n = self.nodes.push(Node::new(
            NodeKind::Jump {
                target,
                jump_next: head,
                kind,
            },
            true,
        ));
        match &mut self.nodes[target].kind {
            NodeKind::Label { num_refs, from } => {
                *num_refs += 1;
                *from = Some(n);
            }
            _ => unreachable!(),
        }
        self.link_at_cursor(n);
        n
    }

    pub fn inst(&mut self) -> NodeIdx {
        let n = self.nodes.push(Node::new(NodeKind::Inst, true));
        self.link_at_cursor(n);
        n
    }

    pub fn directive(&mut self) -> NodeIdx {
        let n = self.nodes.push(Node::new(NodeKind::Directive, false));
        self.link_at_cursor(n);
        n
    }

    pub fn comment_node(&mut self, text: &str) -> NodeIdx {
        let n = self.nodes.push(Node::new(NodeKind::Comment, false));
        self.nodes[n].comment = Some(text.to_owned());
        self.link_at_cursor(n);
        n
    }

    pub fn set_comment(&mut self, n: NodeIdx, text: String) {
        self.nodes[n].comment = Some(text);
    }

    /// Attach `fetch`-produced work-data to a node, replacing any previous
    /// attachment.
    pub fn attach_work(&mut self, n: NodeIdx, tied: &[TiedReg]) {
        self.nodes[n].work = Some(RaData {
            tied: SmallVec::from_slice(tied),
            liveness: None,
        });
    }

    fn link_at_cursor(&mut self, n: NodeIdx) {
        let cur = self
            .cursor
            .expect("cannot append nodes after compilation has finished");
        let after = self.nodes[cur].next;
        self.nodes[n].prev = Some(cur);
        self.nodes[n].next = after;
        self.nodes[cur].next = Some(n);
        if let Some(a) = after {
            self.nodes[a].prev = Some(n);
        }
        self.cursor = Some(n);
    }

    /// Unlink a node from the list. Its slot stays in the arena but its
    /// links are severed, so a stale worklist entry naming it is detectable
    /// (no `prev`) and harmless.
    pub fn remove_node(&mut self, n: NodeIdx) {
        let (prev, next) = (self.nodes[n].prev, self.nodes[n].next);
        if let Some(p) = prev {
            self.nodes[p].next = next;
        }
        if let Some(x) = next {
            self.nodes[x].prev = prev;
        }
        if self.cursor == Some(n) {
            self.cursor = prev;
        }
        self.nodes[n].prev = None;
        self.nodes[n].next = None;
    }

    /// Forbid further appends. Called by the driver once compilation is
    /// done: nodes may have disappeared and the cursor must not be reused.
    pub fn clear_cursor(&mut self) {
        self.cursor = None;
    }

    /// The node indices in program order, entry to end.
    pub fn iter_nodes(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        let mut cur = Some(self.entry);
        std::iter::from_fn(move || {
            let n = cur?;
            cur = self.nodes[n].next;
            Some(n)
        })
    }

    pub fn label_num_refs(&self, l: NodeIdx) -> u32 {
        match self.nodes[l].kind {
            NodeKind::Label { num_refs, .. } => num_refs,
            _ => panic!("not a label"),
        }
    }

    pub fn label_from(&self, l: NodeIdx) -> Option<NodeIdx> {
        match self.nodes[l].kind {
            NodeKind::Label { from, .. } => from,
            _ => panic!("not a label"),
        }
    }

    pub fn jump_target(&self, j: NodeIdx) -> NodeIdx {
        match self.nodes[j].kind {
            NodeKind::Jump { target, .. } => target,
            _ => panic!("not a jump"),
        }
    }

    pub fn jump_next(&self, j: NodeIdx) -> Option<NodeIdx> {
        match self.nodes[j].kind {
            NodeKind::Jump { jump_next, .. } => jump_next,
            _ => panic!("not a jump"),
        }
    }

    pub fn display(&self) -> FuncDisplay<'_> {
        FuncDisplay(self)
    }
}

impl Default for Func {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the node list one line per node, with inline comments in a
/// right-hand column. This is what ends up in the log after annotation.
pub struct FuncDisplay<'a>(&'a Func);

impl fmt::Display for FuncDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in self.0.iter_nodes() {
            let node = self.0.node(n);
            let text = match &node.kind {
                NodeKind::Func => "func".to_owned(),
                NodeKind::End => "end".to_owned(),
                NodeKind::Label { .. } => format!("L{}:", usize::from(n)),
                NodeKind::Jump {
                    target,
                    kind: JumpKind::Uncond,
                    ..
                } => format!("  jmp L{}", usize::from(*target)),
                NodeKind::Jump { target, .. } => format!("  jcc L{}", usize::from(*target)),
                NodeKind::Inst => "  inst".to_owned(),
                NodeKind::Directive => "  .directive".to_owned(),
                NodeKind::Comment => "  ;".to_owned(),
            };
            match node.comment() {
                Some(c) => writeln!(f, "{text:<24}; {c}")?,
                None => writeln!(f, "{text}")?,
            }
        }
        Ok(())
    }
}
