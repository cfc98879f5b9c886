//! The register-allocation context and its driver.
//!
//! A [RaContext] is created once per compiler and reused across functions:
//! [RaContext::compile] runs the full phase sequence for one function and
//! [RaContext::reset] throws the per-function state away (optionally
//! returning the backing memory too). The phase ordering is strict:
//!
//! ```text
//! fetch -> sweep -> liveness -> annotate (if logging) -> translate
//! ```
//!
//! `fetch` and `translate` belong to the architecture back-end and are
//! reached through the [RaBackend] trait; everything in between is this
//! crate. The context owns the zone arena all liveness bit arrays live in,
//! the dense table of tracked vregs, the memory-cell store, and the
//! worklists `fetch` seeds (unreachable starts, returning nodes, and
//! conditional jumps for the back-end's own use).

mod annotate;
pub mod cells;
mod liveness;
mod sweep;

use crate::{
    ir::{Func, NodeIdx, VregIdx},
    log,
    ra::cells::{CellIdx, RaCell},
    zone::Zone,
    LocalIdx, RaError,
};
use index_vec::IndexVec;

/// The two passes an architecture back-end supplies.
///
/// `fetch` runs instruction selection: it must attach work-data to every
/// node control flow can reach ([Func::attach_work]), register every vreg
/// the function touches ([RaContext::add_local]), and seed the context's
/// worklists ([RaContext::add_unreachable], [RaContext::add_returning],
/// [RaContext::add_jcc]). `translate` runs register assignment and emission;
/// by the time it is called, liveness bits and (once it asks for cells)
/// frame offsets are available.
///
/// Errors from either pass abort [RaContext::compile] and are propagated
/// verbatim.
pub trait RaBackend {
    fn fetch(&mut self, func: &mut Func, ra: &mut RaContext) -> Result<(), RaError>;
    fn translate(&mut self, func: &mut Func, ra: &mut RaContext) -> Result<(), RaError>;
}

pub struct RaContext {
    pub(crate) zone: Zone,

    /// The node following the current function's end node; terminates
    /// forward walks.
    pub(crate) stop: Option<NodeIdx>,
    /// Where the back-end may append out-of-line code (spills, epilogue
    /// fixups). Starts at the function end node.
    extra_block: Option<NodeIdx>,

    pub(crate) unreachable_list: Vec<NodeIdx>,
    pub(crate) returning_list: Vec<NodeIdx>,
    pub(crate) jcc_list: Vec<NodeIdx>,

    /// The vregs this function touches, indexed by [LocalIdx]. Liveness bit
    /// `i` is the vreg at position `i`.
    pub(crate) context_vd: Vec<VregIdx>,

    pub(crate) cells: IndexVec<CellIdx, RaCell>,
    pub(crate) mem_var_cells: Option<CellIdx>,
    pub(crate) mem_stack_cells: Option<CellIdx>,
    /// Per-size-class counts of variable cells, largest class (64) first.
    pub(crate) mem_vars_used: [u32; 7],
    pub(crate) mem_stack_cells_used: u32,
    pub(crate) mem_max_align: u32,
    pub(crate) mem_var_total: u32,
    pub(crate) mem_stack_total: u32,
    pub(crate) mem_all_total: u32,

    annotation_length: usize,
}

impl RaContext {
    pub fn new() -> Self {
        Self {
            zone: Zone::new(),
            stop: None,
            extra_block: None,
            unreachable_list: Vec::new(),
            returning_list: Vec::new(),
            jcc_list: Vec::new(),
            context_vd: Vec::new(),
            cells: IndexVec::new(),
            mem_var_cells: None,
            mem_stack_cells: None,
            mem_vars_used: [0; 7],
            mem_stack_cells_used: 0,
            mem_max_align: 0,
            mem_var_total: 0,
            mem_stack_total: 0,
            mem_all_total: 0,
            annotation_length: 12,
        }
    }

    /// Run the full pipeline for one function. On error the partially built
    /// state is left in place; [reset](RaContext::reset) before reuse.
    pub fn compile<B: RaBackend>(&mut self, func: &mut Func, be: &mut B) -> Result<(), RaError> {
        self.stop = func.stop();
        self.extra_block = Some(func.end());

        be.fetch(func, self)?;
        self.remove_unreachable_code(func)?;
        self.liveness_analysis(func)?;

        if log::should_log_ra() {
            self.annotate(func)?;
            log::log_ra(&func.display().to_string());
        }

        be.translate(func, self)?;

        // Nodes may have disappeared and it is forbidden to append code
        // after compilation, so the cursor must not survive.
        func.clear_cursor();
        Ok(())
    }

    /// Throw away all per-function state. With `release_memory`, backing
    /// allocations are returned to the system instead of being retained for
    /// the next function.
    pub fn reset(&mut self, release_memory: bool) {
        self.zone.reset(release_memory);
        self.stop = None;
        self.extra_block = None;
        if release_memory {
            self.unreachable_list = Vec::new();
            self.returning_list = Vec::new();
            self.jcc_list = Vec::new();
            self.context_vd = Vec::new();
            self.cells = IndexVec::new();
        } else {
            self.unreachable_list.clear();
            self.returning_list.clear();
            self.jcc_list.clear();
            self.context_vd.clear();
            self.cells.raw.clear();
        }
        self.mem_var_cells = None;
        self.mem_stack_cells = None;
        self.mem_vars_used = [0; 7];
        self.mem_stack_cells_used = 0;
        self.mem_max_align = 0;
        self.mem_var_total = 0;
        self.mem_stack_total = 0;
        self.mem_all_total = 0;
        self.annotation_length = 12;
    }

    /// Undo what the allocator wrote into the function's vregs and forget
    /// the local table, retaining its capacity for the next function.
    pub fn cleanup(&mut self, func: &mut Func) {
        for &v in &self.context_vd {
            let vreg = func.vreg_mut(v);
            vreg.local_id = None;
            vreg.phys_id = None;
            vreg.cell = None;
        }
        self.context_vd.clear();
        self.extra_block = None;
    }

    /// Track a vreg, assigning it the next dense local id. Idempotent.
    pub fn add_local(&mut self, func: &mut Func, v: VregIdx) -> LocalIdx {
        if let Some(lid) = func.vreg(v).local_id() {
            return lid;
        }
        let lid = LocalIdx::from_usize(self.context_vd.len());
        self.context_vd.push(v);
        func.vreg_mut(v).local_id = Some(lid);
        lid
    }

    /// Nominate a node as the start of a statically unreachable run.
    pub fn add_unreachable(&mut self, n: NodeIdx) {
        self.unreachable_list.push(n);
    }

    /// Nominate a node as returning from the function; the liveness solver
    /// walks backwards from each of these.
    pub fn add_returning(&mut self, n: NodeIdx) {
        self.returning_list.push(n);
    }

    /// Record a conditional jump for the back-end's translate pass.
    pub fn add_jcc(&mut self, n: NodeIdx) {
        self.jcc_list.push(n);
    }

    pub fn locals(&self) -> &[VregIdx] {
        &self.context_vd
    }

    /// Is `v` in `n`'s live-in set? Meaningful once liveness analysis has
    /// run; false for nodes without work-data or before analysis.
    pub fn is_live(&self, func: &Func, n: NodeIdx, v: VregIdx) -> bool {
        let Some(lid) = func.vreg(v).local_id() else {
            return false;
        };
        func.node(n)
            .work()
            .and_then(|wd| wd.liveness())
            .is_some_and(|b| b.get(&self.zone, usize::from(lid)))
    }

    pub fn jcc_nodes(&self) -> &[NodeIdx] {
        &self.jcc_list
    }

    pub fn extra_block(&self) -> Option<NodeIdx> {
        self.extra_block
    }

    pub fn set_extra_block(&mut self, n: NodeIdx) {
        self.extra_block = Some(n);
    }

    pub fn annotation_length(&self) -> usize {
        self.annotation_length
    }

    pub fn set_annotation_length(&mut self, len: usize) {
        self.annotation_length = len;
    }
}

impl Default for RaContext {
    fn default() -> Self {
        Self::new()
    }
}
