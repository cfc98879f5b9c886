//! Frame memory cells.
//!
//! A cell is a slot in the function's frame: size, alignment, and (once
//! resolved) an offset. There are two flavors with different layout
//! strategies:
//!
//! * *Variable cells* back spilled vregs. Their sizes are restricted to
//!   powers of two up to 64, so they are packed by size class, largest
//!   class first; every cell then lands naturally aligned without any
//!   per-cell padding.
//! * *Stack cells* back vregs that must live in memory (address-taken
//!   locals, stack blocks). They carry arbitrary sizes, and are kept in a
//!   list sorted by `(alignment, size)` descending so that laying them out
//!   in list order never needs padding between cells either.
//!
//! Cells live in the context's arena vector and link into the two lists by
//! index. A vreg points at its cell through `VirtReg::cell`.

use crate::{
    ir::{Func, VregIdx},
    ra::RaContext,
    RaError,
};

index_vec::define_index_type! {
    pub struct CellIdx = u32;
}

/// Variable-cell size classes, largest first; also the layout order of the
/// variable region.
const SIZE_CLASSES: [u32; 7] = [64, 32, 16, 8, 4, 2, 1];

#[derive(Debug)]
pub struct RaCell {
    pub(crate) next: Option<CellIdx>,
    offset: u32,
    size: u32,
    alignment: u32,
}

impl RaCell {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }
}

fn size_class(size: u32) -> usize {
    match size {
        64 => 0,
        32 => 1,
        16 => 2,
        8 => 3,
        4 => 4,
        2 => 5,
        1 => 6,
        _ => unreachable!("variable cell size must be a power of two <= 64, got {size}"),
    }
}

/// The natural alignment of a `size`-byte stack cell: the smallest power of
/// two >= `size`, clamped to 64.
fn default_alignment(size: u32) -> u32 {
    if size > 32 {
        64
    } else if size > 16 {
        32
    } else if size > 8 {
        16
    } else if size > 4 {
        8
    } else if size > 2 {
        4
    } else if size > 1 {
        2
    } else {
        1
    }
}

impl RaContext {
    /// Create the memory cell backing `v` and point the vreg at it. The
    /// vreg must not already have a cell.
    pub fn new_var_cell(&mut self, func: &mut Func, v: VregIdx) -> Result<CellIdx, RaError> {
        debug_assert!(func.vreg(v).cell().is_none());

        let size = func.vreg(v).size();
        let cell = if func.vreg(v).is_stack() {
            self.new_stack_cell(size, func.vreg(v).alignment())?
        } else {
            self.cells
                .raw
                .try_reserve(1)
                .map_err(|_| RaError::NoHeapMemory)?;
            let idx = self.cells.push(RaCell {
                next: self.mem_var_cells,
                offset: 0,
                size,
                alignment: size,
            });
            self.mem_var_cells = Some(idx);
            self.mem_vars_used[size_class(size)] += 1;
            self.mem_max_align = self.mem_max_align.max(size);
            self.mem_var_total += size;
            idx
        };

        func.vreg_mut(v).cell = Some(cell);
        Ok(cell)
    }

    /// Create a stack cell. An `alignment` of 0 means "derive it from the
    /// size"; anything larger than 64 is clamped. The size is rounded up to
    /// a multiple of the alignment.
    pub fn new_stack_cell(&mut self, size: u32, alignment: u32) -> Result<CellIdx, RaError> {
        let alignment = match alignment {
            0 => default_alignment(size),
            a => a.min(64),
        };
        debug_assert!(alignment.is_power_of_two());
        let size = size.next_multiple_of(alignment);

        self.cells
            .raw
            .try_reserve(1)
            .map_err(|_| RaError::NoHeapMemory)?;

        // Insert sorted by (alignment, size) descending.
        let mut prev = None;
        let mut cur = self.mem_stack_cells;
        while let Some(c) = cur {
            let cell = &self.cells[c];
            if cell.alignment > alignment || (cell.alignment == alignment && cell.size > size) {
                prev = Some(c);
                cur = cell.next;
            } else {
                break;
            }
        }
        let idx = self.cells.push(RaCell {
            next: cur,
            offset: 0,
            size,
            alignment,
        });
        match prev {
            Some(p) => self.cells[p].next = Some(idx),
            None => self.mem_stack_cells = Some(idx),
        }

        self.mem_stack_cells_used += 1;
        self.mem_max_align = self.mem_max_align.max(alignment);
        self.mem_stack_total += size;
        Ok(idx)
    }

    /// Assign a frame offset to every cell.
    ///
    /// The variable region comes first: size classes are laid out adjacently
    /// from largest to smallest, so each class starts naturally aligned and
    /// cells within a class are assigned in list order. The stack region
    /// follows, aligned up to its largest cell's alignment; since the stack
    /// list is sorted by descending alignment then size, walking it in order
    /// needs no further padding. Alignment-pad bytes between the two regions
    /// are left unused.
    pub fn resolve_cell_offsets(&mut self) {
        let stack_alignment = self.mem_stack_cells.map_or(0, |c| self.cells[c].alignment);

        // Class base positions: each class starts where the previous,
        // larger one ends.
        let mut pos = [0u32; 7];
        for i in 1..7 {
            pos[i] = pos[i - 1] + SIZE_CLASSES[i - 1] * self.mem_vars_used[i - 1];
        }
        let mut stack_pos = pos[6] + self.mem_vars_used[6];
        if stack_alignment != 0 {
            stack_pos = stack_pos.next_multiple_of(stack_alignment);
        }

        let mut cur = self.mem_var_cells;
        while let Some(c) = cur {
            let k = size_class(self.cells[c].size);
            self.cells[c].offset = pos[k];
            pos[k] += SIZE_CLASSES[k];
            cur = self.cells[c].next;
        }

        let mut cur = self.mem_stack_cells;
        while let Some(c) = cur {
            self.cells[c].offset = stack_pos;
            stack_pos += self.cells[c].size;
            cur = self.cells[c].next;
        }

        self.mem_all_total = stack_pos;

        #[cfg(any(debug_assertions, test))]
        self.assert_cells_well_formed();
    }

    /// Every resolved cell is aligned and occupies its own bytes.
    #[cfg(any(debug_assertions, test))]
    fn assert_cells_well_formed(&self) {
        let mut used = vob::Vob::from_elem(false, self.mem_all_total as usize);
        for head in [self.mem_var_cells, self.mem_stack_cells] {
            let mut cur = head;
            while let Some(c) = cur {
                let cell = &self.cells[c];
                assert_eq!(cell.offset % cell.alignment, 0, "misaligned cell {c:?}");
                for b in cell.offset..cell.offset + cell.size {
                    assert!(!used.get(b as usize).unwrap(), "overlapping cell {c:?}");
                    used.set(b as usize, true);
                }
                cur = cell.next;
            }
        }
    }

    pub fn cell(&self, c: CellIdx) -> &RaCell {
        &self.cells[c]
    }

    /// Total frame bytes covering every resolved cell, padding included.
    pub fn mem_all_total(&self) -> u32 {
        self.mem_all_total
    }

    pub fn mem_var_total(&self) -> u32 {
        self.mem_var_total
    }

    pub fn mem_stack_total(&self) -> u32 {
        self.mem_stack_total
    }

    pub fn mem_max_align(&self) -> u32 {
        self.mem_max_align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_var(ra: &mut RaContext, f: &mut Func, size: u32) -> CellIdx {
        let v = f.new_vreg(size, size, false);
        ra.new_var_cell(f, v).unwrap()
    }

    #[test]
    fn var_cells_pack_by_size_class() {
        let mut ra = RaContext::new();
        let mut f = Func::new();
        // Three 4-byte vars and two 1-byte vars.
        let c4: Vec<_> = (0..3).map(|_| new_var(&mut ra, &mut f, 4)).collect();
        let c1: Vec<_> = (0..2).map(|_| new_var(&mut ra, &mut f, 1)).collect();
        ra.resolve_cell_offsets();

        let mut offs4: Vec<_> = c4.iter().map(|&c| ra.cell(c).offset()).collect();
        offs4.sort_unstable();
        assert_eq!(offs4, vec![0, 4, 8]);
        let mut offs1: Vec<_> = c1.iter().map(|&c| ra.cell(c).offset()).collect();
        offs1.sort_unstable();
        assert_eq!(offs1, vec![12, 13]);
        assert_eq!(ra.mem_all_total(), 14);
        assert_eq!(ra.mem_var_total(), 14);
        assert_eq!(ra.mem_max_align(), 4);
    }

    #[test]
    fn stack_cell_default_alignment_rounds_size() {
        let mut ra = RaContext::new();
        let c = ra.new_stack_cell(7, 0).unwrap();
        ra.resolve_cell_offsets();
        assert_eq!(ra.cell(c).alignment(), 8);
        assert_eq!(ra.cell(c).size(), 8);
        assert_eq!(ra.cell(c).offset(), 0);
        assert_eq!(ra.mem_all_total(), 8);
    }

    #[test]
    fn stack_cells_sort_by_alignment_then_size() {
        let mut ra = RaContext::new();
        let small = ra.new_stack_cell(4, 4).unwrap();
        let big = ra.new_stack_cell(16, 16).unwrap();
        ra.resolve_cell_offsets();
        assert_eq!(ra.cell(big).offset(), 0);
        assert_eq!(ra.cell(small).offset(), 16);
        assert_eq!(ra.mem_all_total(), 20);
        assert_eq!(ra.mem_stack_total(), 20);

        // Equal alignments order by size, descending.
        let mut ra = RaContext::new();
        let a = ra.new_stack_cell(8, 8).unwrap();
        let b = ra.new_stack_cell(16, 8).unwrap();
        let c = ra.new_stack_cell(8, 8).unwrap();
        ra.resolve_cell_offsets();
        assert_eq!(ra.cell(b).offset(), 0);
        let mut rest = [ra.cell(a).offset(), ra.cell(c).offset()];
        rest.sort_unstable();
        assert_eq!(rest, [16, 24]);
    }

    #[test]
    fn stack_region_is_aligned_after_var_region() {
        let mut ra = RaContext::new();
        let mut f = Func::new();
        new_var(&mut ra, &mut f, 4);
        let s = ra.new_stack_cell(8, 8).unwrap();
        ra.resolve_cell_offsets();
        // Var region ends at 4; the stack cell cannot sit there.
        assert_eq!(ra.cell(s).offset(), 8);
        assert_eq!(ra.mem_all_total(), 16);
        // Padding is the gap between the two regions.
        assert_eq!(
            ra.mem_all_total() - ra.mem_var_total() - ra.mem_stack_total(),
            4
        );
    }

    #[test]
    fn alignment_is_clamped_to_64() {
        let mut ra = RaContext::new();
        let c = ra.new_stack_cell(4, 128).unwrap();
        assert_eq!(ra.cell(c).alignment(), 64);
        assert_eq!(ra.cell(c).size(), 64);
        assert_eq!(ra.mem_max_align(), 64);
    }

    #[test]
    fn default_alignment_table() {
        for (size, want) in [
            (1, 1),
            (2, 2),
            (3, 4),
            (4, 4),
            (5, 8),
            (8, 8),
            (9, 16),
            (16, 16),
            (17, 32),
            (33, 64),
            (64, 64),
            (100, 64),
        ] {
            assert_eq!(default_alignment(size), want, "size {size}");
        }
    }

    #[test]
    fn stack_vreg_delegates_to_stack_cell() {
        let mut ra = RaContext::new();
        let mut f = Func::new();
        let v = f.new_vreg(7, 0, true);
        let c = ra.new_var_cell(&mut f, v).unwrap();
        assert_eq!(f.vreg(v).cell(), Some(c));
        assert_eq!(ra.cell(c).size(), 8);
        assert_eq!(ra.cell(c).alignment(), 8);
        assert_eq!(ra.mem_stack_total(), 8);
        assert_eq!(ra.mem_var_total(), 0);
    }

    #[test]
    #[should_panic]
    fn second_cell_for_a_vreg_is_a_programmer_error() {
        let mut ra = RaContext::new();
        let mut f = Func::new();
        let v = f.new_vreg(4, 4, false);
        ra.new_var_cell(&mut f, v).unwrap();
        ra.new_var_cell(&mut f, v).unwrap();
    }

    #[test]
    #[should_panic]
    fn var_cell_size_must_be_a_size_class() {
        let mut ra = RaContext::new();
        let mut f = Func::new();
        let v = f.new_vreg(3, 4, false);
        ra.new_var_cell(&mut f, v).unwrap();
    }

    #[test]
    fn mixed_classes_lay_out_largest_first() {
        let mut ra = RaContext::new();
        let mut f = Func::new();
        let c8 = new_var(&mut ra, &mut f, 8);
        let c2 = new_var(&mut ra, &mut f, 2);
        let c64 = new_var(&mut ra, &mut f, 64);
        ra.resolve_cell_offsets();
        assert_eq!(ra.cell(c64).offset(), 0);
        assert_eq!(ra.cell(c8).offset(), 64);
        assert_eq!(ra.cell(c2).offset(), 72);
        assert_eq!(ra.mem_all_total(), 74);
    }
}
