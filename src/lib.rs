//! The register-allocation context of a JIT assembler.
//!
//! This crate is the architecture independent middle of a per-function code
//! generation pipeline. Earlier passes (outside this crate) build a
//! doubly-linked list of IR nodes for one function; an architecture specific
//! back-end supplies the two outer passes, instruction selection (`fetch`)
//! and register assignment plus emission (`translate`). Between those, the
//! [RaContext] performs four coupled transformations:
//!
//! 1. Removal of statically unreachable code, seeded by the back-end.
//! 2. A backward fixed-point liveness analysis over virtual registers,
//!    across arbitrary forward and back edges.
//! 3. Assignment of frame memory cells to spilled and stack-resident virtual
//!    registers, packed by power-of-two size class.
//! 4. Sequencing of the whole pipeline, including optional annotation of the
//!    node list with per-node liveness for logging.
//!
//! The liveness solver deserves a word of warning: it is a backward worklist
//! algorithm over an *unstructured* control flow graph. Labels aggregate
//! their incoming jumps in a `from`/`jump_next` chain (the reverse-CFG
//! successor list), and the solver maintains an explicit stack of partially
//! processed labels so that it can resume a jump chain after a detour
//! through an unvisited predecessor. Bits only ever move monotonically into
//! per-node live-in sets, which is what guarantees termination.
//!
//!
//! ## Ownership
//!
//! All cyclic structure is expressed with typed indices, never references:
//! nodes live in an arena vector inside [Func] and link to each other with
//! `Option<NodeIdx>`. Liveness bit arrays live in a word arena ([RaContext]'s
//! zone) and are referred to by copyable handles; one `reset` invalidates
//! them all en masse. Virtual registers outlive the context: `cleanup`
//! clears the per-function state the context wrote into them.
//!
//!
//! ## Abbreviations and terminological conventions
//!
//! In rough alphabetical order:
//!
//!  * `bcur`: the propagating live-in set the liveness solver carries while
//!    walking backwards.
//!  * `blen`: the length of a liveness bit array, in machine words.
//!  * `cell`: an assigned frame memory slot (size, alignment, offset).
//!  * `lid`: a [LocalIdx], the dense per-function id of a tracked vreg.
//!  * `ra`: the name conventionally given to the shared [RaContext].
//!  * `tied`: a [TiedReg], one use/def of a vreg by one node.
//!  * `vreg`: a virtual register, [VirtReg].
//!  * `wd`: a node's attached work-data, [RaData].

mod bits;
pub mod ir;
mod log;
pub mod ra;
mod zone;

use std::{error::Error, fmt};

pub use bits::Bits;
pub use ir::{Func, JumpKind, LocalIdx, Node, NodeIdx, NodeKind, RaData, TiedReg, VirtReg, VregIdx};
pub use ra::{
    cells::{CellIdx, RaCell},
    RaBackend, RaContext,
};

/// A failure to register-allocate a function.
#[derive(Debug)]
pub enum RaError {
    /// The context's arena could not satisfy an allocation. The partially
    /// built state is left in place; the caller must `reset` before
    /// compiling another function.
    NoHeapMemory,
    /// The target back-end rejected the function during `fetch` or
    /// `translate`. The message is propagated verbatim.
    Backend(String),
}

impl fmt::Display for RaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaError::NoHeapMemory => write!(f, "out of heap memory"),
            RaError::Backend(s) => write!(f, "back-end error: {s}"),
        }
    }
}

impl Error for RaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(RaError::NoHeapMemory.to_string(), "out of heap memory");
        assert_eq!(
            RaError::Backend("no encoding for vpmulhrsw".into()).to_string(),
            "back-end error: no encoding for vpmulhrsw"
        );
    }
}
