//! Backward liveness analysis.
//!
//! Solves `live-in[n] = (live-out[n] - kills[n]) | uses[n]` to a fixed
//! point over the node list, one bit per tracked vreg. The solver walks
//! backwards from each returning node, carrying a propagating set `bcur`;
//! each node's own stored set is its live-in, with one twist inherited from
//! the update rule: a write-only (killing) tied reg sets its bit in the
//! node's *own* set while clearing it from `bcur`. The stored set therefore
//! behaves as "live-in plus own kills", which is exactly what makes
//! re-propagation stop at a kill: merging `bcur` into it via
//! [add_bits_del_source](crate::bits::Bits::add_bits_del_source) strips
//! killed bits out of `bcur` for free.
//!
//! The walk has three modes. *Visit* handles a node seen for the first
//! time: allocate its set, apply its tied regs, keep walking `prev`.
//! *Patch* handles an already-visited node: merge `bcur` in and stop as
//! soon as nothing changes. Whenever the walk reaches a referenced label it
//! switches to *target* mode: a stack of [LivenessTarget] records remembers
//! which jump of the label's `from`/`jump_next` chain is being processed,
//! so the chain can resume after the walk detours through an unvisited
//! predecessor. After a label's whole chain converges, the label's textual
//! predecessor is treated as a fallthrough edge unless it is an
//! unconditional jump.
//!
//! Monotonicity does the termination argument: bits are only ever added to
//! stored sets, and every re-walk requires a strict gain somewhere.

use crate::{
    bits::blen_for,
    ir::{Func, NodeIdx},
    ra::RaContext,
    RaError,
};

/// One partially processed label on the target stack.
struct LivenessTarget {
    label: NodeIdx,
    /// The jump of the label's chain currently being processed.
    from: NodeIdx,
}

enum State {
    /// First visit of `node`: allocate and seed its live-in set.
    Visit,
    /// `node` has a set already: merge `bcur` in, stop on convergence.
    Patch,
    /// `node` is a label: start or resume its jump chain.
    Target,
    /// Load the label's live-in and dispatch on the carried jump.
    ChainTop(NodeIdx),
    /// Decide whether the carried jump needs re-patching, else advance the
    /// chain.
    JumpNext(NodeIdx),
    /// The chain is done: follow the label's fallthrough predecessor.
    Fall,
    /// This walk converged: resume the innermost target, or the next
    /// returning seed.
    Done,
}

impl RaContext {
    pub(crate) fn liveness_analysis(&mut self, func: &mut Func) -> Result<(), RaError> {
        let blen = blen_for(self.context_vd.len());
        if blen == 0 {
            return Ok(());
        }
        debug_assert!(
            !self.returning_list.is_empty(),
            "fetch must supply at least one returning node"
        );
        if self.returning_list.is_empty() {
            return Ok(());
        }

        let entry = func.entry();
        let mut targets: Vec<LivenessTarget> = Vec::new();
        let mut ret_i = 0;
        let mut node = self.returning_list[0];
        let bcur = self.zone.alloc(blen)?;
        let mut state = State::Visit;

        loop {
            match state {
                State::Visit => loop {
                    if let Some(live) = func.node(node).work().unwrap().liveness() {
                        // Already visited via another path: merge instead.
                        state = if live.add_bits_del_source(&mut self.zone, bcur, blen) {
                            State::Patch
                        } else {
                            State::Done
                        };
                        break;
                    }

                    let btmp = self.zone.alloc(blen)?;
                    btmp.copy_from(&mut self.zone, bcur, blen);
                    func.node_mut(node).work_mut().unwrap().liveness = Some(btmp);

                    for i in 0..func.node(node).work().unwrap().tied().len() {
                        let tied = func.node(node).work().unwrap().tied()[i];
                        let lid = usize::from(func.vreg(tied.vreg).local_id().unwrap());
                        if tied.is_write_only() {
                            // A kill: mark it in the node's own set, strip
                            // it from the propagating one.
                            btmp.set(&mut self.zone, lid);
                            bcur.del(&mut self.zone, lid);
                        } else {
                            btmp.set(&mut self.zone, lid);
                            bcur.set(&mut self.zone, lid);
                        }
                    }

                    if func.node(node).is_label() {
                        state = State::Target;
                        break;
                    }
                    if node == entry {
                        state = State::Done;
                        break;
                    }
                    node = func.node(node).prev().unwrap();
                },

                State::Patch => loop {
                    let live = func.node(node).work().unwrap().liveness().unwrap();
                    if !live.add_bits_del_source(&mut self.zone, bcur, blen) {
                        state = State::Done;
                        break;
                    }
                    if func.node(node).is_label() {
                        state = State::Target;
                        break;
                    }
                    if node == entry {
                        state = State::Done;
                        break;
                    }
                    node = func.node(node).prev().unwrap();
                },

                State::Target => {
                    if func.label_num_refs(node) != 0 {
                        match targets.last() {
                            // Already working on this label: resume its
                            // chain where we left off, `bcur` holding the
                            // delta that just got merged into the label.
                            Some(t) if t.label == node => {
                                state = State::JumpNext(t.from);
                            }
                            _ => {
                                targets.try_reserve(1).map_err(|_| RaError::NoHeapMemory)?;
                                let from = func.label_from(node).unwrap();
                                targets.push(LivenessTarget { label: node, from });
                                state = State::ChainTop(from);
                            }
                        }
                    } else {
                        state = State::Fall;
                    }
                }

                State::ChainTop(from) => {
                    targets.last_mut().unwrap().from = from;
                    let label_live = func.node(node).work().unwrap().liveness().unwrap();
                    bcur.copy_from(&mut self.zone, label_live, blen);
                    if func.node(from).work().unwrap().liveness().is_none() {
                        node = from;
                        state = State::Visit;
                    } else {
                        state = State::JumpNext(from);
                    }
                }

                State::JumpNext(from) => {
                    let from_live = func.node(from).work().unwrap().liveness().unwrap();
                    if bcur.del_bits(&mut self.zone, from_live, blen) {
                        // The jump is missing bits the label has: re-walk
                        // from it.
                        node = from;
                        state = State::Patch;
                    } else {
                        match func.jump_next(from) {
                            Some(j) => state = State::ChainTop(j),
                            None => {
                                targets.pop();
                                state = State::Fall;
                            }
                        }
                    }
                }

                State::Fall => {
                    let label_live = func.node(node).work().unwrap().liveness().unwrap();
                    bcur.copy_from(&mut self.zone, label_live, blen);
                    node = func.node(node).prev().unwrap();
                    let n = func.node(node);
                    if n.is_jmp() || !n.has_work() {
                        state = State::Done;
                    } else if n.work().unwrap().liveness().is_none() {
                        state = State::Visit;
                    } else {
                        let live = n.work().unwrap().liveness().unwrap();
                        state = if bcur.del_bits(&mut self.zone, live, blen) {
                            State::Patch
                        } else {
                            State::Done
                        };
                    }
                }

                State::Done => match targets.last() {
                    Some(t) => {
                        node = t.label;
                        state = State::JumpNext(t.from);
                    }
                    None => {
                        ret_i += 1;
                        if ret_i < self.returning_list.len() {
                            node = self.returning_list[ret_i];
                            state = State::Visit;
                        } else {
                            return Ok(());
                        }
                    }
                },
            }
        }
    }
}
