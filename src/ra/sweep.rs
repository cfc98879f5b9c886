//! Unreachable-code removal.
//!
//! `fetch` walks the function along real control flow, so any node it never
//! attached work-data to is statically unreachable. It also nominates seed
//! nodes: targets of jumps it found in dead code. Starting from each seed
//! this pass scrubs the run of work-less nodes that follows, stopping at
//! the first node `fetch` reached (or the function's stop sentinel).
//!
//! Within one run, everything is deleted until the first label; from that
//! label on, control-flow anchors exist and only nodes marked removable go.
//! The effect is that completely dead instructions disappear while labels,
//! directives and informational nodes after them survive.

use crate::{ir::Func, log, ra::RaContext, RaError};

impl RaContext {
    pub(crate) fn remove_unreachable_code(&mut self, func: &mut Func) -> Result<(), RaError> {
        let stop = self.stop;

        for i in 0..self.unreachable_list.len() {
            let seed = self.unreachable_list[i];
            // A seed that was already swept by an earlier run has no links
            // left; skip it.
            if func.node(seed).prev().is_none() || Some(seed) == stop {
                continue;
            }

            // Find the end of the dead run: the first node fetch reached.
            let first = seed;
            let mut node = Some(seed);
            while node != stop {
                let n = node.unwrap();
                if func.node(n).has_work() {
                    break;
                }
                node = func.node(n).next();
            }

            if node == Some(first) {
                continue;
            }
            let run_end = node;

            let mut node = Some(first);
            let mut remove_everything = true;
            while node != run_end {
                let n = node.unwrap();
                let next = func.node(n).next();

                let mut remove = func.node(n).is_removable();
                if !remove {
                    if func.node(n).is_label() {
                        remove_everything = false;
                    }
                    remove = remove_everything;
                }

                if remove {
                    log::log_ra(&format!("removed unreachable node {}", usize::from(n)));
                    func.remove_node(n);
                }
                node = next;
            }
        }

        Ok(())
    }
}
