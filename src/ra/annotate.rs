//! Liveness annotation.
//!
//! After liveness analysis each fetched node can be annotated with a
//! human-readable rendering of its live-in set, one column per tracked
//! vreg: `.` marks a live bit, and columns belonging to the node's own tied
//! regs are overwritten with `r` (read), `w` (write), `x` (read+write) or
//! `u` (neither), uppercased when the vreg dies at the node. The result is
//! appended to the node's existing inline comment, padded to a fixed column
//! so the brackets line up down the listing.

use crate::{
    ir::{Func, NodeIdx},
    ra::RaContext,
    RaError,
};

impl RaContext {
    /// Replace each fetched node's inline comment with the comment plus its
    /// liveness columns.
    pub(crate) fn annotate(&mut self, func: &mut Func) -> Result<(), RaError> {
        let stop = self.stop;
        let mut cur = Some(func.entry());
        while cur != stop {
            let n = cur.unwrap();
            if func.node(n).has_work() {
                let mut text = String::new();
                self.format_inline_comment(&mut text, func, n)?;
                func.set_comment(n, text);
            }
            cur = func.node(n).next();
        }
        Ok(())
    }

    /// Append `n`'s inline comment and, if liveness has been computed for
    /// it, the per-vreg liveness columns, to `dst`.
    pub fn format_inline_comment(
        &self,
        dst: &mut String,
        func: &Func,
        n: NodeIdx,
    ) -> Result<(), RaError> {
        if let Some(c) = func.node(n).comment() {
            dst.push_str(c);
        }

        let Some(wd) = func.node(n).work() else {
            return Ok(());
        };
        let Some(live) = wd.liveness() else {
            return Ok(());
        };

        while dst.len() < self.annotation_length() {
            dst.push(' ');
        }

        let mut cols = vec![b' '; self.context_vd.len()];
        for (i, col) in cols.iter_mut().enumerate() {
            if live.get(&self.zone, i) {
                *col = b'.';
            }
        }
        for tied in wd.tied() {
            let lid = usize::from(func.vreg(tied.vreg).local_id().unwrap());
            let mut c = match (tied.reads(), tied.writes()) {
                (true, false) => b'r',
                (false, true) => b'w',
                (true, true) => b'x',
                (false, false) => b'u',
            };
            if tied.is_unuse() {
                c = c.to_ascii_uppercase();
            }
            cols[lid] = c;
        }

        dst.push('[');
        dst.push_str(std::str::from_utf8(&cols).unwrap());
        dst.push(']');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ir::{Func, NodeIdx, TiedReg, VregIdx},
        ra::RaContext,
    };

    /// def a; mix a,b; ret -- with b read-only and dying at the mix.
    fn analysed() -> (Func, RaContext, [NodeIdx; 3]) {
        let mut f = Func::new();
        let a = f.new_vreg(4, 4, false);
        let b = f.new_vreg(4, 4, false);
        let def = f.inst();
        let mix = f.inst();
        let ret = f.inst();
        f.attach_work(f.entry(), &[TiedReg::new(b, TiedReg::W_ALL)]);
        f.attach_work(def, &[TiedReg::new(a, TiedReg::W_ALL)]);
        f.attach_work(
            mix,
            &[
                TiedReg::new(a, TiedReg::R_ALL | TiedReg::W_ALL),
                TiedReg::new(b, TiedReg::R_ALL | TiedReg::UNUSE),
            ],
        );
        f.attach_work(ret, &[TiedReg::new(a, TiedReg::R_ALL)]);

        let mut ra = RaContext::new();
        ra.stop = f.stop();
        for v in (0..f.vregs_len()).map(VregIdx::from_usize) {
            ra.add_local(&mut f, v);
        }
        ra.add_returning(ret);
        ra.liveness_analysis(&mut f).unwrap();
        (f, ra, [def, mix, ret])
    }

    #[test]
    fn columns_show_live_bits_and_tied_kinds() {
        let (f, ra, [def, mix, ret]) = analysed();
        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, mix).unwrap();
        // a is local 0 (read+write), b local 1 (read-only, dying).
        assert_eq!(s, format!("{:<12}[xR]", ""));

        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, def).unwrap();
        assert_eq!(s, format!("{:<12}[w.]", ""));

        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, ret).unwrap();
        assert_eq!(s, format!("{:<12}[r ]", ""));
    }

    #[test]
    fn existing_comment_is_kept_and_padded() {
        let (mut f, ra, [_, mix, _]) = analysed();
        f.set_comment(mix, "merge".to_owned());
        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, mix).unwrap();
        assert_eq!(s, "merge       [xR]");
    }

    #[test]
    fn long_comment_is_not_truncated() {
        let (mut f, ra, [_, mix, _]) = analysed();
        f.set_comment(mix, "a rather long inline comment".to_owned());
        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, mix).unwrap();
        assert_eq!(s, "a rather long inline comment[xR]");
    }

    #[test]
    fn node_without_liveness_appends_nothing() {
        let mut f = Func::new();
        let i = f.inst();
        f.set_comment(i, "plain".to_owned());
        let ra = RaContext::new();
        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, i).unwrap();
        assert_eq!(s, "plain");
    }

    #[test]
    fn annotate_rewrites_fetched_nodes() {
        let (mut f, mut ra, [_, mix, _]) = analysed();
        ra.annotate(&mut f).unwrap();
        assert_eq!(f.node(mix).comment(), Some("            [xR]"));
        let rendered = f.display().to_string();
        assert!(rendered.contains("[xR]"));
    }

    #[test]
    fn annotation_length_is_configurable() {
        let (f, mut ra, [_, mix, _]) = analysed();
        ra.set_annotation_length(4);
        let mut s = String::new();
        ra.format_inline_comment(&mut s, &f, mix).unwrap();
        assert_eq!(s, "    [xR]");
    }
}
