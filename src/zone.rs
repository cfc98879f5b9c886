//! The zone arena.
//!
//! A bump allocator of machine words backing every liveness bit array the
//! context creates during one `compile` call. Handles into the zone are
//! plain word offsets ([Bits](crate::bits::Bits)); nothing is freed
//! individually and one [Zone::reset] invalidates every handle at once.

use crate::{bits::Bits, RaError};

/// How many words the zone reserves up front: 8KiB worth, which comfortably
/// covers the liveness sets of a typical function without regrowing.
const INITIAL_WORDS: usize = 8 * 1024 / std::mem::size_of::<usize>();

#[derive(Debug)]
pub(crate) struct Zone {
    pub(crate) words: Vec<usize>,
}

impl Zone {
    pub(crate) fn new() -> Self {
        Self {
            words: Vec::with_capacity(INITIAL_WORDS),
        }
    }

    /// Allocate `len` zeroed words, returning a handle to their start.
    pub(crate) fn alloc(&mut self, len: usize) -> Result<Bits, RaError> {
        self.words
            .try_reserve(len)
            .map_err(|_| RaError::NoHeapMemory)?;
        let off = self.words.len();
        self.words.resize(off + len, 0);
        Ok(Bits::new(off))
    }

    /// Free everything allocated from this zone. With `release_memory` the
    /// backing store is returned to the system too; otherwise it is retained
    /// for the next function.
    pub(crate) fn reset(&mut self, release_memory: bool) {
        if release_memory {
            self.words = Vec::new();
        } else {
            self.words.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.words.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_bumps() {
        let mut z = Zone::new();
        let a = z.alloc(4).unwrap();
        let b = z.alloc(2).unwrap();
        assert_eq!(z.len(), 6);
        for i in 0..4 * usize::BITS as usize {
            assert!(!a.get(&z, i));
        }
        for i in 0..2 * usize::BITS as usize {
            assert!(!b.get(&z, i));
        }
    }

    #[test]
    fn reset_retains_or_releases() {
        let mut z = Zone::new();
        z.alloc(16).unwrap();
        let cap = z.words.capacity();
        z.reset(false);
        assert_eq!(z.len(), 0);
        assert_eq!(z.words.capacity(), cap);
        z.alloc(16).unwrap();
        z.reset(true);
        assert_eq!(z.len(), 0);
        assert_eq!(z.words.capacity(), 0);
    }
}
