//! Shadow stack: mirrors the real EVM stack's pop/push/dup/swap operations
//! one-for-one, carrying a [`Word`] of provenance per real stack slot.

use alloc::vec::Vec;

use crate::provenance::Word;

/// A word carrying no provenance, handed back for any read past the bottom
/// of the stack (a replay that starts mid-call, or a gap in the ingested
/// trace, can leave the shadow stack shallower than the real one expects).
const NIL_WORD: Word = [None; 32];

/// A transaction-scoped shadow stack for one call frame.
#[derive(Debug, Default)]
pub struct ShadowStack {
    slots: Vec<Word>,
}

impl ShadowStack {
    /// A fresh, empty shadow stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of words currently on the stack.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pops `n` words without returning them, e.g. to drop opcode operands
    /// whose provenance has already been consumed. Popping more than the
    /// stack holds just empties it, rather than underflowing.
    pub fn pop(&mut self, n: usize) {
        let new_len = self.slots.len().saturating_sub(n);
        self.slots.truncate(new_len);
    }

    /// Peeks the `i`-th word from the top (`i == 0` is the top). Reading
    /// past the bottom yields [`NIL_WORD`] instead of panicking.
    pub fn peek(&self, i: usize) -> &Word {
        match self.slots.len().checked_sub(1 + i) {
            Some(idx) => &self.slots[idx],
            None => &NIL_WORD,
        }
    }

    /// Pushes a word onto the stack.
    pub fn push(&mut self, value: Word) {
        self.slots.push(value);
    }

    /// `DUPn`: duplicates the `n`-th word from the top (`n == 1` duplicates
    /// the top itself) onto the top of the stack.
    pub fn dup(&mut self, n: usize) {
        let word = self.slots.len().checked_sub(n).map(|idx| self.slots[idx].clone()).unwrap_or_else(|| NIL_WORD.clone());
        self.slots.push(word);
    }

    /// `SWAPn`: swaps the top word with the `n`-th word below it.
    pub fn swap(&mut self, n: usize) {
        if self.slots.len() <= n {
            return;
        }
        let top = self.slots.len() - 1;
        self.slots.swap(top, top - n);
    }

    /// Pops the top `n` words, merges every cell across all of them into a
    /// single provenance set, and pushes one word broadcasting that merged
    /// set to all 32 cells. Used for opcodes that reduce several stack
    /// operands to one scalar result (e.g. `ADDMOD`, `MULMOD`).
    pub fn peek_n_push(&mut self, n: usize) {
        assert!(n > 1, "peek_n_push: invalid n");
        let start = self.slots.len().saturating_sub(n);
        let mut all: Vec<&Word> = Vec::with_capacity(n);
        for word in &self.slots[start..] {
            all.push(word);
        }
        let merged = merge_cells_over_words(&all);
        let word: Word = core::array::from_fn(|_| merged.clone());
        self.slots.truncate(start);
        self.slots.push(word);
    }
}

fn merge_cells_over_words(words: &[&Word]) -> Option<crate::provenance::DataSourceRef> {
    use crate::provenance::{merge_data_sources, DataSource};
    let refs: Vec<&DataSource> =
        words.iter().flat_map(|w| w.iter()).filter_map(|c| c.as_ref().map(|rc| rc.as_ref())).collect();
    if refs.is_empty() {
        return None;
    }
    Some(alloc::rc::Rc::new(merge_data_sources(&refs)))
}
