use crate::index::simple_index;

use super::{error::RuntimeError, value::Value};

simple_index! {
    /// A `%Value` slot of the running program: a global or a rooted local
    pub struct SlotId;
}

/// Slots the collector always treats as reachable. Pushes and pops are
/// strictly nested with function entry and exit.
#[derive(Debug)]
pub struct RootStack {
    slots: Vec<SlotId>,
    capacity: usize,
}

impl RootStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, slot: SlotId) -> Result<(), RuntimeError> {
        if self.slots.len() == self.capacity {
            return Err(RuntimeError::RootStackOverflow {
                capacity: self.capacity,
            });
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn pop(&mut self, count: usize) -> Result<(), RuntimeError> {
        let depth = self.slots.len();
        if count > depth {
            return Err(RuntimeError::RootStackUnderflow { count, depth });
        }
        self.slots.truncate(depth - count);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    pub fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.iter().copied()
    }
}

/// The native stack of the running program, as the collector sees it: a run
/// of untyped words. Values held in registers or spilled temporaries live
/// here and are only ever found by a conservative scan.
#[derive(Debug, Default)]
pub struct MachineStack {
    words: Vec<u64>,
    bottom: usize,
}

impl MachineStack {
    /// Records the current depth as the outermost frame worth scanning
    pub fn set_bottom(&mut self) {
        self.bottom = self.words.len();
    }

    /// Marks an existing word, e.g. a frame's marker slot, as the bottom
    pub fn set_bottom_at(&mut self, depth: usize) {
        self.bottom = depth;
    }

    /// Grows the stack by `count` zeroed words and returns the depth of the
    /// first one
    pub fn reserve(&mut self, count: usize) -> usize {
        let first = self.words.len();
        self.words.resize(first + count, 0);
        first
    }

    pub fn word(&self, depth: usize) -> u64 {
        self.words[depth]
    }

    pub fn set_word(&mut self, depth: usize, word: u64) {
        self.words[depth] = word;
    }

    /// Overwrites the two words at `depth` with both halves of `value`
    pub fn set_value(&mut self, depth: usize, value: Value) {
        let (tag, payload) = value.to_raw();
        self.words[depth] = tag as u64;
        self.words[depth + 1] = payload as u64;
    }

    pub fn push_word(&mut self, word: u64) {
        self.words.push(word);
    }

    /// Spills both halves of a value
    pub fn push_value(&mut self, value: Value) {
        let (tag, payload) = value.to_raw();
        self.words.push(tag as u64);
        self.words.push(payload as u64);
    }

    pub fn depth(&self) -> usize {
        self.words.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.words.truncate(depth);
    }

    /// Every word between the bottom marker and the top, whichever way round
    /// they currently are
    pub fn scan(&self) -> &[u64] {
        let top = self.words.len();
        let (low, high) = if self.bottom <= top {
            (self.bottom, top)
        } else {
            (top, self.bottom.min(top))
        };
        &self.words[low..high]
    }
}
