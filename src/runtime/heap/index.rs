//! Containment lookup from an arbitrary word to the object it points into.
//!
//! Objects are chained into buckets by the region their header starts in.
//! A word can only belong to an object starting at most `max_footprint`
//! bytes below it, so a lookup searches that many regions downwards.

use hashbrown::HashMap;

use super::{
    Heap,
    header::{object_end, object_start},
};
use crate::runtime::value::Address;

const REGION_SHIFT: u32 = 12;

#[derive(Debug, Default)]
pub struct AddressIndex {
    heads: HashMap<u64, Address>,
    /// Largest header-plus-payload among indexed objects, recomputed by
    /// every sweep
    max_footprint: u64,
    /// `[min, max)` over every object ever indexed
    envelope: Option<(u64, u64)>,
}

impl AddressIndex {
    pub fn envelope(&self) -> Option<(u64, u64)> {
        self.envelope
    }

    pub fn max_footprint(&self) -> u64 {
        self.max_footprint
    }

    /// Shrinks the lookup span to the widest surviving object
    pub(super) fn narrow(&mut self, widest: u64) {
        self.max_footprint = widest;
    }

    fn contains(&self, word: u64) -> bool {
        self.envelope
            .is_some_and(|(low, high)| (low..high).contains(&word))
    }
}

fn region(address: u64) -> u64 {
    address >> REGION_SHIFT
}

impl Heap {
    pub(super) fn index_insert(&mut self, address: Address) {
        let header = &self.cells[&address].header;
        let (start, end) = (object_start(address), object_end(address, header));
        let footprint = header.footprint();

        let index = &mut self.index;
        index.max_footprint = index.max_footprint.max(footprint);
        index.envelope = Some(match index.envelope {
            Some((low, high)) => (low.min(start), high.max(end)),
            None => (start, end),
        });

        let previous = index.heads.insert(region(start), address);
        if let Some(cell) = self.cells.get_mut(&address) {
            cell.header.bucket_next = previous;
        }
    }

    pub(super) fn index_remove(&mut self, address: Address) {
        let key = region(object_start(address));
        let next = self.cells[&address].header.bucket_next;

        if self.index.heads.get(&key) == Some(&address) {
            match next {
                Some(next) => self.index.heads.insert(key, next),
                None => self.index.heads.remove(&key),
            };
            return;
        }

        let mut cursor = self.index.heads.get(&key).copied();
        while let Some(current) = cursor {
            let cell = self
                .cells
                .get_mut(&current)
                .expect("index buckets only chain live objects");
            if cell.header.bucket_next == Some(address) {
                cell.header.bucket_next = next;
                return;
            }
            cursor = cell.header.bucket_next;
        }
    }

    /// The object whose header or payload contains `word`, if any
    pub fn owner_of(&self, word: u64) -> Option<Address> {
        if word == 0 || !self.index.contains(word) {
            return None;
        }

        let lowest = region(word.saturating_sub(self.index.max_footprint));
        for key in (lowest..=region(word)).rev() {
            let mut cursor = self.index.heads.get(&key).copied();
            while let Some(address) = cursor {
                let header = &self.cells[&address].header;
                if (object_start(address)..object_end(address, header)).contains(&word) {
                    return Some(address);
                }
                cursor = header.bucket_next;
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{
        heap::{Heap, header::HEADER_SIZE},
        object::HeapObject,
    };

    #[test]
    fn interior_words_resolve_to_their_owner() {
        let mut heap = Heap::new(16, 4);
        let first = heap.insert(HeapObject::Str("x".repeat(100)), false);
        let second = heap.insert(HeapObject::Str("y".into()), false);

        assert_eq!(heap.owner_of(first.0), Some(first));
        assert_eq!(heap.owner_of(first.0 + 57), Some(first));
        assert_eq!(heap.owner_of(first.0 - HEADER_SIZE), Some(first));
        assert_eq!(heap.owner_of(second.0 + 3), Some(second));
        assert_eq!(heap.owner_of(0), None);
        assert_eq!(heap.owner_of(second.0 + 4096), None);
    }

    #[test]
    fn removed_objects_leave_their_bucket() {
        let mut heap = Heap::new(16, 4);
        let objects: Vec<_> = (0..4)
            .map(|i| heap.insert(HeapObject::Str(i.to_string()), false))
            .collect();

        heap.index_remove(objects[1]);
        heap.index_remove(objects[3]);

        assert_eq!(heap.owner_of(objects[0].0), Some(objects[0]));
        assert_eq!(heap.owner_of(objects[1].0), None);
        assert_eq!(heap.owner_of(objects[2].0), Some(objects[2]));
        assert_eq!(heap.owner_of(objects[3].0), None);
    }

    #[test]
    fn lookup_span_shrinks_once_large_objects_die() {
        let mut heap = Heap::new(16, 4);
        let small = heap.insert(HeapObject::Str("s".into()), false);
        let large = heap.insert(HeapObject::Str("x".repeat(64 * 1024)), false);
        assert_eq!(heap.index.max_footprint(), Heap::footprint(64 * 1024 + 1) as u64);

        heap.mark(small);
        heap.trace();
        heap.sweep();

        assert!(!heap.contains(large));
        assert_eq!(heap.index.max_footprint(), Heap::footprint(2) as u64);
        assert_eq!(heap.owner_of(small.0 + 1), Some(small));
        assert_eq!(heap.owner_of(large.0 + 100), None);
    }
}
