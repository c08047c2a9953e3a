//! Non-moving mark-sweep heap.
//!
//! Every object is a header followed by its payload; references point at the
//! payload. All live objects are threaded onto one intrusive list that the
//! sweep walks, and indexed by address so that arbitrary words found on the
//! machine stack can be attributed to the object they point into.
//!
//! The heap itself knows nothing about roots. A collection is driven from
//! outside: mark the roots, [`Heap::trace`] the transitive closure, then
//! [`Heap::sweep`].

use hashbrown::HashMap;

use super::{object::HeapObject, value::Address};

mod header;
mod index;

pub use header::{ALIGNMENT, HEADER_SIZE, ObjectHeader, ObjectKind};
use index::AddressIndex;

/// Where the first header is placed
const HEAP_BASE: u64 = 0x10_0000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub allocated_objects: usize,
    pub allocated_bytes: usize,
    pub freed_objects: usize,
    pub freed_bytes: usize,
}

struct Cell {
    header: ObjectHeader,
    object: HeapObject,
}

pub struct Heap {
    cells: HashMap<Address, Cell>,
    /// Most recently allocated object
    head: Option<Address>,
    index: AddressIndex,
    next_free: u64,
    mark_stack: Vec<Address>,
    live_objects: usize,
    live_bytes: usize,
    threshold: usize,
    min_threshold: usize,
    pub stats: GcStats,
}

impl Heap {
    pub fn new(initial_threshold: usize, min_threshold: usize) -> Self {
        Self {
            cells: HashMap::new(),
            head: None,
            index: AddressIndex::default(),
            next_free: HEAP_BASE,
            mark_stack: Vec::new(),
            live_objects: 0,
            live_bytes: 0,
            threshold: initial_threshold.max(min_threshold),
            min_threshold,
            stats: GcStats::default(),
        }
    }

    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Live object count at which the next allocation collects first
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether `incoming` more objects would cross the threshold
    pub fn should_collect(&self, incoming: usize) -> bool {
        self.live_objects + incoming > self.threshold
    }

    /// Bytes an object with `payload` bytes occupies, header included
    pub fn footprint(payload: usize) -> usize {
        HEADER_SIZE as usize + header::align(payload as u64) as usize
    }

    /// `[min, max)` over every address ever handed out
    pub fn envelope(&self) -> Option<(u64, u64)> {
        self.index.envelope()
    }

    /// Places `object` in the heap. Never collects; callers decide that
    /// beforehand.
    pub fn insert(&mut self, object: HeapObject, pinned: bool) -> Address {
        let mut header = ObjectHeader::new(object.kind(), object.payload_size(), pinned);
        let address = Address(self.next_free + HEADER_SIZE);
        let footprint = header.footprint();

        header.next = self.head;
        self.head = Some(address);
        self.next_free += footprint;
        self.cells.insert(address, Cell { header, object });
        self.index_insert(address);

        self.live_objects += 1;
        self.live_bytes += footprint as usize;
        self.stats.allocated_objects += 1;
        self.stats.allocated_bytes += footprint as usize;

        log::trace!("allocated {} at {address} ({footprint} bytes)", header.kind);
        address
    }

    pub fn get(&self, address: Address) -> Option<&HeapObject> {
        self.cells.get(&address).map(|cell| &cell.object)
    }

    pub fn get_mut(&mut self, address: Address) -> Option<&mut HeapObject> {
        self.cells.get_mut(&address).map(|cell| &mut cell.object)
    }

    pub fn header(&self, address: Address) -> Option<&ObjectHeader> {
        self.cells.get(&address).map(|cell| &cell.header)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.cells.contains_key(&address)
    }

    /// Queues an object for marking
    pub fn mark(&mut self, address: Address) {
        self.mark_stack.push(address);
    }

    /// Treats `word` as a possible reference and marks its owner, if any
    pub fn mark_word(&mut self, word: u64) {
        if let Some(owner) = self.owner_of(word) {
            self.mark(owner);
        }
    }

    /// Marks everything reachable from the queued objects
    pub fn trace(&mut self) {
        let mut children = Vec::new();

        while let Some(address) = self.mark_stack.pop() {
            let Some(cell) = self.cells.get_mut(&address) else {
                continue;
            };
            if cell.header.marked {
                continue;
            }
            cell.header.marked = true;

            cell.object.trace(&mut children);
            self.mark_stack.append(&mut children);
        }
    }

    /// Frees every unmarked, unpinned object, clears the marks of the rest and
    /// moves the threshold to twice the survivors. Returns the freed count.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut previous: Option<Address> = None;
        let mut cursor = self.head;
        let mut widest = 0;

        while let Some(address) = cursor {
            let cell = self
                .cells
                .get_mut(&address)
                .expect("the live list only links allocated objects");
            cursor = cell.header.next;

            if cell.header.marked || cell.header.pinned {
                cell.header.marked = false;
                widest = widest.max(cell.header.footprint());
                previous = Some(address);
                continue;
            }

            match previous {
                Some(previous) => {
                    if let Some(cell) = self.cells.get_mut(&previous) {
                        cell.header.next = cursor;
                    }
                }
                None => self.head = cursor,
            }
            self.index_remove(address);

            if let Some(cell) = self.cells.remove(&address) {
                let footprint = cell.header.footprint() as usize;
                self.live_objects -= 1;
                self.live_bytes -= footprint;
                self.stats.freed_objects += 1;
                self.stats.freed_bytes += footprint;
                freed += 1;
            }
        }

        self.index.narrow(widest);
        self.threshold = (self.live_objects * 2).max(self.min_threshold);
        self.stats.collections += 1;
        freed
    }
}

impl core::ops::Index<Address> for Heap {
    type Output = HeapObject;

    fn index(&self, address: Address) -> &Self::Output {
        self.get(address)
            .expect("a reachable value never refers to a freed object")
    }
}

impl core::ops::IndexMut<Address> for Heap {
    fn index_mut(&mut self, address: Address) -> &mut Self::Output {
        self.get_mut(address)
            .expect("a reachable value never refers to a freed object")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        object::{BufferObject, DictObject},
        value::Value,
    };

    fn string(heap: &mut Heap, text: &str) -> Address {
        heap.insert(HeapObject::Str(text.into()), false)
    }

    #[test]
    fn addresses_are_aligned_and_disjoint() {
        let mut heap = Heap::new(8, 4);
        let a = string(&mut heap, "abc");
        let b = string(&mut heap, &"z".repeat(40));
        let c = string(&mut heap, "");

        for address in [a, b, c] {
            assert_eq!(address.0 % ALIGNMENT, 0);
        }
        assert_eq!(b.0 - a.0, Heap::footprint(4) as u64);
        assert_eq!(c.0 - b.0, Heap::footprint(41) as u64);
        assert_eq!(heap.live_objects(), 3);
        assert_eq!(heap.live_bytes(), Heap::footprint(4) + Heap::footprint(41) + Heap::footprint(1));
    }

    #[test]
    fn sweep_frees_only_unmarked_objects() {
        let mut heap = Heap::new(8, 2);
        let kept = string(&mut heap, "kept");
        let dropped = string(&mut heap, "dropped");
        let pinned = heap.insert(HeapObject::Str("pinned".into()), true);

        heap.mark(kept);
        heap.trace();
        assert_eq!(heap.sweep(), 1);

        assert!(heap.contains(kept));
        assert!(!heap.contains(dropped));
        assert!(heap.contains(pinned));
        assert!(!heap.header(kept).unwrap().marked);
        assert_eq!(heap.owner_of(dropped.0), None);
        assert_eq!(heap.stats.freed_objects, 1);
    }

    #[test]
    fn threshold_is_crossed_by_the_incoming_objects() {
        let mut heap = Heap::new(4, 2);
        for i in 0..3 {
            string(&mut heap, &i.to_string());
        }

        assert!(!heap.should_collect(1));
        assert!(heap.should_collect(2));
        heap.sweep();
        assert!(!heap.should_collect(2));
    }

    #[test]
    fn threshold_follows_survivors() {
        let mut heap = Heap::new(4, 2);
        let strings: Vec<_> = (0..10).map(|i| string(&mut heap, &i.to_string())).collect();

        for address in &strings[..5] {
            heap.mark(*address);
        }
        heap.trace();
        heap.sweep();
        assert_eq!(heap.threshold(), 10);

        heap.sweep();
        assert_eq!(heap.live_objects(), 0);
        assert_eq!(heap.threshold(), 2);
    }

    #[test]
    fn cycles_terminate_marking() {
        let mut heap = Heap::new(8, 2);
        let first = heap.insert(HeapObject::Dict(DictObject::new(4)), false);
        let second = heap.insert(HeapObject::Dict(DictObject::new(4)), false);

        let HeapObject::Dict(dict) = &mut heap[first] else { unreachable!() };
        dict.insert("other".into(), Value::Dict(second));
        let HeapObject::Dict(dict) = &mut heap[second] else { unreachable!() };
        dict.insert("other".into(), Value::Dict(first));

        heap.mark(first);
        heap.trace();
        assert_eq!(heap.sweep(), 0);

        assert_eq!(heap.sweep(), 2);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn buffers_keep_their_owner_alive() {
        let mut heap = Heap::new(8, 2);
        let owner = heap.insert(HeapObject::Str("owner".into()), false);
        let buffer = heap.insert(
            HeapObject::Buffer(BufferObject {
                owner,
                elements: vec![Value::Null; 4],
            }),
            false,
        );

        heap.mark_word(buffer.0 + 40);
        heap.trace();
        heap.sweep();

        assert!(heap.contains(owner));
        assert!(heap.contains(buffer));
    }
}
