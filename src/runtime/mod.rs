//! The runtime the generated programs link against, as a safe Rust model.
//!
//! A [`Runtime`] owns the collected heap, the program's `%Value` slots, the
//! root stack of registered slots and a word-level model of the native
//! stack. Collections happen only inside allocation and find live objects
//! through the root stack, the current exception and a conservative scan of
//! the machine stack.
//!
//! Anything a caller holds in a Rust local across a call that may allocate
//! must be reachable from one of those: either stored in a rooted slot or
//! spilled with [`Runtime::frame`].

use std::io::{self, BufRead, Write};

use crate::index::IndexVec;

pub mod builtins;
pub mod error;
pub mod exception;
pub mod heap;
pub mod object;
pub mod ops;
pub mod roots;
pub mod value;

pub use error::{RtResult, RuntimeError, Unwind};
use exception::Checkpoint;
pub use heap::{GcStats, Heap};
use object::{
    ArrayObject, BufferObject, DictObject, ELEMENT_SIZE, HeapObject, MIN_CAPACITY,
};
use roots::{MachineStack, RootStack, SlotId};
pub use value::{Address, TypeTag, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Live objects before the first collection
    pub initial_threshold: usize,
    /// Floor for the adapted threshold
    pub min_threshold: usize,
    pub root_stack_capacity: usize,
    /// Live bytes past which allocation fails
    pub memory_limit: usize,
    /// Buckets in every dict
    pub dict_buckets: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 256,
            min_threshold: 64,
            root_stack_capacity: 1024,
            memory_limit: 256 * 1024 * 1024,
            dict_buckets: 16,
        }
    }
}

pub struct Runtime {
    config: GcConfig,
    heap: Heap,
    slots: IndexVec<SlotId, Value>,
    roots: RootStack,
    stack: MachineStack,
    checkpoints: Vec<Checkpoint>,
    /// The last raised value; kept alive until the next raise
    exception: Option<Value>,
    arguments: Vec<String>,
    output: Box<dyn Write>,
    input: Box<dyn BufRead>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(GcConfig::default())
    }
}

impl Runtime {
    pub fn new(config: GcConfig) -> Self {
        log::debug!("runtime initialised with {config:?}");

        Self {
            heap: Heap::new(config.initial_threshold, config.min_threshold),
            roots: RootStack::new(config.root_stack_capacity),
            config,
            slots: IndexVec::new(),
            stack: MachineStack::default(),
            checkpoints: Vec::new(),
            exception: None,
            arguments: Vec::new(),
            output: Box::new(io::stdout()),
            input: Box::new(io::BufReader::new(io::stdin())),
        }
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn set_input(&mut self, input: Box<dyn BufRead>) {
        self.input = input;
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn live_objects(&self) -> usize {
        self.heap.live_objects()
    }

    pub fn live_bytes(&self) -> usize {
        self.heap.live_bytes()
    }

    pub fn threshold(&self) -> usize {
        self.heap.threshold()
    }

    pub fn stats(&self) -> &GcStats {
        &self.heap.stats
    }

    /// Process arguments, program name first
    pub fn set_args(&mut self, arguments: impl IntoIterator<Item = String>) {
        self.arguments = arguments.into_iter().collect();
    }

    // -----------------------------------------------------------------------
    // Slots and roots
    // -----------------------------------------------------------------------

    /// A fresh zeroed slot. It is only a root once pushed.
    pub fn new_slot(&mut self) -> SlotId {
        self.slots.push(Value::default())
    }

    pub fn load(&self, slot: SlotId) -> Value {
        self.slots[slot]
    }

    pub fn store(&mut self, slot: SlotId, value: Value) {
        self.slots[slot] = value;
    }

    pub fn push_root(&mut self, slot: SlotId) -> RtResult<()> {
        self.roots.push(slot)?;
        log::trace!("pushed root {slot:?} (depth {})", self.roots.depth());
        Ok(())
    }

    pub fn pop_roots(&mut self, count: usize) -> RtResult<()> {
        self.roots.pop(count)?;
        log::trace!("popped {count} roots (depth {})", self.roots.depth());
        Ok(())
    }

    pub fn root_depth(&self) -> usize {
        self.roots.depth()
    }

    /// Marks the current machine stack depth as the outermost frame
    pub fn set_stack_bottom(&mut self) {
        self.stack.set_bottom();
    }

    pub fn machine_stack(&mut self) -> &mut MachineStack {
        &mut self.stack
    }

    /// Runs `body` with `values` spilled to the machine stack, where the
    /// conservative scan keeps them alive
    pub fn frame<T>(
        &mut self,
        values: &[Value],
        body: impl FnOnce(&mut Self) -> RtResult<T>,
    ) -> RtResult<T> {
        let depth = self.stack.depth();
        for value in values {
            self.stack.push_value(*value);
        }

        let result = body(self);
        self.stack.truncate(depth);
        result
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    /// One full mark and sweep. Returns the number of objects freed.
    pub fn collect(&mut self) -> usize {
        for word in self.stack.scan() {
            self.heap.mark_word(*word);
        }
        for slot in self.roots.iter() {
            if let Some(address) = self.slots[slot].address() {
                self.heap.mark(address);
            }
        }
        if let Some(address) = self.exception.and_then(|exception| exception.address()) {
            self.heap.mark(address);
        }

        self.heap.trace();
        let freed = self.heap.sweep();

        log::debug!(
            "collection {}: freed {freed}, {} survivors, next threshold {}",
            self.heap.stats.collections,
            self.heap.live_objects(),
            self.heap.threshold()
        );
        freed
    }

    /// Makes room for `objects` new objects totalling `bytes`, collecting at
    /// most twice. The following inserts never collect.
    fn reserve(&mut self, objects: usize, bytes: usize) -> RtResult<()> {
        if self.heap.should_collect(objects) {
            self.collect();
        }

        if self.heap.live_bytes() + bytes > self.config.memory_limit {
            self.collect();

            let live = self.heap.live_bytes();
            if live + bytes > self.config.memory_limit {
                return Err(RuntimeError::OutOfMemory {
                    requested: bytes,
                    live,
                    limit: self.config.memory_limit,
                }
                .into());
            }
        }

        Ok(())
    }

    fn allocate(&mut self, object: HeapObject, pinned: bool) -> RtResult<Address> {
        self.reserve(1, Heap::footprint(object.payload_size()))?;
        Ok(self.heap.insert(object, pinned))
    }

    // -----------------------------------------------------------------------
    // Object constructors and accessors
    // -----------------------------------------------------------------------

    pub fn string(&mut self, text: impl Into<String>) -> RtResult<Value> {
        self.allocate(HeapObject::Str(text.into()), false)
            .map(Value::Str)
    }

    /// The text of a string value
    pub fn text(&self, value: Value) -> Option<&str> {
        match value {
            Value::Str(address) => match &self.heap[address] {
                HeapObject::Str(text) => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn array_new(&mut self, elements: &[Value]) -> RtResult<Value> {
        self.allocate_array(elements).map(Value::Array)
    }

    pub(crate) fn allocate_array(&mut self, elements: &[Value]) -> RtResult<Address> {
        let capacity = elements.len().max(MIN_CAPACITY);

        self.frame(elements, |rt| {
            rt.reserve(
                2,
                Heap::footprint(24) + Heap::footprint(capacity * ELEMENT_SIZE),
            )?;

            let array = rt.heap.insert(
                HeapObject::Array(ArrayObject {
                    len: elements.len(),
                    capacity,
                    buffer: None,
                }),
                false,
            );

            let mut storage = vec![Value::default(); capacity];
            storage[..elements.len()].copy_from_slice(elements);
            let buffer = rt.heap.insert(
                HeapObject::Buffer(BufferObject {
                    owner: array,
                    elements: storage,
                }),
                false,
            );

            rt.array_mut(array).buffer = Some(buffer);
            Ok(array)
        })
    }

    pub(crate) fn array(&self, address: Address) -> &ArrayObject {
        match &self.heap[address] {
            HeapObject::Array(array) => array,
            other => panic!("array value refers to a {}", other.kind()),
        }
    }

    fn array_mut(&mut self, address: Address) -> &mut ArrayObject {
        match &mut self.heap[address] {
            HeapObject::Array(array) => array,
            other => panic!("array value refers to a {}", other.kind()),
        }
    }

    fn buffer_mut(&mut self, array: Address) -> Option<&mut BufferObject> {
        let buffer = self.array(array).buffer?;
        match &mut self.heap[buffer] {
            HeapObject::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// The elements of an array, in order
    pub fn array_elements(&self, address: Address) -> Vec<Value> {
        let array = self.array(address);
        match array.buffer.map(|buffer| &self.heap[buffer]) {
            Some(HeapObject::Buffer(buffer)) => buffer.elements[..array.len].to_vec(),
            _ => Vec::new(),
        }
    }

    /// Simulated address of the `index`th element slot inside the buffer
    pub fn element_address(&self, array: Address, index: usize) -> Option<u64> {
        let buffer = self.array(array).buffer?;
        Some(buffer.0 + (index * ELEMENT_SIZE) as u64)
    }

    pub(crate) fn array_store(&mut self, array: Address, index: usize, value: Value) {
        if let Some(buffer) = self.buffer_mut(array) {
            buffer.elements[index] = value;
        }
    }

    /// Appends, doubling the buffer when full. The old buffer is left to the
    /// collector.
    pub fn array_push(&mut self, array: Address, value: Value) -> RtResult<()> {
        let ArrayObject { len, capacity, .. } = *self.array(array);

        if len == capacity {
            let elements = self.array_elements(array);
            let capacity = (capacity * 2).max(MIN_CAPACITY);

            self.frame(&[Value::Array(array), value], |rt| {
                let mut storage = vec![Value::default(); capacity];
                storage[..elements.len()].copy_from_slice(&elements);
                let buffer = rt.allocate(
                    HeapObject::Buffer(BufferObject {
                        owner: array,
                        elements: storage,
                    }),
                    false,
                )?;

                let object = rt.array_mut(array);
                object.buffer = Some(buffer);
                object.capacity = capacity;
                Ok(())
            })?;
        }

        self.array_store(array, len, value);
        self.array_mut(array).len += 1;
        Ok(())
    }

    pub fn dict_new(&mut self) -> RtResult<Value> {
        self.allocate_dict().map(Value::Dict)
    }

    pub(crate) fn allocate_dict(&mut self) -> RtResult<Address> {
        let buckets = self.config.dict_buckets;
        self.allocate(HeapObject::Dict(DictObject::new(buckets)), false)
    }

    pub(crate) fn dict(&self, address: Address) -> &DictObject {
        match &self.heap[address] {
            HeapObject::Dict(dict) => dict,
            other => panic!("dict value refers to a {}", other.kind()),
        }
    }

    pub(crate) fn dict_mut(&mut self, address: Address) -> &mut DictObject {
        match &mut self.heap[address] {
            HeapObject::Dict(dict) => dict,
            other => panic!("dict value refers to a {}", other.kind()),
        }
    }

    /// Writes `text` and a newline to the program's output
    pub(crate) fn write_line(&mut self, text: &str) -> RtResult<()> {
        writeln!(self.output, "{text}").map_err(RuntimeError::from)?;
        self.output.flush().map_err(RuntimeError::from)?;
        Ok(())
    }

    /// One line of input without its terminator, `None` at end of input
    pub(crate) fn read_line(&mut self) -> RtResult<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line).map_err(RuntimeError::from)? == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}
