//! Payloads of the objects living in the collected heap

use std::{fmt, rc::Rc};

use super::{Runtime, error::RtResult, heap::ObjectKind, value::Address, value::Value};

/// Bytes one element occupies in an array buffer
pub const ELEMENT_SIZE: usize = 16;

/// Smallest capacity an array buffer is created with
pub const MIN_CAPACITY: usize = 4;

/// Computes the initial value of one field for a fresh instance
pub type FieldInitializer = Rc<dyn Fn(&mut Runtime, Value) -> RtResult<Value>>;

/// A compiled method: receiver, then the arguments
pub type MethodBody = Rc<dyn Fn(&mut Runtime, Value, &[Value]) -> RtResult<Value>>;

pub enum HeapObject {
    Str(String),
    Array(ArrayObject),
    Buffer(BufferObject),
    Dict(DictObject),
    Class(ClassObject),
    Instance(InstanceObject),
}

impl HeapObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            HeapObject::Str(_) => ObjectKind::String,
            HeapObject::Array(_) => ObjectKind::Array,
            HeapObject::Buffer(_) => ObjectKind::Buffer,
            HeapObject::Dict(_) => ObjectKind::Dict,
            HeapObject::Class(_) => ObjectKind::Class,
            HeapObject::Instance(_) => ObjectKind::Instance,
        }
    }

    /// Bytes the payload occupies behind the header
    pub fn payload_size(&self) -> usize {
        match self {
            HeapObject::Str(text) => text.len() + 1,
            HeapObject::Array(_) => 24,
            HeapObject::Buffer(buffer) => buffer.elements.len() * ELEMENT_SIZE,
            HeapObject::Dict(dict) => dict.buckets.len() * 8 + 8,
            HeapObject::Class(_) => 48,
            HeapObject::Instance(_) => 16,
        }
    }

    /// Pushes every heap address this object refers to
    pub fn trace(&self, out: &mut Vec<Address>) {
        match self {
            HeapObject::Str(_) | HeapObject::Class(_) => {}
            HeapObject::Array(array) => out.extend(array.buffer),
            HeapObject::Buffer(buffer) => {
                out.push(buffer.owner);
                out.extend(buffer.elements.iter().filter_map(Value::address));
            }
            HeapObject::Dict(dict) => out.extend(dict.values().filter_map(|value| value.address())),
            HeapObject::Instance(instance) => {
                out.push(instance.class);
                out.push(instance.fields);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayObject {
    pub len: usize,
    pub capacity: usize,
    pub buffer: Option<Address>,
}

/// Element storage of one array. Its length is the array's capacity; slots
/// past the array's length are zeroed.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferObject {
    pub owner: Address,
    pub elements: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictEntry {
    pub key: String,
    pub value: Value,
}

/// Fixed bucket count, chained on collision
#[derive(Debug, Clone, PartialEq)]
pub struct DictObject {
    buckets: Vec<Vec<DictEntry>>,
    len: usize,
}

impl DictObject {
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); buckets.max(1)],
            len: 0,
        }
    }

    fn bucket(&self, key: &str) -> usize {
        (fnv1a(key.as_bytes()) % self.buckets.len() as u64) as usize
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.buckets[self.bucket(key)]
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        let bucket = self.bucket(&key);
        let chain = &mut self.buckets[bucket];

        match chain.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => entry.value = value,
            None => {
                chain.push(DictEntry { key, value });
                self.len += 1;
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bucket order
    pub fn entries(&self) -> impl Iterator<Item = &DictEntry> {
        self.buckets.iter().flatten()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries().map(|entry| entry.key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries().map(|entry| entry.value)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

pub struct FieldDescriptor {
    pub name: String,
    pub initializer: FieldInitializer,
    pub private: bool,
}

pub struct MethodDescriptor {
    pub name: String,
    pub body: MethodBody,
    pub arity: usize,
    pub private: bool,
}

#[derive(Default)]
pub struct ClassObject {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<MethodDescriptor>,
}

impl ClassObject {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl fmt::Debug for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassObject")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|field| &field.name).collect::<Vec<_>>())
            .field("methods", &self.methods.iter().map(|method| &method.name).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceObject {
    pub class: Address,
    pub fields: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_chains_colliding_keys() {
        let mut dict = DictObject::new(1);
        dict.insert("a".into(), Value::Int(1));
        dict.insert("b".into(), Value::Int(2));
        dict.insert("a".into(), Value::Int(3));

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("a"), Some(Value::Int(3)));
        assert_eq!(dict.get("b"), Some(Value::Int(2)));
        assert!(!dict.contains_key("c"));
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn buffers_trace_their_owner_and_elements() {
        let buffer = HeapObject::Buffer(BufferObject {
            owner: Address(0x100),
            elements: vec![Value::Str(Address(0x200)), Value::Int(4), Value::Null, Value::Null],
        });
        let mut out = Vec::new();
        buffer.trace(&mut out);

        assert_eq!(out, vec![Address(0x100), Address(0x200)]);
        assert_eq!(buffer.payload_size(), 64);
    }
}
