use crate::runtime::value::Address;

/// Bytes reserved in front of every payload
pub const HEADER_SIZE: u64 = 32;

/// Every allocation starts and ends on this boundary
pub const ALIGNMENT: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ObjectKind {
    String,
    Array,
    Buffer,
    Dict,
    Class,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: ObjectKind,
    pub marked: bool,
    /// Never reclaimed by a sweep
    pub pinned: bool,
    /// Payload bytes, before alignment
    pub size: usize,
    /// Next object in the live list
    pub next: Option<Address>,
    /// Next object in the same index bucket
    pub bucket_next: Option<Address>,
}

impl ObjectHeader {
    pub fn new(kind: ObjectKind, size: usize, pinned: bool) -> Self {
        Self {
            kind,
            marked: false,
            pinned,
            size,
            next: None,
            bucket_next: None,
        }
    }

    /// Header plus aligned payload
    pub fn footprint(&self) -> u64 {
        HEADER_SIZE + align(self.size as u64)
    }
}

pub fn align(size: u64) -> u64 {
    size.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// First byte of the header of the object at `payload`
pub fn object_start(payload: Address) -> u64 {
    payload.0 - HEADER_SIZE
}

/// One past the last payload byte of the object at `payload`
pub fn object_end(payload: Address, header: &ObjectHeader) -> u64 {
    payload.0 + align(header.size as u64)
}
