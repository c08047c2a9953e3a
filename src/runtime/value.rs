use core::fmt;

/// Ordinal of every value kind, shared with the generated code's `%Value`
/// tag field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(i32)]
pub enum TypeTag {
    Int = 0,
    Float = 1,
    String = 2,
    Array = 3,
    Dict = 4,
    Class = 5,
    Instance = 6,
    Null = 7,
    Bool = 8,
}

impl TypeTag {
    pub fn is_heap(self) -> bool {
        matches!(
            self,
            TypeTag::String | TypeTag::Array | TypeTag::Dict | TypeTag::Class | TypeTag::Instance
        )
    }
}

/// Address of an object's payload in the simulated heap. The header sits
/// immediately before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A tagged runtime datum
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Address),
    Array(Address),
    Dict(Address),
    Class(Address),
    Instance(Address),
    Null,
    Bool(bool),
}

impl Default for Value {
    /// A zero-initialised slot
    fn default() -> Self {
        Value::Int(0)
    }
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Dict(_) => TypeTag::Dict,
            Value::Class(_) => TypeTag::Class,
            Value::Instance(_) => TypeTag::Instance,
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
        }
    }

    pub fn address(&self) -> Option<Address> {
        match *self {
            Value::Str(address)
            | Value::Array(address)
            | Value::Dict(address)
            | Value::Class(address)
            | Value::Instance(address) => Some(address),
            _ => None,
        }
    }

    /// The `{ i32, i64 }` form the generated code passes around
    pub fn to_raw(self) -> (i32, i64) {
        let payload = match self {
            Value::Int(value) => value,
            Value::Float(value) => value.to_bits() as i64,
            Value::Null => 0,
            Value::Bool(value) => value as i64,
            heap => heap.address().map_or(0, |address| address.0 as i64),
        };
        (self.tag() as i32, payload)
    }

    pub fn from_raw(tag: i32, payload: i64) -> Option<Self> {
        let address = Address(payload as u64);

        Some(match TypeTag::from_repr(tag)? {
            TypeTag::Int => Value::Int(payload),
            TypeTag::Float => Value::Float(f64::from_bits(payload as u64)),
            TypeTag::String => Value::Str(address),
            TypeTag::Array => Value::Array(address),
            TypeTag::Dict => Value::Dict(address),
            TypeTag::Class => Value::Class(address),
            TypeTag::Instance => Value::Instance(address),
            TypeTag::Null => Value::Null,
            TypeTag::Bool => Value::Bool(payload != 0),
        })
    }
}
