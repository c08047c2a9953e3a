//! LIR (Low-level Intermediate Representation). In this form, loops and
//! conditionals are simplified to labelled basic blocks joined by branches,
//! and expression trees are flattened into typed instructions operating on
//! boxed values. The shape follows the LLVM IR family so the backend only has
//! to print it.

use crate::{
    index::{IndexVec, simple_index},
    middle::pool::StringId,
};

pub mod abi;
pub mod ast_lowering;
pub mod builder;
pub mod pretty_print;

pub use abi::{Intrinsic, RuntimeFunction};

#[derive(Debug)]
pub struct Module {
    pub strings: IndexVec<StringId, String>,
    pub globals: Vec<GlobalSlot>,
    pub functions: Vec<FunctionDefinition>,
}

/// One zero-initialized `Value` slot per top level variable
#[derive(Debug, Clone)]
pub struct GlobalSlot {
    pub symbol: String,
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub symbol: String,
    pub return_type: Type,
    pub parameters: Vec<RegisterId>,
    pub registers: IndexVec<RegisterId, Register>,
    pub blocks: IndexVec<BlockId, Block>,
}

#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub label: &'static str,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminator)
    }
}

simple_index! {
    /// Identifies an LIR block
    pub struct BlockId;
}

simple_index! {
    /// Identifies a virtual register which holds a temporary value
    pub struct RegisterId;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub id: RegisterId,
    pub ty: Type,
    /// Storage names for source-level slots, `None` for temporaries
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// The boxed `{ i32 tag, i64 payload }` record
    Value,
    I1,
    I32,
    I64,
    F64,
    Ptr,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOperator {
    Add,
    Sub,
    Mul,
    Xor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Runtime(RuntimeFunction),
    Intrinsic(Intrinsic),
    /// A function defined in this module
    Function(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Alloca {
        destination: RegisterId,
        ty: Type,
        count: u32,
    },
    Load {
        destination: RegisterId,
        ty: Type,
        source: Operand,
    },
    Store {
        value: TypedOperand,
        destination: Operand,
    },
    Call {
        destination: Option<RegisterId>,
        return_type: Type,
        callee: Callee,
        arguments: Vec<TypedOperand>,
    },
    ExtractValue {
        destination: RegisterId,
        aggregate: Operand,
        index: u32,
    },
    GetElementPointer {
        destination: RegisterId,
        element_ty: Type,
        base: Operand,
        index: TypedOperand,
    },
    Compare {
        destination: RegisterId,
        predicate: IntPredicate,
        lhs: TypedOperand,
        rhs: Operand,
    },
    BinaryOperation {
        destination: RegisterId,
        operator: IntOperator,
        lhs: TypedOperand,
        rhs: Operand,
    },
    Branch {
        condition: Operand,
        positive: BlockId,
        negative: BlockId,
    },
    Jump {
        destination: BlockId,
    },
    Return {
        value: Option<TypedOperand>,
    },
    Unreachable,
    Comment(String),
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Branch { .. } | Self::Jump { .. } | Self::Return { .. } | Self::Unreachable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    Int(i64),
    Float(f64),
    Bool(bool),
    Zero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(RegisterId),
    Immediate(Immediate),
    Global(GlobalRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalRef {
    Slot(String),
    String(StringId),
    Function(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedOperand(pub Type, pub Operand);

impl TypedOperand {
    pub fn value(register: RegisterId) -> Self {
        Self(Type::Value, Operand::Register(register))
    }

    pub fn ptr(operand: Operand) -> Self {
        Self(Type::Ptr, operand)
    }

    pub fn i32(value: i64) -> Self {
        Self(Type::I32, Operand::Immediate(Immediate::Int(value)))
    }

    pub fn string(id: StringId) -> Self {
        Self::ptr(Operand::Global(GlobalRef::String(id)))
    }
}
