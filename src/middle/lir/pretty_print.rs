//! Colored rendering of LIR in LLVM assembly syntax. The textual target
//! strips the escapes, so what is printed here is exactly what gets emitted.

use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::lir::{
        self, Callee, FunctionDefinition, GlobalRef, Immediate, Instruction, IntOperator,
        IntPredicate, Operand, RegisterId, Type, TypedOperand,
    },
};

pub fn pretty_print_function(function: &FunctionDefinition) -> String {
    let printer = Printer { function };
    let mut out = String::new();

    let parameters = function
        .parameters
        .iter()
        .map(|id| {
            format!(
                "{} {}",
                function.registers[*id].ty,
                printer.register(*id)
            )
        })
        .join(", ");

    out.push_str(&format!(
        "{} {} {}({}) {{\n",
        "define".magenta(),
        function.return_type,
        format!("@{}", function.symbol).blue(),
        parameters
    ));

    for block in function.blocks.iter() {
        out.push_str(&format!(
            "{}\n",
            format!("{}{}:", block.label, block.id.index()).bright_red()
        ));

        for instruction in &block.instructions {
            out.push_str(&format!("  {}\n", printer.instruction(instruction)));
        }
    }

    out.push('}');
    out
}

struct Printer<'f> {
    function: &'f FunctionDefinition,
}

impl Printer<'_> {
    fn register(&self, id: RegisterId) -> String {
        let name = match &self.function.registers[id].name {
            Some(name) => format!("%{name}"),
            None => format!("%t{}", id.index()),
        };

        name.yellow().to_string()
    }

    fn label(&self, id: lir::BlockId) -> String {
        let block = &self.function.blocks[id];
        format!("%{}{}", block.label, id.index()).blue().to_string()
    }

    fn operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Register(id) => self.register(*id),
            Operand::Immediate(immediate) => immediate.to_string().purple().to_string(),
            Operand::Global(global) => global.to_string().green().to_string(),
        }
    }

    fn typed(&self, TypedOperand(ty, operand): &TypedOperand) -> String {
        format!("{ty} {}", self.operand(operand))
    }

    fn instruction(&self, instruction: &Instruction) -> String {
        let assign = |destination: &RegisterId, rest: String| {
            format!("{} {} {rest}", self.register(*destination), "=".white())
        };

        match instruction {
            Instruction::Alloca {
                destination,
                ty,
                count,
            } => assign(
                destination,
                match count {
                    1 => format!("{} {ty}", "alloca".cyan()),
                    n => format!("{} {ty}, i32 {n}", "alloca".cyan()),
                },
            ),
            Instruction::Load {
                destination,
                ty,
                source,
            } => assign(
                destination,
                format!("{} {ty}, ptr {}", "load".cyan(), self.operand(source)),
            ),
            Instruction::Store { value, destination } => format!(
                "{} {}, ptr {}",
                "store".cyan(),
                self.typed(value),
                self.operand(destination)
            ),
            Instruction::Call {
                destination,
                return_type,
                callee,
                arguments,
            } => {
                let call = format!(
                    "{} {return_type} {}({})",
                    "call".cyan(),
                    callee.to_string().blue(),
                    arguments.iter().map(|a| self.typed(a)).join(", ")
                );

                match destination {
                    Some(destination) => assign(destination, call),
                    None => call,
                }
            }
            Instruction::ExtractValue {
                destination,
                aggregate,
                index,
            } => assign(
                destination,
                format!(
                    "{} {} {}, {index}",
                    "extractvalue".cyan(),
                    Type::Value,
                    self.operand(aggregate)
                ),
            ),
            Instruction::GetElementPointer {
                destination,
                element_ty,
                base,
                index,
            } => assign(
                destination,
                format!(
                    "{} {element_ty}, ptr {}, {}",
                    "getelementptr".cyan(),
                    self.operand(base),
                    self.typed(index)
                ),
            ),
            Instruction::Compare {
                destination,
                predicate,
                lhs,
                rhs,
            } => assign(
                destination,
                format!(
                    "{} {predicate} {}, {}",
                    "icmp".cyan(),
                    self.typed(lhs),
                    self.operand(rhs)
                ),
            ),
            Instruction::BinaryOperation {
                destination,
                operator,
                lhs,
                rhs,
            } => assign(
                destination,
                format!(
                    "{} {}, {}",
                    operator.to_string().cyan(),
                    self.typed(lhs),
                    self.operand(rhs)
                ),
            ),
            Instruction::Branch {
                condition,
                positive,
                negative,
            } => format!(
                "{} i1 {}, label {}, label {}",
                "br".cyan(),
                self.operand(condition),
                self.label(*positive),
                self.label(*negative)
            ),
            Instruction::Jump { destination } => {
                format!("{} label {}", "br".cyan(), self.label(*destination))
            }
            Instruction::Return { value: Some(value) } => {
                format!("{} {}", "ret".cyan(), self.typed(value))
            }
            Instruction::Return { value: None } => format!("{} void", "ret".cyan()),
            Instruction::Unreachable => "unreachable".cyan().to_string(),
            Instruction::Comment(text) => format!("; {text}").bright_black().to_string(),
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Value => write!(f, "%Value"),
            Type::I1 => write!(f, "i1"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F64 => write!(f, "double"),
            Type::Ptr => write!(f, "ptr"),
            Type::Void => write!(f, "void"),
        }
    }
}

impl core::fmt::Display for Immediate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Immediate::Int(value) => write!(f, "{value}"),
            // Hexadecimal is the only float spelling LLVM accepts for every value
            Immediate::Float(value) => write!(f, "0x{:016X}", value.to_bits()),
            Immediate::Bool(value) => write!(f, "{value}"),
            Immediate::Zero => write!(f, "zeroinitializer"),
        }
    }
}

impl core::fmt::Display for GlobalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalRef::Slot(symbol) | GlobalRef::Function(symbol) => write!(f, "@{symbol}"),
            GlobalRef::String(id) => write!(f, "@.str.{}", id.index()),
        }
    }
}

impl core::fmt::Display for Callee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callee::Runtime(function) => write!(f, "@{function}"),
            Callee::Intrinsic(intrinsic) => write!(f, "@{intrinsic}"),
            Callee::Function(symbol) => write!(f, "@{symbol}"),
        }
    }
}

impl core::fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
        })
    }
}

impl core::fmt::Display for IntOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IntOperator::Add => "add",
            IntOperator::Sub => "sub",
            IntOperator::Mul => "mul",
            IntOperator::Xor => "xor",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::IndexVec,
        middle::lir::{Block, BlockId, Register},
    };

    #[test]
    fn prints_llvm_syntax_once_stripped() {
        let mut registers = IndexVec::new();
        let slot = registers.push(Register {
            id: RegisterId::new(0),
            ty: Type::Ptr,
            name: Some("x.0".into()),
        });
        let loaded = registers.push(Register {
            id: RegisterId::new(1),
            ty: Type::Value,
            name: None,
        });

        let mut blocks = IndexVec::new();
        blocks.push(Block {
            id: BlockId::new(0),
            label: "entry",
            instructions: vec![
                Instruction::Alloca {
                    destination: slot,
                    ty: Type::Value,
                    count: 1,
                },
                Instruction::Load {
                    destination: loaded,
                    ty: Type::Value,
                    source: Operand::Register(slot),
                },
                Instruction::Return {
                    value: Some(TypedOperand::value(loaded)),
                },
            ],
        });

        let function = FunctionDefinition {
            symbol: "fn.id".into(),
            return_type: Type::Value,
            parameters: vec![],
            registers,
            blocks,
        };

        assert_eq!(
            strip_ansi_escapes::strip_str(pretty_print_function(&function)),
            "define %Value @fn.id() {\n\
             entry0:\n  \
             %x.0 = alloca %Value\n  \
             %t1 = load %Value, ptr %x.0\n  \
             ret %Value %t1\n\
             }"
        );
    }

    #[test]
    fn floats_print_as_exact_hex() {
        assert_eq!(Immediate::Float(1.0).to_string(), "0x3FF0000000000000");
    }
}
