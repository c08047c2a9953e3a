//! Runs a lowered module in-process against the [`Runtime`] model.
//!
//! Every `ember_*` call is bound to the `Runtime` operation of the same
//! meaning (see [`entry`]), so a lowered program can be executed and observed
//! without a native toolchain. Frames are laid out the way the generated code
//! lays them out: `Value` allocas are runtime slots (rooted only when the
//! code pushes them), while scalar allocas and every `Value` register occupy
//! words of the machine stack, where only the conservative scan finds them.
//!
//! `_setjmp` records a resume point in the calling frame. A raise that
//! consumed the checkpoint recorded there resumes after the `_setjmp` call
//! with the result `1`; any other raise leaves the frame.

use std::{cell::RefCell, rc::Rc};

use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::{
        lir::{
            self, BlockId, Callee, FunctionDefinition, GlobalRef, Immediate, Instruction,
            IntOperator, IntPredicate, Intrinsic, Operand, RegisterId, RuntimeFunction, Type,
            TypedOperand,
        },
        pool::StringId,
    },
    runtime::{RtResult, Runtime, RuntimeError, Unwind, Value, roots::SlotId},
};

mod entry;

#[derive(Debug, Clone, PartialEq)]
enum Pointer {
    /// Consecutive `Value` slots, addressed from the offset
    Values(Rc<[SlotId]>, usize),
    /// A scalar word of the machine stack
    Word(usize),
    String(StringId),
    Function(String),
    /// What `ember_try_push` returns: the try depth it opened
    Checkpoint(usize),
    /// The `argv` handed to `@main`
    Arguments,
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Value(Value),
    /// `i1`, `i32` and `i64` alike
    Int(i64),
    Float(f64),
    Ptr(Pointer),
    Void,
}

impl Scalar {
    fn has_type(&self, ty: Type) -> bool {
        matches!(
            (self, ty),
            (Scalar::Value(_), Type::Value)
                | (Scalar::Int(_), Type::I1 | Type::I32 | Type::I64)
                | (Scalar::Float(_), Type::F64)
                | (Scalar::Ptr(_), Type::Ptr)
                | (Scalar::Void, Type::Void)
        )
    }

    fn value(self) -> Value {
        match self {
            Scalar::Value(value) => value,
            other => panic!("expected a value, found {other:?}"),
        }
    }

    fn int(&self) -> i64 {
        match self {
            Scalar::Int(value) => *value,
            other => panic!("expected an integer, found {other:?}"),
        }
    }

    fn float(&self) -> f64 {
        match self {
            Scalar::Float(value) => *value,
            other => panic!("expected a double, found {other:?}"),
        }
    }

    fn pointer(self) -> Pointer {
        match self {
            Scalar::Ptr(pointer) => pointer,
            other => panic!("expected a pointer, found {other:?}"),
        }
    }
}

/// Machine stack words one frame occupies, relative to the frame's base
#[derive(Debug, Default)]
struct Layout {
    words: usize,
    /// One word per scalar alloca
    cells: HashMap<RegisterId, usize>,
    /// Two words per `Value` register
    spills: HashMap<RegisterId, usize>,
}

impl Layout {
    fn of(function: &FunctionDefinition) -> Self {
        let mut layout = Self::default();

        for instruction in function.blocks.iter().flat_map(|block| &block.instructions) {
            if let Instruction::Alloca { destination, ty, .. } = instruction {
                if *ty != Type::Value {
                    layout.cells.insert(*destination, layout.words);
                    layout.words += 1;
                }
            }
        }

        for register in function.registers.iter().filter(|r| r.ty == Type::Value) {
            layout.spills.insert(register.id, layout.words);
            layout.words += 2;
        }

        layout
    }
}

/// A loaded module, shared with the method and field closures it registers
/// on classes
struct Image {
    module: lir::Module,
    functions: HashMap<String, usize>,
    layouts: Vec<Layout>,
    globals: HashMap<String, Rc<[SlotId]>>,
    arguments: Vec<String>,
    /// Slots of finished frames, reused by later ones
    spare: RefCell<Vec<SlotId>>,
}

#[derive(Debug, Clone, Copy)]
struct ResumePoint {
    /// Try depth while the checkpoint is open
    depth: usize,
    block: BlockId,
    /// Position of the `_setjmp` call
    position: usize,
    destination: RegisterId,
}

struct Frame<'i> {
    function: &'i FunctionDefinition,
    layout: &'i Layout,
    base: usize,
    registers: Vec<Option<Scalar>>,
    owned: Vec<SlotId>,
    resume_points: Vec<ResumePoint>,
}

impl Frame<'_> {
    /// Forgets the resume point of the checkpoint that was open at `depth`,
    /// if it is the innermost one of this frame
    fn close(&mut self, depth: usize) -> Option<ResumePoint> {
        match self.resume_points.last() {
            Some(resume) if resume.depth == depth => self.resume_points.pop(),
            _ => None,
        }
    }

    fn define(&mut self, rt: &mut Runtime, register: RegisterId, scalar: Scalar) {
        if let (Scalar::Value(value), Some(offset)) = (&scalar, self.layout.spills.get(&register)) {
            rt.machine_stack().set_value(self.base + offset, *value);
        }
        self.registers[register.index()] = Some(scalar);
    }

    fn register(&self, register: RegisterId) -> Scalar {
        self.registers[register.index()].clone().unwrap_or_else(|| {
            panic!(
                "`@{}` reads register {} before defining it",
                self.function.symbol,
                register.index()
            )
        })
    }
}

enum Flow {
    Next,
    Jump(BlockId),
    Return(Scalar),
    /// Record a resume point for the checkpoint open at `depth`
    SetJmp { destination: RegisterId, depth: usize },
}

impl Image {
    fn acquire(&self, rt: &mut Runtime) -> SlotId {
        let slot = self.spare.borrow_mut().pop().unwrap_or_else(|| rt.new_slot());
        rt.store(slot, Value::default());
        slot
    }

    fn release(&self, slots: impl IntoIterator<Item = SlotId>) {
        self.spare.borrow_mut().extend(slots);
    }

    fn text(&self, id: StringId) -> &str {
        &self.module.strings[id]
    }

    /// Calls the function named `symbol` with already evaluated arguments
    fn call(self: &Rc<Self>, rt: &mut Runtime, symbol: &str, arguments: Vec<Scalar>) -> RtResult<Scalar> {
        let index = *self
            .functions
            .get(symbol)
            .unwrap_or_else(|| panic!("call to `@{symbol}`, which the module does not define"));
        let function = &self.module.functions[index];
        let layout = &self.layouts[index];
        log::trace!("enter `@{symbol}` ({} stack words)", layout.words);

        let mut frame = Frame {
            function,
            layout,
            base: rt.machine_stack().reserve(layout.words),
            registers: vec![None; function.registers.len()],
            owned: Vec::new(),
            resume_points: Vec::new(),
        };
        for (parameter, argument) in function.parameters.iter().zip_eq(arguments) {
            frame.define(rt, *parameter, argument);
        }

        let result = self.execute(rt, &mut frame);

        rt.machine_stack().truncate(frame.base);
        self.release(frame.owned);
        result
    }

    fn execute(self: &Rc<Self>, rt: &mut Runtime, frame: &mut Frame<'_>) -> RtResult<Scalar> {
        let function = frame.function;
        let (mut block, mut position) = (BlockId::new(0), 0);

        loop {
            let instruction = &function.blocks[block].instructions[position];

            match self.step(rt, frame, instruction) {
                Ok(Flow::Next) => position += 1,
                Ok(Flow::Jump(target)) => (block, position) = (target, 0),
                Ok(Flow::Return(result)) => return Ok(result),
                Ok(Flow::SetJmp { destination, depth }) => {
                    frame.resume_points.push(ResumePoint {
                        depth,
                        block,
                        position,
                        destination,
                    });
                    frame.define(rt, destination, Scalar::Int(0));
                    position += 1;
                }
                Err(Unwind::Raise(exception)) => {
                    // The raise consumed the innermost checkpoint; resume
                    // only if it was opened in this frame
                    let Some(resume) = frame.close(rt.try_depth() + 1) else {
                        return Err(Unwind::Raise(exception));
                    };

                    log::trace!("`@{}` resumes after a raise", function.symbol);
                    (block, position) = (resume.block, resume.position + 1);
                    frame.define(rt, resume.destination, Scalar::Int(1));
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    fn step(
        self: &Rc<Self>,
        rt: &mut Runtime,
        frame: &mut Frame<'_>,
        instruction: &Instruction,
    ) -> RtResult<Flow> {
        match instruction {
            Instruction::Alloca {
                destination,
                ty: Type::Value,
                count,
            } => {
                let slots: Rc<[SlotId]> = (0..*count).map(|_| self.acquire(rt)).collect();
                frame.owned.extend(slots.iter().copied());
                frame.define(rt, *destination, Scalar::Ptr(Pointer::Values(slots, 0)));
            }
            Instruction::Alloca { destination, .. } => {
                let word = frame.base + frame.layout.cells[destination];
                frame.define(rt, *destination, Scalar::Ptr(Pointer::Word(word)));
            }
            Instruction::Load {
                destination,
                ty,
                source,
            } => {
                let loaded = match (ty, self.operand(frame, source).pointer()) {
                    (Type::Value, Pointer::Values(slots, offset)) => Scalar::Value(rt.load(slots[offset])),
                    (Type::I64, Pointer::Word(word)) => Scalar::Int(rt.machine_stack().word(word) as i64),
                    (ty, pointer) => panic!("cannot load {ty:?} from {pointer:?}"),
                };
                frame.define(rt, *destination, loaded);
            }
            Instruction::Store { value, destination } => {
                match (self.typed(frame, value), self.operand(frame, destination).pointer()) {
                    (Scalar::Value(value), Pointer::Values(slots, offset)) => rt.store(slots[offset], value),
                    (Scalar::Int(value), Pointer::Word(word)) => {
                        rt.machine_stack().set_word(word, value as u64)
                    }
                    (value, pointer) => panic!("cannot store {value:?} to {pointer:?}"),
                }
            }
            Instruction::Call {
                destination,
                callee,
                arguments,
                ..
            } => {
                let arguments = arguments
                    .iter()
                    .map(|argument| self.typed(frame, argument))
                    .collect_vec();

                let result = match callee {
                    Callee::Runtime(function) => {
                        let result = entry::call(self, rt, *function, arguments)?;
                        if *function == RuntimeFunction::TryPop {
                            frame.close(rt.try_depth() + 1);
                        }
                        result
                    }
                    Callee::Intrinsic(Intrinsic::SetJmp) => {
                        let destination = destination.expect("`_setjmp` returns an i32");
                        let [Scalar::Ptr(Pointer::Checkpoint(depth))] = arguments[..] else {
                            panic!("`_setjmp` takes the checkpoint `ember_try_push` returned");
                        };
                        return Ok(Flow::SetJmp { destination, depth });
                    }
                    Callee::Intrinsic(intrinsic) => {
                        Scalar::Float(entry::intrinsic(*intrinsic, arguments[0].float()))
                    }
                    Callee::Function(symbol) => self.call(rt, symbol, arguments)?,
                };

                if let Some(destination) = destination {
                    frame.define(rt, *destination, result);
                }
            }
            Instruction::ExtractValue {
                destination,
                aggregate,
                index,
            } => {
                let (tag, payload) = self.operand(frame, aggregate).value().to_raw();
                let field = if *index == 0 { i64::from(tag) } else { payload };
                frame.define(rt, *destination, Scalar::Int(field));
            }
            Instruction::GetElementPointer {
                destination,
                base,
                index,
                ..
            } => {
                let Pointer::Values(slots, offset) = self.operand(frame, base).pointer() else {
                    panic!("element pointer into a non-value buffer");
                };
                let index = self.typed(frame, index).int() as usize;
                frame.define(
                    rt,
                    *destination,
                    Scalar::Ptr(Pointer::Values(slots, offset + index)),
                );
            }
            Instruction::Compare {
                destination,
                predicate,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (self.typed(frame, lhs).int(), self.operand(frame, rhs).int());
                let holds = match predicate {
                    IntPredicate::Eq => lhs == rhs,
                    IntPredicate::Ne => lhs != rhs,
                    IntPredicate::Slt => lhs < rhs,
                    IntPredicate::Sle => lhs <= rhs,
                    IntPredicate::Sgt => lhs > rhs,
                    IntPredicate::Sge => lhs >= rhs,
                };
                frame.define(rt, *destination, Scalar::Int(holds as i64));
            }
            Instruction::BinaryOperation {
                destination,
                operator,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (self.typed(frame, lhs).int(), self.operand(frame, rhs).int());
                let result = match operator {
                    IntOperator::Add => lhs.wrapping_add(rhs),
                    IntOperator::Sub => lhs.wrapping_sub(rhs),
                    IntOperator::Mul => lhs.wrapping_mul(rhs),
                    IntOperator::Xor => lhs ^ rhs,
                };
                frame.define(rt, *destination, Scalar::Int(result));
            }
            Instruction::Branch {
                condition,
                positive,
                negative,
            } => {
                let taken = if self.operand(frame, condition).int() != 0 {
                    positive
                } else {
                    negative
                };
                return Ok(Flow::Jump(*taken));
            }
            Instruction::Jump { destination } => return Ok(Flow::Jump(*destination)),
            Instruction::Return { value } => {
                let result = match value {
                    Some(value) => self.typed(frame, value),
                    None => Scalar::Void,
                };
                return Ok(Flow::Return(result));
            }
            Instruction::Unreachable => {
                unreachable!("control reached `unreachable` in `@{}`", frame.function.symbol)
            }
            Instruction::Comment(_) => {}
        }

        Ok(Flow::Next)
    }

    fn operand(&self, frame: &Frame<'_>, operand: &Operand) -> Scalar {
        match operand {
            Operand::Register(register) => frame.register(*register),
            Operand::Immediate(Immediate::Int(value)) => Scalar::Int(*value),
            Operand::Immediate(Immediate::Float(value)) => Scalar::Float(*value),
            Operand::Immediate(Immediate::Bool(value)) => Scalar::Int(*value as i64),
            Operand::Immediate(Immediate::Zero) => Scalar::Int(0),
            Operand::Global(GlobalRef::Slot(symbol)) => {
                let slots = self
                    .globals
                    .get(symbol)
                    .unwrap_or_else(|| panic!("`@{symbol}` is not a global of the module"));
                Scalar::Ptr(Pointer::Values(Rc::clone(slots), 0))
            }
            Operand::Global(GlobalRef::String(id)) => Scalar::Ptr(Pointer::String(*id)),
            Operand::Global(GlobalRef::Function(symbol)) => {
                Scalar::Ptr(Pointer::Function(symbol.clone()))
            }
        }
    }

    fn typed(&self, frame: &Frame<'_>, TypedOperand(ty, operand): &TypedOperand) -> Scalar {
        match (ty, operand) {
            (Type::Value, Operand::Immediate(Immediate::Zero)) => Scalar::Value(Value::default()),
            (Type::F64, Operand::Immediate(Immediate::Zero)) => Scalar::Float(0.0),
            _ => self.operand(frame, operand),
        }
    }
}

/// A module ready to run on one [`Runtime`]
pub struct Interpreter {
    image: Rc<Image>,
}

impl Interpreter {
    /// Gives every global of `module` a slot in `runtime`. `arguments` become
    /// the program's `argv`, program name first.
    pub fn new(module: lir::Module, runtime: &mut Runtime, arguments: Vec<String>) -> Self {
        let functions = module
            .functions
            .iter()
            .enumerate()
            .map(|(index, function)| (function.symbol.clone(), index))
            .collect();
        let layouts = module.functions.iter().map(Layout::of).collect();
        let globals: HashMap<String, Rc<[SlotId]>> = module
            .globals
            .iter()
            .map(|global| (global.symbol.clone(), Rc::from([runtime.new_slot()])))
            .collect();

        Self {
            image: Rc::new(Image {
                module,
                functions,
                layouts,
                globals,
                arguments,
                spare: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Runs `@main` to completion and returns its exit status
    pub fn run(&self, runtime: &mut Runtime) -> Result<i32, RuntimeError> {
        let arguments = vec![
            Scalar::Int(self.image.arguments.len() as i64),
            Scalar::Ptr(Pointer::Arguments),
        ];

        match self.image.call(runtime, "main", arguments) {
            Ok(status) => {
                log::debug!(
                    "program exited with {} after {} collection(s)",
                    status.int(),
                    runtime.stats().collections
                );
                Ok(status.int() as i32)
            }
            Err(Unwind::Fatal(error)) => Err(error),
            Err(Unwind::Raise(exception)) => Err(RuntimeError::Uncaught {
                site: "main".to_owned(),
                message: runtime.display(exception),
            }),
        }
    }
}
