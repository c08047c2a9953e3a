use crate::{
    index::{Index, IndexVec},
    middle::lir::{
        self, Block, BlockId, Callee, FunctionDefinition, Immediate, Instruction, Operand,
        Register, RegisterId, RuntimeFunction, Type, TypedOperand,
    },
};

/// The targets of `break` and `continue` inside one loop
#[derive(Debug, Clone, Copy)]
pub struct LoopContext {
    pub break_block: BlockId,
    pub continue_block: BlockId,
    /// Open try checkpoints when the loop was entered
    pub try_depth: u32,
}

/// Builds one function body.
///
/// Every function has a prologue block holding stack slots, root
/// registrations and argument scratch space, and a shared exit block that
/// unregisters the function's roots before returning. Returns store their
/// value and jump to the exit, so push/pop of roots stays balanced on every
/// path.
#[derive(Debug)]
pub struct FunctionBuilder {
    symbol: String,
    return_type: Type,
    parameters: Vec<RegisterId>,
    registers: IndexVec<RegisterId, Register>,
    blocks: IndexVec<BlockId, Block>,
    prologue: BlockId,
    body: BlockId,
    exit: BlockId,
    current: BlockId,
    result_slot: Option<RegisterId>,
    root_count: u32,
    loops: Vec<LoopContext>,
    try_depth: u32,
}

impl FunctionBuilder {
    pub fn new(symbol: impl Into<String>, return_type: Type) -> Self {
        let mut builder = Self {
            symbol: symbol.into(),
            return_type,
            parameters: Vec::new(),
            registers: IndexVec::new(),
            blocks: IndexVec::new(),
            prologue: BlockId::new(0),
            body: BlockId::new(0),
            exit: BlockId::new(0),
            current: BlockId::new(0),
            result_slot: None,
            root_count: 0,
            loops: Vec::new(),
            try_depth: 0,
        };

        builder.prologue = builder.create_block("entry");
        builder.body = builder.create_block("body");
        builder.exit = builder.create_block("exit");
        builder.current = builder.body;

        if return_type == Type::Value {
            let slot = builder.create_named_register(Type::Ptr, "result");
            builder.push_prologue(Instruction::Alloca {
                destination: slot,
                ty: Type::Value,
                count: 1,
            });
            builder.result_slot = Some(slot);
        }

        builder
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn add_parameter(&mut self, ty: Type, name: impl Into<String>) -> RegisterId {
        let id = self.create_named_register(ty, name);
        self.parameters.push(id);
        id
    }

    pub fn create_register(&mut self, ty: Type) -> RegisterId {
        let id = self.registers.next_index();
        self.registers.push(Register { id, ty, name: None })
    }

    pub fn create_named_register(&mut self, ty: Type, name: impl Into<String>) -> RegisterId {
        let id = self.registers.next_index();
        self.registers.push(Register {
            id,
            ty,
            name: Some(name.into()),
        })
    }

    pub fn create_block(&mut self, label: &'static str) -> BlockId {
        let id = self.blocks.next_index();
        self.blocks.push(Block {
            id,
            label,
            instructions: Vec::new(),
        })
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn position_at(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn push(&mut self, instruction: Instruction) {
        debug_assert!(
            !self.blocks[self.current].is_terminated(),
            "instruction pushed after a terminator"
        );
        self.blocks[self.current].instructions.push(instruction);
    }

    pub fn push_prologue(&mut self, instruction: Instruction) {
        self.blocks[self.prologue].instructions.push(instruction);
    }

    /// Ends the current block. Anything lowered afterwards lands in a fresh
    /// block that has no predecessors.
    pub fn terminate(&mut self, instruction: Instruction) {
        debug_assert!(instruction.is_terminator());
        self.push(instruction);

        let dead = self.create_block("dead");
        self.position_at(dead);
    }

    pub fn jump(&mut self, destination: BlockId) {
        self.terminate(Instruction::Jump { destination });
    }

    pub fn branch(&mut self, condition: RegisterId, positive: BlockId, negative: BlockId) {
        self.terminate(Instruction::Branch {
            condition: Operand::Register(condition),
            positive,
            negative,
        });
    }

    /// Emits a call and returns its result register (if it produces one)
    pub fn call(&mut self, callee: Callee, arguments: Vec<TypedOperand>) -> Option<RegisterId> {
        let return_type = match &callee {
            Callee::Runtime(function) => function.return_type(),
            Callee::Intrinsic(intrinsic) => intrinsic.return_type(),
            Callee::Function(_) => Type::Value,
        };

        let destination = (return_type != Type::Void).then(|| self.create_register(return_type));

        self.push(Instruction::Call {
            destination,
            return_type,
            callee,
            arguments,
        });

        destination
    }

    /// Calls a runtime entry point that returns a value
    pub fn call_runtime(
        &mut self,
        function: RuntimeFunction,
        arguments: Vec<TypedOperand>,
    ) -> RegisterId {
        self.call(Callee::Runtime(function), arguments)
            .expect("runtime entry point should return a value")
    }

    pub fn call_runtime_void(&mut self, function: RuntimeFunction, arguments: Vec<TypedOperand>) {
        let result = self.call(Callee::Runtime(function), arguments);
        debug_assert!(result.is_none());
    }

    /// A zeroed, root-registered `Value` slot for a source-level variable
    pub fn local_slot(&mut self, symbol: String) -> RegisterId {
        let slot = self.create_named_register(Type::Ptr, symbol);
        self.root_slot(slot);
        slot
    }

    /// A rooted slot with no source-level name, for values the generated
    /// code keeps alive across calls (e.g. a loop's receiver)
    pub fn hidden_slot(&mut self) -> RegisterId {
        let slot = self.create_register(Type::Ptr);
        self.root_slot(slot);
        slot
    }

    fn root_slot(&mut self, slot: RegisterId) {
        self.push_prologue(Instruction::Alloca {
            destination: slot,
            ty: Type::Value,
            count: 1,
        });
        self.push_prologue(Instruction::Store {
            value: TypedOperand(Type::Value, Operand::Immediate(Immediate::Zero)),
            destination: Operand::Register(slot),
        });
        self.push_prologue(Instruction::Call {
            destination: None,
            return_type: Type::Void,
            callee: Callee::Runtime(RuntimeFunction::GcPushRoot),
            arguments: vec![TypedOperand::ptr(Operand::Register(slot))],
        });
        self.root_count += 1;
    }

    /// Registers a program-wide slot as a root
    pub fn register_global_root(&mut self, symbol: &str) {
        self.push_prologue(Instruction::Call {
            destination: None,
            return_type: Type::Void,
            callee: Callee::Runtime(RuntimeFunction::GcPushRoot),
            arguments: vec![TypedOperand::ptr(Operand::Global(lir::GlobalRef::Slot(
                symbol.to_owned(),
            )))],
        });
    }

    /// Contiguous scratch storage for marshalling `count` argument values
    pub fn scratch(&mut self, count: usize) -> RegisterId {
        let buffer = self.create_register(Type::Ptr);
        self.push_prologue(Instruction::Alloca {
            destination: buffer,
            ty: Type::Value,
            count: count.max(1) as u32,
        });
        buffer
    }

    /// Unrooted stack slot of a scalar type, e.g. a loop counter
    pub fn stack_slot(&mut self, ty: Type) -> RegisterId {
        let slot = self.create_register(Type::Ptr);
        self.push_prologue(Instruction::Alloca {
            destination: slot,
            ty,
            count: 1,
        });
        slot
    }

    pub fn push_loop(&mut self, break_block: BlockId, continue_block: BlockId) {
        self.loops.push(LoopContext {
            break_block,
            continue_block,
            try_depth: self.try_depth,
        });
    }

    pub fn pop_loop(&mut self) {
        self.loops.pop();
    }

    pub fn innermost_loop(&self) -> Option<LoopContext> {
        self.loops.last().copied()
    }

    pub fn try_depth(&self) -> u32 {
        self.try_depth
    }

    pub fn enter_try(&mut self) {
        self.try_depth += 1;
    }

    pub fn exit_try(&mut self) {
        self.try_depth -= 1;
    }

    /// Pops the checkpoints opened since `depth`
    pub fn unwind_tries_to(&mut self, depth: u32) {
        for _ in depth..self.try_depth {
            self.call_runtime_void(RuntimeFunction::TryPop, vec![]);
        }
    }

    /// Leaves the function through the shared exit block
    pub fn emit_return(&mut self, value: Option<RegisterId>) {
        self.unwind_tries_to(0);

        if let (Some(slot), Some(value)) = (self.result_slot, value) {
            self.push(Instruction::Store {
                value: TypedOperand::value(value),
                destination: Operand::Register(slot),
            });
        }

        self.jump(self.exit);
    }

    pub fn finish(mut self) -> FunctionDefinition {
        let body = self.body;
        self.blocks[self.prologue]
            .instructions
            .push(Instruction::Jump { destination: body });

        let mut exit = Vec::new();
        if self.root_count > 0 {
            exit.push(Instruction::Call {
                destination: None,
                return_type: Type::Void,
                callee: Callee::Runtime(RuntimeFunction::GcPopRoots),
                arguments: vec![TypedOperand::i32(i64::from(self.root_count))],
            });
        }

        match (self.return_type, self.result_slot) {
            (Type::Value, Some(slot)) => {
                let result = self.create_register(Type::Value);
                exit.push(Instruction::Load {
                    destination: result,
                    ty: Type::Value,
                    source: Operand::Register(slot),
                });
                exit.push(Instruction::Return {
                    value: Some(TypedOperand::value(result)),
                });
            }
            (Type::I32, _) => exit.push(Instruction::Return {
                value: Some(TypedOperand::i32(0)),
            }),
            _ => exit.push(Instruction::Return { value: None }),
        }
        self.blocks[self.exit].instructions = exit;

        for block in self.blocks.raw.iter_mut() {
            if !block.is_terminated() {
                block.instructions.push(Instruction::Unreachable);
            }
        }

        FunctionDefinition {
            symbol: self.symbol,
            return_type: self.return_type,
            parameters: self.parameters,
            registers: self.registers,
            blocks: self.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_block_ends_in_a_terminator() {
        let mut builder = FunctionBuilder::new("fn.f", Type::Value);
        let then = builder.create_block("if.then");
        let flag = builder.call_runtime(RuntimeFunction::Null, vec![]);
        let truth = builder.call_runtime(RuntimeFunction::Truthy, vec![TypedOperand::value(flag)]);
        builder.branch(truth, then, then);
        builder.position_at(then);
        builder.emit_return(Some(flag));

        let function = builder.finish();
        assert!(function.blocks.iter().all(Block::is_terminated));
    }

    #[test]
    fn roots_pushed_in_the_prologue_are_popped_at_exit() {
        let mut builder = FunctionBuilder::new("fn.g", Type::Value);
        builder.local_slot("a.0".into());
        builder.local_slot("b.1".into());
        builder.emit_return(None);

        let function = builder.finish();
        let exit = function
            .blocks
            .iter()
            .find(|b| b.label == "exit")
            .unwrap();

        assert!(matches!(
            &exit.instructions[0],
            Instruction::Call {
                callee: Callee::Runtime(RuntimeFunction::GcPopRoots),
                arguments,
                ..
            } if arguments == &vec![TypedOperand::i32(2)]
        ));
    }

    #[test]
    fn loops_remember_the_try_depth_they_were_entered_at() {
        let mut builder = FunctionBuilder::new("fn.h", Type::Value);
        builder.enter_try();
        let (exit, step) = (builder.create_block("exit"), builder.create_block("step"));
        builder.push_loop(exit, step);
        builder.enter_try();

        assert_eq!(builder.innermost_loop().unwrap().try_depth, 1);
        assert_eq!(builder.try_depth(), 2);
    }
}
