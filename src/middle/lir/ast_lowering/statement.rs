use crate::{
    frontend::{
        SourceLocation,
        ast::{self, ExpressionKind, StatementKind},
    },
    middle::{
        error::{CodegenError, CodegenErrorKind, CodegenResult},
        lir::{
            BlockId, Callee, Immediate, Instruction, IntOperator, IntPredicate, Intrinsic,
            Operand, RegisterId, RuntimeFunction, Type, TypedOperand,
        },
    },
    runtime::{ops::Operator, value::TypeTag},
};

use super::{
    ASSERT_DEFAULT_MESSAGE, BodyKind, BodyLoweringContext, FOREACH_TYPE_ERROR, catch_prefix,
};

/// Loop variable state kept in unrooted scalar slots
struct Counter {
    slot: RegisterId,
}

impl BodyLoweringContext<'_> {
    pub(super) fn lower_statement(&mut self, statement: &ast::Statement) -> CodegenResult<()> {
        let location = &statement.location;

        if self.session.annotate_source {
            self.builder.push(Instruction::Comment(location.to_string()));
        }

        match &statement.kind {
            StatementKind::VariableDeclaration { name, initializer } => {
                self.declare_variable(name, location, |this| match initializer {
                    Some(initializer) => this.lower_expression(initializer),
                    None => Ok(this.null()),
                })?;
            }
            StatementKind::Assignment { target, value } => {
                self.lower_assignment(target, value, location)?
            }
            StatementKind::Expression(expression) => {
                self.lower_expression(expression)?;
            }
            StatementKind::Block(block) => self.lower_scoped_block(block)?,
            StatementKind::If {
                condition,
                positive,
                negative,
            } => {
                let condition = self.lower_expression(condition)?;
                let truth = self.truthy(condition);

                let then_block = self.builder.create_block("if.then");
                let else_block = self.builder.create_block("if.else");
                let end_block = self.builder.create_block("if.end");
                self.builder.branch(truth, then_block, else_block);

                self.builder.position_at(then_block);
                self.lower_scoped_block(positive)?;
                self.builder.jump(end_block);

                self.builder.position_at(else_block);
                if let Some(negative) = negative {
                    self.lower_scoped_block(negative)?;
                }
                self.builder.jump(end_block);

                self.builder.position_at(end_block);
            }
            StatementKind::While { condition, body } => {
                let condition_block = self.builder.create_block("while.cond");
                let body_block = self.builder.create_block("while.body");
                let end_block = self.builder.create_block("while.end");
                self.builder.jump(condition_block);

                self.builder.position_at(condition_block);
                let condition = self.lower_expression(condition)?;
                let truth = self.truthy(condition);
                self.builder.branch(truth, body_block, end_block);

                self.builder.position_at(body_block);
                self.builder.push_loop(end_block, condition_block);
                self.lower_scoped_block(body)?;
                self.builder.pop_loop();
                self.builder.jump(condition_block);

                self.builder.position_at(end_block);
            }
            StatementKind::For {
                variable,
                start,
                end,
                body,
            } => self.lower_for(variable, start, end, body, location)?,
            StatementKind::Foreach {
                key,
                value,
                iterable,
                body,
            } => self.lower_foreach(key.as_deref(), value, iterable, body, location)?,
            StatementKind::Break | StatementKind::Continue => {
                let is_break = matches!(statement.kind, StatementKind::Break);

                let Some(target) = self.builder.innermost_loop() else {
                    let kind = if is_break {
                        CodegenErrorKind::BreakOutsideLoop
                    } else {
                        CodegenErrorKind::ContinueOutsideLoop
                    };
                    return Err(CodegenError::new(kind, location));
                };

                self.builder.unwind_tries_to(target.try_depth);
                self.builder.jump(if is_break {
                    target.break_block
                } else {
                    target.continue_block
                });
            }
            StatementKind::Return(value) => match self.kind {
                // Returning from the top level ends the program
                BodyKind::Entry => self.builder.emit_return(None),
                _ => {
                    let value = match value {
                        Some(value) => self.lower_expression(value)?,
                        None => self.null(),
                    };
                    self.builder.emit_return(Some(value));
                }
            },
            StatementKind::Try {
                body,
                variable,
                handler,
            } => self.lower_try(body, variable, handler, location)?,
            StatementKind::Raise(value) => {
                let value = self.lower_expression(value)?;
                self.raise(value, location)?;
            }
            StatementKind::Assert { condition, message } => {
                let condition = self.lower_expression(condition)?;
                let truth = self.truthy(condition);

                let fail_block = self.builder.create_block("assert.fail");
                let pass_block = self.builder.create_block("assert.pass");
                self.builder.branch(truth, pass_block, fail_block);

                self.builder.position_at(fail_block);
                let message = match message {
                    Some(message) => self.lower_expression(message)?,
                    None => {
                        let text = self.constant(ASSERT_DEFAULT_MESSAGE, location)?;
                        self.builder
                            .call_runtime(RuntimeFunction::String, vec![text])
                    }
                };
                self.raise(message, location)?;

                self.builder.position_at(pass_block);
            }
            StatementKind::FunctionDefinition(function) => {
                self.require_top_level("function definition", location)?;
                self.lower_function(function)?;
            }
            StatementKind::ClassDefinition(class) => {
                self.require_top_level("class definition", location)?;
                self.lower_class(class)?;
            }
        }

        Ok(())
    }

    fn require_top_level(&self, construct: &str, location: &SourceLocation) -> CodegenResult<()> {
        if self.kind != BodyKind::Entry || self.session.resolver.depth() != 0 {
            return Err(CodegenError::unsupported(
                format!("nested {construct}"),
                location,
            ));
        }

        Ok(())
    }

    /// Lowers `block` inside its own lexical region
    pub(super) fn lower_scoped_block(&mut self, block: &ast::Block) -> CodegenResult<()> {
        self.session.resolver.enter_scope();
        let result = self.lower_statements(block);
        self.session.resolver.exit_scope();
        result
    }

    /// Lowers `block` in the current region
    pub(super) fn lower_statements(&mut self, block: &ast::Block) -> CodegenResult<()> {
        for statement in &block.statements {
            self.lower_statement(statement)?;
        }

        Ok(())
    }

    fn lower_assignment(
        &mut self,
        target: &ast::Expression,
        value: &ast::Expression,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        match &target.kind {
            ExpressionKind::Identifier(name) => {
                let value = self.lower_expression(value)?;
                let id = self.session.resolver.resolve(name, location)?;
                let destination = self.storage(id, location)?;

                self.builder.push(Instruction::Store {
                    value: TypedOperand::value(value),
                    destination,
                });
            }
            ExpressionKind::Index { target, index } => {
                let target = self.lower_expression(target)?;
                let index = self.lower_expression(index)?;
                let value = self.lower_expression(value)?;

                let mut arguments = vec![
                    TypedOperand::value(target),
                    TypedOperand::value(index),
                    TypedOperand::value(value),
                ];
                arguments.extend(self.site(location)?);
                self.builder
                    .call_runtime_void(RuntimeFunction::IndexSet, arguments);
            }
            ExpressionKind::Member { target, name } => {
                let internal = matches!(target.kind, ExpressionKind::This);
                let target = self.lower_expression(target)?;
                let value = self.lower_expression(value)?;

                let mut arguments = vec![
                    TypedOperand::value(target),
                    self.constant(name, location)?,
                    TypedOperand::value(value),
                    TypedOperand(Type::I1, Operand::Immediate(Immediate::Bool(internal))),
                ];
                arguments.extend(self.site(location)?);
                self.builder
                    .call_runtime_void(RuntimeFunction::MemberSet, arguments);
            }
            _ => {
                return Err(CodegenError::unsupported(
                    "assignment to a non-assignable expression",
                    location,
                ));
            }
        }

        Ok(())
    }

    fn raise(&mut self, value: RegisterId, location: &SourceLocation) -> CodegenResult<()> {
        let mut arguments = vec![TypedOperand::value(value)];
        arguments.extend(self.site(location)?);

        self.builder
            .call_runtime_void(RuntimeFunction::Raise, arguments);
        self.builder.terminate(Instruction::Unreachable);

        Ok(())
    }

    fn counter(&mut self, initial: Operand) -> Counter {
        let slot = self.builder.stack_slot(Type::I64);
        self.builder.push(Instruction::Store {
            value: TypedOperand(Type::I64, initial),
            destination: Operand::Register(slot),
        });
        Counter { slot }
    }

    fn load_counter(&mut self, counter: &Counter) -> RegisterId {
        let value = self.builder.create_register(Type::I64);
        self.builder.push(Instruction::Load {
            destination: value,
            ty: Type::I64,
            source: Operand::Register(counter.slot),
        });
        value
    }

    fn int_operation(&mut self, operator: IntOperator, lhs: RegisterId, rhs: Operand) -> RegisterId {
        let destination = self.builder.create_register(Type::I64);
        self.builder.push(Instruction::BinaryOperation {
            destination,
            operator,
            lhs: TypedOperand(Type::I64, Operand::Register(lhs)),
            rhs,
        });
        destination
    }

    fn compare(&mut self, predicate: IntPredicate, lhs: TypedOperand, rhs: Operand) -> RegisterId {
        let destination = self.builder.create_register(Type::I1);
        self.builder.push(Instruction::Compare {
            destination,
            predicate,
            lhs,
            rhs,
        });
        destination
    }

    /// Adds `amount` to the counter in place
    fn advance(&mut self, counter: &Counter, amount: Operand) {
        let current = self.load_counter(counter);
        let next = self.int_operation(IntOperator::Add, current, amount);
        self.builder.push(Instruction::Store {
            value: TypedOperand(Type::I64, Operand::Register(next)),
            destination: Operand::Register(counter.slot),
        });
    }

    /// An inclusive range whose direction is fixed before the first iteration
    fn lower_for(
        &mut self,
        variable: &str,
        start: &ast::Expression,
        end: &ast::Expression,
        body: &ast::Block,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        let start = self.lower_expression(start)?;
        let end = self.lower_expression(end)?;

        let start = self.to_int(start, location)?;
        let end = self.to_int(end, location)?;

        let index = self.counter(Operand::Register(start));
        let limit = self.counter(Operand::Register(end));
        let step = self.counter(Operand::Immediate(Immediate::Int(1)));

        let descending_block = self.builder.create_block("for.down");
        let condition_block = self.builder.create_block("for.cond");
        let body_block = self.builder.create_block("for.body");
        let step_block = self.builder.create_block("for.step");
        let end_block = self.builder.create_block("for.end");

        let ascending = self.compare(
            IntPredicate::Sle,
            TypedOperand(Type::I64, Operand::Register(start)),
            Operand::Register(end),
        );
        self.builder
            .branch(ascending, condition_block, descending_block);

        self.builder.position_at(descending_block);
        self.builder.push(Instruction::Store {
            value: TypedOperand(Type::I64, Operand::Immediate(Immediate::Int(-1))),
            destination: Operand::Register(step.slot),
        });
        self.builder.jump(condition_block);

        // (index - limit) * step <= 0 holds until the limit is passed in
        // either direction
        self.builder.position_at(condition_block);
        let current = self.load_counter(&index);
        let last = self.load_counter(&limit);
        let direction = self.load_counter(&step);
        let distance = self.int_operation(IntOperator::Sub, current, Operand::Register(last));
        let signed = self.int_operation(IntOperator::Mul, distance, Operand::Register(direction));
        let in_range = self.compare(
            IntPredicate::Sle,
            TypedOperand(Type::I64, Operand::Register(signed)),
            Operand::Immediate(Immediate::Int(0)),
        );
        self.builder.branch(in_range, body_block, end_block);

        self.builder.position_at(body_block);
        self.session.resolver.enter_scope();
        let result = self.lower_for_body(variable, current, body, location, end_block, step_block);
        self.session.resolver.exit_scope();
        result?;
        self.builder.jump(step_block);

        self.builder.position_at(step_block);
        let direction = self.load_counter(&step);
        self.advance(&index, Operand::Register(direction));
        self.builder.jump(condition_block);

        self.builder.position_at(end_block);
        Ok(())
    }

    fn lower_for_body(
        &mut self,
        variable: &str,
        current: RegisterId,
        body: &ast::Block,
        location: &SourceLocation,
        end_block: BlockId,
        step_block: BlockId,
    ) -> CodegenResult<()> {
        self.declare_variable(variable, location, |this| Ok(this.int(current)))?;

        self.builder.push_loop(end_block, step_block);
        let result = self.lower_scoped_block(body);
        self.builder.pop_loop();
        result
    }

    fn to_int(&mut self, value: RegisterId, location: &SourceLocation) -> CodegenResult<RegisterId> {
        let mut arguments = vec![TypedOperand::value(value)];
        arguments.extend(self.site(location)?);
        Ok(self.builder.call_runtime(RuntimeFunction::ToInt, arguments))
    }

    /// Specialised array and dict walks, picked by the receiver's type tag
    fn lower_foreach(
        &mut self,
        key: Option<&str>,
        value: &str,
        iterable: &ast::Expression,
        body: &ast::Block,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        let iterable = self.lower_expression(iterable)?;
        let receiver = self.builder.hidden_slot();
        self.builder.push(Instruction::Store {
            value: TypedOperand::value(iterable),
            destination: Operand::Register(receiver),
        });

        let tag = self.builder.create_register(Type::I32);
        self.builder.push(Instruction::ExtractValue {
            destination: tag,
            aggregate: Operand::Register(iterable),
            index: 0,
        });

        let array_block = self.builder.create_block("foreach.array");
        let not_array_block = self.builder.create_block("foreach.not_array");
        let dict_block = self.builder.create_block("foreach.dict");
        let invalid_block = self.builder.create_block("foreach.invalid");
        let end_block = self.builder.create_block("foreach.end");

        let is_array = self.compare(
            IntPredicate::Eq,
            TypedOperand(Type::I32, Operand::Register(tag)),
            Operand::Immediate(Immediate::Int(TypeTag::Array as i64)),
        );
        self.builder.branch(is_array, array_block, not_array_block);

        self.builder.position_at(not_array_block);
        let is_dict = self.compare(
            IntPredicate::Eq,
            TypedOperand(Type::I32, Operand::Register(tag)),
            Operand::Immediate(Immediate::Int(TypeTag::Dict as i64)),
        );
        self.builder.branch(is_dict, dict_block, invalid_block);

        self.builder.position_at(invalid_block);
        let text = self.constant(FOREACH_TYPE_ERROR, location)?;
        let message = self.builder.call_runtime(RuntimeFunction::String, vec![text]);
        self.raise(message, location)?;

        self.builder.position_at(array_block);
        self.lower_foreach_walk(receiver, None, key, value, body, location, end_block)?;

        self.builder.position_at(dict_block);
        let receiver_value = self.load_slot(receiver);
        let mut arguments = vec![TypedOperand::value(receiver_value)];
        arguments.extend(self.site(location)?);
        let keys = self.builder.call_runtime(RuntimeFunction::DictKeys, arguments);
        let keys_slot = self.builder.hidden_slot();
        self.builder.push(Instruction::Store {
            value: TypedOperand::value(keys),
            destination: Operand::Register(keys_slot),
        });
        self.lower_foreach_walk(receiver, Some(keys_slot), key, value, body, location, end_block)?;

        self.builder.position_at(end_block);
        Ok(())
    }

    /// One index-driven walk. With `keys` the index walks the collected key
    /// array and the receiver is looked up by key.
    #[allow(clippy::too_many_arguments)]
    fn lower_foreach_walk(
        &mut self,
        receiver: RegisterId,
        keys: Option<RegisterId>,
        key: Option<&str>,
        value: &str,
        body: &ast::Block,
        location: &SourceLocation,
        end_block: BlockId,
    ) -> CodegenResult<()> {
        let index = self.counter(Operand::Immediate(Immediate::Int(0)));
        let sequence_slot = keys.unwrap_or(receiver);
        let sequence = self.load_slot(sequence_slot);
        let mut arguments = vec![TypedOperand::value(sequence)];
        arguments.extend(self.site(location)?);
        let length = self.builder.call_runtime(RuntimeFunction::Length, arguments);

        let condition_block = self.builder.create_block("foreach.cond");
        let body_block = self.builder.create_block("foreach.body");
        let step_block = self.builder.create_block("foreach.step");
        self.builder.jump(condition_block);

        self.builder.position_at(condition_block);
        let current = self.load_counter(&index);
        let in_range = self.compare(
            IntPredicate::Slt,
            TypedOperand(Type::I64, Operand::Register(current)),
            Operand::Register(length),
        );
        self.builder.branch(in_range, body_block, end_block);

        self.builder.position_at(body_block);
        self.session.resolver.enter_scope();
        let result = self.lower_foreach_iteration(
            receiver,
            keys.map(|_| sequence_slot),
            current,
            key,
            value,
            body,
            location,
            (end_block, step_block),
        );
        self.session.resolver.exit_scope();
        result?;
        self.builder.jump(step_block);

        self.builder.position_at(step_block);
        self.advance(&index, Operand::Immediate(Immediate::Int(1)));
        self.builder.jump(condition_block);

        Ok(())
    }

    /// Binds the key and value of the element at `current`, then runs the
    /// body
    #[allow(clippy::too_many_arguments)]
    fn lower_foreach_iteration(
        &mut self,
        receiver: RegisterId,
        keys: Option<RegisterId>,
        current: RegisterId,
        key: Option<&str>,
        value: &str,
        body: &ast::Block,
        location: &SourceLocation,
        (end_block, step_block): (BlockId, BlockId),
    ) -> CodegenResult<()> {
        let position = self.int(current);

        let (key_value, element) = match keys {
            None => {
                let sequence = self.load_slot(receiver);
                let element = self.index_get(sequence, position, location)?;
                (position, element)
            }
            Some(keys) => {
                let keys = self.load_slot(keys);
                let key_value = self.index_get(keys, position, location)?;
                let receiver = self.load_slot(receiver);
                let element = self.index_get(receiver, key_value, location)?;
                (key_value, element)
            }
        };

        if let Some(key) = key {
            self.declare_variable(key, location, |_| Ok(key_value))?;
        }
        self.declare_variable(value, location, |_| Ok(element))?;

        self.builder.push_loop(end_block, step_block);
        let result = self.lower_scoped_block(body);
        self.builder.pop_loop();
        result
    }

    fn load_slot(&mut self, slot: RegisterId) -> RegisterId {
        let value = self.builder.create_register(Type::Value);
        self.builder.push(Instruction::Load {
            destination: value,
            ty: Type::Value,
            source: Operand::Register(slot),
        });
        value
    }

    /// Checkpoint, guarded body, and a handler that receives the decorated
    /// exception
    fn lower_try(
        &mut self,
        body: &ast::Block,
        variable: &str,
        handler: &ast::Block,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        let checkpoint = self.builder.call_runtime(RuntimeFunction::TryPush, vec![]);
        let resumed = self
            .builder
            .call(
                Callee::Intrinsic(Intrinsic::SetJmp),
                vec![TypedOperand::ptr(Operand::Register(checkpoint))],
            )
            .expect("setjmp returns an i32");

        let body_block = self.builder.create_block("try.body");
        let catch_block = self.builder.create_block("try.catch");
        let end_block = self.builder.create_block("try.end");

        let first_pass = self.compare(
            IntPredicate::Eq,
            TypedOperand(Type::I32, Operand::Register(resumed)),
            Operand::Immediate(Immediate::Int(0)),
        );
        self.builder.branch(first_pass, body_block, catch_block);

        self.builder.position_at(body_block);
        self.builder.enter_try();
        let result = self.lower_scoped_block(body);
        self.builder.exit_try();
        result?;
        self.builder
            .call_runtime_void(RuntimeFunction::TryPop, vec![]);
        self.builder.jump(end_block);

        // The runtime consumed the checkpoint before resuming here
        self.builder.position_at(catch_block);
        let exception = self
            .builder
            .call_runtime(RuntimeFunction::CurrentException, vec![]);
        let prefix = self.constant(&catch_prefix(location), location)?;
        let prefix = self
            .builder
            .call_runtime(RuntimeFunction::String, vec![prefix]);
        let decorated = self.binary_op(Operator::Add, prefix, exception, location)?;

        self.session.resolver.enter_scope();
        let result = self
            .declare_variable(variable, location, |_| Ok(decorated))
            .and_then(|_| self.lower_statements(handler));
        self.session.resolver.exit_scope();
        result?;
        self.builder.jump(end_block);

        self.builder.position_at(end_block);
        Ok(())
    }
}
