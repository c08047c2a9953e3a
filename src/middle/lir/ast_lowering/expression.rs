use crate::{
    frontend::{
        SourceLocation,
        ast::{self, BinaryOperatorKind, ExpressionKind, Literal, UnaryOperatorKind},
    },
    middle::{
        error::{CodegenError, CodegenErrorKind, CodegenResult},
        lir::{
            Callee, Immediate, Instruction, IntOperator, Intrinsic, Operand, RegisterId,
            RuntimeFunction, Type, TypedOperand,
            abi::{BUILTINS, TRANSCENDENTALS},
        },
    },
    runtime::ops::Operator,
};

use super::BodyLoweringContext;

fn operator_code(operator: BinaryOperatorKind) -> Operator {
    match operator {
        BinaryOperatorKind::Add => Operator::Add,
        BinaryOperatorKind::Subtract => Operator::Subtract,
        BinaryOperatorKind::Multiply => Operator::Multiply,
        BinaryOperatorKind::Divide => Operator::Divide,
        BinaryOperatorKind::Modulus => Operator::Modulus,
        BinaryOperatorKind::Equals => Operator::Equal,
        BinaryOperatorKind::NotEquals => Operator::NotEqual,
        BinaryOperatorKind::LessThan => Operator::Less,
        BinaryOperatorKind::LessThanOrEqualTo => Operator::LessEqual,
        BinaryOperatorKind::GreaterThan => Operator::Greater,
        BinaryOperatorKind::GreaterThanOrEqualTo => Operator::GreaterEqual,
        BinaryOperatorKind::LogicalAnd => Operator::And,
        BinaryOperatorKind::LogicalOr => Operator::Or,
        BinaryOperatorKind::In | BinaryOperatorKind::NotIn => {
            unreachable!("membership tests have their own entry point")
        }
    }
}

impl BodyLoweringContext<'_> {
    /// Lowers `expression` to a register holding a `Value`
    pub(super) fn lower_expression(&mut self, expression: &ast::Expression) -> CodegenResult<RegisterId> {
        let location = &expression.location;

        match &expression.kind {
            ExpressionKind::Literal(literal) => self.lower_literal(literal, location),
            ExpressionKind::Identifier(name) => {
                let id = self.session.resolver.resolve(name, location)?;
                let source = self.storage(id, location)?;
                let destination = self.builder.create_register(Type::Value);

                self.builder.push(Instruction::Load {
                    destination,
                    ty: Type::Value,
                    source,
                });

                Ok(destination)
            }
            ExpressionKind::This => self
                .receiver
                .ok_or_else(|| CodegenError::unsupported("`this` outside of a class", location)),
            ExpressionKind::Array(elements) => {
                let (buffer, count) = self.marshal(elements)?;

                Ok(self.builder.call_runtime(
                    RuntimeFunction::ArrayNew,
                    vec![
                        TypedOperand::ptr(Operand::Register(buffer)),
                        TypedOperand::i32(count),
                    ],
                ))
            }
            ExpressionKind::Dict(entries) => {
                let dict = self.builder.call_runtime(RuntimeFunction::DictNew, vec![]);

                for (key, value) in entries {
                    let key = self.lower_expression(key)?;
                    let value = self.lower_expression(value)?;
                    let mut arguments = vec![
                        TypedOperand::value(dict),
                        TypedOperand::value(key),
                        TypedOperand::value(value),
                    ];
                    arguments.extend(self.site(location)?);

                    self.builder
                        .call_runtime_void(RuntimeFunction::IndexSet, arguments);
                }

                Ok(dict)
            }
            ExpressionKind::Binary { lhs, operator, rhs } => {
                let lhs = self.lower_expression(lhs)?;
                let rhs = self.lower_expression(rhs)?;
                self.lower_binary(*operator, lhs, rhs, location)
            }
            ExpressionKind::Unary { operator, operand } => {
                let operand = self.lower_expression(operand)?;

                match operator {
                    UnaryOperatorKind::LogicalNot => {
                        let truth = self.truthy(operand);
                        Ok(self.negate_truth(truth))
                    }
                    UnaryOperatorKind::Negate => {
                        let zero = self.builder.call_runtime(
                            RuntimeFunction::Int,
                            vec![TypedOperand(Type::I64, Operand::Immediate(Immediate::Int(0)))],
                        );
                        self.binary_op(Operator::Subtract, zero, operand, location)
                    }
                }
            }
            ExpressionKind::Index { target, index } => {
                let target = self.lower_expression(target)?;
                let index = self.lower_expression(index)?;
                self.index_get(target, index, location)
            }
            ExpressionKind::Slice { target, start, end } => {
                let target = self.lower_expression(target)?;
                let start = match start {
                    Some(start) => self.lower_expression(start)?,
                    None => self.null(),
                };
                let end = match end {
                    Some(end) => self.lower_expression(end)?,
                    None => self.null(),
                };

                let mut arguments = vec![
                    TypedOperand::value(target),
                    TypedOperand::value(start),
                    TypedOperand::value(end),
                ];
                arguments.extend(self.site(location)?);

                Ok(self.builder.call_runtime(RuntimeFunction::Slice, arguments))
            }
            ExpressionKind::Member { target, name } => {
                let internal = matches!(target.kind, ExpressionKind::This);
                let target = self.lower_expression(target)?;

                let mut arguments = vec![
                    TypedOperand::value(target),
                    self.constant(name, location)?,
                    TypedOperand(Type::I1, Operand::Immediate(Immediate::Bool(internal))),
                ];
                arguments.extend(self.site(location)?);

                Ok(self
                    .builder
                    .call_runtime(RuntimeFunction::MemberGet, arguments))
            }
            ExpressionKind::FunctionCall { name, arguments } => {
                self.lower_call(name, arguments, location)
            }
            ExpressionKind::MethodCall {
                target,
                name,
                arguments,
            } => {
                let internal = matches!(target.kind, ExpressionKind::This);
                let target = self.lower_expression(target)?;
                let (buffer, count) = self.marshal(arguments)?;

                let mut call_arguments = vec![
                    TypedOperand::value(target),
                    self.constant(name, location)?,
                    TypedOperand::ptr(Operand::Register(buffer)),
                    TypedOperand::i32(count),
                    TypedOperand(Type::I1, Operand::Immediate(Immediate::Bool(internal))),
                ];
                call_arguments.extend(self.site(location)?);

                Ok(self
                    .builder
                    .call_runtime(RuntimeFunction::CallMethod, call_arguments))
            }
            ExpressionKind::New { class, arguments } => {
                self.check_construction(class, arguments.len(), location)?;

                let class = self.lower_expression(class)?;
                let (buffer, count) = self.marshal(arguments)?;

                let mut call_arguments = vec![
                    TypedOperand::value(class),
                    TypedOperand::ptr(Operand::Register(buffer)),
                    TypedOperand::i32(count),
                ];
                call_arguments.extend(self.site(location)?);

                Ok(self
                    .builder
                    .call_runtime(RuntimeFunction::Instantiate, call_arguments))
            }
        }
    }

    fn lower_literal(&mut self, literal: &Literal, location: &SourceLocation) -> CodegenResult<RegisterId> {
        let (function, argument) = match literal {
            Literal::Integer(value) => (
                RuntimeFunction::Int,
                TypedOperand(Type::I64, Operand::Immediate(Immediate::Int(*value))),
            ),
            Literal::Float(value) => (
                RuntimeFunction::Float,
                TypedOperand(Type::F64, Operand::Immediate(Immediate::Float(*value))),
            ),
            Literal::Boolean(value) => (
                RuntimeFunction::Bool,
                TypedOperand(Type::I1, Operand::Immediate(Immediate::Bool(*value))),
            ),
            Literal::String(text) => (RuntimeFunction::String, self.constant(text, location)?),
            Literal::Null => return Ok(self.null()),
        };

        Ok(self.builder.call_runtime(function, vec![argument]))
    }

    fn lower_binary(
        &mut self,
        operator: BinaryOperatorKind,
        lhs: RegisterId,
        rhs: RegisterId,
        location: &SourceLocation,
    ) -> CodegenResult<RegisterId> {
        match operator {
            BinaryOperatorKind::In => self.contains(rhs, lhs, location),
            BinaryOperatorKind::NotIn => {
                let found = self.contains(rhs, lhs, location)?;
                let truth = self.truthy(found);
                Ok(self.negate_truth(truth))
            }
            operator => self.binary_op(operator_code(operator), lhs, rhs, location),
        }
    }

    pub(super) fn binary_op(
        &mut self,
        operator: Operator,
        lhs: RegisterId,
        rhs: RegisterId,
        location: &SourceLocation,
    ) -> CodegenResult<RegisterId> {
        let mut arguments = vec![
            TypedOperand::i32(operator as i64),
            TypedOperand::value(lhs),
            TypedOperand::value(rhs),
        ];
        arguments.extend(self.site(location)?);

        Ok(self
            .builder
            .call_runtime(RuntimeFunction::BinaryOp, arguments))
    }

    fn contains(
        &mut self,
        container: RegisterId,
        item: RegisterId,
        location: &SourceLocation,
    ) -> CodegenResult<RegisterId> {
        let mut arguments = vec![TypedOperand::value(container), TypedOperand::value(item)];
        arguments.extend(self.site(location)?);

        Ok(self
            .builder
            .call_runtime(RuntimeFunction::Contains, arguments))
    }

    pub(super) fn index_get(
        &mut self,
        target: RegisterId,
        index: RegisterId,
        location: &SourceLocation,
    ) -> CodegenResult<RegisterId> {
        let mut arguments = vec![TypedOperand::value(target), TypedOperand::value(index)];
        arguments.extend(self.site(location)?);

        Ok(self
            .builder
            .call_runtime(RuntimeFunction::IndexGet, arguments))
    }

    /// The `i1` truthiness of a value
    pub(super) fn truthy(&mut self, value: RegisterId) -> RegisterId {
        self.builder
            .call_runtime(RuntimeFunction::Truthy, vec![TypedOperand::value(value)])
    }

    /// Boxes the inverse of an `i1`
    fn negate_truth(&mut self, truth: RegisterId) -> RegisterId {
        let inverted = self.builder.create_register(Type::I1);
        self.builder.push(Instruction::BinaryOperation {
            destination: inverted,
            operator: IntOperator::Xor,
            lhs: TypedOperand(Type::I1, Operand::Register(truth)),
            rhs: Operand::Immediate(Immediate::Bool(true)),
        });

        self.builder.call_runtime(
            RuntimeFunction::Bool,
            vec![TypedOperand(Type::I1, Operand::Register(inverted))],
        )
    }

    /// Evaluates `arguments` into contiguous scratch storage
    pub(super) fn marshal(&mut self, arguments: &[ast::Expression]) -> CodegenResult<(RegisterId, i64)> {
        let values = arguments
            .iter()
            .map(|argument| self.lower_expression(argument))
            .collect::<CodegenResult<Vec<_>>>()?;

        let buffer = self.builder.scratch(values.len());

        for (index, value) in values.into_iter().enumerate() {
            let element = self.builder.create_register(Type::Ptr);
            self.builder.push(Instruction::GetElementPointer {
                destination: element,
                element_ty: Type::Value,
                base: Operand::Register(buffer),
                index: TypedOperand(Type::I64, Operand::Immediate(Immediate::Int(index as i64))),
            });
            self.builder.push(Instruction::Store {
                value: TypedOperand::value(value),
                destination: Operand::Register(element),
            });
        }

        Ok((buffer, arguments.len() as i64))
    }

    fn lower_call(
        &mut self,
        name: &str,
        arguments: &[ast::Expression],
        location: &SourceLocation,
    ) -> CodegenResult<RegisterId> {
        if let Some(intrinsic) = TRANSCENDENTALS.get(name).copied() {
            let [argument] = arguments else {
                return Err(CodegenError::new(
                    CodegenErrorKind::ArityMismatch {
                        name: name.to_owned(),
                        expected: 1,
                        found: arguments.len(),
                    },
                    location,
                ));
            };

            return self.lower_transcendental(intrinsic, argument, location);
        }

        if let Some(builtin) = BUILTINS.get(name).copied() {
            if let Some(arity) = builtin.arity.filter(|arity| *arity != arguments.len()) {
                return Err(CodegenError::new(
                    CodegenErrorKind::ArityMismatch {
                        name: name.to_owned(),
                        expected: arity,
                        found: arguments.len(),
                    },
                    location,
                ));
            }

            let (buffer, count) = self.marshal(arguments)?;
            let mut call_arguments = vec![
                TypedOperand::ptr(Operand::Register(buffer)),
                TypedOperand::i32(count),
            ];
            call_arguments.extend(self.site(location)?);

            return Ok(self.builder.call_runtime(builtin.function, call_arguments));
        }

        self.session
            .functions
            .check_call(name, arguments.len(), location)?;

        let arguments = arguments
            .iter()
            .map(|argument| self.lower_expression(argument).map(TypedOperand::value))
            .collect::<CodegenResult<Vec<_>>>()?;

        Ok(self
            .builder
            .call(Callee::Function(format!("fn.{name}")), arguments)
            .expect("user functions return a value"))
    }

    /// Unboxes to a double, applies the native operation and boxes the result
    fn lower_transcendental(
        &mut self,
        intrinsic: Intrinsic,
        argument: &ast::Expression,
        location: &SourceLocation,
    ) -> CodegenResult<RegisterId> {
        let value = self.lower_expression(argument)?;

        let mut arguments = vec![TypedOperand::value(value)];
        arguments.extend(self.site(location)?);
        let unboxed = self.builder.call_runtime(RuntimeFunction::ToFloat, arguments);

        let result = self
            .builder
            .call(
                Callee::Intrinsic(intrinsic),
                vec![TypedOperand(Type::F64, Operand::Register(unboxed))],
            )
            .expect("floating point intrinsics return a double");

        Ok(self.builder.call_runtime(
            RuntimeFunction::Float,
            vec![TypedOperand(Type::F64, Operand::Register(result))],
        ))
    }

    /// Construction of a class named directly can be arity-checked up front
    fn check_construction(
        &self,
        class: &ast::Expression,
        supplied: usize,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        let ExpressionKind::Identifier(name) = &class.kind else {
            return Ok(());
        };

        let Ok(id) = self.session.resolver.resolve(name, location) else {
            return Ok(());
        };
        if !self.session.resolver.binding(id).is_global() {
            return Ok(());
        }

        let Some(info) = self.session.classes.get(name) else {
            return Ok(());
        };

        let expected = info.init_arity.unwrap_or(0);
        if expected != supplied {
            return Err(CodegenError::new(
                CodegenErrorKind::ArityMismatch {
                    name: name.clone(),
                    expected,
                    found: supplied,
                },
                location,
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        frontend::ast::{BinaryOperatorKind, UnaryOperatorKind, testing::*},
        middle::{error::CodegenErrorKind, lir::ast_lowering::tests::lower},
    };

    #[test]
    fn binary_operators_carry_their_code_and_site() {
        let ir = lower(vec![expr(1, binary(int(1), BinaryOperatorKind::Multiply, int(2)))]).unwrap();
        assert!(ir.contains("@ember_binary_op(i32 2, %Value %t"), "{ir}");
        assert!(ir.contains(", i32 1, ptr @.str.0)"));
    }

    #[test]
    fn sites_carry_the_line_of_their_expression() {
        let ir = lower(vec![
            var(1, "xs", array(vec![int(1)])),
            expr(4, index(ident("xs"), int(0))),
            expr(
                6,
                call(
                    "print",
                    vec![at(8, binary(ident("xs"), BinaryOperatorKind::Divide, int(2)))],
                ),
            ),
        ])
        .unwrap();

        assert!(ir.contains("@ember_index_get(%Value %t"), "{ir}");
        assert!(ir.contains(", i32 4, ptr @.str.0)"), "{ir}");
        assert!(ir.contains("@ember_binary_op(i32 3, %Value %t"), "{ir}");
        assert!(ir.contains(", i32 8, ptr @.str.0)"), "{ir}");
        assert!(ir.contains("@ember_builtin_print(ptr %t"), "{ir}");
        assert!(ir.contains(", i32 6, ptr @.str.0)"), "{ir}");
    }

    #[test]
    fn membership_uses_the_container_first() {
        let ir = lower(vec![
            var(1, "xs", array(vec![int(3)])),
            expr(2, binary(int(3), BinaryOperatorKind::NotIn, ident("xs"))),
        ])
        .unwrap();

        assert!(ir.contains("@ember_contains(%Value %t"));
        assert!(ir.contains("xor i1 %t"));
        assert!(!ir.contains("@ember_binary_op"));
    }

    #[test]
    fn negation_subtracts_from_zero() {
        let ir = lower(vec![expr(1, unary(UnaryOperatorKind::Negate, float(1.5)))]).unwrap();

        assert!(ir.contains("call %Value @ember_int(i64 0)"));
        assert!(ir.contains("@ember_binary_op(i32 1, "));
    }

    #[test]
    fn transcendentals_bypass_the_runtime() {
        let ir = lower(vec![expr(1, call("sqrt", vec![int(4)]))]).unwrap();

        assert!(ir.contains("call double @ember_to_float(%Value %t"));
        assert!(ir.contains("call double @llvm.sqrt.f64(double %t"));
        assert!(ir.contains("call %Value @ember_float(double %t"));
    }

    #[test]
    fn builtins_are_renamed_and_arity_checked() {
        let ir = lower(vec![expr(1, call("int", vec![string("7")]))]).unwrap();
        assert!(ir.contains("@ember_builtin_int(ptr %t"));

        let error = lower(vec![expr(1, call("len", vec![]))]).unwrap_err();
        assert_eq!(
            error.kind,
            CodegenErrorKind::ArityMismatch {
                name: "len".into(),
                expected: 1,
                found: 0
            }
        );
    }

    #[test]
    fn arguments_are_marshalled_into_scratch() {
        let ir = lower(vec![expr(1, call("print", vec![int(1), int(2)]))]).unwrap();

        assert!(ir.contains("alloca %Value, i32 2"));
        assert!(ir.contains("getelementptr %Value, ptr %t"));
        assert!(ir.contains(", i64 1"));
    }

    #[test]
    fn this_outside_a_class_is_rejected() {
        let error = lower(vec![expr(1, member(this(), "x"))]).unwrap_err();
        assert!(matches!(error.kind, CodegenErrorKind::Unsupported { .. }));
    }
}
