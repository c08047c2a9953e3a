use crate::{
    frontend::ast,
    middle::{
        error::CodegenResult,
        lir::{
            GlobalRef, Immediate, Instruction, Operand, RegisterId, RuntimeFunction, Type,
            TypedOperand,
            builder::FunctionBuilder,
        },
    },
};

use super::{BodyKind, BodyLoweringContext};

impl BodyLoweringContext<'_> {
    /// `%Value @fn.<name>(%Value, ...)`, one boxed value per parameter
    pub(super) fn lower_function(&mut self, function: &ast::FunctionDefinition) -> CodegenResult<()> {
        let builder = FunctionBuilder::new(format!("fn.{}", function.name), Type::Value);
        let mut body = BodyLoweringContext::new(&mut *self.session, builder, BodyKind::Function);

        body.session.resolver.enter_scope();
        let result = body.lower_function_body(function, |body, _, parameter| {
            body.builder
                .add_parameter(Type::Value, format!("arg.{parameter}"))
        });
        body.session.resolver.exit_scope();
        result?;

        let lowered = body.finish();
        self.session.lowered.push(lowered);
        Ok(())
    }

    /// Binds every parameter to a rooted slot, lowers the statements and
    /// appends the implicit `return null`
    fn lower_function_body(
        &mut self,
        function: &ast::FunctionDefinition,
        mut parameter: impl FnMut(&mut Self, usize, &str) -> RegisterId,
    ) -> CodegenResult<()> {
        for (index, name) in function.parameters.iter().enumerate() {
            self.declare_variable(name, &function.location, |this| {
                Ok(parameter(this, index, name))
            })?;
        }

        self.lower_statements(&function.body)?;

        let null = self.null();
        self.builder.emit_return(Some(null));
        Ok(())
    }

    /// `%Value @method.<class>.<name>(%Value %this, ptr %args, i32 %argc)`.
    /// The runtime checks the argument count before the call.
    fn lower_method(&mut self, class: &str, method: &ast::FunctionDefinition) -> CodegenResult<String> {
        let symbol = format!("method.{class}.{}", method.name);
        let mut builder = FunctionBuilder::new(symbol.clone(), Type::Value);
        let receiver = builder.add_parameter(Type::Value, "this");
        let arguments = builder.add_parameter(Type::Ptr, "args");
        builder.add_parameter(Type::I32, "argc");

        let mut body = BodyLoweringContext::new(&mut *self.session, builder, BodyKind::Method);
        body.receiver = Some(receiver);

        body.session.resolver.enter_scope();
        let result = body.lower_function_body(method, |body, index, _| {
            let element = body.builder.create_register(Type::Ptr);
            body.builder.push(Instruction::GetElementPointer {
                destination: element,
                element_ty: Type::Value,
                base: Operand::Register(arguments),
                index: TypedOperand(Type::I64, Operand::Immediate(Immediate::Int(index as i64))),
            });

            let value = body.builder.create_register(Type::Value);
            body.builder.push(Instruction::Load {
                destination: value,
                ty: Type::Value,
                source: Operand::Register(element),
            });
            value
        });
        body.session.resolver.exit_scope();
        result?;

        let lowered = body.finish();
        self.session.lowered.push(lowered);
        Ok(symbol)
    }

    /// `%Value @field.<class>.<name>(%Value %this)` computing the initial
    /// value of one field
    fn lower_field_initializer(
        &mut self,
        class: &str,
        field: &ast::FieldDefinition,
    ) -> CodegenResult<String> {
        let symbol = format!("field.{class}.{}", field.name);
        let mut builder = FunctionBuilder::new(symbol.clone(), Type::Value);
        let receiver = builder.add_parameter(Type::Value, "this");

        let mut body =
            BodyLoweringContext::new(&mut *self.session, builder, BodyKind::FieldInitializer);
        body.receiver = Some(receiver);

        body.session.resolver.enter_scope();
        let value = match &field.initializer {
            Some(initializer) => body.lower_expression(initializer),
            None => Ok(body.null()),
        };
        body.session.resolver.exit_scope();
        let value = value?;
        body.builder.emit_return(Some(value));

        let lowered = body.finish();
        self.session.lowered.push(lowered);
        Ok(symbol)
    }

    /// Creates the class object at its point of definition and registers
    /// each field initializer and method on it
    pub(super) fn lower_class(&mut self, class: &ast::ClassDefinition) -> CodegenResult<()> {
        let location = &class.location;

        let id = self.declare_variable(&class.name, location, |this| {
            let name = this.constant(&class.name, location)?;
            Ok(this
                .builder
                .call_runtime(RuntimeFunction::ClassNew, vec![name]))
        })?;
        let slot = self.storage(id, location)?;

        for field in &class.fields {
            let initializer = self.lower_field_initializer(&class.name, field)?;

            let descriptor = self.load_class(&slot);
            let arguments = vec![
                TypedOperand::value(descriptor),
                self.constant(&field.name, &field.location)?,
                TypedOperand::ptr(Operand::Global(GlobalRef::Function(initializer))),
                TypedOperand(
                    Type::I1,
                    Operand::Immediate(Immediate::Bool(ast::is_private_member(&field.name))),
                ),
            ];
            self.builder
                .call_runtime_void(RuntimeFunction::ClassAddField, arguments);
        }

        for method in &class.methods {
            let function = self.lower_method(&class.name, method)?;

            let descriptor = self.load_class(&slot);
            let arguments = vec![
                TypedOperand::value(descriptor),
                self.constant(&method.name, &method.location)?,
                TypedOperand::ptr(Operand::Global(GlobalRef::Function(function))),
                TypedOperand::i32(method.parameters.len() as i64),
                TypedOperand(
                    Type::I1,
                    Operand::Immediate(Immediate::Bool(ast::is_private_member(&method.name))),
                ),
            ];
            self.builder
                .call_runtime_void(RuntimeFunction::ClassAddMethod, arguments);
        }

        log::debug!(
            "lowered class `{}` ({} fields, {} methods)",
            class.name,
            class.fields.len(),
            class.methods.len()
        );

        Ok(())
    }

    fn load_class(&mut self, slot: &Operand) -> RegisterId {
        let descriptor = self.builder.create_register(Type::Value);
        self.builder.push(Instruction::Load {
            destination: descriptor,
            ty: Type::Value,
            source: slot.clone(),
        });
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        frontend::ast::testing::*,
        middle::{
            error::{CodegenErrorKind, DeclarationKind},
            lir::ast_lowering::tests::lower,
        },
    };

    fn point() -> crate::frontend::ast::Statement {
        class(
            1,
            "Point",
            vec![field(2, "x", Some(int(0))), field(3, "_secret", None)],
            vec![
                function_definition(4, "init", &["x"], vec![assign(5, member(this(), "x"), ident("x"))]),
                function_definition(6, "norm", &[], vec![ret(7, Some(member(this(), "x")))]),
            ],
        )
    }

    #[test]
    fn class_registers_fields_and_methods() {
        let ir = lower(vec![point()]).unwrap();

        assert!(ir.contains("call %Value @ember_class_new(ptr @.str."), "{ir}");
        assert!(ir.contains("ptr @g.Point"));
        assert!(ir.contains("ptr @field.Point.x, i1 false)"));
        assert!(ir.contains("ptr @field.Point._secret, i1 true)"));
        assert!(ir.contains("ptr @method.Point.init, i32 1, i1 false)"));
        assert!(ir.contains(
            "define %Value @method.Point.norm(%Value %this, ptr %args, i32 %argc)"
        ));
        assert!(ir.contains("define %Value @field.Point.x(%Value %this)"));
    }

    #[test]
    fn members_of_this_are_internal() {
        let ir = lower(vec![point()]).unwrap();

        assert!(ir.contains("call void @ember_member_set(%Value %this, ptr @.str."));
        assert!(ir.contains("i1 true, i32 5, ptr @.str.0)"));
    }

    #[test]
    fn construction_is_arity_checked_against_init() {
        let ir = lower(vec![point(), var(9, "p", new("Point", vec![int(1)]))]).unwrap();
        assert!(ir.contains("call %Value @ember_instantiate(%Value %t"));

        let error = lower(vec![point(), var(9, "p", new("Point", vec![]))]).unwrap_err();
        assert_eq!(
            error.kind,
            CodegenErrorKind::ArityMismatch {
                name: "Point".into(),
                expected: 1,
                found: 0
            }
        );
    }

    #[test]
    fn duplicate_members_are_rejected() {
        let error = lower(vec![class(
            1,
            "Dup",
            vec![field(2, "a", None)],
            vec![function_definition(3, "a", &[], vec![])],
        )])
        .unwrap_err();

        assert_eq!(
            error.kind,
            CodegenErrorKind::Redeclared {
                name: "a".into(),
                kind: DeclarationKind::Member
            }
        );
    }

    #[test]
    fn class_names_collide_with_globals() {
        let error = lower(vec![var(1, "Point", int(0)), point()]).unwrap_err();
        assert!(matches!(error.kind, CodegenErrorKind::Redeclared { .. }));
    }
}
