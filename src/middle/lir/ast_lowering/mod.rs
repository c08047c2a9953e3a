//! Lowers a validated AST to LIR.
//!
//! All compile-time state (the binding table, the constant pool and the
//! function/class registries) lives on one [`Session`] which is threaded
//! through every body being lowered. Before any code is emitted, every
//! top-level function and class is registered and every constant the emitted
//! code can mention is pooled.

use hashbrown::HashMap;

use crate::{
    backend::CodegenOptions,
    frontend::{SourceLocation, ast},
    middle::{
        error::{CodegenError, CodegenResult, DeclarationKind},
        lir::{
            self, FunctionDefinition, GlobalSlot, Operand, RegisterId, RuntimeFunction, Type,
            TypedOperand,
            abi::{BUILTINS, TRANSCENDENTALS},
            builder::FunctionBuilder,
        },
        pool::{ClassRegistry, FunctionRegistry, StringPool},
        resolve::{BindingId, Resolver},
    },
};

mod class;
mod constants;
mod expression;
mod statement;

pub use constants::ConstantCollector;

pub(crate) const CATCH_PREFIX_PREFIX: &str = "[caught in ";
pub(crate) const ASSERT_DEFAULT_MESSAGE: &str = "assertion failed";
pub(crate) const FOREACH_TYPE_ERROR: &str = "foreach expects an array or a dict";

/// Text prepended to an exception caught by the handler at `location`
pub(crate) fn catch_prefix(location: &SourceLocation) -> String {
    format!("{CATCH_PREFIX_PREFIX}{location}] ")
}

/// The state of one generation run
pub struct Session {
    annotate_source: bool,
    resolver: Resolver,
    strings: StringPool,
    functions: FunctionRegistry,
    classes: ClassRegistry,
    globals: Vec<GlobalSlot>,
    lowered: Vec<FunctionDefinition>,
}

impl Session {
    pub fn new(options: &CodegenOptions) -> Self {
        Self {
            annotate_source: options.annotate_source,
            resolver: Resolver::new(),
            strings: StringPool::new(),
            functions: FunctionRegistry::new(),
            classes: ClassRegistry::new(),
            globals: Vec::new(),
            lowered: Vec::new(),
        }
    }

    /// Registers every top-level function and class so that calls may
    /// precede definitions
    fn declare_items(&mut self, program: &ast::Program) -> CodegenResult<()> {
        for statement in &program.statements {
            match &statement.kind {
                ast::StatementKind::FunctionDefinition(function) => {
                    if BUILTINS.contains_key(function.name.as_str())
                        || TRANSCENDENTALS.contains_key(function.name.as_str())
                    {
                        return Err(CodegenError::redeclared(
                            &function.name,
                            DeclarationKind::Function,
                            &function.location,
                        ));
                    }

                    self.functions.register(
                        &function.name,
                        function.parameters.len(),
                        &function.location,
                    )?;
                    self.resolver
                        .declare_function(&function.name, &function.location)?;
                }
                ast::StatementKind::ClassDefinition(class) => {
                    self.classes.register(&class.name, &class.location)?;

                    for field in &class.fields {
                        self.classes
                            .add_member(&class.name, &field.name, &field.location)?;
                    }

                    for method in &class.methods {
                        self.classes
                            .add_member(&class.name, &method.name, &method.location)?;

                        if method.name == "init" {
                            self.classes
                                .set_init_arity(&class.name, method.parameters.len());
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn into_module(self) -> lir::Module {
        lir::Module {
            strings: self.strings.into_strings(),
            globals: self.globals,
            functions: self.lowered,
        }
    }
}

/// What kind of body is being lowered, which decides how `return` and `this`
/// behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    /// The program entry point holding top-level statements
    Entry,
    Function,
    Method,
    FieldInitializer,
}

struct BodyLoweringContext<'s> {
    session: &'s mut Session,
    builder: FunctionBuilder,
    kind: BodyKind,
    /// Stack slots of the locals declared in this body
    slots: HashMap<BindingId, RegisterId>,
    receiver: Option<RegisterId>,
}

impl<'s> BodyLoweringContext<'s> {
    fn new(session: &'s mut Session, builder: FunctionBuilder, kind: BodyKind) -> Self {
        Self {
            session,
            builder,
            kind,
            slots: HashMap::new(),
            receiver: None,
        }
    }

    /// `i32 @main(i32 %argc, ptr %argv)`
    fn entry(session: &'s mut Session) -> Self {
        let mut builder = FunctionBuilder::new("main", Type::I32);
        let argc = builder.add_parameter(Type::I32, "argc");
        let argv = builder.add_parameter(Type::Ptr, "argv");

        builder.push_prologue(lir::Instruction::Call {
            destination: None,
            return_type: Type::Void,
            callee: lir::Callee::Runtime(RuntimeFunction::GcInit),
            arguments: vec![],
        });

        let marker = builder.create_named_register(Type::Ptr, "stack.bottom");
        builder.push_prologue(lir::Instruction::Alloca {
            destination: marker,
            ty: Type::I64,
            count: 1,
        });
        builder.push_prologue(lir::Instruction::Call {
            destination: None,
            return_type: Type::Void,
            callee: lir::Callee::Runtime(RuntimeFunction::GcSetStackBottom),
            arguments: vec![TypedOperand::ptr(Operand::Register(marker))],
        });
        builder.push_prologue(lir::Instruction::Call {
            destination: None,
            return_type: Type::Void,
            callee: lir::Callee::Runtime(RuntimeFunction::SetArgs),
            arguments: vec![
                TypedOperand(Type::I32, Operand::Register(argc)),
                TypedOperand::ptr(Operand::Register(argv)),
            ],
        });

        Self::new(session, builder, BodyKind::Entry)
    }

    fn finish(self) -> FunctionDefinition {
        let function = self.builder.finish();
        log::debug!(
            "lowered `{}` ({} blocks, {} registers)",
            function.symbol,
            function.blocks.len(),
            function.registers.len()
        );
        function
    }

    /// `i32 line, ptr file` for entry points that can raise
    fn site(&self, location: &SourceLocation) -> CodegenResult<[TypedOperand; 2]> {
        let file = self
            .session
            .strings
            .lookup(&location.file)
            .map_err(|error| CodegenError {
                location: Some(location.clone()),
                ..error
            })?;

        Ok([
            TypedOperand::i32(i64::from(location.line)),
            TypedOperand::string(file),
        ])
    }

    fn constant(&self, text: &str, location: &SourceLocation) -> CodegenResult<TypedOperand> {
        self.session
            .strings
            .lookup(text)
            .map(TypedOperand::string)
            .map_err(|error| CodegenError {
                location: Some(location.clone()),
                ..error
            })
    }

    /// The address of a binding's storage
    fn storage(&self, id: BindingId, location: &SourceLocation) -> CodegenResult<Operand> {
        let binding = self.session.resolver.binding(id);

        if binding.is_global() {
            return Ok(Operand::Global(lir::GlobalRef::Slot(binding.symbol())));
        }

        self.slots
            .get(&id)
            .copied()
            .map(Operand::Register)
            .ok_or_else(|| {
                CodegenError::unsupported(
                    format!("reference to `{}` from a nested function", binding.name),
                    location,
                )
            })
    }

    /// Creates storage for a freshly declared binding and stores `value` in it
    fn initialize_binding(&mut self, id: BindingId, value: RegisterId) {
        let binding = self.session.resolver.binding(id);
        let symbol = binding.symbol();

        let destination = if binding.is_global() {
            self.builder.register_global_root(&symbol);
            let slot = Operand::Global(lir::GlobalRef::Slot(symbol.clone()));
            self.session.globals.push(GlobalSlot { symbol });
            slot
        } else {
            let slot = self.builder.local_slot(symbol);
            self.slots.insert(id, slot);
            Operand::Register(slot)
        };

        self.builder.push(lir::Instruction::Store {
            value: TypedOperand::value(value),
            destination,
        });
    }

    /// Declares `name`, then lowers `value` before the binding becomes
    /// visible, so the value still sees any outer binding of the same name
    fn declare_variable(
        &mut self,
        name: &str,
        location: &SourceLocation,
        value: impl FnOnce(&mut Self) -> CodegenResult<RegisterId>,
    ) -> CodegenResult<BindingId> {
        let id = self.session.resolver.declare(name, location)?;
        let value = value(self)?;
        self.initialize_binding(id, value);
        self.session.resolver.bind(id);
        Ok(id)
    }

    fn null(&mut self) -> RegisterId {
        self.builder.call_runtime(RuntimeFunction::Null, vec![])
    }

    fn int(&mut self, register: RegisterId) -> RegisterId {
        self.builder.call_runtime(
            RuntimeFunction::Int,
            vec![TypedOperand(Type::I64, Operand::Register(register))],
        )
    }
}

/// Lowers a whole program into one LIR module
pub fn lower_program(program: &ast::Program, options: &CodegenOptions) -> CodegenResult<lir::Module> {
    let mut session = Session::new(options);
    session.declare_items(program)?;
    ConstantCollector::new(&mut session.strings).collect(program);

    let mut entry = BodyLoweringContext::entry(&mut session);
    for statement in &program.statements {
        entry.lower_statement(statement)?;
    }
    entry.builder.emit_return(None);

    let entry = entry.finish();
    session.lowered.push(entry);

    Ok(session.into_module())
}
