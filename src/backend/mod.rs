//! The backend takes a lowered LIR module and renders it for a concrete
//! target. Only the textual LLVM IR target exists; turning that text into a
//! native executable is the job of an external compiler. The
//! [`interpreter`] runs the same module in-process against the runtime
//! model instead.

use crate::{
    frontend::ast,
    middle::{error::CodegenResult, lir},
};

pub mod interpreter;
pub mod targets;

pub use targets::{CodeGenerator, Target};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Recorded as the module's `source_filename`
    pub source_filename: String,
    /// Emitted as `target triple` when set
    pub target_triple: Option<String>,
    /// Precede every lowered statement with a `; file:line` comment
    pub annotate_source: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            source_filename: "main.em".to_owned(),
            target_triple: None,
            annotate_source: false,
        }
    }
}

/// Lowers `program` and renders it for `target`
pub fn compile(program: &ast::Program, target: Target, options: &CodegenOptions) -> CodegenResult<String> {
    let module = lir::ast_lowering::lower_program(program, options)?;
    Ok(target.get_code_generator().translate(&module, options))
}
