use crate::{backend::CodegenOptions, middle::lir};

mod llvm;

pub trait CodeGenerator {
    fn translate(&self, module: &lir::Module, options: &CodegenOptions) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Textual LLVM IR
    LlvmIr,
}

impl Target {
    pub fn get_code_generator(self) -> impl CodeGenerator {
        match self {
            Target::LlvmIr => llvm::CodeGeneratorLlvmIr,
        }
    }
}
