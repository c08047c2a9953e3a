use std::collections::BTreeSet;

use itertools::Itertools;

use crate::{
    backend::{CodegenOptions, targets::CodeGenerator},
    index::Index,
    middle::lir::{self, Callee, Intrinsic, RuntimeFunction, pretty_print::pretty_print_function},
};

pub struct CodeGeneratorLlvmIr;

impl CodeGenerator for CodeGeneratorLlvmIr {
    fn translate(&self, module: &lir::Module, options: &CodegenOptions) -> String {
        let mut header = format!(
            "; ModuleID = '{0}'\nsource_filename = \"{0}\"",
            options.source_filename
        );
        if let Some(triple) = &options.target_triple {
            header.push_str(&format!("\ntarget triple = \"{triple}\""));
        }

        let strings = module
            .strings
            .enumerate()
            .map(|(id, text)| {
                format!(
                    "@.str.{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
                    id.index(),
                    text.len() + 1,
                    escape_bytes(text)
                )
            })
            .join("\n");

        let globals = module
            .globals
            .iter()
            .map(|global| format!("@{} = global %Value zeroinitializer", global.symbol))
            .join("\n");

        // Drop the colors the pretty printer adds for terminals
        let functions = module
            .functions
            .iter()
            .map(|function| strip_ansi_escapes::strip_str(pretty_print_function(function)))
            .join("\n\n");

        format!(
            indoc::indoc! {r#"
            {0}

            %Value = type {{ i32, i64 }}

            ; constants
            {1}

            ; globals
            {2}

            ; runtime
            {3}

            ; program
            {4}
            "#
            },
            header,
            strings,
            globals,
            declarations(module),
            functions
        )
    }
}

/// Declarations for exactly the external functions the module calls
fn declarations(module: &lir::Module) -> String {
    let mut runtime = BTreeSet::new();
    let mut intrinsics = BTreeSet::new();

    let calls = module
        .functions
        .iter()
        .flat_map(|function| function.blocks.iter())
        .flat_map(|block| block.instructions.iter());

    for instruction in calls {
        if let lir::Instruction::Call { callee, .. } = instruction {
            match callee {
                Callee::Runtime(function) => {
                    runtime.insert(*function);
                }
                Callee::Intrinsic(intrinsic) => {
                    intrinsics.insert(*intrinsic);
                }
                Callee::Function(_) => {}
            }
        }
    }

    let runtime = runtime.into_iter().map(|function: RuntimeFunction| {
        format!(
            "declare {} @{function}({}){}",
            function.return_type(),
            function.parameters().iter().join(", "),
            if function.is_noreturn() { " noreturn" } else { "" }
        )
    });

    let intrinsics = intrinsics.into_iter().map(|intrinsic: Intrinsic| {
        format!(
            "declare {} @{intrinsic}({}){}",
            intrinsic.return_type(),
            intrinsic.parameters().iter().join(", "),
            if intrinsic == Intrinsic::SetJmp {
                " returns_twice"
            } else {
                ""
            }
        )
    });

    runtime.chain(intrinsics).join("\n")
}

/// Printable ASCII stays as is; quotes, backslashes and everything else
/// become `\XX`
fn escape_bytes(text: &str) -> String {
    text.bytes()
        .map(|b| match b {
            b'"' | b'\\' => format!("\\{b:02X}"),
            0x20..=0x7E => (b as char).to_string(),
            _ => format!("\\{b:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Target, compile},
        frontend::ast::{BinaryOperatorKind, testing::*},
    };

    fn translate(statements: Vec<crate::frontend::ast::Statement>) -> String {
        compile(&program(statements), Target::LlvmIr, &CodegenOptions::default()).unwrap()
    }

    #[test]
    fn strings_are_escaped_and_terminated() {
        assert_eq!(escape_bytes("a\"b\\\n"), "a\\22b\\5C\\0A");

        let ir = translate(vec![expr(1, string("hi\n"))]);
        assert!(ir.contains("@.str.1 = private unnamed_addr constant [4 x i8] c\"hi\\0A\\00\""), "{ir}");
        assert!(ir.contains("@.str.0 = private unnamed_addr constant [8 x i8] c\"main.em\\00\""));
    }

    #[test]
    fn only_referenced_entry_points_are_declared() {
        let ir = translate(vec![var(1, "x", binary(int(1), BinaryOperatorKind::Add, int(2)))]);

        assert!(ir.contains("declare %Value @ember_binary_op(i32, %Value, %Value, i32, ptr)"));
        assert!(ir.contains("declare void @ember_gc_init()"));
        assert!(ir.contains("@g.x = global %Value zeroinitializer"));
        assert!(!ir.contains("@ember_raise"));
        assert!(!ir.contains("\u{1b}["));
    }

    #[test]
    fn setjmp_is_declared_returns_twice() {
        let ir = translate(vec![try_catch(1, vec![raise(2, int(1))], "e", vec![])]);

        assert!(ir.contains("declare i32 @_setjmp(ptr) returns_twice"));
        assert!(ir.contains("declare void @ember_raise(%Value, i32, ptr) noreturn"));
    }

    #[test]
    fn header_carries_the_options() {
        let options = CodegenOptions {
            source_filename: "demo.em".into(),
            target_triple: Some("x86_64-pc-linux-gnu".into()),
            annotate_source: true,
        };
        let ir = compile(&program(vec![var(3, "x", int(1))]), Target::LlvmIr, &options).unwrap();

        assert!(ir.starts_with("; ModuleID = 'demo.em'\nsource_filename = \"demo.em\"\n"));
        assert!(ir.contains("target triple = \"x86_64-pc-linux-gnu\""));
        assert!(ir.contains("%Value = type { i32, i64 }"));
        assert!(ir.contains("; main.em:3"));
    }
}
