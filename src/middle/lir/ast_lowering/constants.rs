use crate::{
    frontend::{
        SourceLocation,
        ast::{
            self, ClassDefinition, Expression, ExpressionKind, FieldDefinition, FunctionDefinition,
            Literal, Statement, StatementKind,
            visit::{self, Visitor},
        },
    },
    middle::pool::StringPool,
};

use super::{ASSERT_DEFAULT_MESSAGE, FOREACH_TYPE_ERROR, catch_prefix};

/// Pools every constant the emitted code can refer to: literal text, member
/// names, class names, diagnostic fragments and the file of every node
pub struct ConstantCollector<'p> {
    pool: &'p mut StringPool,
}

impl<'p> ConstantCollector<'p> {
    pub fn new(pool: &'p mut StringPool) -> Self {
        Self { pool }
    }

    pub fn collect(mut self, program: &ast::Program) {
        visit::walk_program(&mut self, program);
        log::trace!("pooled {} constants", self.pool.len());
    }

    fn file(&mut self, location: &SourceLocation) {
        self.pool.intern(&location.file);
    }
}

impl<'ast> Visitor<'ast> for ConstantCollector<'_> {
    fn visit_statement(&mut self, statement: &'ast Statement) {
        self.file(&statement.location);

        match &statement.kind {
            StatementKind::Try { .. } => {
                self.pool.intern(&catch_prefix(&statement.location));
            }
            StatementKind::Assert { message: None, .. } => {
                self.pool.intern(ASSERT_DEFAULT_MESSAGE);
            }
            StatementKind::Foreach { .. } => {
                self.pool.intern(FOREACH_TYPE_ERROR);
            }
            _ => {}
        }

        visit::walk_statement(self, statement);
    }

    fn visit_function_definition(&mut self, function: &'ast FunctionDefinition) {
        self.file(&function.location);
        self.pool.intern(&function.name);
        visit::walk_function_definition(self, function);
    }

    fn visit_class_definition(&mut self, class: &'ast ClassDefinition) {
        self.file(&class.location);
        self.pool.intern(&class.name);
        visit::walk_class_definition(self, class);
    }

    fn visit_field_definition(&mut self, field: &'ast FieldDefinition) {
        self.file(&field.location);
        self.pool.intern(&field.name);
        visit::walk_field_definition(self, field);
    }

    fn visit_expression(&mut self, expression: &'ast Expression) {
        self.file(&expression.location);

        match &expression.kind {
            ExpressionKind::Member { name, .. } | ExpressionKind::MethodCall { name, .. } => {
                self.pool.intern(name);
            }
            _ => {}
        }

        visit::walk_expression(self, expression);
    }

    fn visit_literal(&mut self, literal: &'ast Literal) {
        if let Literal::String(text) = literal {
            self.pool.intern(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::testing::*;

    fn collect(statements: Vec<Statement>) -> StringPool {
        let mut pool = StringPool::new();
        ConstantCollector::new(&mut pool).collect(&program(statements));
        pool
    }

    #[test]
    fn literals_and_member_names_are_pooled_once() {
        let pool = collect(vec![
            var(1, "s", string("hi")),
            expr(2, string("hi")),
            expr(3, method_call(ident("s"), "upper", vec![])),
            assign(4, member(ident("s"), "size"), int(1)),
        ]);

        assert!(pool.lookup("hi").is_ok());
        assert!(pool.lookup("upper").is_ok());
        assert!(pool.lookup("size").is_ok());
        assert!(pool.lookup(FILE).is_ok());
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn diagnostic_fragments_are_pooled_where_needed() {
        let pool = collect(vec![
            try_catch(3, vec![], "e", vec![]),
            assert(4, ident("ok"), None),
            foreach(5, None, "v", ident("xs"), vec![]),
        ]);

        assert!(pool.lookup("[caught in main.em:3] ").is_ok());
        assert!(pool.lookup(ASSERT_DEFAULT_MESSAGE).is_ok());
        assert!(pool.lookup(FOREACH_TYPE_ERROR).is_ok());
    }

    #[test]
    fn explicit_assert_messages_skip_the_default() {
        let pool = collect(vec![assert(1, ident("ok"), Some(string("nope")))]);
        assert!(pool.lookup(ASSERT_DEFAULT_MESSAGE).is_err());
    }

    #[test]
    fn class_and_member_declarations_are_pooled() {
        let pool = collect(vec![class(
            1,
            "Point",
            vec![field(2, "x", Some(int(0)))],
            vec![function_definition(3, "norm", &[], vec![])],
        )]);

        for name in ["Point", "x", "norm"] {
            assert!(pool.lookup(name).is_ok(), "{name}");
        }
    }
}
