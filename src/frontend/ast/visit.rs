//! Trait definition for an AST visitor which walks the tree in DFS order

use super::{
    Block, ClassDefinition, Expression, ExpressionKind, FieldDefinition, FunctionDefinition,
    Literal, Program, Statement, StatementKind,
};

pub trait Visitor<'ast>: Sized {
    fn visit_statement(&mut self, statement: &'ast Statement) {
        walk_statement(self, statement)
    }

    fn visit_block(&mut self, block: &'ast Block) {
        walk_block(self, block)
    }

    fn visit_function_definition(&mut self, function: &'ast FunctionDefinition) {
        walk_function_definition(self, function)
    }

    fn visit_class_definition(&mut self, class: &'ast ClassDefinition) {
        walk_class_definition(self, class)
    }

    fn visit_field_definition(&mut self, field: &'ast FieldDefinition) {
        walk_field_definition(self, field)
    }

    fn visit_expression(&mut self, expression: &'ast Expression) {
        walk_expression(self, expression)
    }

    fn visit_literal(&mut self, _literal: &'ast Literal) {}
}

pub fn walk_program<'a>(visitor: &mut impl Visitor<'a>, program: &'a Program) {
    for statement in &program.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_block<'a>(visitor: &mut impl Visitor<'a>, block: &'a Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_function_definition<'a>(
    visitor: &mut impl Visitor<'a>,
    function: &'a FunctionDefinition,
) {
    visitor.visit_block(&function.body);
}

pub fn walk_class_definition<'a>(visitor: &mut impl Visitor<'a>, class: &'a ClassDefinition) {
    for field in &class.fields {
        visitor.visit_field_definition(field);
    }

    for method in &class.methods {
        visitor.visit_function_definition(method);
    }
}

pub fn walk_field_definition<'a>(visitor: &mut impl Visitor<'a>, field: &'a FieldDefinition) {
    if let Some(initializer) = &field.initializer {
        visitor.visit_expression(initializer);
    }
}

pub fn walk_statement<'a>(visitor: &mut impl Visitor<'a>, statement: &'a Statement) {
    match &statement.kind {
        StatementKind::VariableDeclaration { initializer, .. } => {
            if let Some(initializer) = initializer {
                visitor.visit_expression(initializer);
            }
        }
        StatementKind::Assignment { target, value } => {
            visitor.visit_expression(target);
            visitor.visit_expression(value);
        }
        StatementKind::Expression(expression) | StatementKind::Raise(expression) => {
            visitor.visit_expression(expression)
        }
        StatementKind::Block(block) => visitor.visit_block(block),
        StatementKind::If {
            condition,
            positive,
            negative,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_block(positive);

            if let Some(negative) = negative {
                visitor.visit_block(negative);
            }
        }
        StatementKind::While { condition, body } => {
            visitor.visit_expression(condition);
            visitor.visit_block(body);
        }
        StatementKind::For {
            start, end, body, ..
        } => {
            visitor.visit_expression(start);
            visitor.visit_expression(end);
            visitor.visit_block(body);
        }
        StatementKind::Foreach { iterable, body, .. } => {
            visitor.visit_expression(iterable);
            visitor.visit_block(body);
        }
        StatementKind::Return(expression) => {
            if let Some(expression) = expression {
                visitor.visit_expression(expression)
            }
        }
        StatementKind::Try { body, handler, .. } => {
            visitor.visit_block(body);
            visitor.visit_block(handler);
        }
        StatementKind::Assert { condition, message } => {
            visitor.visit_expression(condition);

            if let Some(message) = message {
                visitor.visit_expression(message);
            }
        }
        StatementKind::FunctionDefinition(function) => visitor.visit_function_definition(function),
        StatementKind::ClassDefinition(class) => visitor.visit_class_definition(class),
        StatementKind::Break | StatementKind::Continue => {}
    }
}

pub fn walk_expression<'a>(visitor: &mut impl Visitor<'a>, expression: &'a Expression) {
    match &expression.kind {
        ExpressionKind::Literal(literal) => visitor.visit_literal(literal),
        ExpressionKind::Identifier(_) | ExpressionKind::This => {}
        ExpressionKind::Array(elements) => {
            elements.iter().for_each(|e| visitor.visit_expression(e))
        }
        ExpressionKind::Dict(entries) => {
            for (key, value) in entries {
                visitor.visit_expression(key);
                visitor.visit_expression(value);
            }
        }
        ExpressionKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expression(lhs);
            visitor.visit_expression(rhs);
        }
        ExpressionKind::Unary { operand, .. } => visitor.visit_expression(operand),
        ExpressionKind::Index { target, index } => {
            visitor.visit_expression(target);
            visitor.visit_expression(index);
        }
        ExpressionKind::Slice { target, start, end } => {
            visitor.visit_expression(target);

            if let Some(start) = start {
                visitor.visit_expression(start);
            }
            if let Some(end) = end {
                visitor.visit_expression(end);
            }
        }
        ExpressionKind::Member { target, .. } => visitor.visit_expression(target),
        ExpressionKind::FunctionCall { arguments, .. } => {
            arguments.iter().for_each(|e| visitor.visit_expression(e))
        }
        ExpressionKind::MethodCall {
            target, arguments, ..
        } => {
            visitor.visit_expression(target);
            arguments.iter().for_each(|e| visitor.visit_expression(e))
        }
        ExpressionKind::New { class, arguments } => {
            visitor.visit_expression(class);
            arguments.iter().for_each(|e| visitor.visit_expression(e))
        }
    }
}
