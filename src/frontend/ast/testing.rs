//! Small constructors for building ASTs by hand in tests

use super::*;

pub(crate) const FILE: &str = "main.em";

pub(crate) fn loc(line: u32) -> SourceLocation {
    SourceLocation::new(FILE, line)
}

/// Expressions start out unplaced (line 0) and take the line of the
/// statement or field that ends up holding them
fn expression(kind: ExpressionKind) -> Expression {
    Expression {
        location: loc(0),
        kind,
    }
}

/// Places `expression` on `line` explicitly, for expressions spanning lines
pub(crate) fn at(line: u32, mut expression: Expression) -> Expression {
    place(&mut expression, line);
    expression
}

fn place(expression: &mut Expression, line: u32) {
    if expression.location.line == 0 {
        expression.location.line = line;
    }

    match &mut expression.kind {
        ExpressionKind::Literal(_) | ExpressionKind::Identifier(_) | ExpressionKind::This => {}
        ExpressionKind::Array(elements) => {
            elements.iter_mut().for_each(|element| place(element, line));
        }
        ExpressionKind::Dict(entries) => {
            for (key, value) in entries {
                place(key, line);
                place(value, line);
            }
        }
        ExpressionKind::Binary { lhs, rhs, .. } => {
            place(lhs, line);
            place(rhs, line);
        }
        ExpressionKind::Unary { operand, .. } => place(operand, line),
        ExpressionKind::Index { target, index } => {
            place(target, line);
            place(index, line);
        }
        ExpressionKind::Slice { target, start, end } => {
            place(target, line);
            start.iter_mut().chain(end.iter_mut()).for_each(|bound| place(bound, line));
        }
        ExpressionKind::Member { target, .. } => place(target, line),
        ExpressionKind::FunctionCall { arguments, .. } => {
            arguments.iter_mut().for_each(|argument| place(argument, line));
        }
        ExpressionKind::MethodCall { target, arguments, .. }
        | ExpressionKind::New {
            class: target,
            arguments,
        } => {
            place(target, line);
            arguments.iter_mut().for_each(|argument| place(argument, line));
        }
    }
}

fn statement(line: u32, mut kind: StatementKind) -> Statement {
    match &mut kind {
        StatementKind::VariableDeclaration { initializer: expression, .. }
        | StatementKind::Return(expression) => {
            expression.iter_mut().for_each(|expression| place(expression, line));
        }
        StatementKind::Assignment { target, value } => {
            place(target, line);
            place(value, line);
        }
        StatementKind::Expression(expression)
        | StatementKind::If { condition: expression, .. }
        | StatementKind::While { condition: expression, .. }
        | StatementKind::Foreach { iterable: expression, .. }
        | StatementKind::Raise(expression) => place(expression, line),
        StatementKind::For { start, end, .. } => {
            place(start, line);
            place(end, line);
        }
        StatementKind::Assert { condition, message } => {
            place(condition, line);
            message.iter_mut().for_each(|message| place(message, line));
        }
        _ => {}
    }

    Statement {
        location: loc(line),
        kind,
    }
}

pub(crate) fn program(statements: Vec<Statement>) -> Program {
    Program { statements }
}

pub(crate) fn block(statements: Vec<Statement>) -> Block {
    Block { statements }
}

pub(crate) fn int(value: i64) -> Expression {
    expression(ExpressionKind::Literal(Literal::Integer(value)))
}

pub(crate) fn float(value: f64) -> Expression {
    expression(ExpressionKind::Literal(Literal::Float(value)))
}

pub(crate) fn string(value: &str) -> Expression {
    expression(ExpressionKind::Literal(Literal::String(value.to_owned())))
}

pub(crate) fn boolean(value: bool) -> Expression {
    expression(ExpressionKind::Literal(Literal::Boolean(value)))
}

pub(crate) fn null() -> Expression {
    expression(ExpressionKind::Literal(Literal::Null))
}

pub(crate) fn ident(name: &str) -> Expression {
    expression(ExpressionKind::Identifier(name.to_owned()))
}

pub(crate) fn this() -> Expression {
    expression(ExpressionKind::This)
}

pub(crate) fn array(elements: Vec<Expression>) -> Expression {
    expression(ExpressionKind::Array(elements))
}

pub(crate) fn dict(entries: Vec<(Expression, Expression)>) -> Expression {
    expression(ExpressionKind::Dict(entries))
}

pub(crate) fn binary(lhs: Expression, operator: BinaryOperatorKind, rhs: Expression) -> Expression {
    expression(ExpressionKind::Binary {
        lhs: Box::new(lhs),
        operator,
        rhs: Box::new(rhs),
    })
}

pub(crate) fn unary(operator: UnaryOperatorKind, operand: Expression) -> Expression {
    expression(ExpressionKind::Unary {
        operator,
        operand: Box::new(operand),
    })
}

pub(crate) fn index(target: Expression, index: Expression) -> Expression {
    expression(ExpressionKind::Index {
        target: Box::new(target),
        index: Box::new(index),
    })
}

pub(crate) fn slice(target: Expression, start: Option<Expression>, end: Option<Expression>) -> Expression {
    expression(ExpressionKind::Slice {
        target: Box::new(target),
        start: start.map(Box::new),
        end: end.map(Box::new),
    })
}

pub(crate) fn member(target: Expression, name: &str) -> Expression {
    expression(ExpressionKind::Member {
        target: Box::new(target),
        name: name.to_owned(),
    })
}

pub(crate) fn call(name: &str, arguments: Vec<Expression>) -> Expression {
    expression(ExpressionKind::FunctionCall {
        name: name.to_owned(),
        arguments,
    })
}

pub(crate) fn method_call(target: Expression, name: &str, arguments: Vec<Expression>) -> Expression {
    expression(ExpressionKind::MethodCall {
        target: Box::new(target),
        name: name.to_owned(),
        arguments,
    })
}

pub(crate) fn new(class: &str, arguments: Vec<Expression>) -> Expression {
    expression(ExpressionKind::New {
        class: Box::new(ident(class)),
        arguments,
    })
}

pub(crate) fn var(line: u32, name: &str, initializer: Expression) -> Statement {
    statement(
        line,
        StatementKind::VariableDeclaration {
            name: name.to_owned(),
            initializer: Some(Box::new(initializer)),
        },
    )
}

pub(crate) fn assign(line: u32, target: Expression, value: Expression) -> Statement {
    statement(
        line,
        StatementKind::Assignment {
            target: Box::new(target),
            value: Box::new(value),
        },
    )
}

pub(crate) fn expr(line: u32, expression: Expression) -> Statement {
    statement(line, StatementKind::Expression(Box::new(expression)))
}

pub(crate) fn nested(line: u32, statements: Vec<Statement>) -> Statement {
    statement(line, StatementKind::Block(Box::new(block(statements))))
}

pub(crate) fn if_else(
    line: u32,
    condition: Expression,
    positive: Vec<Statement>,
    negative: Option<Vec<Statement>>,
) -> Statement {
    statement(
        line,
        StatementKind::If {
            condition: Box::new(condition),
            positive: Box::new(block(positive)),
            negative: negative.map(|n| Box::new(block(n))),
        },
    )
}

pub(crate) fn while_loop(line: u32, condition: Expression, body: Vec<Statement>) -> Statement {
    statement(
        line,
        StatementKind::While {
            condition: Box::new(condition),
            body: Box::new(block(body)),
        },
    )
}

pub(crate) fn for_loop(
    line: u32,
    variable: &str,
    start: Expression,
    end: Expression,
    body: Vec<Statement>,
) -> Statement {
    statement(
        line,
        StatementKind::For {
            variable: variable.to_owned(),
            start: Box::new(start),
            end: Box::new(end),
            body: Box::new(block(body)),
        },
    )
}

pub(crate) fn foreach(
    line: u32,
    key: Option<&str>,
    value: &str,
    iterable: Expression,
    body: Vec<Statement>,
) -> Statement {
    statement(
        line,
        StatementKind::Foreach {
            key: key.map(str::to_owned),
            value: value.to_owned(),
            iterable: Box::new(iterable),
            body: Box::new(block(body)),
        },
    )
}

pub(crate) fn brk(line: u32) -> Statement {
    statement(line, StatementKind::Break)
}

pub(crate) fn cont(line: u32) -> Statement {
    statement(line, StatementKind::Continue)
}

pub(crate) fn ret(line: u32, value: Option<Expression>) -> Statement {
    statement(line, StatementKind::Return(value.map(Box::new)))
}

pub(crate) fn try_catch(
    line: u32,
    body: Vec<Statement>,
    variable: &str,
    handler: Vec<Statement>,
) -> Statement {
    statement(
        line,
        StatementKind::Try {
            body: Box::new(block(body)),
            variable: variable.to_owned(),
            handler: Box::new(block(handler)),
        },
    )
}

pub(crate) fn raise(line: u32, value: Expression) -> Statement {
    statement(line, StatementKind::Raise(Box::new(value)))
}

pub(crate) fn assert(line: u32, condition: Expression, message: Option<Expression>) -> Statement {
    statement(
        line,
        StatementKind::Assert {
            condition: Box::new(condition),
            message: message.map(Box::new),
        },
    )
}

pub(crate) fn function_definition(
    line: u32,
    name: &str,
    parameters: &[&str],
    body: Vec<Statement>,
) -> FunctionDefinition {
    FunctionDefinition {
        location: loc(line),
        name: name.to_owned(),
        parameters: parameters.iter().map(|p| (*p).to_owned()).collect(),
        body: block(body),
    }
}

pub(crate) fn function(line: u32, name: &str, parameters: &[&str], body: Vec<Statement>) -> Statement {
    statement(
        line,
        StatementKind::FunctionDefinition(Box::new(function_definition(
            line, name, parameters, body,
        ))),
    )
}

pub(crate) fn field(line: u32, name: &str, initializer: Option<Expression>) -> FieldDefinition {
    FieldDefinition {
        location: loc(line),
        name: name.to_owned(),
        initializer: initializer.map(|initializer| at(line, initializer)),
    }
}

pub(crate) fn class(
    line: u32,
    name: &str,
    fields: Vec<FieldDefinition>,
    methods: Vec<FunctionDefinition>,
) -> Statement {
    statement(
        line,
        StatementKind::ClassDefinition(Box::new(ClassDefinition {
            location: loc(line),
            name: name.to_owned(),
            fields,
            methods,
        })),
    )
}
