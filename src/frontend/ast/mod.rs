use super::SourceLocation;

pub mod visit;

#[cfg(test)]
pub(crate) mod testing;

/// The root of a parsed program. Function and class definitions appear as
/// ordinary top level statements, interleaved with code in source order.
#[derive(Debug)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub struct Block {
    pub statements: Vec<Statement>,
}

#[derive(Debug)]
pub struct Statement {
    pub location: SourceLocation,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    /// `var name = initializer`
    VariableDeclaration {
        name: String,
        initializer: Option<Box<Expression>>,
    },
    Assignment {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Expression(Box<Expression>),
    Block(Box<Block>),
    If {
        condition: Box<Expression>,
        positive: Box<Block>,
        /// `elif` chains arrive as a nested if inside this block
        negative: Option<Box<Block>>,
    },
    While {
        condition: Box<Expression>,
        body: Box<Block>,
    },
    /// Inclusive integer range, iterated upwards or downwards
    For {
        variable: String,
        start: Box<Expression>,
        end: Box<Expression>,
        body: Box<Block>,
    },
    Foreach {
        key: Option<String>,
        value: String,
        iterable: Box<Expression>,
        body: Box<Block>,
    },
    Break,
    Continue,
    Return(Option<Box<Expression>>),
    Try {
        body: Box<Block>,
        variable: String,
        handler: Box<Block>,
    },
    Raise(Box<Expression>),
    Assert {
        condition: Box<Expression>,
        message: Option<Box<Expression>>,
    },
    FunctionDefinition(Box<FunctionDefinition>),
    ClassDefinition(Box<ClassDefinition>),
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub location: SourceLocation,
    pub name: String,
    pub parameters: Vec<String>,
    pub body: Block,
}

#[derive(Debug)]
pub struct ClassDefinition {
    pub location: SourceLocation,
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<FunctionDefinition>,
}

#[derive(Debug)]
pub struct FieldDefinition {
    pub location: SourceLocation,
    pub name: String,
    pub initializer: Option<Expression>,
}

/// Members whose name starts with an underscore are only reachable through
/// `this`
pub fn is_private_member(name: &str) -> bool {
    name.starts_with('_')
}

#[derive(Debug)]
pub struct Expression {
    pub location: SourceLocation,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(Literal),
    Identifier(String),
    /// The receiver inside a method or field initializer
    This,
    Array(Vec<Expression>),
    Dict(Vec<(Expression, Expression)>),
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperatorKind,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Box<Expression>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Slice {
        target: Box<Expression>,
        start: Option<Box<Expression>>,
        end: Option<Box<Expression>>,
    },
    Member {
        target: Box<Expression>,
        name: String,
    },
    FunctionCall {
        name: String,
        arguments: Vec<Expression>,
    },
    MethodCall {
        target: Box<Expression>,
        name: String,
        arguments: Vec<Expression>,
    },
    New {
        class: Box<Expression>,
        arguments: Vec<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinaryOperatorKind {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Modulus,
    #[strum(serialize = "==")]
    Equals,
    #[strum(serialize = "!=")]
    NotEquals,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = "<=")]
    LessThanOrEqualTo,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = ">=")]
    GreaterThanOrEqualTo,
    #[strum(serialize = "and")]
    LogicalAnd,
    #[strum(serialize = "or")]
    LogicalOr,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not in")]
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnaryOperatorKind {
    #[strum(serialize = "not")]
    LogicalNot,
    #[strum(serialize = "-")]
    Negate,
}
