use colored::Colorize;
use thiserror::Error;

use crate::frontend::SourceLocation;

pub type CodegenResult<T> = Result<T, CodegenError>;

/// A fatal generation-time error. The first one aborts the whole compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodegenError {
    pub kind: CodegenErrorKind,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeclarationKind {
    Variable,
    Function,
    Class,
    Member,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenErrorKind {
    #[error("use of undeclared identifier `{name}`")]
    Undeclared { name: String },
    #[error("redeclaration of {kind} `{name}` in the same scope")]
    Redeclared { name: String, kind: DeclarationKind },
    #[error("call to undefined function `{name}`")]
    UnknownFunction { name: String },
    #[error("`{name}` takes {expected} argument(s) but {found} were supplied")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("`break` outside of a loop")]
    BreakOutsideLoop,
    #[error("`continue` outside of a loop")]
    ContinueOutsideLoop,
    #[error("unsupported construct: {construct}")]
    Unsupported { construct: String },
    #[error("constant {text:?} was not registered before emission")]
    MissingConstant { text: String },
}

impl CodegenError {
    pub fn new(kind: CodegenErrorKind, location: &SourceLocation) -> Self {
        Self {
            kind,
            location: Some(location.clone()),
        }
    }

    pub fn undeclared(name: &str, location: &SourceLocation) -> Self {
        Self::new(
            CodegenErrorKind::Undeclared {
                name: name.to_owned(),
            },
            location,
        )
    }

    pub fn redeclared(name: &str, kind: DeclarationKind, location: &SourceLocation) -> Self {
        Self::new(
            CodegenErrorKind::Redeclared {
                name: name.to_owned(),
                kind,
            },
            location,
        )
    }

    pub fn unsupported(construct: impl Into<String>, location: &SourceLocation) -> Self {
        Self::new(
            CodegenErrorKind::Unsupported {
                construct: construct.into(),
            },
            location,
        )
    }

    /// Colored multi-line report for a terminal
    pub fn render(&self) -> String {
        let mut report = format!("{}{} {}", "error".bright_red().bold(), ":".bold(), self.kind);

        if let Some(location) = &self.location {
            report.push_str(&format!("\n  {} {}", "-->".blue().bold(), location));
        }

        report
    }
}

impl core::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for CodegenError {}
