//! The interface to the excluded front-end. The scanner, grammar and include
//! preprocessor live elsewhere and hand us a validated [`ast::Program`] in
//! which every node already carries its (include-remapped) source location.

use std::rc::Rc;

pub mod ast;

/// A source file name and a 1-based line number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Rc<str>,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<Rc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl core::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
