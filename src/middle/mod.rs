//! Names are resolved, constants pooled and the AST is lowered to LIR here.

pub mod error;
pub mod lir;
pub mod pool;
pub mod resolve;
