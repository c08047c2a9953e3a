//! Code generator and runtime for the Ember scripting language.
//!
//! [`backend::compile`] lowers a parsed program to textual LLVM IR which is
//! linked against the runtime in [`runtime`].

pub mod backend;
pub mod frontend;
pub mod index;
pub mod middle;
pub mod runtime;
