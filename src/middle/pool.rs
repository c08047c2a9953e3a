//! Per-compilation constant pool and the function/class registries.
//!
//! The target IR needs every constant declared before use, so the pool is
//! filled by one traversal of the whole program before any code is emitted.
//! Emission only ever looks constants up.

use hashbrown::HashMap;

use crate::{
    frontend::SourceLocation,
    index::{IndexVec, simple_index},
    middle::error::{CodegenError, CodegenErrorKind, CodegenResult, DeclarationKind},
};

simple_index! {
    /// Identifies a pooled string constant
    pub struct StringId;
}

#[derive(Debug, Default)]
pub struct StringPool {
    strings: IndexVec<StringId, String>,
    by_text: HashMap<String, StringId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing handle when `text` was interned before
    pub fn intern(&mut self, text: &str) -> StringId {
        if let Some(id) = self.by_text.get(text) {
            return *id;
        }

        let id = self.strings.push(text.to_owned());
        self.by_text.insert(text.to_owned(), id);
        id
    }

    pub fn lookup(&self, text: &str) -> CodegenResult<StringId> {
        self.by_text.get(text).copied().ok_or_else(|| CodegenError {
            kind: CodegenErrorKind::MissingConstant {
                text: text.to_owned(),
            },
            location: None,
        })
    }

    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn into_strings(self) -> IndexVec<StringId, String> {
        self.strings
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub arity: usize,
    pub location: SourceLocation,
}

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionInfo>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        arity: usize,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        if self.functions.contains_key(name) {
            return Err(CodegenError::redeclared(
                name,
                DeclarationKind::Function,
                location,
            ));
        }

        self.functions.insert(
            name.to_owned(),
            FunctionInfo {
                name: name.to_owned(),
                arity,
                location: location.clone(),
            },
        );

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    /// Checks a call site against the declared arity
    pub fn check_call(
        &self,
        name: &str,
        supplied: usize,
        location: &SourceLocation,
    ) -> CodegenResult<&FunctionInfo> {
        let Some(info) = self.functions.get(name) else {
            return Err(CodegenError::new(
                CodegenErrorKind::UnknownFunction {
                    name: name.to_owned(),
                },
                location,
            ));
        };

        if info.arity != supplied {
            return Err(CodegenError::new(
                CodegenErrorKind::ArityMismatch {
                    name: name.to_owned(),
                    expected: info.arity,
                    found: supplied,
                },
                location,
            ));
        }

        Ok(info)
    }
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    /// Field and method names share one namespace per class
    pub members: Vec<String>,
    /// Arity of the `init` method, if the class has one
    pub init_arity: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassInfo>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, location: &SourceLocation) -> CodegenResult<()> {
        if self.classes.contains_key(name) {
            return Err(CodegenError::redeclared(
                name,
                DeclarationKind::Class,
                location,
            ));
        }

        self.classes.insert(
            name.to_owned(),
            ClassInfo {
                name: name.to_owned(),
                members: Vec::new(),
                init_arity: None,
            },
        );

        Ok(())
    }

    pub fn add_member(
        &mut self,
        class: &str,
        member: &str,
        location: &SourceLocation,
    ) -> CodegenResult<()> {
        let info = self
            .classes
            .get_mut(class)
            .expect("class should be registered before its members");

        if info.members.iter().any(|m| m == member) {
            return Err(CodegenError::redeclared(
                member,
                DeclarationKind::Member,
                location,
            ));
        }

        info.members.push(member.to_owned());
        Ok(())
    }

    pub fn set_init_arity(&mut self, class: &str, arity: usize) {
        if let Some(info) = self.classes.get_mut(class) {
            info.init_arity = Some(arity);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(line: u32) -> SourceLocation {
        SourceLocation::new("main.em", line)
    }

    #[test]
    fn duplicate_text_shares_a_handle() {
        let mut pool = StringPool::new();
        let a = pool.intern("hello");
        let b = pool.intern("world");
        let c = pool.intern("hello");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(b), "world");
    }

    #[test]
    fn lookup_of_unregistered_text_fails() {
        let pool = StringPool::new();
        assert!(matches!(
            pool.lookup("late").unwrap_err().kind,
            CodegenErrorKind::MissingConstant { .. }
        ));
    }

    #[test]
    fn function_redefinition_is_rejected() {
        let mut functions = FunctionRegistry::new();
        functions.register("f", 1, &at(1)).unwrap();

        let error = functions.register("f", 2, &at(5)).unwrap_err();
        assert_eq!(
            error.to_string(),
            "main.em:5: redeclaration of function `f` in the same scope"
        );
    }

    #[test]
    fn call_sites_are_arity_checked() {
        let mut functions = FunctionRegistry::new();
        functions.register("add", 2, &at(1)).unwrap();

        assert!(functions.check_call("add", 2, &at(2)).is_ok());
        assert_eq!(
            functions.check_call("add", 1, &at(3)).unwrap_err().kind,
            CodegenErrorKind::ArityMismatch {
                name: "add".into(),
                expected: 2,
                found: 1
            }
        );
        assert!(matches!(
            functions.check_call("nope", 0, &at(4)).unwrap_err().kind,
            CodegenErrorKind::UnknownFunction { .. }
        ));
    }

    #[test]
    fn class_members_share_one_namespace() {
        let mut classes = ClassRegistry::new();
        classes.register("Point", &at(1)).unwrap();
        classes.add_member("Point", "x", &at(2)).unwrap();

        assert!(classes.add_member("Point", "x", &at(3)).is_err());
        assert!(classes.register("Point", &at(4)).is_err());
    }
}
