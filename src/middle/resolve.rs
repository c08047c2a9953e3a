//! Scope and name resolution for one generation run.
//!
//! Every declaration gets a fresh entry in the binding table, and with it a
//! storage name that is unique across the compiled unit. Uses resolve to the
//! innermost visible binding.

use hashbrown::HashMap;

use crate::{
    frontend::SourceLocation,
    index::{Index, IndexVec, simple_index},
    middle::error::{CodegenError, CodegenResult, DeclarationKind},
};

simple_index! {
    /// Identifies an entry in the binding table
    pub struct BindingId;
}

simple_index! {
    /// Identifies a program-wide variable slot
    pub struct GlobalId;
}

simple_index! {
    /// Numbers local storage; never reused within a compilation
    pub struct LocalId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Global(GlobalId),
    Local(LocalId),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub storage: Storage,
    pub depth: u32,
    /// Becomes true once the initializer has been lowered. Until then the
    /// binding is invisible to lookups.
    pub declared: bool,
    pub location: SourceLocation,
}

impl Binding {
    pub fn is_global(&self) -> bool {
        matches!(self.storage, Storage::Global(_))
    }

    /// The storage name used in the emitted IR. Globals are derived from the
    /// source name alone, locals carry their ordinal.
    pub fn symbol(&self) -> String {
        match self.storage {
            Storage::Global(_) => format!("g.{}", self.name),
            Storage::Local(id) => format!("{}.{}", self.name, id.index()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Resolver {
    bindings: IndexVec<BindingId, Binding>,
    /// Visible bindings, most recent last
    visible: Vec<BindingId>,
    /// Length of `visible` when each open region was entered
    regions: Vec<usize>,
    depth: u32,
    next_global: u32,
    next_local: u32,
    /// Top-level function names. They share the global namespace with
    /// variables and classes but have no storage.
    functions: HashMap<String, SourceLocation>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn enter_scope(&mut self) {
        self.regions.push(self.visible.len());
        self.depth += 1;
    }

    /// Leaves the innermost region. Its bindings keep their table entries
    /// (and storage) but can no longer be found by name.
    pub fn exit_scope(&mut self) {
        let mark = self
            .regions
            .pop()
            .expect("Attempted to exit a scope from the global context");

        self.visible.truncate(mark);
        self.depth -= 1;
    }

    /// Creates a binding for `name` at the current depth. The binding becomes
    /// visible once [`Resolver::bind`] is called, so an initializer lowered in
    /// between still sees the previous binding of the same name.
    pub fn declare(&mut self, name: &str, location: &SourceLocation) -> CodegenResult<BindingId> {
        let shadows_function = self.depth == 0 && self.functions.contains_key(name);
        if shadows_function || self.lookup_at_depth(name, self.depth).is_some() {
            return Err(CodegenError::redeclared(
                name,
                DeclarationKind::Variable,
                location,
            ));
        }

        let storage = if self.depth == 0 {
            let id = GlobalId::new(self.next_global as usize);
            self.next_global += 1;
            Storage::Global(id)
        } else {
            let id = LocalId::new(self.next_local as usize);
            self.next_local += 1;
            Storage::Local(id)
        };

        let id = self.bindings.push(Binding {
            name: name.to_owned(),
            storage,
            depth: self.depth,
            declared: false,
            location: location.clone(),
        });
        self.visible.push(id);

        log::trace!("declared `{name}` at depth {} as {:?}", self.depth, storage);

        Ok(id)
    }

    /// Claims `name` in the global namespace for a top-level function
    pub fn declare_function(&mut self, name: &str, location: &SourceLocation) -> CodegenResult<()> {
        if self.functions.contains_key(name) || self.lookup_at_depth(name, 0).is_some() {
            return Err(CodegenError::redeclared(
                name,
                DeclarationKind::Function,
                location,
            ));
        }

        self.functions.insert(name.to_owned(), location.clone());
        Ok(())
    }

    pub fn bind(&mut self, id: BindingId) {
        self.bindings[id].declared = true;
    }

    /// Declares and immediately binds
    pub fn declare_bound(
        &mut self,
        name: &str,
        location: &SourceLocation,
    ) -> CodegenResult<BindingId> {
        let id = self.declare(name, location)?;
        self.bind(id);
        Ok(id)
    }

    /// Resolves a use of `name` to the innermost visible binding
    pub fn resolve(&self, name: &str, location: &SourceLocation) -> CodegenResult<BindingId> {
        self.visible
            .iter()
            .rev()
            .copied()
            .find(|id| {
                let binding = &self.bindings[*id];
                binding.declared && binding.name == name
            })
            .ok_or_else(|| CodegenError::undeclared(name, location))
    }

    /// Depth-exact lookup used for redeclaration checks
    pub fn lookup_at_depth(&self, name: &str, depth: u32) -> Option<BindingId> {
        self.visible.iter().rev().copied().find(|id| {
            let binding = &self.bindings[*id];
            binding.depth == depth && binding.name == name
        })
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id]
    }

    /// Every global binding in declaration order
    pub fn globals(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.is_global())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::error::CodegenErrorKind;

    fn at(line: u32) -> SourceLocation {
        SourceLocation::new("main.em", line)
    }

    #[test]
    fn inner_binding_shadows_until_its_scope_exits() {
        let mut resolver = Resolver::new();
        let outer = resolver.declare_bound("x", &at(1)).unwrap();

        resolver.enter_scope();
        let inner = resolver.declare_bound("x", &at(2)).unwrap();
        assert_eq!(resolver.resolve("x", &at(3)).unwrap(), inner);
        resolver.exit_scope();

        assert_eq!(resolver.resolve("x", &at(4)).unwrap(), outer);
        assert_ne!(
            resolver.binding(outer).symbol(),
            resolver.binding(inner).symbol()
        );
    }

    #[test]
    fn sibling_scopes_get_distinct_storage() {
        let mut resolver = Resolver::new();

        resolver.enter_scope();
        let first = resolver.declare_bound("i", &at(1)).unwrap();
        resolver.exit_scope();

        resolver.enter_scope();
        let second = resolver.declare_bound("i", &at(2)).unwrap();
        resolver.exit_scope();

        assert_eq!(resolver.binding(first).symbol(), "i.0");
        assert_eq!(resolver.binding(second).symbol(), "i.1");
    }

    #[test]
    fn globals_are_named_after_the_source() {
        let mut resolver = Resolver::new();
        let id = resolver.declare_bound("counter", &at(1)).unwrap();

        assert!(resolver.binding(id).is_global());
        assert_eq!(resolver.binding(id).symbol(), "g.counter");
        assert_eq!(resolver.globals().count(), 1);
    }

    #[test]
    fn same_depth_redeclaration_is_rejected() {
        let mut resolver = Resolver::new();
        resolver.enter_scope();
        resolver.declare_bound("y", &at(1)).unwrap();

        let error = resolver.declare("y", &at(2)).unwrap_err();
        assert_eq!(
            error.kind,
            CodegenErrorKind::Redeclared {
                name: "y".into(),
                kind: DeclarationKind::Variable
            }
        );
        assert_eq!(error.location, Some(at(2)));
    }

    #[test]
    fn functions_share_the_global_namespace() {
        let mut resolver = Resolver::new();
        resolver.declare_function("area", &at(1)).unwrap();

        let error = resolver.declare("area", &at(5)).unwrap_err();
        assert_eq!(
            error.kind,
            CodegenErrorKind::Redeclared {
                name: "area".into(),
                kind: DeclarationKind::Variable
            }
        );

        resolver.declare_bound("width", &at(2)).unwrap();
        let error = resolver.declare_function("width", &at(6)).unwrap_err();
        assert_eq!(error.location, Some(at(6)));

        resolver.enter_scope();
        assert!(resolver.declare("area", &at(7)).is_ok());
    }

    #[test]
    fn pending_binding_is_invisible_to_its_initializer() {
        let mut resolver = Resolver::new();
        let outer = resolver.declare_bound("n", &at(1)).unwrap();

        resolver.enter_scope();
        let inner = resolver.declare("n", &at(2)).unwrap();
        assert_eq!(resolver.resolve("n", &at(2)).unwrap(), outer);
        resolver.bind(inner);
        assert_eq!(resolver.resolve("n", &at(3)).unwrap(), inner);
    }

    #[test]
    fn undeclared_names_report_their_location() {
        let resolver = Resolver::new();
        let error = resolver.resolve("missing", &at(9)).unwrap_err();

        assert_eq!(error.to_string(), "main.em:9: use of undeclared identifier `missing`");
    }
}
