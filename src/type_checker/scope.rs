use std::collections::BTreeMap;

use crate::types::Type;

use super::{TypeCheckError, TypeCheckResult};

/// What a name in scope refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum VarKind {
    /// Declared program parameter.
    Param,
    /// Persisted keyword, stored in the engine under `cell`.
    Keyword { cell: String },
    /// Compute module namespace.
    Module,
    /// Introduced by an invocation, a binding or a predicate binder.
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub ty: Type,
    pub kind: VarKind,
}

/// Manages name scopes for type checking.
///
/// The outermost layer holds program parameters, keywords and modules; each
/// rule pushes a layer of its own so that its locals disappear once the rule
/// has been checked.
#[derive(Debug, Clone)]
pub struct TypeScope {
    scopes: Vec<TypeScopeLayer>,
}

/// Single layer in the scope stack
#[derive(Debug, Clone, Default)]
pub struct TypeScopeLayer {
    pub entries: BTreeMap<String, ScopeEntry>,
}

impl Default for TypeScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeScope {
    /// Create a new scope with an initial global layer
    pub fn new() -> Self {
        Self {
            scopes: vec![TypeScopeLayer::default()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(TypeScopeLayer::default());
    }

    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Look up a name, searching from innermost to outermost layer
    pub fn get(&self, name: &str) -> Option<&ScopeEntry> {
        self.scopes
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(name))
    }

    pub fn get_type(&self, name: &str) -> Option<&Type> {
        self.get(name).map(|entry| &entry.ty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Declares a new name in the innermost layer. Names are unique across
    /// all visible layers, so shadowing is an error.
    pub fn declare(&mut self, name: &str, ty: Type, kind: VarKind) -> TypeCheckResult<()> {
        if self.contains(name) {
            return Err(TypeCheckError::DuplicateDeclaration(name.to_string()));
        }
        if let Some(layer) = self.scopes.last_mut() {
            layer
                .entries
                .insert(name.to_string(), ScopeEntry { ty, kind });
        }
        Ok(())
    }

    /// Replaces the type of a visible name, in the layer that declares it.
    pub fn refine(&mut self, name: &str, ty: Type) {
        if let Some(entry) = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|layer| layer.entries.get_mut(name))
        {
            entry.ty = ty;
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Names declared in the innermost layer
    pub fn current_names(&self) -> impl Iterator<Item = &str> {
        self.scopes
            .last()
            .into_iter()
            .flat_map(|layer| layer.entries.keys().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_basics() {
        let mut scope = TypeScope::new();
        assert_eq!(scope.depth(), 1);

        scope.declare("p", Type::Number, VarKind::Param).unwrap();
        assert!(scope.contains("p"));
        assert!(!scope.contains("x"));

        scope.enter_scope();
        assert_eq!(scope.depth(), 2);
        scope.declare("x", Type::String, VarKind::Local).unwrap();
        assert!(scope.contains("p")); // outer layer visible
        assert_eq!(scope.get_type("x"), Some(&Type::String));
        assert_eq!(scope.current_names().collect::<Vec<_>>(), vec!["x"]);

        scope.exit_scope();
        assert_eq!(scope.depth(), 1);
        assert!(scope.contains("p"));
        assert!(!scope.contains("x"));

        // the global layer is never popped
        scope.exit_scope();
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_shadowing_is_rejected() {
        let mut scope = TypeScope::new();
        scope
            .declare(
                "count",
                Type::Number,
                VarKind::Keyword {
                    cell: "count".to_string(),
                },
            )
            .unwrap();
        scope.enter_scope();
        assert_eq!(
            scope.declare("count", Type::Number, VarKind::Local),
            Err(TypeCheckError::DuplicateDeclaration("count".to_string()))
        );
    }

    #[test]
    fn test_refine_updates_declaring_layer() {
        let mut scope = TypeScope::new();
        scope
            .declare("t", Type::Measure(String::new()), VarKind::Local)
            .unwrap();
        scope.enter_scope();
        scope.refine("t", Type::Measure("C".to_string()));
        scope.exit_scope();
        assert_eq!(scope.get_type("t"), Some(&Type::Measure("C".to_string())));
    }
}
