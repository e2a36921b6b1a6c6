//! Variable store: one global table plus a stack of local scopes.
//!
//! A local scope is pushed for every active user function or callback and
//! popped when it returns.  Lookups see the innermost local scope first and
//! then the globals; outer function scopes are never visible.

use std::collections::HashMap;

use crate::script::error::ErrorKind;
use crate::script::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub constant: bool,
}

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
}

/// The declaring keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclScope {
    /// Local inside a function unless a global of that name exists.
    Dim,
    Local,
    Global,
}

#[derive(Debug, Default)]
pub struct VarStore {
    globals: HashMap<String, Variable>,
    locals: Vec<HashMap<String, Variable>>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self) {
        self.locals.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.locals.pop();
    }

    pub fn in_function(&self) -> bool {
        !self.locals.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<(&Variable, Scope)> {
        if let Some(v) = self.locals.last().and_then(|l| l.get(name)) {
            return Some((v, Scope::Local));
        }
        self.globals.get(name).map(|v| (v, Scope::Global))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Variable> {
        if let Some(local) = self.locals.last_mut() {
            if local.contains_key(name) {
                return local.get_mut(name);
            }
        }
        self.globals.get_mut(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.lookup(name).map(|(v, _)| &v.value)
    }

    /// Innermost local scope only.
    pub fn get_local(&self, name: &str) -> Option<&Value> {
        self.locals.last()?.get(name).map(|v| &v.value)
    }

    pub fn scope_of(&self, name: &str) -> Option<Scope> {
        self.lookup(name).map(|(_, s)| s)
    }

    /// Create (or re-create) a variable.  Re-declaring a constant fails.
    pub fn declare(
        &mut self,
        name: &str,
        value: Value,
        constant: bool,
        decl: DeclScope,
    ) -> Result<Scope, ErrorKind> {
        let scope = match decl {
            DeclScope::Global => Scope::Global,
            _ if !self.in_function() => Scope::Global,
            DeclScope::Local => Scope::Local,
            DeclScope::Dim => {
                let local = self.locals.last().is_some_and(|l| l.contains_key(name));
                if !local && self.globals.contains_key(name) {
                    Scope::Global
                } else {
                    Scope::Local
                }
            }
        };
        let table = match (scope, self.locals.last_mut()) {
            (Scope::Local, Some(local)) => local,
            _ => &mut self.globals,
        };
        if table.get(name).is_some_and(|v| v.constant) {
            return Err(ErrorKind::AssignToConstant(name.to_owned()));
        }
        table.insert(name.to_owned(), Variable { value, constant });
        Ok(scope)
    }

    /// Overwrite an existing variable.  `Ok(false)` when it is not declared.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<bool, ErrorKind> {
        match self.lookup_mut(name) {
            None => Ok(false),
            Some(v) if v.constant => Err(ErrorKind::AssignToConstant(name.to_owned())),
            Some(v) => {
                v.value = value;
                Ok(true)
            }
        }
    }

    /// `$name[subs] = value`.
    pub fn set_element(&mut self, name: &str, subs: &[usize], value: Value) -> Result<(), ErrorKind> {
        let var = self
            .lookup_mut(name)
            .ok_or_else(|| ErrorKind::UndeclaredVariable(name.to_owned()))?;
        if var.constant {
            return Err(ErrorKind::AssignToConstant(name.to_owned()));
        }
        match &mut var.value {
            Value::Array(a) => a.set(subs, value),
            _ => Err(ErrorKind::NotAnArray),
        }
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), Variable { value, constant: false });
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name).map(|v| &v.value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Array;

    #[test]
    fn top_level_declarations_are_global() {
        let mut vars = VarStore::new();
        assert_eq!(vars.declare("X", Value::Int32(1), false, DeclScope::Local), Ok(Scope::Global));
        assert_eq!(vars.global("X"), Some(&Value::Int32(1)));
    }

    #[test]
    fn locals_shadow_and_vanish() {
        let mut vars = VarStore::new();
        vars.set_global("X", Value::from("global"));
        vars.push_scope();
        vars.declare("X", Value::from("local"), false, DeclScope::Local).unwrap();
        assert_eq!(vars.get("X"), Some(&Value::from("local")));
        assert_eq!(vars.scope_of("X"), Some(Scope::Local));
        vars.pop_scope();
        assert_eq!(vars.get("X"), Some(&Value::from("global")));
    }

    #[test]
    fn outer_function_scopes_are_invisible() {
        let mut vars = VarStore::new();
        vars.push_scope();
        vars.declare("SECRET", Value::Int32(1), false, DeclScope::Local).unwrap();
        vars.push_scope();
        assert_eq!(vars.get("SECRET"), None);
    }

    #[test]
    fn dim_reuses_existing_global() {
        let mut vars = VarStore::new();
        vars.set_global("G", Value::Int32(1));
        vars.push_scope();
        assert_eq!(vars.declare("G", Value::Int32(2), false, DeclScope::Dim), Ok(Scope::Global));
        assert_eq!(vars.declare("L", Value::Int32(3), false, DeclScope::Dim), Ok(Scope::Local));
        vars.pop_scope();
        assert_eq!(vars.global("G"), Some(&Value::Int32(2)));
        assert_eq!(vars.get("L"), None);
    }

    #[test]
    fn constants_are_immutable() {
        let mut vars = VarStore::new();
        vars.declare("PI", Value::Float(3.5), true, DeclScope::Global).unwrap();
        assert_eq!(
            vars.assign("PI", Value::Int32(3)),
            Err(ErrorKind::AssignToConstant("PI".into()))
        );
        assert!(vars.declare("PI", Value::Int32(3), false, DeclScope::Global).is_err());
    }

    #[test]
    fn assign_reports_undeclared() {
        let mut vars = VarStore::new();
        assert_eq!(vars.assign("NOPE", Value::Int32(1)), Ok(false));
    }

    #[test]
    fn element_assignment() {
        let mut vars = VarStore::new();
        vars.set_global("A", Value::from(Array::new(&[3]).unwrap()));
        vars.set_element("A", &[2], Value::Int32(7)).unwrap();
        let a = vars.get("A").and_then(Value::as_array).unwrap();
        assert_eq!(a.get(&[2]), Ok(&Value::Int32(7)));
        vars.set_global("S", Value::from("x"));
        assert_eq!(vars.set_element("S", &[0], Value::Int32(1)), Err(ErrorKind::NotAnArray));
    }
}
