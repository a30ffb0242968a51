//! Typed overload tables for operators and builtin functions.
//!
//! Resolution walks the overloads of a name in declaration order and picks
//! the first one whose arity fits and whose parameters all unify with the
//! actual argument types. Each attempt starts from an empty type-variable
//! scope so a failed attempt cannot leak bindings into the next one.

pub mod channels;
pub mod functions;
pub mod ops;

use std::fmt;

use crate::ast::Value;
use crate::eval::{ExecEnvironment, RuntimeResult};
use crate::types::{resolve_type_scope, unify, Type, TypeVarScope};

/// A native implementation. The environment is only passed to builtins that
/// declare `pass_env`.
pub type NativeImpl = fn(&[Value], Option<&ExecEnvironment>) -> RuntimeResult<Value>;

pub struct Overload {
    pub params: Vec<Type>,
    /// Type of any trailing arguments beyond `params`.
    pub variadic: Option<Type>,
    pub ret: Type,
    pub imp: NativeImpl,
}

impl Overload {
    pub fn new(params: Vec<Type>, ret: Type, imp: NativeImpl) -> Self {
        Self {
            params,
            variadic: None,
            ret,
            imp,
        }
    }

    pub fn variadic(params: Vec<Type>, rest: Type, ret: Type, imp: NativeImpl) -> Self {
        Self {
            params,
            variadic: Some(rest),
            ret,
            imp,
        }
    }

    pub fn accepts_arity(&self, n: usize) -> bool {
        match self.variadic {
            Some(_) => n >= self.params.len(),
            None => n == self.params.len(),
        }
    }

    fn param(&self, index: usize) -> Option<&Type> {
        self.params.get(index).or(self.variadic.as_ref())
    }
}

pub struct Builtin {
    pub overloads: Vec<Overload>,
    pub pure: bool,
    pub pass_env: bool,
}

impl Builtin {
    pub fn pure(overloads: Vec<Overload>) -> Self {
        Self {
            overloads,
            pure: true,
            pass_env: false,
        }
    }

    pub fn with_env(overloads: Vec<Overload>, pure: bool) -> Self {
        Self {
            overloads,
            pure,
            pass_env: true,
        }
    }

    pub fn impure(overloads: Vec<Overload>) -> Self {
        Self {
            overloads,
            pure: false,
            pass_env: false,
        }
    }
}

/// The overload chosen for one operator or call site.
#[derive(Clone, Copy)]
pub struct ResolvedOp {
    pub name: &'static str,
    pub overload: usize,
    pub imp: NativeImpl,
    pub pure: bool,
    pub pass_env: bool,
}

impl ResolvedOp {
    pub fn invoke(&self, args: &[Value], env: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
        let env = if self.pass_env { env } else { None };
        (self.imp)(args, env)
    }

    /// Whether calls with constant arguments can be evaluated at compile time.
    pub fn is_foldable(&self) -> bool {
        self.pure && !self.pass_env
    }
}

impl PartialEq for ResolvedOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.overload == other.overload
    }
}

impl fmt::Debug for ResolvedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOp")
            .field("name", &self.name)
            .field("overload", &self.overload)
            .field("pure", &self.pure)
            .field("pass_env", &self.pass_env)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub op: ResolvedOp,
    /// Parameter types after unification, one per actual argument.
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveFailure {
    /// No overload takes this many arguments.
    Arity,
    /// Some overload takes this many arguments but none unifies.
    NoMatch,
}

/// Resolves `args` against the overloads of `builtin`, registered as `name`.
pub fn resolve(
    name: &'static str,
    builtin: &Builtin,
    args: &[Type],
) -> Result<Resolution, ResolveFailure> {
    let mut arity_ok = false;
    for (index, overload) in builtin.overloads.iter().enumerate() {
        if !overload.accepts_arity(args.len()) {
            continue;
        }
        arity_ok = true;
        if let Some((params, ret)) = try_overload(overload, args) {
            return Ok(Resolution {
                op: ResolvedOp {
                    name,
                    overload: index,
                    imp: overload.imp,
                    pure: builtin.pure,
                    pass_env: builtin.pass_env,
                },
                params,
                ret,
            });
        }
    }
    Err(if arity_ok {
        ResolveFailure::NoMatch
    } else {
        ResolveFailure::Arity
    })
}

fn try_overload(overload: &Overload, args: &[Type]) -> Option<(Vec<Type>, Type)> {
    let mut scope = TypeVarScope::new();
    // all unit-polymorphic measures of one overload share a unit
    let mut unit: Option<String> = None;
    let mut params = Vec::with_capacity(args.len());

    for (index, actual) in args.iter().enumerate() {
        let formal = overload.param(index)?;
        let unified = unify(formal, actual, &mut scope).ok()?;
        let mut units = Vec::new();
        collect_units(formal, &unified, &mut units);
        for found in units {
            match &unit {
                Some(existing) if *existing != found => return None,
                Some(_) => {}
                None => unit = Some(found),
            }
        }
        params.push(unified);
    }

    let params = params
        .iter()
        .map(|param| resolve_type_scope(param, &scope))
        .collect();
    let ret = resolve_type_scope(&overload.ret, &scope);
    let ret = match (ret, unit) {
        (Type::Measure(u), Some(unit)) if u.is_empty() => Type::Measure(unit),
        (ret, _) => ret,
    };
    Some((params, ret))
}

// units bound by the empty-unit measures inside `formal`
fn collect_units(formal: &Type, actual: &Type, out: &mut Vec<String>) {
    match (formal, actual) {
        (Type::Measure(formal_unit), Type::Measure(actual_unit))
            if formal_unit.is_empty() && !actual_unit.is_empty() =>
        {
            out.push(actual_unit.clone())
        }
        (Type::Array(f), Type::Array(a)) => collect_units(f, a, out),
        (Type::Map(fk, fv), Type::Map(ak, av)) => {
            collect_units(fk, ak, out);
            collect_units(fv, av, out);
        }
        _ => {}
    }
}

/// Looks up a binary operator by opcode.
pub fn binary_op(opcode: &str) -> Option<(&'static str, &'static Builtin)> {
    ops::BINARY_OPS.get_key_value(opcode).map(|(k, v)| (*k, v))
}

/// Looks up a unary operator by opcode.
pub fn unary_op(opcode: &str) -> Option<(&'static str, &'static Builtin)> {
    ops::UNARY_OPS.get_key_value(opcode).map(|(k, v)| (*k, v))
}

/// Looks up a builtin function by name.
pub fn function(name: &str) -> Option<(&'static str, &'static Builtin)> {
    functions::FUNCTIONS.get_key_value(name).map(|(k, v)| (*k, v))
}

// shared argument accessors for the native implementations

pub(crate) fn arg<'a>(args: &'a [Value], index: usize, function: &str) -> RuntimeResult<&'a Value> {
    args.get(index)
        .ok_or_else(|| crate::eval::RuntimeError::native(function, format!("missing argument {}", index)))
}

pub(crate) fn number_arg(args: &[Value], index: usize, function: &str) -> RuntimeResult<f64> {
    let value = arg(args, index, function)?;
    value
        .as_number()
        .ok_or_else(|| crate::eval::RuntimeError::type_mismatch("Number", value))
}

pub(crate) fn string_arg<'a>(args: &'a [Value], index: usize, function: &str) -> RuntimeResult<&'a str> {
    let value = arg(args, index, function)?;
    value
        .as_str()
        .ok_or_else(|| crate::eval::RuntimeError::type_mismatch("String", value))
}

pub(crate) fn bool_arg(args: &[Value], index: usize, function: &str) -> RuntimeResult<bool> {
    let value = arg(args, index, function)?;
    value
        .as_bool()
        .ok_or_else(|| crate::eval::RuntimeError::type_mismatch("Boolean", value))
}

pub(crate) fn env_arg<'a>(env: Option<&'a ExecEnvironment>, function: &str) -> RuntimeResult<&'a ExecEnvironment> {
    env.ok_or_else(|| crate::eval::RuntimeError::native(function, "requires an environment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(unit: &str) -> Type {
        Type::Measure(unit.to_string())
    }

    #[test]
    fn test_first_matching_overload_wins() {
        let (name, builtin) = binary_op("+").unwrap();
        let numbers = resolve(name, builtin, &[Type::Number, Type::Number]).unwrap();
        assert_eq!(numbers.op.overload, 0);
        assert_eq!(numbers.ret, Type::Number);

        let strings = resolve(name, builtin, &[Type::String, Type::String]).unwrap();
        assert_eq!(strings.ret, Type::String);
        assert_ne!(strings.op, numbers.op);
    }

    #[test]
    fn test_measure_operands_share_a_unit() {
        let (name, builtin) = binary_op("+").unwrap();
        let resolved = resolve(name, builtin, &[m("C"), m("C")]).unwrap();
        assert_eq!(resolved.ret, m("C"));
        assert_eq!(
            resolve(name, builtin, &[m("C"), m("m")]),
            Err(ResolveFailure::NoMatch)
        );
    }

    #[test]
    fn test_failed_attempt_does_not_leak_bindings() {
        fn noop(_: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
            Ok(Value::Boolean(true))
        }
        // the first overload binds `a` to Number before failing on the
        // second argument; the second overload must start fresh
        let builtin = Builtin::pure(vec![
            Overload::new(vec![Type::var("a"), Type::Boolean], Type::Boolean, noop),
            Overload::new(vec![Type::Number, Type::var("a")], Type::var("a"), noop),
        ]);
        let resolved = resolve("probe", &builtin, &[Type::Number, Type::String]).unwrap();
        assert_eq!(resolved.op.overload, 1);
        assert_eq!(resolved.ret, Type::String);

        let (name, builtin) = function("contains").unwrap();
        let map = Type::map(Type::String, Type::Number);
        let resolved = resolve(name, builtin, &[map.clone(), Type::String]).unwrap();
        assert_eq!(resolved.op.overload, 1);
        assert_eq!(resolved.params, vec![map, Type::String]);
    }

    #[test]
    fn test_type_variables_resolve_in_return_type() {
        let (name, builtin) = function("lookup").unwrap();
        let resolved = resolve(
            name,
            builtin,
            &[Type::map(Type::String, Type::Date), Type::String],
        )
        .unwrap();
        assert_eq!(resolved.ret, Type::Date);

        let (name, builtin) = function("emptyMap").unwrap();
        let resolved = resolve(name, builtin, &[]).unwrap();
        assert_eq!(resolved.ret, Type::map(Type::Any, Type::Any));
    }

    #[test]
    fn test_arity_failures() {
        let (name, builtin) = unary_op("!").unwrap();
        assert_eq!(
            resolve(name, builtin, &[Type::Boolean, Type::Boolean]),
            Err(ResolveFailure::Arity)
        );
        assert_eq!(
            resolve(name, builtin, &[Type::Number]),
            Err(ResolveFailure::NoMatch)
        );
    }

    #[test]
    fn test_variadic_regex() {
        let (name, builtin) = function("regex").unwrap();
        let args = vec![Type::String; 5];
        let resolved = resolve(name, builtin, &args).unwrap();
        assert_eq!(resolved.ret, Type::Boolean);
        assert_eq!(resolve(name, builtin, &args[..2]), Err(ResolveFailure::Arity));
    }

    #[test]
    fn test_env_builtins_are_not_foldable() {
        let (name, builtin) = function("now").unwrap();
        let resolved = resolve(name, builtin, &[]).unwrap();
        assert!(!resolved.op.is_foldable());
        let (name, builtin) = function("floor").unwrap();
        let resolved = resolve(name, builtin, &[Type::Number]).unwrap();
        assert!(resolved.op.is_foldable());
    }
}
