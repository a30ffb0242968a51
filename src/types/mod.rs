//! The ThingTalk type system.
//!
//! Types are closed: every channel parameter, literal and expression resolves
//! to one of the [`Type`] variants. Builtin signatures may additionally use
//! [`Type::Var`] to express polymorphism; type variables never survive
//! [`resolve_type_scope`].

pub mod units;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    Any,
    Boolean,
    String,
    Number,
    Entity(String),
    /// The empty unit denotes a measure whose unit is not yet known.
    Measure(String),
    Enum(Vec<String>),
    Array(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Time,
    Date,
    Location,
    /// `None` is a tuple whose shape is not resolved yet.
    Tuple(Option<Vec<Type>>),
    Object(Option<BTreeMap<String, Type>>),
    Module,
    /// Polymorphic type variable, only found in builtin signatures.
    Var(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeError {
    #[error("Cannot unify {lhs} and {rhs}")]
    CannotUnify { lhs: Type, rhs: Type },

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Invalid type string: {0}")]
    InvalidTypeString(String),
}

pub type TypeResult<T> = Result<T, TypeError>;

/// Bindings of type variables to types, extended in place by [`unify`].
pub type TypeVarScope = HashMap<String, Type>;

impl Type {
    /// A measure normalized to its base unit.
    pub fn measure(unit: &str) -> TypeResult<Type> {
        if unit.is_empty() {
            return Ok(Type::Measure(String::new()));
        }
        units::base_unit(unit)
            .map(|base| Type::Measure(base.to_string()))
            .ok_or_else(|| TypeError::UnknownUnit(unit.to_string()))
    }

    pub fn entity(tag: &str) -> Type {
        Type::Entity(tag.to_string())
    }

    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn var(name: &str) -> Type {
        Type::Var(name.to_string())
    }

    pub fn is_measure(&self) -> bool {
        matches!(self, Type::Measure(_))
    }

    /// The element type iterated by `contains`: array elements or map keys.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            Type::Map(key, _) => Some(key),
            _ => None,
        }
    }

    pub fn has_type_vars(&self) -> bool {
        match self {
            Type::Var(_) => true,
            Type::Array(elem) => elem.has_type_vars(),
            Type::Map(key, value) => key.has_type_vars() || value.has_type_vars(),
            Type::Tuple(Some(items)) => items.iter().any(Type::has_type_vars),
            Type::Object(Some(fields)) => fields.values().any(Type::has_type_vars),
            _ => false,
        }
    }
}

/// Computes the most specific type compatible with both `t1` and `t2`,
/// binding type variables in `scope` as a side effect.
pub fn unify(t1: &Type, t2: &Type, scope: &mut TypeVarScope) -> TypeResult<Type> {
    match (t1, t2) {
        (Type::Var(a), Type::Var(b)) => {
            let bound_a = scope.get(a).cloned();
            let bound_b = scope.get(b).cloned();
            match (bound_a, bound_b) {
                (Some(x), Some(y)) => {
                    let unified = unify(&x, &y, scope)?;
                    scope.insert(a.clone(), unified.clone());
                    scope.insert(b.clone(), unified.clone());
                    Ok(unified)
                }
                (Some(x), None) => {
                    scope.insert(b.clone(), x.clone());
                    Ok(x)
                }
                (None, Some(y)) => {
                    scope.insert(a.clone(), y.clone());
                    Ok(y)
                }
                (None, None) => {
                    if a != b {
                        scope.insert(a.clone(), Type::Var(b.clone()));
                    }
                    Ok(Type::Var(b.clone()))
                }
            }
        }
        (Type::Var(name), other) | (other, Type::Var(name)) => match scope.get(name).cloned() {
            Some(bound) => {
                let unified = unify(&bound, other, scope)?;
                scope.insert(name.clone(), unified.clone());
                Ok(unified)
            }
            None => {
                scope.insert(name.clone(), other.clone());
                Ok(other.clone())
            }
        },
        _ => unify_concrete(t1, t2, scope),
    }
}

fn unify_concrete(t1: &Type, t2: &Type, scope: &mut TypeVarScope) -> TypeResult<Type> {
    if t1 == t2 {
        return Ok(t1.clone());
    }
    let cannot_unify = || TypeError::CannotUnify {
        lhs: t1.clone(),
        rhs: t2.clone(),
    };

    match (t1, t2) {
        (Type::Any, other) | (other, Type::Any) => Ok(other.clone()),

        (Type::Measure(u1), Type::Measure(_)) if u1.is_empty() => Ok(t2.clone()),
        (Type::Measure(_), Type::Measure(u2)) if u2.is_empty() => Ok(t1.clone()),

        (Type::Object(None), Type::Object(_)) => Ok(t2.clone()),
        (Type::Object(_), Type::Object(None)) => Ok(t1.clone()),
        (Type::Object(Some(f1)), Type::Object(Some(f2))) => {
            if f1.len() != f2.len() || f1.keys().any(|k| !f2.contains_key(k)) {
                return Err(cannot_unify());
            }
            let mut fields = BTreeMap::new();
            for (name, ty) in f1 {
                fields.insert(name.clone(), unify(ty, &f2[name], scope)?);
            }
            Ok(Type::Object(Some(fields)))
        }

        (Type::Tuple(None), Type::Tuple(_)) => Ok(t2.clone()),
        (Type::Tuple(_), Type::Tuple(None)) => Ok(t1.clone()),
        (Type::Tuple(Some(s1)), Type::Tuple(Some(s2))) if s1.len() == s2.len() => {
            let items = s1
                .iter()
                .zip(s2)
                .map(|(a, b)| unify(a, b, scope))
                .collect::<TypeResult<Vec<_>>>()?;
            Ok(Type::Tuple(Some(items)))
        }

        // an enum literal carries only its own entry
        (Type::Enum(e1), Type::Enum(e2)) => {
            let sub = e1.iter().all(|e| e2.contains(e));
            let sup = e2.iter().all(|e| e1.contains(e));
            if sub && sup {
                // same entries, possibly reordered
                let mut entries = e1.clone();
                entries.sort();
                entries.dedup();
                Ok(Type::Enum(entries))
            } else if sub {
                Ok(t2.clone())
            } else if sup {
                Ok(t1.clone())
            } else {
                Err(cannot_unify())
            }
        }

        (Type::Array(e1), Type::Array(e2)) => Ok(Type::array(unify(e1, e2, scope)?)),
        (Type::Map(k1, v1), Type::Map(k2, v2)) => {
            let key = unify(k1, k2, scope)?;
            let value = unify(v1, v2, scope)?;
            Ok(Type::map(key, value))
        }

        // Enum and Entity literals used to be written as plain strings
        (Type::Enum(_), Type::String) | (Type::String, Type::Enum(_)) => {
            let resolved = if matches!(t1, Type::Enum(_)) { t1 } else { t2 };
            warn!("Using String for {} is deprecated", resolved);
            Ok(resolved.clone())
        }
        (Type::Entity(_), Type::String) | (Type::String, Type::Entity(_)) => {
            let resolved = if matches!(t1, Type::Entity(_)) { t1 } else { t2 };
            warn!("Using String for {} is deprecated", resolved);
            Ok(resolved.clone())
        }

        _ => Err(cannot_unify()),
    }
}

/// Substitutes bound type variables; unbound variables become `Any`.
pub fn resolve_type_scope(ty: &Type, scope: &TypeVarScope) -> Type {
    resolve_with_depth(ty, scope, 0)
}

// variables can be bound to other variables; cap the chain
const MAX_RESOLVE_DEPTH: usize = 32;

fn resolve_with_depth(ty: &Type, scope: &TypeVarScope, depth: usize) -> Type {
    if depth > MAX_RESOLVE_DEPTH {
        return Type::Any;
    }
    match ty {
        Type::Var(name) => match scope.get(name) {
            Some(Type::Var(other)) if other == name => Type::Any,
            Some(bound) => resolve_with_depth(bound, scope, depth + 1),
            None => Type::Any,
        },
        Type::Array(elem) => Type::array(resolve_with_depth(elem, scope, depth + 1)),
        Type::Map(key, value) => Type::map(
            resolve_with_depth(key, scope, depth + 1),
            resolve_with_depth(value, scope, depth + 1),
        ),
        Type::Tuple(Some(items)) => Type::Tuple(Some(
            items
                .iter()
                .map(|item| resolve_with_depth(item, scope, depth + 1))
                .collect(),
        )),
        Type::Object(Some(fields)) => Type::Object(Some(
            fields
                .iter()
                .map(|(name, field)| (name.clone(), resolve_with_depth(field, scope, depth + 1)))
                .collect(),
        )),
        _ => ty.clone(),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Any => write!(f, "Any"),
            Type::Boolean => write!(f, "Boolean"),
            Type::String => write!(f, "String"),
            Type::Number => write!(f, "Number"),
            Type::Entity(tag) => write!(f, "Entity({})", tag),
            Type::Measure(unit) => write!(f, "Measure({})", unit),
            Type::Enum(entries) => write!(f, "Enum({})", entries.join(",")),
            Type::Array(elem) => write!(f, "Array({})", elem),
            Type::Map(key, value) => write!(f, "Map({},{})", key, value),
            Type::Time => write!(f, "Time"),
            Type::Date => write!(f, "Date"),
            Type::Location => write!(f, "Location"),
            Type::Tuple(None) => write!(f, "Tuple"),
            Type::Tuple(Some(items)) => {
                let items: Vec<String> = items.iter().map(Type::to_string).collect();
                write!(f, "({})", items.join(","))
            }
            Type::Object(None) => write!(f, "Object"),
            Type::Object(Some(fields)) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(name, ty)| format!("{}:{}", name, ty))
                    .collect();
                write!(f, "Object{{{}}}", fields.join(","))
            }
            Type::Module => write!(f, "Module"),
            Type::Var(name) => write!(f, "{}", name),
        }
    }
}

impl From<Type> for String {
    fn from(ty: Type) -> Self {
        ty.to_string()
    }
}

impl TryFrom<String> for Type {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Type {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TypeParser { input: s, pos: 0 };
        let ty = parser.parse_type()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(parser.error());
        }
        Ok(ty)
    }
}

struct TypeParser<'a> {
    input: &'a str,
    pos: usize,
}

impl TypeParser<'_> {
    fn error(&self) -> TypeError {
        TypeError::InvalidTypeString(self.input.to_string())
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.rest().chars().next()
    }

    fn expect(&mut self, c: char) -> TypeResult<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn identifier(&mut self) -> TypeResult<&str> {
        self.skip_whitespace();
        let len = self
            .rest()
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.error());
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.input[start..self.pos])
    }

    /// Raw text up to the closing parenthesis, consumed along with it.
    fn raw_argument(&mut self) -> TypeResult<String> {
        self.expect('(')?;
        let len = self.rest().find(')').ok_or_else(|| self.error())?;
        let raw = self.rest()[..len].trim().to_string();
        self.pos += len + 1;
        Ok(raw)
    }

    fn type_list(&mut self, close: char) -> TypeResult<Vec<Type>> {
        let mut items = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_type()?);
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error()),
            }
        }
    }

    fn object_fields(&mut self) -> TypeResult<BTreeMap<String, Type>> {
        self.expect('{')?;
        let mut fields = BTreeMap::new();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(fields);
        }
        loop {
            let name = self.identifier()?.to_string();
            self.expect(':')?;
            fields.insert(name, self.parse_type()?);
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(fields);
                }
                _ => return Err(self.error()),
            }
        }
    }

    fn parse_type(&mut self) -> TypeResult<Type> {
        if self.peek() == Some('(') {
            self.pos += 1;
            return Ok(Type::Tuple(Some(self.type_list(')')?)));
        }

        let head = self.identifier()?.to_string();
        let ty = match head.as_str() {
            "Any" => Type::Any,
            "Boolean" | "Bool" => Type::Boolean,
            "String" => Type::String,
            "Number" => Type::Number,
            "Date" => Type::Date,
            "Time" => Type::Time,
            "Location" => Type::Location,
            "Module" => Type::Module,
            "EmailAddress" => Type::entity("tt:email_address"),
            "PhoneNumber" => Type::entity("tt:phone_number"),
            "Picture" => Type::entity("tt:picture"),
            "URL" => Type::entity("tt:url"),
            "Username" => Type::entity("tt:username"),
            "Hashtag" => Type::entity("tt:hashtag"),
            "Measure" => {
                let unit = self.raw_argument()?;
                Type::measure(&unit)?
            }
            "Entity" => Type::Entity(self.raw_argument()?),
            "Enum" => {
                let raw = self.raw_argument()?;
                Type::Enum(raw.split(',').map(|e| e.trim().to_string()).collect())
            }
            "Array" => {
                self.expect('(')?;
                let elem = self.parse_type()?;
                self.expect(')')?;
                Type::array(elem)
            }
            "Map" => {
                self.expect('(')?;
                let key = self.parse_type()?;
                self.expect(',')?;
                let value = self.parse_type()?;
                self.expect(')')?;
                Type::map(key, value)
            }
            "Tuple" => {
                if self.peek() == Some('(') {
                    self.pos += 1;
                    Type::Tuple(Some(self.type_list(')')?))
                } else {
                    Type::Tuple(None)
                }
            }
            "Object" => {
                if self.peek() == Some('{') {
                    Type::Object(Some(self.object_fields()?))
                } else {
                    Type::Object(None)
                }
            }
            _ => return Err(self.error()),
        };
        Ok(ty)
    }
}
