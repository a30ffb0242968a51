use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{units, unify, Type, TypeResult, TypeVarScope};

// Literal values, also used as runtime values by compiled closures.
// At runtime measures are plain numbers in their base unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    VarRef(String),
    Boolean(bool),
    String(String),
    Measure {
        value: f64,
        unit: String,
    },
    Number(f64),
    Location {
        /// longitude
        x: f64,
        /// latitude
        y: f64,
        #[serde(default)]
        display: Option<String>,
    },
    Date(DateTime<Utc>),
    Time {
        hour: u32,
        minute: u32,
    },
    Entity {
        value: String,
        tag: String,
        #[serde(default)]
        display: Option<String>,
    },
    Enum(String),
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Feed(String),
}

impl Value {
    pub fn string<S: Into<String>>(s: S) -> Self {
        Value::String(s.into())
    }

    pub fn measure<S: Into<String>>(value: f64, unit: S) -> Self {
        Value::Measure {
            value,
            unit: unit.into(),
        }
    }

    pub fn entity<S: Into<String>, T: Into<String>>(value: S, tag: T) -> Self {
        Value::Entity {
            value: value.into(),
            tag: tag.into(),
            display: None,
        }
    }

    /// The type of this literal. Measures report their base unit.
    pub fn type_of(&self) -> TypeResult<Type> {
        let ty = match self {
            Value::VarRef(_) => Type::Any,
            Value::Boolean(_) => Type::Boolean,
            Value::String(_) => Type::String,
            Value::Measure { unit, .. } => Type::measure(unit)?,
            Value::Number(_) => Type::Number,
            Value::Location { .. } => Type::Location,
            Value::Date(_) => Type::Date,
            Value::Time { .. } => Type::Time,
            Value::Entity { tag, .. } => Type::Entity(tag.clone()),
            Value::Enum(value) => Type::Enum(vec![value.clone()]),
            Value::Object(fields) => Type::Object(Some(
                fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), value.type_of()?)))
                    .collect::<TypeResult<BTreeMap<_, _>>>()?,
            )),
            Value::Array(items) => {
                let mut scope = TypeVarScope::new();
                let mut elem = Type::Any;
                for item in items {
                    elem = unify(&elem, &item.type_of()?, &mut scope)?;
                }
                Type::array(elem)
            }
            Value::Feed(_) => Type::entity("tt:feed"),
        };
        Ok(ty)
    }

    /// Converts measures to their base unit. Idempotent.
    pub fn normalize(&self) -> TypeResult<Value> {
        let normalized = match self {
            Value::Measure { value, unit } => {
                let def = units::lookup(unit)
                    .ok_or_else(|| crate::types::TypeError::UnknownUnit(unit.clone()))?;
                Value::Measure {
                    value: def.transform.forward(*value),
                    unit: def.base.to_string(),
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::normalize)
                    .collect::<TypeResult<_>>()?,
            ),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), value.normalize()?)))
                    .collect::<TypeResult<_>>()?,
            ),
            other => other.clone(),
        };
        Ok(normalized)
    }

    /// The representation compiled code operates on.
    pub fn to_runtime(&self) -> Value {
        match self {
            Value::Measure { value, .. } => Value::Number(*value),
            Value::Array(items) => Value::Array(items.iter().map(Value::to_runtime).collect()),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_runtime()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Turns a runtime value back into a literal of type `ty`.
    pub fn from_runtime(value: Value, ty: &Type) -> Value {
        match (value, ty) {
            (Value::Number(n), Type::Measure(unit)) if !unit.is_empty() => Value::Measure {
                value: n,
                unit: unit.clone(),
            },
            (Value::Array(items), Type::Array(elem)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| Value::from_runtime(item, elem))
                    .collect(),
            ),
            (value, _) => value,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Measure { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) | Value::Feed(s) => Some(s),
            Value::Entity { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Runtime equality: entities compare by value, measures by magnitude.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Entity { value: a, .. }, Value::Entity { value: b, .. }) => a == b,
            (Value::Entity { value: a, .. }, Value::String(b))
            | (Value::String(b), Value::Entity { value: a, .. }) => a == b,
            (Value::Enum(a), Value::String(b)) | (Value::String(b), Value::Enum(a)) => a == b,
            (Value::Location { x: x1, y: y1, .. }, Value::Location { x: x2, y: y2, .. }) => {
                x1 == x2 && y1 == y2
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }

    /// Ordering for comparable values. `None` when the values are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (
                Value::Time {
                    hour: h1,
                    minute: m1,
                },
                Value::Time {
                    hour: h2,
                    minute: m2,
                },
            ) => Some((h1, m1).cmp(&(h2, m2))),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => match (self.as_str(), other.as_str()) {
                    (Some(a), Some(b)) => Some(a.cmp(b)),
                    _ => None,
                },
            },
        }
    }

    /// Key used when a value indexes a `Map`.
    pub fn map_key(&self) -> String {
        match self.as_str() {
            Some(s) => s.to_string(),
            None => self.to_string(),
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::VarRef(name) => write!(f, "${}", name),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) | Value::Enum(s) | Value::Feed(s) => write!(f, "{}", s),
            Value::Measure { value, unit } => write!(f, "{}{}", format_number(*value), unit),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Location {
                display: Some(name),
                ..
            } => write!(f, "{}", name),
            Value::Location { x, y, .. } => write!(f, "[Latitude: {:.3}, Longitude: {:.3}]", y, x),
            Value::Date(date) => write!(f, "{}", date.to_rfc3339()),
            Value::Time { hour, minute } => write!(f, "{:02}:{:02}", hour, minute),
            Value::Entity {
                display: Some(display),
                ..
            } => write!(f, "{}", display),
            Value::Entity { value, .. } => write!(f, "{}", value),
            Value::Object(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(name, value)| format!("{}: {}", name, value))
                    .collect();
                write!(f, "{{{}}}", fields.join(", "))
            }
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(Value::to_string).collect();
                write!(f, "{}", items.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Null,
    Constant(Value),
    VarRef(String),
    MemberRef {
        object: Box<Expression>,
        name: String,
    },
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    UnaryOp {
        arg: Box<Expression>,
        opcode: String,
    },
    BinaryOp {
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        opcode: String,
    },
    Tuple(Vec<Expression>),
    Array(Vec<Expression>),
}

impl Expression {
    pub fn var<S: Into<String>>(name: S) -> Self {
        Expression::VarRef(name.into())
    }

    pub fn constant(value: Value) -> Self {
        Expression::Constant(value)
    }

    pub fn call<S: Into<String>>(name: S, args: Vec<Expression>) -> Self {
        Expression::FunctionCall {
            name: name.into(),
            args,
        }
    }

    pub fn binary<S: Into<String>>(lhs: Expression, opcode: S, rhs: Expression) -> Self {
        Expression::BinaryOp {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            opcode: opcode.into(),
        }
    }

    pub fn unary<S: Into<String>>(opcode: S, arg: Expression) -> Self {
        Expression::UnaryOp {
            arg: Box::new(arg),
            opcode: opcode.into(),
        }
    }

    pub fn member<S: Into<String>>(object: Expression, name: S) -> Self {
        Expression::MemberRef {
            object: Box::new(object),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
}

// how an invocation names the device it talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selector {
    GlobalName(String),
    Attributes(Vec<Attribute>),
    Builtin,
    /// Internal: addresses the keywords of a compute module.
    ComputeModule(String),
    Id(String),
    Any,
}

pub const BUILTIN_KIND: &str = "org.thingpedia.builtin";

impl Selector {
    /// The kind whose schemas describe this selector's channels.
    pub fn kind(&self) -> Option<String> {
        match self {
            Selector::GlobalName(name) | Selector::Id(name) | Selector::ComputeModule(name) => {
                Some(name.clone())
            }
            Selector::Attributes(attrs) => attrs
                .iter()
                .find(|attr| attr.name == "type")
                .and_then(|attr| attr.value.as_str())
                .map(str::to_string),
            Selector::Builtin => Some(BUILTIN_KIND.to_string()),
            Selector::Any => None,
        }
    }

    /// Whether the kind has to be fetched from the schema store.
    pub fn is_remote(&self) -> bool {
        !matches!(
            self,
            Selector::Builtin | Selector::ComputeModule(_) | Selector::Any
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Triggers,
    Queries,
    Actions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub selector: Selector,
    pub name: String,
    pub params: Vec<Expression>,
}

// one clause of a trigger, query or action sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RulePart {
    Invocation(Invocation),
    Binding { name: String, expr: Expression },
    BuiltinPredicate(Expression),
    Condition(Expression),
}

impl RulePart {
    pub fn invocation<S: Into<String>>(selector: Selector, name: S, params: Vec<Expression>) -> Self {
        RulePart::Invocation(Invocation {
            selector,
            name: name.into(),
            params,
        })
    }

    pub fn binding<S: Into<String>>(name: S, expr: Expression) -> Self {
        RulePart::Binding {
            name: name.into(),
            expr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    ComputeModule {
        name: String,
        statements: Vec<Statement>,
    },
    VarDecl {
        name: String,
        ty: Type,
    },
    Rule {
        trigger: Vec<RulePart>,
        queries: Vec<Vec<RulePart>>,
        actions: Vec<RulePart>,
    },
    Command {
        queries: Vec<Vec<RulePart>>,
        actions: Vec<RulePart>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramParam {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ProgramParam>,
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new<S: Into<String>>(name: S, statements: Vec<Statement>) -> Self {
        Self {
            name: name.into(),
            params: vec![],
            statements,
        }
    }

    pub fn with_param<S: Into<String>>(mut self, name: S, ty: Type) -> Self {
        self.params.push(ProgramParam {
            name: name.into(),
            ty,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_normalization_is_idempotent() {
        let value = Value::measure(212.0, "F");
        let once = value.normalize().unwrap();
        assert_eq!(once, Value::measure(100.0, "C"));
        assert_eq!(once.normalize().unwrap(), once);
        assert!(Value::measure(1.0, "furlong").normalize().is_err());
    }

    #[test]
    fn test_type_of() {
        assert_eq!(
            Value::measure(5.0, "km").type_of().unwrap(),
            Type::Measure("m".to_string())
        );
        assert_eq!(
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])
                .type_of()
                .unwrap(),
            Type::array(Type::Number)
        );
        assert_eq!(
            Value::Array(vec![]).type_of().unwrap(),
            Type::array(Type::Any)
        );
        assert!(Value::Array(vec![Value::Number(1.0), Value::string("a")])
            .type_of()
            .is_err());
    }

    #[test]
    fn test_runtime_conversion() {
        let literal = Value::measure(2.0, "km").normalize().unwrap();
        let runtime = literal.to_runtime();
        assert_eq!(runtime, Value::Number(2000.0));
        assert_eq!(
            Value::from_runtime(runtime, &Type::Measure("m".to_string())),
            literal
        );
    }

    #[test]
    fn test_matches_and_compare() {
        let user = Value::entity("bob", "tt:username");
        assert!(user.matches(&Value::string("bob")));
        assert!(Value::Number(3.0).matches(&Value::measure(3.0, "m")));
        assert_eq!(
            Value::Number(1.0).compare(&Value::Number(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Boolean(true).compare(&Value::Number(1.0)), None);
    }

    #[test]
    fn test_selector_kind() {
        let selector = Selector::Attributes(vec![Attribute {
            name: "type".to_string(),
            value: Value::string("com.twitter"),
        }]);
        assert_eq!(selector.kind(), Some("com.twitter".to_string()));
        assert_eq!(Selector::Any.kind(), None);
        assert!(!Selector::Builtin.is_remote());
    }

    #[test]
    fn test_program_json() {
        let program = Program::new(
            "Test",
            vec![Statement::Command {
                queries: vec![],
                actions: vec![RulePart::invocation(Selector::Builtin, "notify", vec![])],
            }],
        );
        let json = serde_json::to_string(&program).unwrap();
        let parsed: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, program);
    }
}
