//! The fully typed program produced by verification.
//!
//! Verification never mutates the parsed [`Program`](crate::ast::Program);
//! it builds this parallel tree in which every expression carries its
//! resolved type and every operator its resolved native implementation.

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{ProgramParam, Section, Selector, Value};
use crate::builtins::ResolvedOp;
use crate::types::Type;

/// Describes one channel invocation: which device, which channel, which section.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRef {
    pub selector: Selector,
    pub kind: String,
    pub channel: String,
    pub section: Section,
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}.{}", self.kind, self.channel)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpression {
    pub ty: Type,
    pub kind: TypedExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedExprKind {
    Constant(Value),
    VarRef(String),
    /// Read of a persisted keyword cell, by qualified cell name.
    KeywordRef(String),
    MemberRef {
        object: Box<TypedExpression>,
        name: String,
    },
    FunctionCall {
        op: ResolvedOp,
        args: Vec<TypedExpression>,
    },
    UnaryOp {
        op: ResolvedOp,
        arg: Box<TypedExpression>,
    },
    BinaryOp {
        op: ResolvedOp,
        lhs: Box<TypedExpression>,
        rhs: Box<TypedExpression>,
    },
    Tuple(Vec<TypedExpression>),
    Array(Vec<TypedExpression>),
}

impl TypedExpression {
    pub fn new(ty: Type, kind: TypedExprKind) -> Self {
        Self { ty, kind }
    }

    pub fn constant(value: Value, ty: Type) -> Self {
        Self::new(ty, TypedExprKind::Constant(value))
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            TypedExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }
}

/// A position that either introduces a new variable or constrains an existing value.
#[derive(Debug, Clone, PartialEq)]
pub enum Binder {
    Declare { name: String, ty: Type },
    Expr(TypedExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedInvocation {
    pub channel: ChannelRef,
    /// One slot per schema parameter; `None` leaves the parameter unconstrained.
    pub params: Vec<Option<Binder>>,
    /// Private copy of the channel schema, narrowed by unification.
    pub schema: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedPredicate {
    Regex {
        value: TypedExpression,
        pattern: TypedExpression,
        flags: TypedExpression,
        captures: Vec<Binder>,
    },
    Contains {
        container: TypedExpression,
        element: Binder,
    },
    Call(TypedExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedRulePart {
    Invocation(TypedInvocation),
    Binding {
        name: String,
        expr: TypedExpression,
    },
    BuiltinPredicate(TypedPredicate),
    Condition(TypedExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedAction {
    Invocation {
        channel: ChannelRef,
        params: Vec<Option<TypedExpression>>,
    },
    Keyword {
        name: String,
        expr: TypedExpression,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedRule {
    pub id: usize,
    /// Enclosing compute module, if any.
    pub module: Option<String>,
    /// `None` for commands.
    pub trigger: Option<Vec<TypedRulePart>>,
    pub queries: Vec<Vec<TypedRulePart>>,
    pub actions: Vec<TypedAction>,
}

impl TypedRule {
    pub fn is_command(&self) -> bool {
        self.trigger.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedProgram {
    pub name: String,
    pub params: Vec<ProgramParam>,
    /// Declared keywords by qualified cell name.
    pub keywords: BTreeMap<String, Type>,
    pub rules: Vec<TypedRule>,
}
