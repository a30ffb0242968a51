//! Compilation of trigger and query clauses.
//!
//! A clause compiles to a [`RuleFilter`]: an AND-chain of steps. Each step
//! takes one environment and yields the environments that continue, none
//! when the step rejects, several when it fans out (`contains` over a
//! collection). [`Matches`] walks the chain depth first, so the engine can
//! stop after any match.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::debug;

use crate::ast::Value;
use crate::builtins::functions::build_regex;
use crate::eval::{EventFrame, ExecEnvironment, RuntimeError, RuntimeResult};
use crate::typed_ast::{
    Binder, ChannelRef, TypedExpression, TypedInvocation, TypedPredicate, TypedRulePart,
};

use super::expression::{compile_expression, CompiledExpr};
use super::{CompileError, CompileResult, CompileScope};

/// Environments that continue past one step.
pub type Alternatives = Box<dyn Iterator<Item = RuntimeResult<ExecEnvironment>> + Send>;

pub type StepFn = Arc<dyn Fn(ExecEnvironment) -> Alternatives + Send + Sync>;

fn pass(env: ExecEnvironment) -> Alternatives {
    Box::new(std::iter::once(Ok(env)))
}

fn reject() -> Alternatives {
    Box::new(std::iter::empty())
}

fn fail(error: RuntimeError) -> Alternatives {
    Box::new(std::iter::once(Err(error)))
}

fn settle(result: RuntimeResult<Option<ExecEnvironment>>) -> Alternatives {
    match result {
        Ok(Some(env)) => pass(env),
        Ok(None) => reject(),
        Err(error) => fail(error),
    }
}

fn expect_bool(value: Value) -> RuntimeResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| RuntimeError::type_mismatch("Boolean", &value))
}

/// An AND-chain of compiled clause steps.
#[derive(Clone, Default)]
pub struct RuleFilter {
    steps: Vec<StepFn>,
}

impl fmt::Debug for RuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleFilter")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl RuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: StepFn) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every environment that passes all steps, starting from `env`.
    pub fn matches(&self, env: ExecEnvironment) -> Matches {
        Matches {
            steps: self.steps.clone(),
            stack: vec![(0, pass(env))],
        }
    }

    pub fn first_match(&self, env: ExecEnvironment) -> RuntimeResult<Option<ExecEnvironment>> {
        self.matches(env).next().transpose()
    }
}

/// Depth-first iterator over the environments accepted by a [`RuleFilter`].
pub struct Matches {
    steps: Vec<StepFn>,
    /// Pending alternatives, with the index of the step they feed.
    stack: Vec<(usize, Alternatives)>,
}

impl Iterator for Matches {
    type Item = RuntimeResult<ExecEnvironment>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (depth, alternatives) = self.stack.last_mut()?;
            let depth = *depth;
            match alternatives.next() {
                None => {
                    self.stack.pop();
                }
                Some(Err(error)) => return Some(Err(error)),
                Some(Ok(env)) => match self.steps.get(depth) {
                    None => return Some(Ok(env)),
                    Some(step) => {
                        let next = step(env);
                        self.stack.push((depth + 1, next));
                    }
                },
            }
        }
    }
}

/// Where a clause finds the event its invocation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Trigger,
    Query,
}

impl EventSource {
    fn frame(self, env: &ExecEnvironment) -> RuntimeResult<EventFrame> {
        let frame = match self {
            EventSource::Trigger => env.trigger_event(),
            EventSource::Query => env.query_event(),
        };
        frame.cloned().ok_or(RuntimeError::NoEvent)
    }
}

/// The invocation of a trigger or query clause.
#[derive(Clone)]
pub struct CompiledInvocation {
    pub channel: ChannelRef,
    /// Values known before the channel fires, one slot per parameter. For
    /// triggers these are the filters handed to the dispatcher.
    pub inputs: Vec<Option<CompiledExpr>>,
    /// Parameters copied from the event into new variables.
    pub assigned: Vec<(usize, String)>,
    /// Parameters that read the event itself and are compared once it arrives.
    pub post_checked: Vec<usize>,
}

impl fmt::Debug for CompiledInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<bool> = self.inputs.iter().map(Option::is_some).collect();
        f.debug_struct("CompiledInvocation")
            .field("channel", &self.channel)
            .field("inputs", &inputs)
            .field("assigned", &self.assigned)
            .field("post_checked", &self.post_checked)
            .finish()
    }
}

impl CompiledInvocation {
    pub fn evaluate_inputs(&self, env: &ExecEnvironment) -> RuntimeResult<Vec<Option<Value>>> {
        self.inputs
            .iter()
            .map(|input| input.as_ref().map(|expr| expr(env)).transpose())
            .collect()
    }
}

/// A compiled query: its invocation and the filter run on each result.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub invocation: CompiledInvocation,
    pub filter: RuleFilter,
}

/// Compiles one trigger or query clause, declaring its names in `scope`.
pub fn compile_clause(
    parts: &[TypedRulePart],
    source: EventSource,
    scope: &mut CompileScope,
) -> CompileResult<(CompiledInvocation, RuleFilter)> {
    let mut invocation = None;
    let mut filter = RuleFilter::new();
    for part in parts {
        match part {
            TypedRulePart::Invocation(typed) => {
                if invocation.is_some() {
                    return Err(CompileError::internal("clause with more than one invocation"));
                }
                let (compiled, step) = compile_invocation(typed, source, scope)?;
                invocation = Some(compiled);
                filter.push(step);
            }
            TypedRulePart::Binding { name, expr } => {
                let compiled = compile_expression(expr, scope)?;
                scope.declare(name, expr.ty.clone());
                let name = name.clone();
                filter.push(Arc::new(move |mut env| match compiled(&env) {
                    Ok(value) => {
                        env.set_var(&name, value);
                        pass(env)
                    }
                    Err(error) => fail(error),
                }));
            }
            TypedRulePart::Condition(expr) | TypedRulePart::BuiltinPredicate(TypedPredicate::Call(expr)) => {
                filter.push(condition(compile_expression(expr, scope)?));
            }
            TypedRulePart::BuiltinPredicate(TypedPredicate::Regex {
                value,
                pattern,
                flags,
                captures,
            }) => {
                let step = compile_regex(value, pattern, flags, captures, scope)?;
                filter.push(step);
            }
            TypedRulePart::BuiltinPredicate(TypedPredicate::Contains { container, element }) => {
                let step = compile_contains(container, element, scope)?;
                filter.push(step);
            }
        }
    }
    let invocation =
        invocation.ok_or_else(|| CompileError::internal("clause without an invocation"))?;
    Ok((invocation, filter))
}

fn condition(compiled: CompiledExpr) -> StepFn {
    Arc::new(move |env| match compiled(&env).and_then(expect_bool) {
        Ok(true) => pass(env),
        Ok(false) => reject(),
        Err(error) => fail(error),
    })
}

/// Classifies the parameters of an invocation and builds the step that
/// binds its event.
///
/// A parameter that compiles against the scope before the invocation is an
/// input. One that reads names the invocation itself declares can only be
/// checked once the event has arrived.
fn compile_invocation(
    invocation: &TypedInvocation,
    source: EventSource,
    scope: &mut CompileScope,
) -> CompileResult<(CompiledInvocation, StepFn)> {
    let before = scope.clone();
    let mut inputs = Vec::with_capacity(invocation.params.len());
    let mut assigned = Vec::new();
    let mut deferred = Vec::new();

    for (index, param) in invocation.params.iter().enumerate() {
        match param {
            None => inputs.push(None),
            Some(Binder::Declare { name, ty }) => {
                scope.declare(name, ty.clone());
                assigned.push((index, name.clone()));
                inputs.push(None);
            }
            Some(Binder::Expr(expr)) => match compile_expression(expr, &before) {
                Ok(compiled) => inputs.push(Some(compiled)),
                Err(CompileError::UnknownVariable(_)) => {
                    deferred.push((index, expr));
                    inputs.push(None);
                }
                Err(error) => return Err(error),
            },
        }
    }

    let post_checks = deferred
        .into_iter()
        .map(|(index, expr)| Ok((index, compile_expression(expr, scope)?)))
        .collect::<CompileResult<Vec<_>>>()?;
    debug!(
        channel = %invocation.channel,
        inputs = inputs.iter().filter(|input| input.is_some()).count(),
        assigned = assigned.len(),
        post_checked = post_checks.len(),
        "Compiled invocation"
    );

    let compiled = CompiledInvocation {
        channel: invocation.channel.clone(),
        inputs,
        assigned: assigned.clone(),
        post_checked: post_checks.iter().map(|(index, _)| *index).collect(),
    };

    let step: StepFn = Arc::new(move |env| {
        settle(bind_event(env, source, &assigned, &post_checks))
    });
    Ok((compiled, step))
}

fn bind_event(
    mut env: ExecEnvironment,
    source: EventSource,
    assigned: &[(usize, String)],
    post_checks: &[(usize, CompiledExpr)],
) -> RuntimeResult<Option<ExecEnvironment>> {
    let frame = source.frame(&env)?;
    for (index, name) in assigned {
        env.set_var(name, frame.get(*index)?.clone());
    }
    for (index, check) in post_checks {
        if !check(&env)?.matches(frame.get(*index)?) {
            return Ok(None);
        }
    }
    Ok(Some(env))
}

enum RegexSource {
    Static {
        pattern: String,
        flags: String,
        cache: OnceLock<RuntimeResult<Regex>>,
    },
    Dynamic {
        pattern: CompiledExpr,
        flags: CompiledExpr,
    },
}

impl RegexSource {
    fn regex(&self, env: &ExecEnvironment) -> RuntimeResult<Cow<'_, Regex>> {
        match self {
            RegexSource::Static {
                pattern,
                flags,
                cache,
            } => match cache.get_or_init(|| build_regex(pattern, flags)) {
                Ok(regex) => Ok(Cow::Borrowed(regex)),
                Err(error) => Err(error.clone()),
            },
            RegexSource::Dynamic { pattern, flags } => {
                let pattern = pattern(env)?;
                let flags = flags(env)?;
                let regex = build_regex(text_of(&pattern)?, text_of(&flags)?)?;
                Ok(Cow::Owned(regex))
            }
        }
    }
}

fn text_of(value: &Value) -> RuntimeResult<&str> {
    value
        .as_str()
        .ok_or_else(|| RuntimeError::type_mismatch("String", value))
}

enum CaptureBinder {
    Declare(String),
    Expect(CompiledExpr),
}

fn compile_regex(
    value: &TypedExpression,
    pattern: &TypedExpression,
    flags: &TypedExpression,
    captures: &[Binder],
    scope: &mut CompileScope,
) -> CompileResult<StepFn> {
    let value = compile_expression(value, scope)?;
    let source = match (
        pattern.as_constant().and_then(Value::as_str),
        flags.as_constant().and_then(Value::as_str),
    ) {
        (Some(pattern), Some(flags)) => RegexSource::Static {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
            cache: OnceLock::new(),
        },
        _ => RegexSource::Dynamic {
            pattern: compile_expression(pattern, scope)?,
            flags: compile_expression(flags, scope)?,
        },
    };

    let before = scope.clone();
    let mut binders = Vec::with_capacity(captures.len());
    for capture in captures {
        match capture {
            Binder::Declare { name, ty } => {
                scope.declare(name, ty.clone());
                binders.push(CaptureBinder::Declare(name.clone()));
            }
            Binder::Expr(expr) => {
                binders.push(CaptureBinder::Expect(compile_expression(expr, &before)?));
            }
        }
    }

    Ok(Arc::new(move |env| {
        let result = (|| -> RuntimeResult<Option<ExecEnvironment>> {
            let text = value(&env)?;
            let regex = source.regex(&env)?;
            let Some(groups) = regex.captures(text_of(&text)?) else {
                return Ok(None);
            };
            let captured: Vec<Value> = (1..=binders.len())
                .map(|group| {
                    Value::string(groups.get(group).map(|m| m.as_str()).unwrap_or_default())
                })
                .collect();
            let mut env = env.clone();
            for (binder, value) in binders.iter().zip(captured) {
                match binder {
                    CaptureBinder::Declare(name) => env.set_var(name, value),
                    CaptureBinder::Expect(expected) => {
                        if !expected(&env)?.matches(&value) {
                            return Ok(None);
                        }
                    }
                }
            }
            Ok(Some(env))
        })();
        settle(result)
    }))
}

fn compile_contains(
    container: &TypedExpression,
    element: &Binder,
    scope: &mut CompileScope,
) -> CompileResult<StepFn> {
    let container = compile_expression(container, scope)?;
    match element {
        Binder::Declare { name, ty } => {
            scope.declare(name, ty.clone());
            let name = name.clone();
            Ok(Arc::new(move |env| {
                let items = match container(&env) {
                    Ok(Value::Array(items)) => items,
                    Ok(Value::Object(entries)) => entries.into_keys().map(Value::String).collect(),
                    Ok(other) => return fail(RuntimeError::type_mismatch("Array or Map", &other)),
                    Err(error) => return fail(error),
                };
                let name = name.clone();
                // one continuation per element
                Box::new(items.into_iter().map(move |item| {
                    let mut branch = env.clone();
                    branch.set_var(&name, item);
                    Ok(branch)
                }))
            }))
        }
        Binder::Expr(expr) => {
            let needle = compile_expression(expr, scope)?;
            Ok(Arc::new(move |env| {
                let found = (|| -> RuntimeResult<bool> {
                    match container(&env)? {
                        Value::Array(items) => {
                            let needle = needle(&env)?;
                            Ok(items.iter().any(|item| item.matches(&needle)))
                        }
                        Value::Object(entries) => Ok(entries.contains_key(&needle(&env)?.map_key())),
                        other => Err(RuntimeError::type_mismatch("Array or Map", &other)),
                    }
                })();
                match found {
                    Ok(true) => pass(env),
                    Ok(false) => reject(),
                    Err(error) => fail(error),
                }
            }))
        }
    }
}
