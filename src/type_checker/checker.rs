use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{Program, RulePart, Section, Selector, Statement, BUILTIN_KIND};
use crate::builtins::channels;
use crate::schema::{KindSchemas, SchemaError};
use crate::typed_ast::{ChannelRef, TypedProgram, TypedRule, TypedRulePart};
use crate::types::Type;
use crate::visitor::{visit_rule_parts, VisitOrder};

use super::input::InputChecker;
use super::output::OutputChecker;
use super::scope::{TypeScope, VarKind};
use super::{TypeCheckError, TypeCheckResult};

/// Synchronous part of verification. All schemas the program references
/// must have been fetched beforehand.
pub struct ProgramChecker<'s> {
    pub(super) scope: TypeScope,
    schemas: &'s HashMap<String, Arc<KindSchemas>>,
    /// Declared keywords by qualified cell name.
    pub(super) keywords: BTreeMap<String, Type>,
    /// Bare keyword names of each compute module.
    modules: BTreeMap<String, Vec<String>>,
    next_rule_id: usize,
}

impl<'s> ProgramChecker<'s> {
    pub fn new(schemas: &'s HashMap<String, Arc<KindSchemas>>) -> Self {
        Self {
            scope: TypeScope::new(),
            schemas,
            keywords: BTreeMap::new(),
            modules: BTreeMap::new(),
            next_rule_id: 0,
        }
    }

    pub fn check_program(mut self, program: &Program) -> TypeCheckResult<TypedProgram> {
        for param in &program.params {
            self.scope
                .declare(&param.name, param.ty.clone(), VarKind::Param)?;
        }
        self.declare_top_level(&program.statements)?;
        self.declare_module_keywords(&program.statements)?;

        let mut rules = Vec::new();
        for statement in &program.statements {
            match statement {
                Statement::ComputeModule { name, statements } => {
                    for inner in statements {
                        if let Some(rule) = self.check_statement(inner, Some(name))? {
                            rules.push(rule);
                        }
                    }
                }
                other => {
                    if let Some(rule) = self.check_statement(other, None)? {
                        rules.push(rule);
                    }
                }
            }
        }

        Ok(TypedProgram {
            name: program.name.clone(),
            params: program.params.clone(),
            keywords: self.keywords,
            rules,
        })
    }

    // keywords and module names share the namespace of program parameters
    fn declare_top_level(&mut self, statements: &[Statement]) -> TypeCheckResult<()> {
        for statement in statements {
            match statement {
                Statement::VarDecl { name, ty } => {
                    self.scope.declare(
                        name,
                        ty.clone(),
                        VarKind::Keyword { cell: name.clone() },
                    )?;
                    self.keywords.insert(name.clone(), ty.clone());
                }
                Statement::ComputeModule { name, .. } => {
                    self.scope.declare(name, Type::Module, VarKind::Module)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_module_keywords(&mut self, statements: &[Statement]) -> TypeCheckResult<()> {
        for statement in statements {
            let Statement::ComputeModule { name, statements } = statement else {
                continue;
            };
            let mut names = Vec::new();
            for inner in statements {
                match inner {
                    Statement::VarDecl { name: var, ty } => {
                        // module rules see the bare name, which must not shadow
                        if self.scope.contains(var) || names.contains(var) {
                            return Err(TypeCheckError::DuplicateDeclaration(var.clone()));
                        }
                        names.push(var.clone());
                        self.keywords.insert(format!("{}.{}", name, var), ty.clone());
                    }
                    Statement::ComputeModule { name: nested, .. } => {
                        return Err(TypeCheckError::invalid_rule_part(format!(
                            "compute module {} cannot be nested in {}",
                            nested, name
                        )));
                    }
                    _ => {}
                }
            }
            self.modules.insert(name.clone(), names);
        }
        Ok(())
    }

    fn check_statement(
        &mut self,
        statement: &Statement,
        module: Option<&String>,
    ) -> TypeCheckResult<Option<TypedRule>> {
        let (trigger, queries, actions) = match statement {
            Statement::Rule {
                trigger,
                queries,
                actions,
            } => (Some(trigger), queries, actions),
            Statement::Command { queries, actions } => (None, queries, actions),
            Statement::VarDecl { .. } | Statement::ComputeModule { .. } => return Ok(None),
        };

        self.scope.enter_scope();
        let result = self.check_rule(trigger, queries, actions, module);
        self.scope.exit_scope();
        result.map(Some)
    }

    fn check_rule(
        &mut self,
        trigger: Option<&Vec<RulePart>>,
        queries: &[Vec<RulePart>],
        actions: &[RulePart],
        module: Option<&String>,
    ) -> TypeCheckResult<TypedRule> {
        if let Some(module) = module {
            let names = self.modules.get(module).cloned().unwrap_or_default();
            for var in names {
                let cell = format!("{}.{}", module, var);
                let ty = self.keywords.get(&cell).cloned().unwrap_or(Type::Any);
                self.scope.declare(&var, ty, VarKind::Keyword { cell })?;
            }
        }

        let id = self.next_rule_id;
        self.next_rule_id += 1;

        let trigger = match trigger {
            Some(parts) => Some(self.check_input(parts, Section::Triggers)?),
            None => None,
        };
        let queries = queries
            .iter()
            .map(|parts| self.check_input(parts, Section::Queries))
            .collect::<TypeCheckResult<Vec<_>>>()?;
        let actions = visit_rule_parts(&mut OutputChecker::new(self), actions, VisitOrder::Source)?;

        debug!(
            rule = id,
            locals = self.scope.current_names().count(),
            "Rule verified"
        );
        Ok(TypedRule {
            id,
            module: module.cloned(),
            trigger,
            queries,
            actions,
        })
    }

    fn check_input(&mut self, parts: &[RulePart], section: Section) -> TypeCheckResult<Vec<TypedRulePart>> {
        let invocations = parts
            .iter()
            .filter(|part| matches!(part, RulePart::Invocation(_)))
            .count();
        if invocations != 1 {
            return Err(TypeCheckError::invalid_rule_part(format!(
                "{} clause must contain exactly one invocation, found {}",
                section, invocations
            )));
        }
        visit_rule_parts(
            &mut InputChecker::new(self, section),
            parts,
            VisitOrder::Canonical,
        )
    }

    /// Resolves an invocation to its descriptor and a private copy of its schema.
    pub(super) fn channel_schema(
        &self,
        selector: &Selector,
        name: &str,
        section: Section,
    ) -> TypeCheckResult<(ChannelRef, Vec<Type>)> {
        let unknown_channel = |kind: &str| SchemaError::UnknownChannel {
            kind: kind.to_string(),
            section,
            name: name.to_string(),
        };

        let (kind, schema) = match selector {
            Selector::Any => {
                return Err(TypeCheckError::UnresolvableSelector("*".to_string()));
            }
            Selector::Builtin => {
                let schema =
                    channels::schema(section, name).ok_or_else(|| unknown_channel(BUILTIN_KIND))?;
                (BUILTIN_KIND.to_string(), schema)
            }
            Selector::ComputeModule(module) => {
                let cell = format!("{}.{}", module, name);
                let ty = self
                    .keywords
                    .get(&cell)
                    .ok_or_else(|| unknown_channel(module))?;
                (module.clone(), vec![ty.clone()])
            }
            other => {
                let kind = other
                    .kind()
                    .ok_or_else(|| TypeCheckError::UnresolvableSelector(format!("{:?}", other)))?;
                let schemas = self
                    .schemas
                    .get(&kind)
                    .ok_or_else(|| SchemaError::UnknownKind(kind.clone()))?;
                let schema = schemas.channel(&kind, section, name)?.schema.clone();
                (kind, schema)
            }
        };

        let channel = ChannelRef {
            selector: selector.clone(),
            kind,
            channel: name.to_string(),
            section,
        };
        Ok((channel, schema))
    }
}
