use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument};

use crate::ast::{Program, ProgramParam};
use crate::const_prop;
use crate::schema::SchemaRetriever;
use crate::type_checker::verify_program;
use crate::typed_ast::{TypedAction, TypedProgram, TypedRule};
use crate::types::Type;
use crate::visitor::{walk_rule_part, ExpressionVisitor, KeywordReadCollector};

use super::input::{compile_clause, CompiledInvocation, CompiledQuery, EventSource, RuleFilter};
use super::output::{compile_action, CompiledOutput, OutputTarget};
use super::{CompileResult, CompileScope};

/// What the engine needs before it can run the queries of a rule.
#[derive(Debug, Clone)]
pub struct CompiledInputs {
    /// The trigger to subscribe to; `None` for commands.
    pub invocation: Option<CompiledInvocation>,
    /// Run on each trigger event; binds the event and applies the trigger
    /// clause. Empty for commands.
    pub caller: RuleFilter,
    /// Keyword cells read by the trigger and query clauses.
    pub keywords: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: usize,
    pub module: Option<String>,
    pub inputs: CompiledInputs,
    pub queries: Vec<CompiledQuery>,
    pub outputs: Vec<CompiledOutput>,
    /// Keyword cells read anywhere in the rule, actions included.
    pub keywords: BTreeSet<String>,
}

impl CompiledRule {
    pub fn is_command(&self) -> bool {
        self.inputs.invocation.is_none()
    }

    /// One line describing the rule, as `trigger => queries => outputs`.
    pub fn summary(&self) -> String {
        let mut stages = vec![match &self.inputs.invocation {
            Some(trigger) => trigger.channel.to_string(),
            None => "now".to_string(),
        }];
        stages.extend(
            self.queries
                .iter()
                .map(|query| query.invocation.channel.to_string()),
        );
        let outputs: Vec<String> = self
            .outputs
            .iter()
            .map(|output| match &output.target {
                OutputTarget::Invocation(channel) => channel.to_string(),
                OutputTarget::Keyword(name) => format!("{} :=", name),
            })
            .collect();
        stages.push(outputs.join(", "));

        let mut summary = format!("rule {}", self.id);
        if let Some(module) = &self.module {
            summary.push_str(&format!(" in {}", module));
        }
        summary.push_str(&format!(": {}", stages.join(" => ")));
        if !self.keywords.is_empty() {
            let keywords: Vec<&str> = self.keywords.iter().map(String::as_str).collect();
            summary.push_str(&format!(" (reads {})", keywords.join(", ")));
        }
        summary
    }
}

/// The executable form of a program, handed to the engine.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub name: String,
    pub params: Vec<ProgramParam>,
    /// Declared keywords by qualified cell name.
    pub keywords: BTreeMap<String, Type>,
    pub rules: Vec<CompiledRule>,
}

impl CompiledProgram {
    pub fn commands(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(|rule| rule.is_command())
    }

    pub fn triggered_rules(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter().filter(|rule| !rule.is_command())
    }
}

/// Verifies, folds and compiles `program`.
#[instrument(skip_all, fields(program = %program.name))]
pub async fn compile_program(
    program: &Program,
    retriever: &SchemaRetriever,
) -> CompileResult<CompiledProgram> {
    let typed = verify_program(program, retriever).await?;
    let folded = const_prop::fold_program(typed);
    compile_typed_program(&folded)
}

pub fn compile_typed_program(program: &TypedProgram) -> CompileResult<CompiledProgram> {
    let rules = program
        .rules
        .iter()
        .map(|rule| compile_rule(rule, &program.params))
        .collect::<CompileResult<Vec<_>>>()?;
    for rule in &rules {
        info!(summary = %rule.summary(), "Compiled rule");
    }
    info!(
        program = %program.name,
        rules = rules.len(),
        keywords = program.keywords.len(),
        "Program compiled"
    );
    Ok(CompiledProgram {
        name: program.name.clone(),
        params: program.params.clone(),
        keywords: program.keywords.clone(),
        rules,
    })
}

/// Compiles one rule, threading a single scope through trigger, queries
/// and actions.
pub fn compile_rule(rule: &TypedRule, params: &[ProgramParam]) -> CompileResult<CompiledRule> {
    let mut scope = CompileScope::with_params(params);
    let mut reads = KeywordReadCollector::default();

    let (invocation, caller) = match &rule.trigger {
        Some(parts) => {
            for part in parts {
                walk_rule_part(&mut reads, part);
            }
            let (invocation, filter) = compile_clause(parts, EventSource::Trigger, &mut scope)?;
            (Some(invocation), filter)
        }
        None => (None, RuleFilter::new()),
    };

    let mut queries = Vec::with_capacity(rule.queries.len());
    for parts in &rule.queries {
        for part in parts {
            walk_rule_part(&mut reads, part);
        }
        let (invocation, filter) = compile_clause(parts, EventSource::Query, &mut scope)?;
        queries.push(CompiledQuery { invocation, filter });
    }
    let input_keywords = reads.keywords.clone();

    let mut outputs = Vec::with_capacity(rule.actions.len());
    for action in &rule.actions {
        match action {
            TypedAction::Invocation { params, .. } => {
                for param in params.iter().flatten() {
                    reads.visit_expression(param);
                }
            }
            TypedAction::Keyword { expr, .. } => reads.visit_expression(expr),
        }
        outputs.push(compile_action(action, &scope)?);
    }

    debug!(
        rule = rule.id,
        scope = ?scope.names().collect::<Vec<_>>(),
        "Rule scope after compilation"
    );
    Ok(CompiledRule {
        id: rule.id,
        module: rule.module.clone(),
        inputs: CompiledInputs {
            invocation,
            caller,
            keywords: input_keywords,
        },
        queries,
        outputs,
        keywords: reads.keywords,
    })
}
