pub mod checker;
mod error;
pub mod expression;
pub mod input;
pub mod output;
pub mod scope;

#[cfg(test)]
pub mod tests;

pub use checker::ProgramChecker;
pub use error::{TypeCheckError, TypeCheckResult};
pub use expression::check_expression;
pub use scope::TypeScope;

use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use tracing::{info, instrument};

use crate::ast::{Program, RulePart, Statement};
use crate::schema::SchemaRetriever;
use crate::typed_ast::TypedProgram;

/// ThingTalk Type Checker
///
/// Verification turns a parsed [`Program`] into a [`TypedProgram`] in which
/// every expression carries its resolved type and every operator its
/// resolved overload.
///
/// # Phases
///
/// 1. Every remote kind referenced by an invocation is fetched from the
///    [`SchemaRetriever`]. The fetches are issued concurrently so the
///    retriever coalesces them into a single batch.
/// 2. [`ProgramChecker`] seeds the top scope with program parameters,
///    keywords and compute modules, rejecting any shadowing between them.
/// 3. Each rule or command is checked in its own scope layer:
///    - trigger and query clauses in canonical order (invocation, builtin
///      predicates, bindings, conditions) by [`input::InputChecker`],
///    - actions in source order by [`output::OutputChecker`].
///
/// Verification stops at the first error.
#[instrument(skip_all, fields(program = %program.name))]
pub async fn verify_program(
    program: &Program,
    retriever: &SchemaRetriever,
) -> TypeCheckResult<TypedProgram> {
    let kinds = collect_remote_kinds(program);
    let fetched = join_all(kinds.iter().map(|kind| retriever.get_kind(kind))).await;

    let mut schemas = HashMap::new();
    for (kind, result) in kinds.into_iter().zip(fetched) {
        schemas.insert(kind, result?);
    }

    let typed = ProgramChecker::new(&schemas).check_program(program)?;
    info!(
        kinds = schemas.len(),
        rules = typed.rules.len(),
        keywords = typed.keywords.len(),
        "Program verified"
    );
    Ok(typed)
}

/// Kinds that have to be fetched from the schema store.
pub fn collect_remote_kinds(program: &Program) -> BTreeSet<String> {
    let mut kinds = BTreeSet::new();
    collect_statement_kinds(&program.statements, &mut kinds);
    kinds
}

fn collect_statement_kinds(statements: &[Statement], kinds: &mut BTreeSet<String>) {
    for statement in statements {
        let parts: Vec<&RulePart> = match statement {
            Statement::ComputeModule { statements, .. } => {
                collect_statement_kinds(statements, kinds);
                continue;
            }
            Statement::VarDecl { .. } => continue,
            Statement::Rule {
                trigger,
                queries,
                actions,
            } => trigger
                .iter()
                .chain(queries.iter().flatten())
                .chain(actions)
                .collect(),
            Statement::Command { queries, actions } => {
                queries.iter().flatten().chain(actions).collect()
            }
        };
        for part in parts {
            if let RulePart::Invocation(invocation) = part {
                if invocation.selector.is_remote() {
                    kinds.extend(invocation.selector.kind());
                }
            }
        }
    }
}
