//! Channels of the builtin device, resolved without the schema store.

use crate::ast::Section;
use crate::types::Type;

struct BuiltinChannel {
    section: Section,
    name: &'static str,
    args: &'static [&'static str],
    schema: fn() -> Vec<Type>,
}

fn interval_schema() -> Vec<Type> {
    vec![Type::Measure("ms".to_string())]
}

fn time_schema() -> Vec<Type> {
    vec![Type::Time]
}

fn message_schema() -> Vec<Type> {
    vec![Type::String]
}

fn no_params() -> Vec<Type> {
    Vec::new()
}

const CHANNELS: &[BuiltinChannel] = &[
    BuiltinChannel {
        section: Section::Triggers,
        name: "timer",
        args: &["interval"],
        schema: interval_schema,
    },
    BuiltinChannel {
        section: Section::Triggers,
        name: "at",
        args: &["time"],
        schema: time_schema,
    },
    BuiltinChannel {
        section: Section::Actions,
        name: "notify",
        args: &[],
        schema: no_params,
    },
    BuiltinChannel {
        section: Section::Actions,
        name: "return",
        args: &[],
        schema: no_params,
    },
    BuiltinChannel {
        section: Section::Actions,
        name: "logger",
        args: &["message"],
        schema: message_schema,
    },
];

fn find(section: Section, name: &str) -> Option<&'static BuiltinChannel> {
    CHANNELS
        .iter()
        .find(|channel| channel.section == section && channel.name == name)
}

/// The parameter types of a builtin channel.
pub fn schema(section: Section, name: &str) -> Option<Vec<Type>> {
    find(section, name).map(|channel| (channel.schema)())
}

/// The parameter names of a builtin channel.
pub fn arg_names(section: Section, name: &str) -> Option<Vec<String>> {
    find(section, name).map(|channel| channel.args.iter().map(|a| a.to_string()).collect())
}
