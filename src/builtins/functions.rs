use std::collections::{BTreeMap, HashMap};

use chrono::{TimeZone, Utc};
use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::RegexBuilder;

use super::{arg, env_arg, number_arg, string_arg, Builtin, Overload};
use crate::ast::Value;
use crate::eval::{ExecEnvironment, FormatHint, FormattedOutput, RuntimeError, RuntimeResult};
use crate::types::Type;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn a() -> Type {
    Type::var("a")
}

fn map_kv() -> Type {
    Type::map(Type::var("k"), Type::var("v"))
}

fn measure() -> Type {
    Type::Measure(String::new())
}

fn aggregate(imp: super::NativeImpl) -> Builtin {
    Builtin::pure(vec![
        Overload::new(vec![Type::array(Type::Number)], Type::Number, imp),
        Overload::new(vec![Type::array(measure())], measure(), imp),
    ])
}

fn rounding(imp: super::NativeImpl) -> Builtin {
    Builtin::pure(vec![Overload::new(vec![Type::Number], Type::Number, imp)])
}

lazy_static! {
    pub(crate) static ref FUNCTIONS: HashMap<&'static str, Builtin> = {
        let mut functions = HashMap::new();
        // value, pattern, flags, then capture binders
        functions.insert(
            "regex",
            Builtin::pure(vec![Overload::variadic(
                vec![Type::String, Type::String, Type::String],
                Type::String,
                Type::Boolean,
                regex_match,
            )]),
        );
        functions.insert(
            "contains",
            Builtin::pure(vec![
                Overload::new(vec![Type::array(a()), a()], Type::Boolean, array_contains),
                Overload::new(vec![map_kv(), Type::var("k")], Type::Boolean, map_contains),
            ]),
        );
        functions.insert(
            "distance",
            Builtin::pure(vec![Overload::new(
                vec![Type::Location, Type::Location],
                Type::Measure("m".to_string()),
                distance,
            )]),
        );
        functions.insert(
            "latitude",
            Builtin::pure(vec![Overload::new(vec![Type::Location], Type::Number, latitude)]),
        );
        functions.insert(
            "longitude",
            Builtin::pure(vec![Overload::new(vec![Type::Location], Type::Number, longitude)]),
        );
        functions.insert(
            "makeDate",
            Builtin::pure(vec![Overload::new(
                vec![Type::Number, Type::Number, Type::Number],
                Type::Date,
                make_date,
            )]),
        );
        functions.insert(
            "makeTime",
            Builtin::pure(vec![Overload::new(
                vec![Type::Number, Type::Number],
                Type::Time,
                make_time,
            )]),
        );
        functions.insert(
            "makeLocation",
            Builtin::pure(vec![Overload::new(
                vec![Type::Number, Type::Number],
                Type::Location,
                make_location,
            )]),
        );
        functions.insert(
            "makeEmailAddress",
            Builtin::pure(vec![Overload::new(
                vec![Type::String],
                Type::entity("tt:email_address"),
                make_email_address,
            )]),
        );
        functions.insert(
            "makePhoneNumber",
            Builtin::pure(vec![Overload::new(
                vec![Type::String],
                Type::entity("tt:phone_number"),
                make_phone_number,
            )]),
        );
        functions.insert(
            "emptyMap",
            Builtin::pure(vec![Overload::new(vec![], map_kv(), empty_map)]),
        );
        functions.insert(
            "append",
            Builtin::pure(vec![Overload::new(
                vec![Type::array(a()), a()],
                Type::array(a()),
                append,
            )]),
        );
        functions.insert(
            "remove",
            Builtin::pure(vec![
                Overload::new(vec![Type::array(a()), a()], Type::array(a()), array_remove),
                Overload::new(vec![map_kv(), Type::var("k")], map_kv(), map_remove),
            ]),
        );
        functions.insert(
            "insert",
            Builtin::pure(vec![Overload::new(
                vec![map_kv(), Type::var("k"), Type::var("v")],
                map_kv(),
                map_insert,
            )]),
        );
        functions.insert(
            "lookup",
            Builtin::pure(vec![Overload::new(
                vec![map_kv(), Type::var("k")],
                Type::var("v"),
                map_lookup,
            )]),
        );
        functions.insert(
            "count",
            Builtin::pure(vec![
                Overload::new(vec![Type::array(a())], Type::Number, count),
                Overload::new(vec![map_kv()], Type::Number, count),
            ]),
        );
        functions.insert(
            "concat",
            Builtin::pure(vec![
                Overload::new(
                    vec![Type::array(a()), Type::array(a())],
                    Type::array(a()),
                    concat_arrays,
                ),
                Overload::new(vec![Type::String, Type::String], Type::String, concat_strings),
            ]),
        );
        functions.insert("sum", aggregate(sum));
        functions.insert("avg", aggregate(avg));
        functions.insert("max", aggregate(max));
        functions.insert("min", aggregate(min));
        functions.insert(
            "choice",
            Builtin::impure(vec![Overload::new(vec![Type::array(a())], a(), choice)]),
        );
        functions.insert("floor", rounding(floor));
        functions.insert("ceil", rounding(ceil));
        functions.insert("round", rounding(round));
        functions.insert(
            "random",
            Builtin::with_env(vec![Overload::new(vec![], Type::Number, random)], false),
        );
        functions.insert(
            "now",
            Builtin::with_env(vec![Overload::new(vec![], Type::Date, now)], false),
        );
        functions.insert(
            "toString",
            Builtin::with_env(vec![Overload::new(vec![Type::Any], Type::String, to_string)], true),
        );
        functions.insert(
            "eventToString",
            Builtin::with_env(
                vec![
                    Overload::new(vec![], Type::String, event_to_string),
                    Overload::new(vec![Type::String], Type::String, event_to_string),
                ],
                true,
            ),
        );
        functions.insert(
            "formatMeasure",
            Builtin::with_env(
                vec![Overload::new(
                    vec![measure(), Type::String],
                    Type::String,
                    format_measure,
                )],
                true,
            ),
        );
        functions
    };
}

/// Compiles a ThingTalk regex: `i` in `flags` makes it case-insensitive.
pub fn build_regex(pattern: &str, flags: &str) -> RuntimeResult<regex::Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .build()
        .map_err(|e| RuntimeError::InvalidRegex(e.to_string()))
}

fn regex_match(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let value = string_arg(args, 0, "regex")?;
    let regex = build_regex(string_arg(args, 1, "regex")?, string_arg(args, 2, "regex")?)?;
    Ok(Value::Boolean(regex.is_match(value)))
}

fn array_items<'a>(value: &'a Value, function: &str) -> RuntimeResult<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(RuntimeError::type_mismatch(&format!("Array in {}", function), other)),
    }
}

fn map_entries<'a>(value: &'a Value, function: &str) -> RuntimeResult<&'a BTreeMap<String, Value>> {
    match value {
        Value::Object(entries) => Ok(entries),
        other => Err(RuntimeError::type_mismatch(&format!("Map in {}", function), other)),
    }
}

fn array_contains(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let items = array_items(arg(args, 0, "contains")?, "contains")?;
    let needle = arg(args, 1, "contains")?;
    Ok(Value::Boolean(items.iter().any(|item| item.matches(needle))))
}

fn map_contains(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let entries = map_entries(arg(args, 0, "contains")?, "contains")?;
    let key = arg(args, 1, "contains")?.map_key();
    Ok(Value::Boolean(entries.contains_key(&key)))
}

fn location(value: &Value) -> RuntimeResult<(f64, f64)> {
    match value {
        Value::Location { x, y, .. } => Ok((*y, *x)),
        other => Err(RuntimeError::type_mismatch("Location", other)),
    }
}

// haversine distance in meters
fn distance(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (lat1, lon1) = location(arg(args, 0, "distance")?)?;
    let (lat2, lon2) = location(arg(args, 1, "distance")?)?;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    Ok(Value::Number(2.0 * EARTH_RADIUS_M * h.sqrt().asin()))
}

fn latitude(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(location(arg(args, 0, "latitude")?)?.0))
}

fn longitude(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(location(arg(args, 0, "longitude")?)?.1))
}

fn make_date(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let year = number_arg(args, 0, "makeDate")? as i32;
    let month = number_arg(args, 1, "makeDate")? as u32;
    let day = number_arg(args, 2, "makeDate")? as u32;
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .map(Value::Date)
        .ok_or_else(|| RuntimeError::native("makeDate", format!("invalid date {}-{}-{}", year, month, day)))
}

fn make_time(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let hour = number_arg(args, 0, "makeTime")?;
    let minute = number_arg(args, 1, "makeTime")?;
    if !(0.0..24.0).contains(&hour) || !(0.0..60.0).contains(&minute) {
        return Err(RuntimeError::native(
            "makeTime",
            format!("invalid time {}:{}", hour, minute),
        ));
    }
    Ok(Value::Time {
        hour: hour as u32,
        minute: minute as u32,
    })
}

fn make_location(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Location {
        y: number_arg(args, 0, "makeLocation")?,
        x: number_arg(args, 1, "makeLocation")?,
        display: None,
    })
}

fn make_email_address(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let address = string_arg(args, 0, "makeEmailAddress")?;
    Ok(Value::entity(address, "tt:email_address"))
}

fn make_phone_number(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let number = string_arg(args, 0, "makePhoneNumber")?;
    Ok(Value::entity(number, "tt:phone_number"))
}

fn empty_map(_: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Object(BTreeMap::new()))
}

fn append(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let mut items = array_items(arg(args, 0, "append")?, "append")?.to_vec();
    items.push(arg(args, 1, "append")?.clone());
    Ok(Value::Array(items))
}

fn array_remove(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let needle = arg(args, 1, "remove")?;
    let items = array_items(arg(args, 0, "remove")?, "remove")?
        .iter()
        .filter(|item| !item.matches(needle))
        .cloned()
        .collect();
    Ok(Value::Array(items))
}

fn map_remove(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let mut entries = map_entries(arg(args, 0, "remove")?, "remove")?.clone();
    entries.remove(&arg(args, 1, "remove")?.map_key());
    Ok(Value::Object(entries))
}

fn map_insert(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let mut entries = map_entries(arg(args, 0, "insert")?, "insert")?.clone();
    entries.insert(
        arg(args, 1, "insert")?.map_key(),
        arg(args, 2, "insert")?.clone(),
    );
    Ok(Value::Object(entries))
}

fn map_lookup(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let entries = map_entries(arg(args, 0, "lookup")?, "lookup")?;
    let key = arg(args, 1, "lookup")?.map_key();
    entries
        .get(&key)
        .cloned()
        .ok_or(RuntimeError::MissingProperty(key))
}

fn count(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    match arg(args, 0, "count")? {
        Value::Array(items) => Ok(Value::Number(items.len() as f64)),
        Value::Object(entries) => Ok(Value::Number(entries.len() as f64)),
        other => Err(RuntimeError::type_mismatch("Array or Map", other)),
    }
}

fn concat_arrays(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let mut items = array_items(arg(args, 0, "concat")?, "concat")?.to_vec();
    items.extend_from_slice(array_items(arg(args, 1, "concat")?, "concat")?);
    Ok(Value::Array(items))
}

fn concat_strings(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::String(format!(
        "{}{}",
        string_arg(args, 0, "concat")?,
        string_arg(args, 1, "concat")?
    )))
}

fn numbers(args: &[Value], function: &str) -> RuntimeResult<Vec<f64>> {
    array_items(arg(args, 0, function)?, function)?
        .iter()
        .map(|item| {
            item.as_number()
                .ok_or_else(|| RuntimeError::type_mismatch("Number", item))
        })
        .collect()
}

fn sum(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(numbers(args, "sum")?.iter().sum()))
}

fn avg(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let values = numbers(args, "avg")?;
    if values.is_empty() {
        return Err(RuntimeError::native("avg", "empty array"));
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn max(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    numbers(args, "max")?
        .into_iter()
        .reduce(f64::max)
        .map(Value::Number)
        .ok_or_else(|| RuntimeError::native("max", "empty array"))
}

fn min(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    numbers(args, "min")?
        .into_iter()
        .reduce(f64::min)
        .map(Value::Number)
        .ok_or_else(|| RuntimeError::native("min", "empty array"))
}

fn choice(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    array_items(arg(args, 0, "choice")?, "choice")?
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| RuntimeError::native("choice", "empty array"))
}

fn floor(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(number_arg(args, 0, "floor")?.floor()))
}

fn ceil(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(number_arg(args, 0, "ceil")?.ceil()))
}

fn round(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(number_arg(args, 0, "round")?.round()))
}

fn random(_: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(rand::random::<f64>()))
}

fn now(_: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Date(Utc::now()))
}

fn to_string(args: &[Value], env: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let env = env_arg(env, "toString")?;
    Ok(Value::String(env.format_value(arg(args, 0, "toString")?)))
}

fn event_to_string(args: &[Value], env: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let env = env_arg(env, "eventToString")?;
    let hint = match args.first() {
        Some(value) => value
            .as_str()
            .and_then(|s| s.parse::<FormatHint>().ok())
            .unwrap_or(FormatHint::String),
        None => FormatHint::String,
    };
    let text = match env.format_event(hint)? {
        FormattedOutput::Text(text) => text,
        FormattedOutput::Messages(chunks) => chunks
            .iter()
            .map(|chunk| format!("{:?}", chunk))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    Ok(Value::String(text))
}

fn format_measure(args: &[Value], env: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let env = env_arg(env, "formatMeasure")?;
    let value = number_arg(args, 0, "formatMeasure")?;
    let unit = string_arg(args, 1, "formatMeasure")?;
    Ok(Value::String(env.format_measure(value, unit)?))
}
