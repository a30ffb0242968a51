use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Duration;
use lazy_static::lazy_static;

use super::{arg, bool_arg, number_arg, string_arg, Builtin, Overload};
use crate::ast::Value;
use crate::eval::{ExecEnvironment, RuntimeError, RuntimeResult};
use crate::types::Type;

fn measure() -> Type {
    Type::Measure(String::new())
}

fn ms() -> Type {
    Type::Measure("ms".to_string())
}

fn comparison(imp: super::NativeImpl) -> Builtin {
    Builtin::pure(vec![
        Overload::new(vec![Type::Number, Type::Number], Type::Boolean, imp),
        Overload::new(vec![measure(), measure()], Type::Boolean, imp),
        Overload::new(vec![Type::String, Type::String], Type::Boolean, imp),
        Overload::new(vec![Type::Date, Type::Date], Type::Boolean, imp),
        Overload::new(vec![Type::Time, Type::Time], Type::Boolean, imp),
    ])
}

lazy_static! {
    pub(crate) static ref BINARY_OPS: HashMap<&'static str, Builtin> = {
        let mut ops = HashMap::new();
        ops.insert(
            "+",
            Builtin::pure(vec![
                Overload::new(vec![Type::Number, Type::Number], Type::Number, add),
                Overload::new(vec![measure(), measure()], measure(), add),
                Overload::new(vec![Type::String, Type::String], Type::String, concat_strings),
                Overload::new(vec![Type::Date, ms()], Type::Date, date_add),
            ]),
        );
        ops.insert(
            "-",
            Builtin::pure(vec![
                Overload::new(vec![Type::Number, Type::Number], Type::Number, sub),
                Overload::new(vec![measure(), measure()], measure(), sub),
                Overload::new(vec![Type::Date, Type::Date], ms(), date_diff),
                Overload::new(vec![Type::Date, ms()], Type::Date, date_sub),
            ]),
        );
        ops.insert(
            "*",
            Builtin::pure(vec![
                Overload::new(vec![Type::Number, Type::Number], Type::Number, mul),
                Overload::new(vec![measure(), Type::Number], measure(), mul),
                Overload::new(vec![Type::Number, measure()], measure(), mul),
            ]),
        );
        ops.insert(
            "/",
            Builtin::pure(vec![
                Overload::new(vec![Type::Number, Type::Number], Type::Number, div),
                Overload::new(vec![measure(), Type::Number], measure(), div),
                Overload::new(vec![measure(), measure()], Type::Number, div),
            ]),
        );
        ops.insert(
            "%",
            Builtin::pure(vec![Overload::new(
                vec![Type::Number, Type::Number],
                Type::Number,
                rem,
            )]),
        );
        ops.insert(
            "**",
            Builtin::pure(vec![Overload::new(
                vec![Type::Number, Type::Number],
                Type::Number,
                pow,
            )]),
        );
        ops.insert(">", comparison(gt));
        ops.insert("<", comparison(lt));
        ops.insert(">=", comparison(ge));
        ops.insert("<=", comparison(le));
        ops.insert(
            "=",
            Builtin::pure(vec![Overload::new(
                vec![Type::var("a"), Type::var("a")],
                Type::Boolean,
                equal,
            )]),
        );
        ops.insert(
            "!=",
            Builtin::pure(vec![Overload::new(
                vec![Type::var("a"), Type::var("a")],
                Type::Boolean,
                not_equal,
            )]),
        );
        ops.insert(
            "=~",
            Builtin::pure(vec![Overload::new(
                vec![Type::String, Type::String],
                Type::Boolean,
                like,
            )]),
        );
        ops.insert(
            "&&",
            Builtin::pure(vec![Overload::new(
                vec![Type::Boolean, Type::Boolean],
                Type::Boolean,
                and,
            )]),
        );
        ops.insert(
            "||",
            Builtin::pure(vec![Overload::new(
                vec![Type::Boolean, Type::Boolean],
                Type::Boolean,
                or,
            )]),
        );
        ops
    };

    pub(crate) static ref UNARY_OPS: HashMap<&'static str, Builtin> = {
        let mut ops = HashMap::new();
        ops.insert(
            "!",
            Builtin::pure(vec![Overload::new(vec![Type::Boolean], Type::Boolean, not)]),
        );
        ops.insert(
            "-",
            Builtin::pure(vec![
                Overload::new(vec![Type::Number], Type::Number, negate),
                Overload::new(vec![measure()], measure(), negate),
            ]),
        );
        ops
    };
}

fn numbers(args: &[Value], op: &str) -> RuntimeResult<(f64, f64)> {
    Ok((number_arg(args, 0, op)?, number_arg(args, 1, op)?))
}

fn add(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (a, b) = numbers(args, "+")?;
    Ok(Value::Number(a + b))
}

fn sub(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (a, b) = numbers(args, "-")?;
    Ok(Value::Number(a - b))
}

fn mul(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (a, b) = numbers(args, "*")?;
    Ok(Value::Number(a * b))
}

fn div(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (a, b) = numbers(args, "/")?;
    if b == 0.0 {
        return Err(RuntimeError::native("/", "division by zero"));
    }
    Ok(Value::Number(a / b))
}

fn rem(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (a, b) = numbers(args, "%")?;
    if b == 0.0 {
        return Err(RuntimeError::native("%", "division by zero"));
    }
    Ok(Value::Number(a % b))
}

fn pow(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let (a, b) = numbers(args, "**")?;
    Ok(Value::Number(a.powf(b)))
}

fn concat_strings(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let a = string_arg(args, 0, "+")?;
    let b = string_arg(args, 1, "+")?;
    Ok(Value::String(format!("{}{}", a, b)))
}

fn date_offset(args: &[Value], op: &str, sign: f64) -> RuntimeResult<Value> {
    let date = match arg(args, 0, op)? {
        Value::Date(date) => *date,
        other => return Err(RuntimeError::type_mismatch("Date", other)),
    };
    let out_of_range = || RuntimeError::native(op, "date out of range");
    let millis = number_arg(args, 1, op)? * sign;
    // the cast saturates, so bound the offset first
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    let offset = Duration::try_milliseconds(millis as i64).ok_or_else(out_of_range)?;
    date.checked_add_signed(offset)
        .map(Value::Date)
        .ok_or_else(out_of_range)
}

fn date_add(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    date_offset(args, "+", 1.0)
}

fn date_sub(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    date_offset(args, "-", -1.0)
}

fn date_diff(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    match (arg(args, 0, "-")?, arg(args, 1, "-")?) {
        (Value::Date(a), Value::Date(b)) => {
            Ok(Value::Number((*a - *b).num_milliseconds() as f64))
        }
        (a, _) => Err(RuntimeError::type_mismatch("Date", a)),
    }
}

fn ordering(args: &[Value], op: &str) -> RuntimeResult<Ordering> {
    let a = arg(args, 0, op)?;
    let b = arg(args, 1, op)?;
    a.compare(b)
        .ok_or_else(|| RuntimeError::native(op, format!("cannot compare {} and {}", a, b)))
}

fn gt(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(ordering(args, ">")? == Ordering::Greater))
}

fn lt(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(ordering(args, "<")? == Ordering::Less))
}

fn ge(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(ordering(args, ">=")? != Ordering::Less))
}

fn le(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(ordering(args, "<=")? != Ordering::Greater))
}

fn equal(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(arg(args, 0, "=")?.matches(arg(args, 1, "=")?)))
}

fn not_equal(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(!arg(args, 0, "!=")?.matches(arg(args, 1, "!=")?)))
}

/// Case-insensitive substring match.
fn like(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    let haystack = string_arg(args, 0, "=~")?.to_lowercase();
    let needle = string_arg(args, 1, "=~")?.to_lowercase();
    Ok(Value::Boolean(haystack.contains(&needle)))
}

fn and(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(bool_arg(args, 0, "&&")? && bool_arg(args, 1, "&&")?))
}

fn or(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(bool_arg(args, 0, "||")? || bool_arg(args, 1, "||")?))
}

fn not(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(!bool_arg(args, 0, "!")?))
}

fn negate(args: &[Value], _: Option<&ExecEnvironment>) -> RuntimeResult<Value> {
    Ok(Value::Number(-number_arg(args, 0, "-")?))
}
