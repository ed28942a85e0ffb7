//! Dynamic functions available inside templates
//!
//! `$env(NAME)` and `$func(EXPR)` read the process environment or evaluate
//! inline expressions and require `allow_unsafe`.

use super::apply::starts_with_name;
use super::path;
use super::ApplyContext;
use crate::error::{ConvoError, ScriptError, SecurityError};
use chrono::{Local, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Whether a function takes an argument in parentheses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Required,
}

/// A catalogue entry
#[derive(Debug, Clone, Copy)]
pub struct Function {
    pub name: &'static str,
    pub arity: Arity,
    /// Reads the environment or evaluates code
    pub unsafe_: bool,
}

const fn plain(name: &'static str) -> Function {
    Function {
        name,
        arity: Arity::None,
        unsafe_: false,
    }
}

const fn with_arg(name: &'static str, unsafe_: bool) -> Function {
    Function {
        name,
        arity: Arity::Required,
        unsafe_,
    }
}

pub const FUNCTIONS: &[Function] = &[
    plain("$now"),
    plain("$now_EN"),
    plain("$now_DE"),
    plain("$now_ISO"),
    plain("$date"),
    plain("$date_EN"),
    plain("$date_DE"),
    plain("$date_ISO"),
    plain("$date_ARPA"),
    plain("$time"),
    plain("$time_EN"),
    plain("$time_DE"),
    plain("$time_ISO"),
    plain("$time_HH_MM"),
    plain("$time_HH"),
    plain("$time_H_A"),
    plain("$timestamp"),
    plain("$year"),
    plain("$month"),
    plain("$month_MM"),
    plain("$day_of_month"),
    plain("$day_of_week"),
    plain("$random10"),
    plain("$uniqid"),
    plain("$testcasename"),
    with_arg("$random", false),
    with_arg("$cap", false),
    with_arg("$msg", false),
    with_arg("$env", true),
    with_arg("$func", true),
];

pub fn is_function_name(name: &str) -> bool {
    FUNCTIONS.iter().any(|f| f.name == name)
}

/// Longest function whose name starts `text`
pub(crate) fn find_prefix(text: &str) -> Option<&'static Function> {
    FUNCTIONS
        .iter()
        .filter(|f| starts_with_name(text, f.name))
        .max_by_key(|f| f.name.len())
}

/// Split a parenthesized argument off the start of `text`.
///
/// Returns the argument and the remainder after the closing parenthesis.
/// Nested parentheses are balanced.
pub(crate) fn split_argument(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix('(')?;
    let mut depth = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                let (arg, rest) = inner.split_at(i);
                return Some((arg, rest.strip_prefix(')').unwrap_or(rest)));
            }
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Evaluate a function with its (optional) argument
pub fn evaluate(
    function: &Function,
    arg: Option<&str>,
    ctx: &ApplyContext<'_>,
) -> Result<String, ConvoError> {
    if function.unsafe_ && !ctx.caps.allow_unsafe {
        return Err(SecurityError::new(format!("{}()", function.name)).into());
    }

    let require_arg = || {
        arg.map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ScriptError::bad_args(function.name, "argument required"))
    };

    let now = Local::now();
    let value = match function.name {
        "$now" => now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "$now_EN" => now.format("%m/%d/%Y, %I:%M:%S %p").to_string(),
        "$now_DE" => now.format("%d.%m.%Y, %H:%M:%S").to_string(),
        "$now_ISO" => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "$date" => now.format("%Y-%m-%d").to_string(),
        "$date_EN" => now.format("%m/%d/%Y").to_string(),
        "$date_DE" => now.format("%d.%m.%Y").to_string(),
        "$date_ISO" => Utc::now().format("%Y-%m-%d").to_string(),
        "$date_ARPA" => now.format("%a, %d %b %Y").to_string(),
        "$time" | "$time_DE" => now.format("%H:%M:%S").to_string(),
        "$time_EN" => now.format("%I:%M:%S %p").to_string(),
        "$time_ISO" => Utc::now().format("%H:%M:%S%.3fZ").to_string(),
        "$time_HH_MM" => now.format("%H:%M").to_string(),
        "$time_HH" => now.format("%H").to_string(),
        "$time_H_A" => now.format("%-I %p").to_string(),
        "$timestamp" => Utc::now().timestamp_millis().to_string(),
        "$year" => now.format("%Y").to_string(),
        "$month" => now.format("%B").to_string(),
        "$month_MM" => now.format("%m").to_string(),
        "$day_of_month" => now.format("%-d").to_string(),
        "$day_of_week" => now.format("%A").to_string(),
        "$random10" => random_string(10),
        "$uniqid" => uuid::Uuid::new_v4().to_string(),
        "$testcasename" => ctx.convo_name.to_string(),
        "$random" => {
            let raw = require_arg()?;
            let len: usize = raw.parse().map_err(|_| {
                ScriptError::bad_args(function.name, format!("length must be a number, got \"{raw}\""))
            })?;
            random_string(len)
        }
        "$cap" => ctx.caps.lookup(require_arg()?).unwrap_or_default(),
        "$msg" => {
            let expr = require_arg()?;
            ctx.msg
                .and_then(|msg| path::lookup(msg, expr))
                .map(path::value_text)
                .unwrap_or_default()
        }
        "$env" => std::env::var(require_arg()?).unwrap_or_default(),
        "$func" => eval_expression(require_arg()?)?,
        other => {
            return Err(ScriptError::bad_args(other, "unknown function").into());
        }
    };
    Ok(value)
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn eval_expression(expr: &str) -> Result<String, ConvoError> {
    let value = evalexpr::eval(expr)
        .map_err(|e| ScriptError::bad_args("$func", format!("cannot evaluate \"{expr}\": {e}")))?;
    Ok(match value {
        evalexpr::Value::String(s) => s,
        evalexpr::Value::Int(i) => i.to_string(),
        evalexpr::Value::Float(f) => f.to_string(),
        evalexpr::Value::Boolean(b) => b.to_string(),
        evalexpr::Value::Empty => String::new(),
        other => other.to_string(),
    })
}
