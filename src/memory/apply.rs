//! Single-pass substitution of variables and dynamic functions

use super::functions::{self, Arity};
use super::{ApplyContext, ScriptingMemory};
use crate::error::{ConvoError, ScriptError};

/// Replace every known reference in `template`.
///
/// At each `$` the longest memory variable that starts there wins, then the
/// longest function name. A name only counts when it ends the identifier, so
/// `$num` never matches inside `$number`. Substituted values are never
/// scanned again. Unknown references are copied unchanged.
pub(super) fn apply(
    memory: &ScriptingMemory,
    template: &str,
    ctx: &ApplyContext<'_>,
) -> Result<String, ConvoError> {
    if !template.contains('$') {
        return Ok(template.to_string());
    }

    let names = memory.names_longest_first();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);

        if let Some(name) = names.iter().find(|n| starts_with_name(tail, n)) {
            out.push_str(memory.get(name).unwrap_or_default());
            rest = tail.split_at(name.len()).1;
            continue;
        }

        if let Some(function) = functions::find_prefix(tail) {
            let after_name = tail.split_at(function.name.len()).1;
            let (arg, remainder) = match function.arity {
                Arity::None => (None, after_name),
                Arity::Required => {
                    let (arg, remainder) =
                        functions::split_argument(after_name).ok_or_else(|| {
                            ScriptError::bad_args(
                                function.name,
                                format!("expected {}(...)", function.name),
                            )
                        })?;
                    (Some(arg), remainder)
                }
            };
            out.push_str(&functions::evaluate(function, arg, ctx)?);
            rest = remainder;
            continue;
        }

        out.push('$');
        rest = tail.split_at(1).1;
    }

    out.push_str(rest);
    Ok(out)
}

/// True when `text` starts with `name` and the identifier stops there
pub(super) fn starts_with_name(text: &str, name: &str) -> bool {
    text.strip_prefix(name).is_some_and(|after| {
        !after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
