//! Flattening `INCLUDE` hooks into a single step sequence

use crate::convo::{ConversationScript, ConversationStep};
use crate::error::ScriptError;
use crate::extensions::logic_hooks::INCLUDE;
use crate::scripting::ScriptingRegistry;

/// Working copy of a conversation's steps with every included partial
/// conversation spliced in.
///
/// Untagged steps are tagged `#<index>`; spliced steps are tagged with the
/// inclusion path, e.g. `login/#2`. Partial steps are inserted before the
/// step carrying the `INCLUDE`, and steps left with nothing to do once the
/// hook is removed are dropped.
pub(super) fn resolve_steps(
    convo: &ConversationScript,
    scripting: &ScriptingRegistry,
) -> Result<Vec<ConversationStep>, ScriptError> {
    let mut chain = vec![convo.header.name.clone()];
    let mut out = Vec::with_capacity(convo.steps.len());
    flatten(&convo.steps, None, &mut chain, scripting, &mut out)?;
    Ok(out)
}

fn flatten(
    steps: &[ConversationStep],
    prefix: Option<&str>,
    chain: &mut Vec<String>,
    scripting: &ScriptingRegistry,
    out: &mut Vec<ConversationStep>,
) -> Result<(), ScriptError> {
    for (index, step) in steps.iter().enumerate() {
        let mut step = step.clone();
        if step.step_tag.is_empty() {
            step.step_tag = format!("#{}", index + 1);
        }
        if let Some(prefix) = prefix {
            step.step_tag = format!("{prefix}/{}", step.step_tag);
        }

        let (includes, hooks): (Vec<_>, Vec<_>) = step
            .logic_hooks
            .drain(..)
            .partition(|hook| hook.resolved_name().0 == INCLUDE);
        step.logic_hooks = hooks;

        for include in &includes {
            if include.args.is_empty() {
                return Err(ScriptError::bad_args(
                    INCLUDE,
                    format!("{}: expected the name of a partial conversation", step.step_tag),
                ));
            }
            for name in &include.args {
                if chain.contains(name) {
                    return Err(ScriptError::CircularInclude {
                        step_tag: step.step_tag.clone(),
                        name: name.clone(),
                        chain: chain.join("/"),
                    });
                }
                let partial = scripting
                    .partial(name)
                    .ok_or_else(|| ScriptError::PartialNotFound {
                        step_tag: step.step_tag.clone(),
                        name: name.clone(),
                        available: scripting.partial_names(),
                    })?;

                chain.push(name.clone());
                let path = chain[1..].join("/");
                tracing::debug!(step_tag = %step.step_tag, partial = %name, "Including partial conversation");
                let result = flatten(&partial.steps, Some(&path), chain, scripting, out);
                chain.pop();
                result?;
            }
        }

        if includes.is_empty() || !step.is_empty() {
            out.push(step);
        }
    }
    Ok(())
}
