//! Built-in logic hooks

use super::{required_arg, HookContext, LogicHook};
use crate::error::{ConvoError, ScriptError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Name of the hook that splices a partial conversation into a step
pub const INCLUDE: &str = "INCLUDE";

pub(super) fn builtins() -> Vec<(&'static str, Arc<dyn LogicHook>)> {
    fn entry(name: &'static str, imp: impl LogicHook + 'static) -> (&'static str, Arc<dyn LogicHook>) {
        (name, Arc::new(imp))
    }

    vec![
        entry(INCLUDE, IncludeHook),
        entry("PAUSE", PauseHook),
        entry("SET_SCRIPTING_MEMORY", SetScriptingMemoryHook),
        entry("CLEAR_SCRIPTING_MEMORY", ClearScriptingMemoryHook),
        entry("UPDATE_CUSTOM", UpdateCustomHook),
    ]
}

/// Resolved before the run starts; nothing left to do at run time
struct IncludeHook;

impl LogicHook for IncludeHook {}

/// Sleeps after the step it is attached to
struct PauseHook;

impl PauseHook {
    async fn pause(ctx: &HookContext<'_>) -> Result<(), ConvoError> {
        let raw = required_arg("PAUSE", ctx.args, 0)?;
        let millis: u64 = raw.trim().parse().map_err(|_| {
            ScriptError::bad_args("PAUSE", format!("expected milliseconds, got \"{raw}\""))
        })?;
        tracing::debug!(step_tag = ctx.step_tag(), millis, "Pausing");
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }
}

#[async_trait]
impl LogicHook for PauseHook {
    async fn on_me_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::pause(ctx).await
    }

    async fn on_bot_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::pause(ctx).await
    }
}

/// `SET_SCRIPTING_MEMORY name value`, applied before the step runs
struct SetScriptingMemoryHook;

impl SetScriptingMemoryHook {
    fn set(ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        let name = required_arg("SET_SCRIPTING_MEMORY", ctx.args, 0)?;
        let value = ctx.args.get(1).map(String::as_str).unwrap_or_default();
        ctx.memory.set(name, value);
        Ok(())
    }
}

#[async_trait]
impl LogicHook for SetScriptingMemoryHook {
    async fn on_convo_begin(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::set(ctx)
    }

    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::set(ctx)
    }

    async fn on_bot_start(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::set(ctx)
    }
}

/// `CLEAR_SCRIPTING_MEMORY name`, applied after the step ran
struct ClearScriptingMemoryHook;

impl ClearScriptingMemoryHook {
    fn clear(ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        let name = required_arg("CLEAR_SCRIPTING_MEMORY", ctx.args, 0)?;
        ctx.memory.remove(name);
        Ok(())
    }
}

#[async_trait]
impl LogicHook for ClearScriptingMemoryHook {
    async fn on_me_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::clear(ctx)
    }

    async fn on_bot_end(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        Self::clear(ctx)
    }
}

/// Writes a field into the outgoing payload.
///
/// `UPDATE_CUSTOM field value` sets `field`, `UPDATE_CUSTOM field key value`
/// sets `field.key`. Values that parse as JSON are stored as JSON.
struct UpdateCustomHook;

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn not_an_object(what: &str) -> ScriptError {
    ScriptError::bad_args("UPDATE_CUSTOM", format!("{what} is not a JSON object"))
}

#[async_trait]
impl LogicHook for UpdateCustomHook {
    async fn on_me_start(&self, ctx: &mut HookContext<'_>) -> Result<(), ConvoError> {
        let field = required_arg("UPDATE_CUSTOM", ctx.args, 0)?;
        required_arg("UPDATE_CUSTOM", ctx.args, 1)?;
        let Some(msg) = ctx.user_msg.as_deref_mut() else {
            return Ok(());
        };

        let payload = msg
            .source_data
            .get_or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| not_an_object("outgoing payload"))?;
        match ctx.args {
            [_, value] => {
                payload.insert(field.to_string(), parse_value(value));
            }
            [_, key, value, ..] => {
                let nested = payload
                    .entry(field.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .ok_or_else(|| not_an_object(field))?;
                nested.insert(key.clone(), parse_value(value));
            }
            _ => {}
        }
        Ok(())
    }
}
