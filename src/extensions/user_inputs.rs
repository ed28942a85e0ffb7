//! Built-in user inputs

use super::{required_arg, UserInput, UserInputContext};
use crate::convo::{Button, FormValue, Media};
use crate::error::{ConvoError, ScriptError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub(super) fn builtins() -> Vec<(&'static str, Arc<dyn UserInput>)> {
    fn entry(name: &'static str, imp: impl UserInput + 'static) -> (&'static str, Arc<dyn UserInput>) {
        (name, Arc::new(imp))
    }

    vec![
        entry("BUTTON", ButtonInput),
        entry("MEDIA", MediaInput),
        entry("FORM", FormInput),
    ]
}

/// `BUTTON payload [text]`: press a button.
///
/// The button text doubles as message text when the step has none.
struct ButtonInput;

#[async_trait]
impl UserInput for ButtonInput {
    async fn set_user_input(&self, ctx: &mut UserInputContext<'_>) -> Result<(), ConvoError> {
        let payload = required_arg("BUTTON", ctx.args, 0)?;
        let text = ctx.args.get(1).map_or(payload, String::as_str);

        ctx.msg.buttons = vec![Button {
            text: Some(text.to_string()),
            payload: Some(
                serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string())),
            ),
            image_uri: None,
        }];
        if ctx.msg.message_text.as_deref().is_none_or(str::is_empty) {
            ctx.msg.message_text = Some(text.to_string());
        }
        Ok(())
    }
}

/// `MEDIA uri...`: attach files, MIME type guessed from the extension
struct MediaInput;

fn guess_mime(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[async_trait]
impl UserInput for MediaInput {
    async fn set_user_input(&self, ctx: &mut UserInputContext<'_>) -> Result<(), ConvoError> {
        required_arg("MEDIA", ctx.args, 0)?;
        ctx.msg.media = ctx
            .args
            .iter()
            .map(|uri| Media {
                media_uri: uri.clone(),
                mime_type: guess_mime(uri),
                alt_text: None,
            })
            .collect();
        Ok(())
    }
}

/// `FORM name [value]`: submit a form field
struct FormInput;

#[async_trait]
impl UserInput for FormInput {
    async fn set_user_input(&self, ctx: &mut UserInputContext<'_>) -> Result<(), ConvoError> {
        let name = required_arg("FORM", ctx.args, 0)?;
        if name.trim().is_empty() {
            return Err(ScriptError::bad_args("FORM", "form field name is empty").into());
        }
        let value = ctx.args.get(1).cloned().unwrap_or_default();
        ctx.msg.forms.retain(|f| f.name != name);
        ctx.msg.forms.push(FormValue {
            name: name.to_string(),
            value,
        });
        Ok(())
    }
}
