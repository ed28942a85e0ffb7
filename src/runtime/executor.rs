//! Conversation runner

use super::compare::Expectation;
use super::includes::resolve_steps;
use super::traits::Transport;
use crate::caps::Capabilities;
use crate::convo::{
    ActualMessage, BotMessage, ConversationScript, ConversationStep, ConvoEvent, ExtensionRef,
    Sender, Transcript, TranscriptStep, UserMessage,
};
use crate::error::{AssertionError, ConvoError, ConvoFailure, ScriptError};
use crate::extensions::{
    ConvoAssertContext, Entry, ExtensionRegistry, HookContext, HookEvent, LogicHook,
    StepAssertContext, UserInputContext,
};
use crate::memory::{ApplyContext, ScriptingMemory, VariableMemory};
use crate::scripting::ScriptingRegistry;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executes conversations against a transport.
///
/// Holds only read-only state shared with other runners; everything a run
/// mutates (scripting memory, transcript, the working copy of the steps)
/// lives in the run itself.
pub struct ConversationRunner {
    caps: Arc<Capabilities>,
    extensions: Arc<ExtensionRegistry>,
    scripting: Arc<ScriptingRegistry>,
    variables: VariableMemory,
}

impl ConversationRunner {
    pub fn new(
        caps: Arc<Capabilities>,
        extensions: Arc<ExtensionRegistry>,
        scripting: Arc<ScriptingRegistry>,
    ) -> Self {
        let variables = VariableMemory::new(&caps);
        Self {
            caps,
            extensions,
            scripting,
            variables,
        }
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// Run one conversation to completion.
    ///
    /// A `TranscriptReady` event is emitted on the transport before
    /// returning, whatever the outcome.
    pub async fn run<T: Transport + ?Sized>(
        &self,
        script: &ConversationScript,
        transport: &T,
    ) -> Result<Transcript, ConvoFailure> {
        let started = Instant::now();
        let convo = script.name();
        tracing::info!(convo = %convo, steps = script.steps.len(), "Starting conversation");

        let mut run = Run {
            runner: self,
            transport,
            convo_name: convo,
            memory: ScriptingMemory::new(),
            transcript: Transcript::begin(convo),
        };
        let outcome = run.execute(script).await;

        let Run {
            memory,
            mut transcript,
            ..
        } = run;
        transcript.scripting_memory = memory;
        transcript.convo_end = Utc::now();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &outcome {
            Ok(()) => tracing::info!(
                convo = %convo,
                steps = transcript.steps.len(),
                duration_ms,
                "Conversation succeeded"
            ),
            Err(error) => {
                tracing::error!(
                    convo = %convo,
                    kind = error.kind(),
                    error = %error,
                    duration_ms,
                    "Conversation failed"
                );
                transcript.error = Some(error.clone());
            }
        }

        transport.emit(ConvoEvent::TranscriptReady(Box::new(transcript.clone())));

        match outcome {
            Ok(()) => Ok(transcript),
            Err(error) => Err(ConvoFailure {
                error,
                transcript: Box::new(transcript),
            }),
        }
    }

    /// Run independent conversations, at most `concurrency` at a time.
    ///
    /// Results are returned in the order of `jobs`.
    pub async fn run_all<'a, T>(
        &self,
        jobs: impl IntoIterator<Item = (&'a ConversationScript, &'a T)>,
        concurrency: usize,
    ) -> Vec<Result<Transcript, ConvoFailure>>
    where
        T: Transport + ?Sized + 'a,
    {
        let mut results: Vec<(usize, Result<Transcript, ConvoFailure>)> =
            stream::iter(jobs.into_iter().enumerate())
                .map(|(index, (script, transport))| async move {
                    (index, self.run(script, transport).await)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

/// State of one in-flight conversation
struct Run<'r, T: ?Sized> {
    runner: &'r ConversationRunner,
    transport: &'r T,
    convo_name: &'r str,
    memory: ScriptingMemory,
    transcript: Transcript,
}

/// An extension resolved for one call, arguments already substituted
struct Invocation<I: ?Sized> {
    name: String,
    imp: Arc<I>,
    args: Vec<String>,
    not: bool,
}

impl<T: Transport + ?Sized> Run<'_, T> {
    async fn execute(&mut self, script: &ConversationScript) -> Result<(), ConvoError> {
        let steps = resolve_steps(script, &self.runner.scripting)?;
        let begin: Vec<&ConversationStep> =
            steps.iter().filter(|s| s.sender == Sender::Begin).collect();
        let end: Vec<&ConversationStep> =
            steps.iter().filter(|s| s.sender == Sender::End).collect();

        self.convo_begin(&begin).await?;
        for step in &steps {
            self.step(step).await?;
        }
        self.convo_end(&end).await
    }

    async fn convo_begin(&mut self, begin: &[&ConversationStep]) -> Result<(), ConvoError> {
        let hooks: Vec<ExtensionRef> = begin
            .iter()
            .flat_map(|s| s.logic_hooks.iter().cloned())
            .collect();
        self.fire(HookEvent::ConvoBegin, None, &hooks, None, None)
            .await?;

        let asserters: Vec<ExtensionRef> = begin
            .iter()
            .flat_map(|s| s.asserters.iter().cloned())
            .collect();
        self.assert_convo(&asserters, false).await
    }

    async fn convo_end(&mut self, end: &[&ConversationStep]) -> Result<(), ConvoError> {
        let hooks: Vec<ExtensionRef> = end
            .iter()
            .flat_map(|s| s.logic_hooks.iter().cloned())
            .collect();
        self.fire(HookEvent::ConvoEnd, None, &hooks, None, None)
            .await?;

        let asserters: Vec<ExtensionRef> = end
            .iter()
            .flat_map(|s| s.asserters.iter().cloned())
            .collect();
        self.assert_convo(&asserters, true).await
    }

    async fn step(&mut self, step: &ConversationStep) -> Result<(), ConvoError> {
        // Consumed by convo_begin and convo_end
        if matches!(step.sender, Sender::Begin | Sender::End) {
            return Ok(());
        }

        tracing::debug!(
            convo = %self.convo_name,
            step_tag = %step.step_tag,
            sender = %step.sender,
            "Executing step"
        );
        let mut record = TranscriptStep::begin(step);
        let result = match step.sender {
            Sender::Me => self.me_step(step, &mut record).await,
            Sender::Bot => self.bot_step(step, &mut record).await,
            Sender::Begin | Sender::End => Ok(()),
        };
        record.step_end = Utc::now();
        if let Err(error) = &result {
            record.error = Some(error.clone());
        }
        self.transcript.steps.push(record);
        result
    }

    async fn me_step(
        &mut self,
        step: &ConversationStep,
        record: &mut TranscriptStep,
    ) -> Result<(), ConvoError> {
        let runner = self.runner;
        let mut msg = UserMessage {
            message_text: step
                .message_text
                .as_deref()
                .map(|text| runner.scripting.resolve_utterance_to_send(text)),
            source_data: step.source_data.clone(),
            channel: step.channel.clone(),
            ..UserMessage::default()
        };

        self.fire(HookEvent::MeStart, Some(step), &step.logic_hooks, Some(&mut msg), None)
            .await?;

        let msg_json = to_json(&msg);
        let ctx = ApplyContext::new(&runner.caps, self.convo_name).with_msg(&msg_json);
        if let Some(text) = msg.message_text.take() {
            msg.message_text = Some(runner.variables.apply(&self.memory, &text, &ctx)?);
        }
        if let Some(data) = msg.source_data.take() {
            msg.source_data = Some(runner.variables.apply_to_value(&data, &self.memory, &ctx)?);
        }

        let memory = &self.memory;
        let inputs = invocations(
            &step.user_inputs,
            |name| runner.extensions.user_input(name),
            runner.extensions.global_user_inputs(),
            |args| runner.variables.apply_to_args(args, memory, &ctx),
        )?;
        for input in inputs {
            let mut input_ctx = UserInputContext {
                convo_name: self.convo_name,
                step_tag: &step.step_tag,
                args: &input.args,
                msg: &mut msg,
                caps: &runner.caps,
            };
            input
                .imp
                .set_user_input(&mut input_ctx)
                .await
                .map_err(|e| attribute(e, &input.name))?;
        }

        if let Some(ms_per_char) = runner.caps.simulate_writing_speed {
            let chars = msg.message_text.as_deref().map_or(0, |t| t.chars().count());
            let delay_ms = ms_per_char.saturating_mul(u64::try_from(chars).unwrap_or(u64::MAX));
            tracing::debug!(step_tag = %step.step_tag, delay_ms, "Simulating writing speed");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        record.expected.message_text.clone_from(&msg.message_text);
        record.expected.source_data.clone_from(&msg.source_data);
        record.actual = Some(ActualMessage::Me(msg.clone()));
        self.transport.user_says(&msg).await?;

        self.fire(HookEvent::MeEnd, Some(step), &step.logic_hooks, Some(&mut msg), None)
            .await
    }

    async fn bot_step(
        &mut self,
        step: &ConversationStep,
        record: &mut TranscriptStep,
    ) -> Result<(), ConvoError> {
        let runner = self.runner;
        self.fire(HookEvent::BotStart, Some(step), &step.logic_hooks, None, None)
            .await?;

        record.bot_wait_begin = Some(Utc::now());
        let waited = self
            .transport
            .wait_bot_says(step.channel.as_deref(), runner.caps.wait_for_bot_timeout)
            .await;
        record.bot_wait_end = Some(Utc::now());
        let bot_msg = waited?;
        record.actual = Some(ActualMessage::Bot(bot_msg.clone()));

        if bot_msg.is_empty() {
            return Err(AssertionError::EmptyResponse {
                step_tag: step.step_tag.clone(),
            }
            .into());
        }

        let collect_all = runner.caps.collect_all_assertion_errors;
        let mut failures = Vec::new();
        let bot_json = to_json(&bot_msg);
        let expectation = Expectation {
            step_tag: &step.step_tag,
            matcher: runner.scripting.matcher(),
            variables: &runner.variables,
            ctx: ApplyContext::new(&runner.caps, self.convo_name).with_msg(&bot_json),
            normalize: runner.caps.normalize_text,
        };

        if let Some(expected) = &step.message_text {
            let candidates = runner.scripting.resolve_utterances_to_match(expected);
            let actual = bot_msg.message_text.as_deref().unwrap_or_default();
            gather(
                expectation.check_text(&mut self.memory, actual, &candidates, step.not),
                collect_all,
                &mut failures,
            )?;
        }
        if let Some(expected) = &step.source_data {
            let actual = bot_msg.source_data.as_ref().unwrap_or(&Value::Null);
            gather(
                expectation.check_value(&mut self.memory, expected, actual, "$"),
                collect_all,
                &mut failures,
            )?;
        }

        let memory = &self.memory;
        let asserters = invocations(
            &step.asserters,
            |name| runner.extensions.asserter(name),
            runner.extensions.global_asserters(),
            |args| runner.variables.apply_to_args(args, memory, &expectation.ctx),
        )?;
        for asserter in asserters {
            let ctx = StepAssertContext {
                convo_name: self.convo_name,
                step_tag: &step.step_tag,
                args: &asserter.args,
                not: asserter.not,
                bot_msg: &bot_msg,
                memory: &self.memory,
                caps: &runner.caps,
                matcher: runner.scripting.matcher(),
            };
            let result = asserter
                .imp
                .assert_convo_step(&ctx)
                .await
                .map_err(|e| attribute(e, &asserter.name));
            gather(result, collect_all, &mut failures)?;
        }

        if failures.len() > 1 {
            return Err(AssertionError::Multiple {
                step_tag: step.step_tag.clone(),
                errors: failures,
            }
            .into());
        }
        if let Some(failure) = failures.pop() {
            return Err(failure.into());
        }

        self.fire(HookEvent::BotEnd, Some(step), &step.logic_hooks, None, Some(&bot_msg))
            .await
    }

    /// Invoke one lifecycle callback on the global hooks and on `own`
    async fn fire(
        &mut self,
        event: HookEvent,
        step: Option<&ConversationStep>,
        own: &[ExtensionRef],
        mut user_msg: Option<&mut UserMessage>,
        bot_msg: Option<&BotMessage>,
    ) -> Result<(), ConvoError> {
        let runner = self.runner;
        let msg_json = user_msg
            .as_deref()
            .map(to_json)
            .or_else(|| bot_msg.map(to_json));
        let mut ctx = ApplyContext::new(&runner.caps, self.convo_name);
        if let Some(msg) = &msg_json {
            ctx = ctx.with_msg(msg);
        }

        let memory = &self.memory;
        let hooks = invocations(
            own,
            |name| runner.extensions.logic_hook(name),
            runner.extensions.global_logic_hooks(),
            |args| runner.variables.apply_to_args(args, memory, &ctx),
        )?;

        for hook in hooks {
            let mut hook_ctx = HookContext {
                convo_name: self.convo_name,
                step,
                args: &hook.args,
                memory: &mut self.memory,
                caps: &runner.caps,
                user_msg: user_msg.as_deref_mut(),
                bot_msg,
            };
            if let Err(error) = dispatch(&*hook.imp, event, &mut hook_ctx).await {
                if !hook.imp.best_effort() {
                    return Err(attribute(error, &hook.name));
                }
                tracing::warn!(
                    convo = %self.convo_name,
                    hook = %hook.name,
                    ?event,
                    error = %error,
                    "Best-effort logic hook failed"
                );
            }
        }
        Ok(())
    }

    /// Begin- or end-scoped assertions
    async fn assert_convo(&self, own: &[ExtensionRef], at_end: bool) -> Result<(), ConvoError> {
        let runner = self.runner;
        let apply_ctx = ApplyContext::new(&runner.caps, self.convo_name);
        let asserters = invocations(
            own,
            |name| runner.extensions.asserter(name),
            runner.extensions.global_asserters(),
            |args| runner.variables.apply_to_args(args, &self.memory, &apply_ctx),
        )?;

        for asserter in asserters {
            let ctx = ConvoAssertContext {
                convo_name: self.convo_name,
                args: &asserter.args,
                not: asserter.not,
                memory: &self.memory,
                caps: &runner.caps,
                transcript: &self.transcript,
            };
            let result = if at_end {
                asserter.imp.assert_convo_end(&ctx).await
            } else {
                asserter.imp.assert_convo_begin(&ctx).await
            };
            result.map_err(|e| attribute(e, &asserter.name))?;
        }
        Ok(())
    }
}

/// Resolve step references, then every global entry the step does not
/// reference itself
fn invocations<'e, I: ?Sized + 'e>(
    own: &[ExtensionRef],
    lookup: impl Fn(&str) -> Result<&'e Entry<I>, ScriptError>,
    globals: impl Iterator<Item = &'e Entry<I>>,
    apply: impl Fn(&[String]) -> Result<Vec<String>, ConvoError>,
) -> Result<Vec<Invocation<I>>, ConvoError> {
    let mut out: Vec<Invocation<I>> = Vec::with_capacity(own.len());
    for reference in own {
        let (name, not) = reference.resolved_name();
        let entry = lookup(&name)?;
        out.push(Invocation {
            name: entry.name.clone(),
            imp: Arc::clone(&entry.imp),
            args: apply(&reference.args)?,
            not,
        });
    }
    for entry in globals {
        if out.iter().any(|i| i.name == entry.name) {
            continue;
        }
        out.push(Invocation {
            name: entry.name.clone(),
            imp: Arc::clone(&entry.imp),
            args: apply(&entry.args)?,
            not: false,
        });
    }
    Ok(out)
}

async fn dispatch(
    hook: &dyn LogicHook,
    event: HookEvent,
    ctx: &mut HookContext<'_>,
) -> Result<(), ConvoError> {
    match event {
        HookEvent::ConvoBegin => hook.on_convo_begin(ctx).await,
        HookEvent::MeStart => hook.on_me_start(ctx).await,
        HookEvent::MeEnd => hook.on_me_end(ctx).await,
        HookEvent::BotStart => hook.on_bot_start(ctx).await,
        HookEvent::BotEnd => hook.on_bot_end(ctx).await,
        HookEvent::ConvoEnd => hook.on_convo_end(ctx).await,
    }
}

/// Collect assertion failures when asked to, propagate everything else
fn gather(
    result: Result<(), ConvoError>,
    collect_all: bool,
    failures: &mut Vec<AssertionError>,
) -> Result<(), ConvoError> {
    match result {
        Err(ConvoError::Assertion(error)) if collect_all => {
            failures.push(error);
            Ok(())
        }
        other => other,
    }
}

fn attribute(error: ConvoError, name: &str) -> ConvoError {
    match error {
        ConvoError::Assertion(e) => ConvoError::Assertion(e.from_source(name)),
        other => other,
    }
}

fn to_json<S: Serialize>(value: &S) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convo::Utterance;
    use crate::error::TransportErrorKind;
    use crate::extensions::{EventHooks, ExtensionSpec, FnAsserter};
    use crate::runtime::testing::{init_tracing, next_transcript, MockTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn runner_with(caps: Capabilities, extensions: ExtensionRegistry, scripting: ScriptingRegistry) -> ConversationRunner {
        init_tracing();
        ConversationRunner::new(Arc::new(caps), Arc::new(extensions), Arc::new(scripting))
    }

    fn runner(caps: Capabilities) -> ConversationRunner {
        let extensions = ExtensionRegistry::new(&caps);
        let scripting = ScriptingRegistry::new(&caps);
        runner_with(caps, extensions, scripting)
    }

    fn reference(name: &str) -> ExtensionRef {
        ExtensionRef::new(name, Vec::<String>::new())
    }

    #[tokio::test]
    async fn test_echo_conversation() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::echo().answer("hi", "hello");
        let script = ConversationScript::new(
            "greeting",
            vec![ConversationStep::me("hi"), ConversationStep::bot("hello")],
        );

        let transcript = runner.run(&script, &transport).await.unwrap();
        assert_eq!(transcript.steps.len(), 2);
        assert!(transcript.error.is_none());
        assert!(transcript.steps.iter().all(|s| s.error.is_none()));
        assert_eq!(transcript.steps[0].step_tag, "#1");
        assert_eq!(
            transcript.steps[1].bot_message().and_then(|m| m.message_text.as_deref()),
            Some("hello")
        );
        assert_eq!(transport.sent_texts(), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_negated_text_names_step_tag() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::echo().answer("status?", "no error here");
        let script = ConversationScript::new(
            "status",
            vec![
                ConversationStep::me("status?"),
                ConversationStep::bot("error").negated().with_tag("no-errors"),
            ],
        );

        let failure = runner.run(&script, &transport).await.unwrap_err();
        let assertion = failure.error.as_assertion().expect("assertion error");
        assert_eq!(assertion.step_tag(), "no-errors");
        assert!(failure.error.to_string().starts_with("no-errors:"));
        // Partial transcript is carried along
        assert_eq!(failure.transcript.steps.len(), 2);
        assert!(failure.transcript.steps[1].error.is_some());
        assert!(failure.transcript.steps[1].bot_message().is_some());
        assert_eq!(failure.transcript.error, Some(failure.error.clone()));
    }

    #[tokio::test]
    async fn test_circular_include_fails_before_transport() {
        let caps = Capabilities::default();
        let mut scripting = ScriptingRegistry::new(&caps);
        scripting.add_partial_convos([ConversationScript::new(
            "login",
            vec![ConversationStep::me("user").with_logic_hook(ExtensionRef::new("INCLUDE", ["main"]))],
        )]);
        let runner = runner_with(caps.clone(), ExtensionRegistry::new(&caps), scripting);
        let transport = MockTransport::echo();
        let mut events = transport.subscribe();
        let script = ConversationScript::new(
            "main",
            vec![
                ConversationStep::me("hi").with_logic_hook(ExtensionRef::new("INCLUDE", ["login"])),
                ConversationStep::bot("hi"),
            ],
        );

        let failure = runner.run(&script, &transport).await.unwrap_err();
        assert!(matches!(
            failure.error,
            ConvoError::Script(ScriptError::CircularInclude { .. })
        ));
        assert_eq!(transport.call_count(), 0);
        assert!(failure.transcript.steps.is_empty());

        let published = next_transcript(&mut events).await.expect("transcript event");
        assert!(published.error.is_some());
    }

    #[tokio::test]
    async fn test_included_steps_run_in_place() {
        let caps = Capabilities::default();
        let mut scripting = ScriptingRegistry::new(&caps);
        scripting.add_partial_convos([ConversationScript::new(
            "login",
            vec![ConversationStep::me("user"), ConversationStep::bot("password?")],
        )]);
        let runner = runner_with(caps.clone(), ExtensionRegistry::new(&caps), scripting);
        let transport = MockTransport::echo().answer("user", "password?");
        let script = ConversationScript::new(
            "main",
            vec![
                ConversationStep::new(Sender::Me).with_logic_hook(ExtensionRef::new("INCLUDE", ["login"])),
                ConversationStep::me("secret"),
                ConversationStep::bot("secret"),
            ],
        );

        let transcript = runner.run(&script, &transport).await.unwrap();
        let tags: Vec<&str> = transcript.steps.iter().map(|s| s.step_tag.as_str()).collect();
        assert_eq!(tags, vec!["login/#1", "login/#2", "#2", "#3"]);
        assert_eq!(transport.sent_texts(), vec!["user", "secret"]);
    }

    fn failing_asserters(caps: &Capabilities, calls: &Arc<AtomicUsize>) -> ExtensionRegistry {
        let mut extensions = ExtensionRegistry::new(caps);
        for name in ["FAIL_ONE", "FAIL_TWO", "FAIL_THREE"] {
            let calls = Arc::clone(calls);
            let imp: Arc<dyn crate::extensions::Asserter> = Arc::new(FnAsserter::new(move |ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AssertionError::failed(ctx.step_tag, "always fails").into())
            }));
            extensions
                .register_asserter(ExtensionSpec::implementation(name, imp))
                .unwrap();
        }
        extensions
    }

    fn three_asserter_script() -> ConversationScript {
        ConversationScript::new(
            "asserted",
            vec![
                ConversationStep::me("hi"),
                ConversationStep::bot("hi")
                    .with_asserter(reference("FAIL_ONE"))
                    .with_asserter(reference("FAIL_TWO"))
                    .with_asserter(reference("FAIL_THREE")),
            ],
        )
    }

    #[tokio::test]
    async fn test_collect_all_assertion_errors() {
        let caps = Capabilities {
            collect_all_assertion_errors: true,
            ..Capabilities::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let extensions = failing_asserters(&caps, &calls);
        let runner = runner_with(caps.clone(), extensions, ScriptingRegistry::new(&caps));

        let failure = runner
            .run(&three_asserter_script(), &MockTransport::echo())
            .await
            .unwrap_err();
        match failure.error {
            ConvoError::Assertion(AssertionError::Multiple { step_tag, errors }) => {
                assert_eq!(step_tag, "#2");
                assert_eq!(errors.len(), 3);
            }
            other => panic!("Expected composite error, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_assertion_error_stops_step() {
        let caps = Capabilities::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let extensions = failing_asserters(&caps, &calls);
        let runner = runner_with(caps.clone(), extensions, ScriptingRegistry::new(&caps));

        let failure = runner
            .run(&three_asserter_script(), &MockTransport::echo())
            .await
            .unwrap_err();
        match failure.error {
            ConvoError::Assertion(AssertionError::Failed { source_name, .. }) => {
                assert_eq!(source_name.as_deref(), Some("FAIL_ONE"));
            }
            other => panic!("Expected single failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_structured_length_mismatch() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::scripted();
        transport.queue_reply(BotMessage {
            source_data: Some(json!({ "items": [{ "id": 1 }, { "id": 2 }, { "id": 3 }] })),
            ..BotMessage::default()
        });
        let script = ConversationScript::new(
            "payload",
            vec![ConversationStep::new(Sender::Bot)
                .with_source_data(json!({ "items": [{ "id": 1 }, { "id": 2 }] }))],
        );

        let failure = runner.run(&script, &transport).await.unwrap_err();
        assert_eq!(
            failure.error,
            ConvoError::Assertion(AssertionError::LengthMismatch {
                step_tag: "#1".to_string(),
                path: "$.items".to_string(),
                expected: 2,
                actual: 3,
            })
        );
    }

    #[tokio::test]
    async fn test_captured_variable_is_sent_back() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::echo().answer("order status", "your order 4711 is ready");
        let script = ConversationScript::new(
            "order",
            vec![
                ConversationStep::me("order status"),
                ConversationStep::bot("your order $order is ready"),
                ConversationStep::me("cancel $order"),
                ConversationStep::bot("cancel 4711"),
            ],
        );

        let transcript = runner.run(&script, &transport).await.unwrap();
        assert_eq!(transport.sent_texts(), vec!["order status", "cancel 4711"]);
        assert_eq!(transcript.scripting_memory.get("$order"), Some("4711"));
        assert_eq!(
            transcript.steps[2].expected.message_text.as_deref(),
            Some("cancel 4711")
        );
        // The parsed script keeps its templates, so it can be replayed
        assert_eq!(script.steps[2].message_text.as_deref(), Some("cancel $order"));
        let again = MockTransport::echo().answer("order status", "your order 99 is ready");
        runner.run(&script, &again).await.unwrap_err();
        assert_eq!(again.sent_texts(), vec!["order status", "cancel 99"]);
    }

    #[tokio::test]
    async fn test_transport_errors() {
        let runner = runner(Capabilities::default());
        let script = ConversationScript::new(
            "silent",
            vec![ConversationStep::me("hi"), ConversationStep::bot("hello")],
        );

        let failure = runner
            .run(&script, &MockTransport::scripted())
            .await
            .unwrap_err();
        match &failure.error {
            ConvoError::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Timeout),
            other => panic!("Expected transport error, got {other:?}"),
        }
        let waited = &failure.transcript.steps[1];
        assert!(waited.bot_wait_begin.is_some());
        assert!(waited.actual.is_none());

        let closed = MockTransport::echo().failing(crate::error::TransportError::closed("gone"));
        let failure = runner.run(&script, &closed).await.unwrap_err();
        assert_eq!(failure.error.kind(), "transport");
        assert_eq!(failure.transcript.steps.len(), 1);
        assert!(failure.transcript.steps[0].user_message().is_some());
    }

    #[tokio::test]
    async fn test_empty_bot_response() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::scripted();
        transport.queue_reply(BotMessage::default());
        let script = ConversationScript::new("empty", vec![ConversationStep::bot("anything")]);

        let failure = runner.run(&script, &transport).await.unwrap_err();
        assert_eq!(
            failure.error,
            ConvoError::Assertion(AssertionError::EmptyResponse {
                step_tag: "#1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_transcript_event_on_success() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::echo();
        let mut events = transport.subscribe();
        let script = ConversationScript::new(
            "ping",
            vec![ConversationStep::me("ping"), ConversationStep::bot("ping")],
        );

        runner.run(&script, &transport).await.unwrap();
        let published = next_transcript(&mut events).await.expect("transcript event");
        assert_eq!(published.convo_name, "ping");
        assert!(published.is_success());
    }

    #[tokio::test]
    async fn test_hook_lifecycle_order() {
        let caps = Capabilities::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = EventHooks::new();
        for event in [
            HookEvent::ConvoBegin,
            HookEvent::MeStart,
            HookEvent::MeEnd,
            HookEvent::BotStart,
            HookEvent::BotEnd,
            HookEvent::ConvoEnd,
        ] {
            let log = Arc::clone(&log);
            hooks = hooks.on(event, move |_| {
                log.lock().unwrap().push(event);
                Ok(())
            });
        }
        let mut extensions = ExtensionRegistry::new(&caps);
        let imp: Arc<dyn LogicHook> = Arc::new(hooks);
        extensions
            .register_logic_hook(ExtensionSpec::implementation("TRACE", imp).global())
            .unwrap();
        let runner = runner_with(caps.clone(), extensions, ScriptingRegistry::new(&caps));

        let script = ConversationScript::new(
            "traced",
            vec![ConversationStep::me("hi"), ConversationStep::bot("hi")],
        );
        runner.run(&script, &MockTransport::echo()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                HookEvent::ConvoBegin,
                HookEvent::MeStart,
                HookEvent::MeEnd,
                HookEvent::BotStart,
                HookEvent::BotEnd,
                HookEvent::ConvoEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_best_effort_hook_failure_is_swallowed() {
        let caps = Capabilities::default();
        let failing = || {
            EventHooks::new().on(HookEvent::MeStart, |_| {
                Err(ScriptError::bad_args("NOTIFY", "endpoint unreachable").into())
            })
        };
        let script = ConversationScript::new(
            "notified",
            vec![ConversationStep::me("hi"), ConversationStep::bot("hi")],
        );

        let mut extensions = ExtensionRegistry::new(&caps);
        let imp: Arc<dyn LogicHook> = Arc::new(failing().with_best_effort());
        extensions
            .register_logic_hook(ExtensionSpec::implementation("NOTIFY", imp).global())
            .unwrap();
        let runner = runner_with(caps.clone(), extensions, ScriptingRegistry::new(&caps));
        runner.run(&script, &MockTransport::echo()).await.unwrap();

        let mut extensions = ExtensionRegistry::new(&caps);
        let imp: Arc<dyn LogicHook> = Arc::new(failing());
        extensions
            .register_logic_hook(ExtensionSpec::implementation("NOTIFY", imp).global())
            .unwrap();
        let runner = runner_with(caps.clone(), extensions, ScriptingRegistry::new(&caps));
        let failure = runner.run(&script, &MockTransport::echo()).await.unwrap_err();
        assert!(matches!(failure.error, ConvoError::Script(ScriptError::BadArgs { .. })));
    }

    #[tokio::test]
    async fn test_begin_hooks_and_user_inputs() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::echo();
        let script = ConversationScript::new(
            "shop",
            vec![
                ConversationStep::new(Sender::Begin)
                    .with_logic_hook(ExtensionRef::new("SET_SCRIPTING_MEMORY", ["$size", "Large"])),
                ConversationStep::me("$size please")
                    .with_user_input(ExtensionRef::new("BUTTON", ["SIZE_$size"])),
                ConversationStep::bot("large please"),
            ],
        );

        let transcript = runner.run(&script, &transport).await.unwrap();
        assert_eq!(transcript.steps.len(), 2);
        let sent = transport.sent.lock().unwrap()[0].clone();
        assert_eq!(sent.message_text.as_deref(), Some("Large please"));
        assert_eq!(sent.buttons[0].payload, Some(json!("SIZE_Large")));
    }

    #[tokio::test]
    async fn test_unknown_asserter_is_script_error() {
        let runner = runner(Capabilities::default());
        let script = ConversationScript::new(
            "typo",
            vec![
                ConversationStep::me("hi"),
                ConversationStep::bot("hi").with_asserter(reference("BUTTTONS")),
            ],
        );
        let failure = runner.run(&script, &MockTransport::echo()).await.unwrap_err();
        assert!(matches!(
            failure.error,
            ConvoError::Script(ScriptError::UnknownExtension { .. })
        ));
    }

    #[tokio::test]
    async fn test_negated_builtin_asserter() {
        let runner = runner(Capabilities::default());
        let transport = MockTransport::scripted();
        transport.queue_reply(BotMessage::text("pick one"));
        let script = ConversationScript::new(
            "no-buttons",
            vec![ConversationStep::bot("pick one").with_asserter(reference("NOT_BUTTONS"))],
        );
        runner.run(&script, &transport).await.unwrap();
    }

    #[tokio::test]
    async fn test_bot_step_matches_utterance_group() {
        let caps = Capabilities::default();
        let mut scripting = ScriptingRegistry::new(&caps);
        scripting.add_utterances([Utterance::new("GREETING", ["hello", "hi there"])]);
        let runner = runner_with(caps.clone(), ExtensionRegistry::new(&caps), scripting);
        let transport = MockTransport::echo().answer("hey", "hi there");
        let script = ConversationScript::new(
            "utterances",
            vec![ConversationStep::me("hey"), ConversationStep::bot("GREETING")],
        );
        runner.run(&script, &transport).await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_and_timeout_are_forwarded() {
        let caps = Capabilities {
            wait_for_bot_timeout: Some(Duration::from_millis(750)),
            ..Capabilities::default()
        };
        let runner = runner(caps);
        let transport = MockTransport::echo();
        let mut bot = ConversationStep::bot("hi");
        bot.channel = Some("#support".to_string());
        let script = ConversationScript::new("channels", vec![ConversationStep::me("hi"), bot]);

        runner.run(&script, &transport).await.unwrap();
        assert_eq!(
            *transport.waits.lock().unwrap(),
            vec![(Some("#support".to_string()), Some(Duration::from_millis(750)))]
        );
    }

    #[tokio::test]
    async fn test_simulated_writing_speed() {
        let caps = Capabilities {
            simulate_writing_speed: Some(10),
            ..Capabilities::default()
        };
        let runner = runner(caps);
        let script = ConversationScript::new(
            "slow",
            vec![ConversationStep::me("hello"), ConversationStep::bot("hello")],
        );
        let started = Instant::now();
        runner.run(&script, &MockTransport::echo()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_run_all_keeps_input_order() {
        let runner = runner(Capabilities::default());
        let ok = MockTransport::echo();
        let broken = MockTransport::scripted();
        let first = ConversationScript::new(
            "first",
            vec![ConversationStep::me("a"), ConversationStep::bot("a")],
        );
        let second = ConversationScript::new(
            "second",
            vec![ConversationStep::me("b"), ConversationStep::bot("b")],
        );

        let results = runner
            .run_all([(&first, &ok), (&second, &broken), (&first, &ok)], 2)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().convo_name, "first");
        assert_eq!(results[1].as_ref().unwrap_err().transcript.convo_name, "second");
        assert!(results[2].is_ok());
    }
}
