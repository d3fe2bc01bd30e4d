use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capability::Outcome;
use crate::conversation::{Conversation, ToolResult, TurnEntry};
use crate::grammar::{self, FunctionCall};
use crate::language_model::{GenerationOptions, GenerationRequest, LanguageModelClient};
use crate::registry::CapabilityRegistry;

/// Orchestrator settings. `max_turns` has no default and must be supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "AgentConfig::default_developer_prompt")]
    pub developer_prompt: String,
    pub max_turns: usize,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl AgentConfig {
    pub fn new(max_turns: usize) -> Self {
        Self {
            developer_prompt: Self::default_developer_prompt(),
            max_turns,
            options: GenerationOptions::default(),
        }
    }

    fn default_developer_prompt() -> String {
        DEFAULT_DEVELOPER_PROMPT.trim().to_string()
    }

    pub fn with_developer_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.developer_prompt = prompt.into();
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ZeroTurnBudget);
        }
        if self.developer_prompt.trim().is_empty() {
            return Err(ConfigError::EmptyDeveloperPrompt);
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_turns must be at least 1")]
    ZeroTurnBudget,
    #[error("developer prompt must not be empty")]
    EmptyDeveloperPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    NoCallDetected,
    TurnBudgetExhausted,
    PlainTextAnswer,
}

/// Orchestrator state machine. `Idle` only precedes the first task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    Idle,
    Running { turn: usize },
    AwaitingModel { turn: usize },
    Dispatching { turn: usize },
    Done(StopReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentEvent {
    ModelResponse { turn: usize, raw: String },
    ToolCall { turn: usize, call: FunctionCall },
    ToolResult { turn: usize, name: String, outcome: Outcome },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub reason: StopReason,
    /// Number of generations requested before stopping.
    pub turns: usize,
    pub final_text: Option<String>,
    pub transcript: Conversation,
    pub events: Vec<AgentEvent>,
    /// Every state entered while running the task, ending with `Done`.
    pub states: Vec<AgentState>,
}

pub struct AgentOrchestrator {
    model: Arc<dyn LanguageModelClient>,
    config: AgentConfig,
    registry: CapabilityRegistry,
    state: AgentState,
    states: Vec<AgentState>,
}

impl AgentOrchestrator {
    pub fn new(
        model: Arc<dyn LanguageModelClient>,
        config: AgentConfig,
        registry: CapabilityRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            registry,
            state: AgentState::Idle,
            states: Vec::new(),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Runs `task` to completion against a fresh conversation.
    ///
    /// Only a failing model service is reported as `Err`; every other way a
    /// task can end is a [`StopReason`] in the report.
    pub async fn run_task(&mut self, task: &str) -> Result<TaskReport> {
        let mut conversation = Conversation::start(&self.config.developer_prompt, task);
        let tools = self.registry.descriptors();
        let mut events = Vec::new();
        self.states.clear();
        info!(max_turns = self.config.max_turns, tools = tools.len(), "starting task");

        for turn in 1..=self.config.max_turns {
            self.transition(AgentState::Running { turn });
            self.transition(AgentState::AwaitingModel { turn });
            let request = GenerationRequest {
                conversation: conversation.entries(),
                tools: &tools,
                options: &self.config.options,
            };
            let response = self
                .model
                .complete(request)
                .await
                .with_context(|| format!("model generation failed on turn {turn}"))?;
            let raw = response.text;
            debug!(turn, raw = %raw, "model output");
            events.push(AgentEvent::ModelResponse {
                turn,
                raw: raw.clone(),
            });

            if !grammar::contains_call_marker(&raw) {
                let answer = raw.trim().to_string();
                conversation.push(TurnEntry::AssistantText {
                    content: answer.clone(),
                });
                return Ok(self.finish(
                    StopReason::PlainTextAnswer,
                    turn,
                    Some(answer),
                    conversation,
                    events,
                ));
            }

            let calls = grammar::parse(&raw);
            if calls.is_empty() {
                warn!(turn, "call markers present but no call could be parsed");
                return Ok(self.finish(
                    StopReason::NoCallDetected,
                    turn,
                    None,
                    conversation,
                    events,
                ));
            }
            conversation.push(TurnEntry::AssistantToolCalls {
                calls: calls.clone(),
            });

            self.transition(AgentState::Dispatching { turn });
            let mut results = Vec::with_capacity(calls.len());
            let mut completed = false;
            for (idx, call) in calls.iter().enumerate() {
                events.push(AgentEvent::ToolCall {
                    turn,
                    call: call.clone(),
                });
                let outcome = self.registry.dispatch(call).await;
                events.push(AgentEvent::ToolResult {
                    turn,
                    name: call.name.clone(),
                    outcome: outcome.clone(),
                });
                completed = outcome.is_complete();
                results.push(ToolResult {
                    name: call.name.clone(),
                    outcome,
                });
                if completed {
                    let skipped = calls.len() - idx - 1;
                    if skipped > 0 {
                        debug!(turn, skipped, "dropping calls queued after completion");
                    }
                    break;
                }
            }
            conversation.push(TurnEntry::ToolResults { results });

            if completed {
                return Ok(self.finish(StopReason::Completed, turn, None, conversation, events));
            }
        }

        warn!(max_turns = self.config.max_turns, "agent exhausted its turn budget");
        Ok(self.finish(
            StopReason::TurnBudgetExhausted,
            self.config.max_turns,
            None,
            conversation,
            events,
        ))
    }

    fn transition(&mut self, state: AgentState) {
        debug!(?state, "agent state");
        self.state = state;
        self.states.push(state);
    }

    fn finish(
        &mut self,
        reason: StopReason,
        turns: usize,
        final_text: Option<String>,
        transcript: Conversation,
        events: Vec<AgentEvent>,
    ) -> TaskReport {
        self.transition(AgentState::Done(reason));
        info!(?reason, turns, "task finished");
        TaskReport {
            reason,
            turns,
            final_text,
            transcript,
            events,
            states: std::mem::take(&mut self.states),
        }
    }
}

const DEFAULT_DEVELOPER_PROMPT: &str = r#"
You are a model that can do function calling with the following functions. Execute the user's task step by step. Call task_done when finished.
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        Capability, CapabilityDescriptor, CapabilityError, OutcomeStatus, TaskDone,
    };
    use crate::language_model::LanguageModelResponse;
    use crate::value::{Arguments, Value};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex as TokioMutex;

    struct ScriptedModel {
        responses: TokioMutex<VecDeque<String>>,
        fallback: Option<String>,
        seen_lengths: TokioMutex<Vec<usize>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: TokioMutex::new(responses.into_iter().map(String::from).collect()),
                fallback: None,
                seen_lengths: TokioMutex::new(Vec::new()),
            })
        }

        fn repeating(response: &str) -> Arc<Self> {
            Arc::new(Self {
                responses: TokioMutex::new(VecDeque::new()),
                fallback: Some(response.to_string()),
                seen_lengths: TokioMutex::new(Vec::new()),
            })
        }

        async fn calls(&self) -> Vec<usize> {
            self.seen_lengths.lock().await.clone()
        }
    }

    #[async_trait]
    impl LanguageModelClient for ScriptedModel {
        async fn complete(&self, request: GenerationRequest<'_>) -> Result<LanguageModelResponse> {
            self.seen_lengths.lock().await.push(request.conversation.len());
            let next = self.responses.lock().await.pop_front();
            match next.or_else(|| self.fallback.clone()) {
                Some(text) => Ok(LanguageModelResponse::new(text)),
                None => Err(anyhow::anyhow!("scripted model ran out of responses")),
            }
        }
    }

    struct Recorder {
        descriptor: CapabilityDescriptor,
        log: Arc<TokioMutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &str, log: &Arc<TokioMutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                descriptor: CapabilityDescriptor::new(name, "records invocations"),
                log: log.clone(),
            })
        }
    }

    #[async_trait]
    impl Capability for Recorder {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn invoke(&self, args: &Arguments) -> std::result::Result<Outcome, CapabilityError> {
            let rendered: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.log
                .lock()
                .await
                .push(format!("{}({})", self.descriptor.name, rendered.join(",")));
            Ok(Outcome::success(format!("{} ok", self.descriptor.name)))
        }
    }

    fn desktop_registry(log: &Arc<TokioMutex<Vec<String>>>) -> CapabilityRegistry {
        CapabilityRegistry::new()
            .with(Recorder::new("open_app", log))
            .with(Recorder::new("type_text", log))
            .with(Recorder::new("press_key", log))
            .with(Arc::new(TaskDone::new()))
    }

    fn orchestrator(model: Arc<ScriptedModel>, log: &Arc<TokioMutex<Vec<String>>>, max_turns: usize) -> AgentOrchestrator {
        AgentOrchestrator::new(model, AgentConfig::new(max_turns), desktop_registry(log))
            .expect("valid config")
    }

    const OPEN_AND_TYPE: &str = "<start_function_call>call:open_app{app_name:<escape>notepad<escape>}<end_function_call><start_function_call>call:type_text{text:<escape>Hello<escape>}<end_function_call>";
    const DONE: &str = "<start_function_call>call:task_done{}<end_function_call>";

    #[tokio::test]
    async fn plain_text_ends_on_first_turn() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let model = ScriptedModel::repeating("Notepad is already open.");
        let mut agent = orchestrator(model.clone(), &log, 10);

        let report = agent.run_task("Is notepad open?").await.unwrap();
        assert_eq!(report.reason, StopReason::PlainTextAnswer);
        assert_eq!(report.turns, 1);
        assert_eq!(report.final_text.as_deref(), Some("Notepad is already open."));
        assert!(matches!(
            report.transcript.last(),
            Some(TurnEntry::AssistantText { .. })
        ));
        assert_eq!(model.calls().await.len(), 1);
        assert_eq!(agent.state(), AgentState::Done(StopReason::PlainTextAnswer));
    }

    #[tokio::test]
    async fn completion_call_ends_on_first_turn() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let mut agent = orchestrator(ScriptedModel::repeating(DONE), &log, 10);

        let report = agent.run_task("Nothing to do").await.unwrap();
        assert_eq!(report.reason, StopReason::Completed);
        assert_eq!(report.turns, 1);
        assert!(log.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dispatches_turn_calls_in_order_then_continues() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let model = ScriptedModel::new(vec![OPEN_AND_TYPE, DONE]);
        let mut agent = orchestrator(model.clone(), &log, 10);

        let report = agent
            .run_task("Open notepad and type \"Hello\"")
            .await
            .unwrap();

        assert_eq!(
            *log.lock().await,
            ["open_app(app_name=notepad)", "type_text(text=Hello)"]
        );
        let entries = report.transcript.entries();
        match &entries[3] {
            TurnEntry::ToolResults { results } => {
                assert_eq!(results.len(), 2);
                assert_eq!(results[0].name, "open_app");
                assert_eq!(results[1].name, "type_text");
                assert!(results
                    .iter()
                    .all(|result| result.outcome.status == OutcomeStatus::Success));
            }
            other => panic!("expected tool results, got {other:?}"),
        }
        // Turn two saw developer, user, the batched calls and their results.
        assert_eq!(model.calls().await, [2, 4]);
        assert_eq!(report.reason, StopReason::Completed);
        assert_eq!(report.turns, 2);
    }

    #[tokio::test]
    async fn each_turn_runs_then_awaits_then_dispatches() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let mut agent = orchestrator(ScriptedModel::new(vec![OPEN_AND_TYPE, DONE]), &log, 10);
        assert_eq!(agent.state(), AgentState::Idle);

        let report = agent.run_task("Open notepad").await.unwrap();
        assert_eq!(
            report.states,
            [
                AgentState::Running { turn: 1 },
                AgentState::AwaitingModel { turn: 1 },
                AgentState::Dispatching { turn: 1 },
                AgentState::Running { turn: 2 },
                AgentState::AwaitingModel { turn: 2 },
                AgentState::Dispatching { turn: 2 },
                AgentState::Done(StopReason::Completed),
            ]
        );
        assert_eq!(agent.state(), AgentState::Done(StopReason::Completed));
    }

    #[tokio::test]
    async fn calls_after_completion_are_not_dispatched() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let turn = "<start_function_call>call:press_key{key:<escape>enter<escape>}<end_function_call>\
                    <start_function_call>call:task_done{}<end_function_call>\
                    <start_function_call>call:type_text{text:<escape>late<escape>}<end_function_call>";
        let mut agent = orchestrator(ScriptedModel::new(vec![turn]), &log, 10);

        let report = agent.run_task("Press enter").await.unwrap();
        assert_eq!(report.reason, StopReason::Completed);
        assert_eq!(*log.lock().await, ["press_key(key=enter)"]);

        let Some(TurnEntry::AssistantToolCalls { calls }) = report.transcript.entries().get(2) else {
            panic!("expected assistant tool calls");
        };
        assert_eq!(calls.len(), 3);
        let Some(TurnEntry::ToolResults { results }) = report.transcript.last() else {
            panic!("expected tool results");
        };
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["press_key", "task_done"]);
    }

    #[tokio::test]
    async fn unknown_function_does_not_stop_the_turn() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let turn = "<start_function_call>call:g{}<end_function_call>\
                    <start_function_call>call:type_text{text:<escape>still here<escape>}<end_function_call>";
        let mut agent = orchestrator(ScriptedModel::new(vec![turn, DONE]), &log, 10);

        let report = agent.run_task("Do things").await.unwrap();
        assert_eq!(*log.lock().await, ["type_text(text=still here)"]);
        let results: Vec<&ToolResult> = report.transcript.tool_results().collect();
        assert_eq!(results[0].outcome, Outcome::error("unknown function 'g'"));
        assert_eq!(results[1].outcome.status, OutcomeStatus::Success);
        assert_eq!(report.reason, StopReason::Completed);
    }

    #[tokio::test]
    async fn malformed_call_stops_with_no_call_detected() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let broken = "<start_function_call>call:open_app{app_name:<escape>notepad";
        let mut agent = orchestrator(ScriptedModel::new(vec![broken]), &log, 10);

        let report = agent.run_task("Open notepad").await.unwrap();
        assert_eq!(report.reason, StopReason::NoCallDetected);
        assert_eq!(report.turns, 1);
        assert_eq!(report.transcript.len(), 2);
    }

    #[tokio::test]
    async fn bracketed_dialect_is_dispatched_too() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let model = ScriptedModel::new(vec!["call:open_app{app_name:<escape>calculator<escape>}", DONE]);
        let mut agent = orchestrator(model, &log, 10);

        agent.run_task("Open calculator").await.unwrap();
        assert_eq!(*log.lock().await, ["open_app(app_name=calculator)"]);
    }

    #[tokio::test]
    async fn stops_when_turn_budget_is_exhausted() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let model = ScriptedModel::repeating(
            "<start_function_call>call:press_key{key:<escape>tab<escape>}<end_function_call>",
        );
        let mut agent = orchestrator(model.clone(), &log, 3);

        let report = agent.run_task("Keep tabbing").await.unwrap();
        assert_eq!(report.reason, StopReason::TurnBudgetExhausted);
        assert_eq!(report.turns, 3);
        assert_eq!(model.calls().await, [2, 4, 6]);
        assert_eq!(log.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn model_failure_is_propagated_with_context() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let mut agent = orchestrator(ScriptedModel::new(vec![]), &log, 2);

        let err = agent.run_task("anything").await.unwrap_err();
        assert!(format!("{err:#}").contains("turn 1"));
    }

    #[tokio::test]
    async fn events_mirror_dispatch_order() {
        let log = Arc::new(TokioMutex::new(Vec::new()));
        let mut agent = orchestrator(ScriptedModel::new(vec![OPEN_AND_TYPE, DONE]), &log, 10);

        let report = agent.run_task("Open notepad").await.unwrap();
        let tool_calls: Vec<&str> = report
            .events
            .iter()
            .filter_map(|event| match event {
                AgentEvent::ToolCall { call, .. } => Some(call.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tool_calls, ["open_app", "type_text", "task_done"]);
        assert!(matches!(
            &report.events[1],
            AgentEvent::ToolCall { turn: 1, call } if call.arguments.get("app_name") == Some(&Value::from("notepad"))
        ));
    }

    #[test]
    fn config_requires_a_positive_turn_budget() {
        assert_eq!(AgentConfig::new(0).validate(), Err(ConfigError::ZeroTurnBudget));
        assert_eq!(
            AgentConfig::new(3).with_developer_prompt("  ").validate(),
            Err(ConfigError::EmptyDeveloperPrompt)
        );

        let parsed: AgentConfig = serde_json::from_str(r#"{"max_turns": 10}"#).unwrap();
        assert_eq!(parsed.max_turns, 10);
        assert!(parsed.developer_prompt.contains("task_done"));
        assert_eq!(parsed.options.max_new_tokens, Some(256));
        assert!(serde_json::from_str::<AgentConfig>("{}").is_err());
    }
}
