use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pilot_agent::{
    AgentConfig, AgentOrchestrator, Arguments, Capability, CapabilityDescriptor, CapabilityError,
    CapabilityRegistry, ConfigError, LanguageModelClient, Outcome, ParameterSpec, TaskDone,
    TaskReport, ValueKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::approvals::ApprovalHandler;
use crate::desktop::{
    DesktopAction, DesktopBackend, DesktopEvent, DesktopInstrumentation, RecordingBackend,
};
use crate::ledger::RunLedger;
use crate::policy::{ActionKind, ActionPolicy};

const MAX_VOLUME: i64 = 100;
const MAX_WAIT_SECONDS: i64 = 60;

#[derive(Clone)]
struct SharedState {
    policy: Arc<Mutex<ActionPolicy>>,
    instrumentation: Arc<Mutex<DesktopInstrumentation>>,
    backend: Arc<dyn DesktopBackend>,
    approval: Option<Arc<dyn ApprovalHandler>>,
}

impl SharedState {
    fn new(
        policy: ActionPolicy,
        backend: Arc<dyn DesktopBackend>,
        approval: Option<Arc<dyn ApprovalHandler>>,
    ) -> Self {
        Self {
            policy: Arc::new(Mutex::new(policy)),
            instrumentation: Arc::new(Mutex::new(DesktopInstrumentation::new())),
            backend,
            approval,
        }
    }

    async fn request_approval(&self, kind: ActionKind, action: &DesktopAction) -> Result<bool> {
        match &self.approval {
            Some(handler) => handler.request_approval(kind, action).await,
            None => Ok(true),
        }
    }

    async fn execute(
        &self,
        kind: ActionKind,
        action: DesktopAction,
    ) -> Result<Outcome, CapabilityError> {
        let approved = self
            .request_approval(kind, &action)
            .await
            .map_err(|err| CapabilityError::Invocation(format!("approval request failed: {err}")))?;
        if !approved {
            return Err(CapabilityError::Denied(format!(
                "{kind} rejected by user approval flow"
            )));
        }

        let remaining = {
            let mut policy = self.policy.lock().await;
            policy
                .consume(kind)
                .map_err(|err| CapabilityError::Denied(err.to_string()))?
        };

        self.backend
            .perform(&action)
            .await
            .map_err(|err| CapabilityError::Invocation(err.to_string()))?;

        let observation = {
            let mut instrumentation = self.instrumentation.lock().await;
            instrumentation.record(action)
        };
        debug!(
            action = %kind,
            sequence = observation.event.sequence,
            ?remaining,
            "desktop action performed"
        );

        Ok(Outcome::success(observation.message))
    }
}

/// Registry-facing wrapper for one desktop action.
struct DesktopCapability {
    descriptor: CapabilityDescriptor,
    kind: ActionKind,
    state: SharedState,
}

impl DesktopCapability {
    fn new(kind: ActionKind, state: SharedState) -> Self {
        Self {
            descriptor: descriptor_for(kind),
            kind,
            state,
        }
    }
}

#[async_trait]
impl Capability for DesktopCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: &Arguments) -> Result<Outcome, CapabilityError> {
        let action = action_from_arguments(self.kind, args)?;
        self.state.execute(self.kind, action).await
    }
}

fn action_from_arguments(
    kind: ActionKind,
    args: &Arguments,
) -> Result<DesktopAction, CapabilityError> {
    match kind {
        ActionKind::OpenApp => {
            let app_name = non_empty(args.required_text("app_name")?, "app_name")?;
            Ok(DesktopAction::open_app(&app_name))
        }
        ActionKind::TypeText => Ok(DesktopAction::TypeText {
            text: args.required_text("text")?,
        }),
        ActionKind::PressKey => {
            let key = non_empty(args.required_text("key")?, "key")?;
            Ok(DesktopAction::press_key(&key))
        }
        ActionKind::ClickMouse => {
            let position = match (args.optional_i64("x")?, args.optional_i64("y")?) {
                (Some(x), Some(y)) => Some((x, y)),
                _ => None,
            };
            Ok(DesktopAction::Click { position })
        }
        ActionKind::SetVolume => {
            let level = in_range(args.required_i64("level")?, 0, MAX_VOLUME, "level")?;
            Ok(DesktopAction::SetVolume { level: level as u8 })
        }
        ActionKind::Wait => {
            let seconds = in_range(args.required_i64("seconds")?, 0, MAX_WAIT_SECONDS, "seconds")?;
            Ok(DesktopAction::Wait {
                seconds: seconds as u64,
            })
        }
        ActionKind::SearchWeb => {
            let query = non_empty(args.required_text("query")?, "query")?;
            Ok(DesktopAction::search_web(&query))
        }
        ActionKind::ToggleWifi => {
            let state = args.required_text("state")?;
            let on = match state.trim().to_ascii_lowercase().as_str() {
                "on" | "true" => true,
                "off" | "false" => false,
                other => {
                    return Err(CapabilityError::InvalidInput(format!(
                        "state must be 'on' or 'off', got '{other}'"
                    )))
                }
            };
            Ok(DesktopAction::ToggleWifi { on })
        }
    }
}

fn non_empty(value: String, key: &str) -> Result<String, CapabilityError> {
    if value.trim().is_empty() {
        return Err(CapabilityError::InvalidInput(format!("{key} must not be empty")));
    }
    Ok(value)
}

fn in_range(value: i64, min: i64, max: i64, key: &str) -> Result<i64, CapabilityError> {
    if !(min..=max).contains(&value) {
        return Err(CapabilityError::InvalidInput(format!(
            "{key} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn descriptor_for(kind: ActionKind) -> CapabilityDescriptor {
    let descriptor = |description: &str| CapabilityDescriptor::new(kind.as_str(), description);
    match kind {
        ActionKind::OpenApp => descriptor("Open an application by name").with_parameter(
            ParameterSpec::required(
                "app_name",
                ValueKind::String,
                "Name of the application (e.g., notepad, chrome, calculator)",
            ),
        ),
        ActionKind::TypeText => descriptor("Type text using keyboard").with_parameter(
            ParameterSpec::required("text", ValueKind::String, "The text to type"),
        ),
        ActionKind::PressKey => descriptor("Press a keyboard key or key combination")
            .with_parameter(ParameterSpec::required(
                "key",
                ValueKind::String,
                "Key name (e.g., enter, ctrl+s, alt+f4)",
            )),
        ActionKind::ClickMouse => {
            descriptor("Click the mouse at current position or coordinates")
                .with_parameter(ParameterSpec::optional(
                    "x",
                    ValueKind::Integer,
                    "X coordinate (optional)",
                ))
                .with_parameter(ParameterSpec::optional(
                    "y",
                    ValueKind::Integer,
                    "Y coordinate (optional)",
                ))
        }
        ActionKind::SetVolume => descriptor("Set system volume level").with_parameter(
            ParameterSpec::required("level", ValueKind::Integer, "Volume level 0-100"),
        ),
        ActionKind::Wait => descriptor("Wait for a specified number of seconds").with_parameter(
            ParameterSpec::required("seconds", ValueKind::Integer, "Number of seconds to wait"),
        ),
        ActionKind::SearchWeb => descriptor("Search the web for a query").with_parameter(
            ParameterSpec::required("query", ValueKind::String, "Search query"),
        ),
        ActionKind::ToggleWifi => descriptor("Turn WiFi on or off").with_parameter(
            ParameterSpec::required("state", ValueKind::String, "Either 'on' or 'off'")
                .with_allowed(["on", "off"]),
        ),
    }
}

pub struct DesktopRuntime {
    orchestrator: AgentOrchestrator,
    state: SharedState,
}

impl DesktopRuntime {
    pub fn builder(model: Arc<dyn LanguageModelClient>, config: AgentConfig) -> DesktopRuntimeBuilder {
        DesktopRuntimeBuilder::new(model, config)
    }

    /// Runs one task. Quotas are refilled first; revocations carry over.
    pub async fn run(&mut self, task: &str) -> Result<DesktopRunReport> {
        self.state.policy.lock().await.reset_run();
        let report = self.orchestrator.run_task(task).await?;
        let ledger = RunLedger::from_events(task, &report.events);
        info!(
            reason = ?report.reason,
            dispatched = ledger.entries().len(),
            ledger_root = %ledger.root_hash(),
            "desktop task finished"
        );
        Ok(DesktopRunReport {
            agent: report,
            ledger,
        })
    }

    pub async fn events(&self) -> Vec<DesktopEvent> {
        let guard = self.state.instrumentation.lock().await;
        guard.events().to_vec()
    }

    pub async fn revoke(&self, kind: ActionKind) {
        let mut guard = self.state.policy.lock().await;
        guard.revoke(kind);
    }

    pub async fn remaining(&self, kind: ActionKind) -> Option<u32> {
        let guard = self.state.policy.lock().await;
        guard.remaining(kind)
    }

    pub fn tool_descriptions(&self) -> Vec<CapabilityDescriptor> {
        self.orchestrator.registry().descriptors()
    }
}

pub struct DesktopRuntimeBuilder {
    model: Arc<dyn LanguageModelClient>,
    config: AgentConfig,
    policy: ActionPolicy,
    backend: Arc<dyn DesktopBackend>,
    approval_handler: Option<Arc<dyn ApprovalHandler>>,
    extra: Vec<Arc<dyn Capability>>,
}

impl DesktopRuntimeBuilder {
    fn new(model: Arc<dyn LanguageModelClient>, config: AgentConfig) -> Self {
        Self {
            model,
            config,
            policy: ActionPolicy::with_desktop_defaults(),
            backend: Arc::new(RecordingBackend::new()),
            approval_handler: None,
            extra: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: ActionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn DesktopBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    /// Extra host capability, registered after the built-in ones so it can
    /// replace one of them by name.
    pub fn register_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.extra.push(capability);
        self
    }

    pub fn build(self) -> Result<DesktopRuntime, ConfigError> {
        let state = SharedState::new(self.policy, self.backend, self.approval_handler);
        let mut registry = CapabilityRegistry::new();
        for kind in ActionKind::ALL {
            registry.register(Arc::new(DesktopCapability::new(kind, state.clone())));
        }
        registry.register(Arc::new(TaskDone::new()));
        for capability in self.extra {
            registry.register(capability);
        }

        let orchestrator = AgentOrchestrator::new(self.model, self.config, registry)?;
        Ok(DesktopRuntime {
            orchestrator,
            state,
        })
    }
}

#[derive(Debug)]
pub struct DesktopRunReport {
    pub agent: TaskReport,
    /// Every call dispatched during this run, hash-chained.
    pub ledger: RunLedger,
}
