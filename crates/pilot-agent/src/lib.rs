//! Function-call protocol and multi-turn orchestration for small local
//! models. The crate parses the model's terse call syntax, dispatches calls
//! against a registry of host capabilities, and folds the outcomes back into
//! the conversation until the model signals completion.

pub mod capability;
pub mod conversation;
pub mod grammar;
pub mod language_model;
pub mod orchestrator;
pub mod registry;
pub mod value;

pub use capability::{
    Capability, CapabilityDescriptor, CapabilityError, Outcome, OutcomeStatus, ParameterSpec,
    TaskDone, TASK_DONE,
};
pub use conversation::{Conversation, ToolResult, TurnEntry};
pub use grammar::{contains_call_marker, parse, FunctionCall, ProtocolError};
pub use language_model::{
    GenerationOptions, GenerationRequest, LanguageModelClient, LanguageModelResponse,
    LanguageModelUsage,
};
pub use orchestrator::{
    AgentConfig, AgentEvent, AgentOrchestrator, AgentState, ConfigError, StopReason, TaskReport,
};
pub use registry::CapabilityRegistry;
pub use value::{coerce, Arguments, Value, ValueKind};
