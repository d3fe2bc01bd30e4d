use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;

use crate::value::{Arguments, ValueKind};

pub const TASK_DONE: &str = "task_done";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ValueKind,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Closed set of accepted values, rendered as a JSON-schema `enum`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ValueKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            allowed: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: ValueKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }
}

/// Declaration of a capability as handed to the model service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn accepts(&self, key: &str) -> bool {
        self.parameters.iter().any(|param| param.name == key)
    }

    /// JSON-schema object describing the parameters, in the shape chat
    /// templates expect for tool declarations.
    pub fn input_schema(&self) -> JsonValue {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = json!({
                "type": param.kind.json_type(),
                "description": param.description,
            });
            if !param.allowed.is_empty() {
                property["enum"] = json!(param.allowed);
            }
            properties.insert(param.name.clone(), property);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_tool_declaration(&self) -> JsonValue {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema(),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    Complete,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

/// Normalized result of one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Complete,
            message: message.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == OutcomeStatus::Complete
    }

    pub fn is_error(&self) -> bool {
        self.status == OutcomeStatus::Error
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("action denied: {0}")]
    Denied(String),
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &CapabilityDescriptor;
    async fn invoke(&self, args: &Arguments) -> Result<Outcome, CapabilityError>;
}

/// Completion sentinel. Calling it ends the task.
pub struct TaskDone {
    descriptor: CapabilityDescriptor,
}

impl TaskDone {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(TASK_DONE, "Indicate that the task is complete."),
        }
    }
}

impl Default for TaskDone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for TaskDone {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, _args: &Arguments) -> Result<Outcome, CapabilityError> {
        Ok(Outcome::complete("task finished"))
    }
}
