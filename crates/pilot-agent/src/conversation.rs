use serde::{Deserialize, Serialize};

use crate::capability::Outcome;
use crate::grammar::FunctionCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub outcome: Outcome,
}

/// One entry of the task transcript, tagged by chat role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnEntry {
    Developer { content: String },
    User { content: String },
    AssistantToolCalls { calls: Vec<FunctionCall> },
    ToolResults { results: Vec<ToolResult> },
    AssistantText { content: String },
}

impl TurnEntry {
    pub fn role(&self) -> &'static str {
        match self {
            Self::Developer { .. } => "developer",
            Self::User { .. } => "user",
            Self::AssistantToolCalls { .. } | Self::AssistantText { .. } => "assistant",
            Self::ToolResults { .. } => "tool",
        }
    }
}

/// Append-only transcript of a single task. Only the orchestrator running
/// the task can extend it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    entries: Vec<TurnEntry>,
}

impl Conversation {
    pub(crate) fn start(developer_prompt: &str, task: &str) -> Self {
        Self {
            entries: vec![
                TurnEntry::Developer {
                    content: developer_prompt.to_string(),
                },
                TurnEntry::User {
                    content: task.to_string(),
                },
            ],
        }
    }

    pub(crate) fn push(&mut self, entry: TurnEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TurnEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TurnEntry> {
        self.entries.last()
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.entries.iter().flat_map(|entry| match entry {
            TurnEntry::ToolResults { results } => results.as_slice(),
            _ => &[][..],
        })
    }
}
