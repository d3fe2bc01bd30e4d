use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityDescriptor;
use crate::conversation::TurnEntry;
use crate::grammar::ProtocolError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "GenerationOptions::default_max_new_tokens")]
    pub max_new_tokens: Option<u32>,
}

impl GenerationOptions {
    fn default_max_new_tokens() -> Option<u32> {
        Some(256)
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_new_tokens: Self::default_max_new_tokens(),
        }
    }
}

/// Everything the model service needs to produce the next assistant turn.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub conversation: &'a [TurnEntry],
    pub tools: &'a [CapabilityDescriptor],
    pub options: &'a GenerationOptions,
}

impl GenerationRequest<'_> {
    /// Flattens the request into one prompt for services without a chat
    /// template. Past calls are written back in the tagged dialect so the
    /// model sees the syntax it is expected to produce.
    pub fn render_prompt(&self) -> Result<String, ProtocolError> {
        let mut prompt = String::new();
        prompt.push_str("<<TOOLS>>\n");
        for tool in self.tools {
            let params: Vec<&str> = tool.parameters.iter().map(|p| p.name.as_str()).collect();
            prompt.push_str(&format!(
                "- {}({}): {}\n",
                tool.name,
                params.join(", "),
                tool.description
            ));
        }
        prompt.push_str("<<CONTEXT>>\n");
        for entry in self.conversation {
            match entry {
                TurnEntry::Developer { content } => {
                    prompt.push_str("Developer: ");
                    prompt.push_str(content);
                    prompt.push('\n');
                }
                TurnEntry::User { content } => {
                    prompt.push_str("User: ");
                    prompt.push_str(content);
                    prompt.push('\n');
                }
                TurnEntry::AssistantText { content } => {
                    prompt.push_str("Assistant: ");
                    prompt.push_str(content);
                    prompt.push('\n');
                }
                TurnEntry::AssistantToolCalls { calls } => {
                    prompt.push_str("Assistant: ");
                    for call in calls {
                        prompt.push_str(&call.to_protocol()?);
                    }
                    prompt.push('\n');
                }
                TurnEntry::ToolResults { results } => {
                    for result in results {
                        prompt.push_str(&format!(
                            "Tool {} [{}]: {}\n",
                            result.name,
                            result.outcome.status.as_str(),
                            result.outcome.message
                        ));
                    }
                }
            }
        }
        Ok(prompt)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageModelUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModelResponse {
    /// Decoded continuation only, without the prompt echo.
    pub text: String,
    pub usage: LanguageModelUsage,
}

impl LanguageModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: LanguageModelUsage::default(),
        }
    }
}

#[async_trait]
pub trait LanguageModelClient: Send + Sync {
    async fn complete(&self, request: GenerationRequest<'_>) -> Result<LanguageModelResponse>;
}
