use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::api::types::{Message, ParaphraseStyle, Role};
use crate::core::Result;
use crate::core::SessionError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const PARAPHRASE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant specialized in paraphrasing text while preserving its original meaning.";

const PARAPHRASE_TEMPLATE: &str = "{{ .Instruction }}\n\n{{ .Text }}";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

impl From<Role> for PromptRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        }
    }
}

/// A message as handed to the model, which unlike a transcript turn may carry
/// the system role.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Go-style `{{ .Key }}` placeholder substitution.
pub struct Template {
    template: String,
}

impl Template {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    pub fn execute(&self, data: &HashMap<&str, &str>) -> Result<String> {
        let mut result = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find("{{ .") {
            result.push_str(&rest[..start]);
            let tail = &rest[start..];
            let end = tail
                .find("}}")
                .ok_or_else(|| SessionError::Config(format!("unterminated placeholder in {:?}", self.template)))?;
            let key = tail[4..end].trim();
            let value = data
                .get(key)
                .ok_or_else(|| SessionError::Config(format!("unfilled template placeholder {}", &tail[..end + 2])))?;
            result.push_str(value);
            rest = &tail[end + 2..];
        }
        result.push_str(rest);

        Ok(result)
    }
}

pub fn style_instruction(style: ParaphraseStyle) -> &'static str {
    match style {
        ParaphraseStyle::Standard => "Paraphrase this text while maintaining the same meaning:",
        ParaphraseStyle::Formal => "Paraphrase this text in a more formal and professional tone:",
        ParaphraseStyle::Simple => "Paraphrase this text in simpler, easier to understand language:",
    }
}

pub fn paraphrase_messages(style: ParaphraseStyle, text: &str) -> Result<Vec<PromptMessage>> {
    let mut data = HashMap::new();
    data.insert("Instruction", style_instruction(style));
    data.insert("Text", text);
    let user = Template::new(PARAPHRASE_TEMPLATE).execute(&data)?;

    Ok(vec![
        PromptMessage::new(PromptRole::System, PARAPHRASE_SYSTEM_PROMPT),
        PromptMessage::new(PromptRole::User, user),
    ])
}

/// Prepends the system prompt to a transcript. Empty assistant turns (a turn
/// that was opened but produced nothing) are skipped.
pub fn chat_messages(system: &str, transcript: &[Message]) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    if !system.is_empty() {
        messages.push(PromptMessage::new(PromptRole::System, system));
    }
    messages.extend(
        transcript
            .iter()
            .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
            .map(|m| PromptMessage::new(m.role.into(), m.content.clone())),
    );
    messages
}

/// Renders messages in the ChatML layout used by SmolLM-family instruct models.
pub fn render_chatml(messages: &[PromptMessage], add_generation_prompt: bool) -> String {
    let mut prompt = String::new();

    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }

    if add_generation_prompt {
        prompt.push_str("<|im_start|>assistant\n");
    }

    prompt
}
