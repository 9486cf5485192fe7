//! Deterministic stand-in for the in-browser inference runtime. It walks the
//! same event sequences a real model pipeline produces (probe, per-file
//! downloads, token streaming, image steps) without doing any inference.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::api::types::{ImageBlob, Message, ParaphraseStyle, Role, WorkerEvent};
use crate::app::runner::{EventSink, GenerationContext, WorkerBackend};
use crate::envconfig::Config;
use crate::template::{self, PromptMessage};

/// Prefix on the last user turn that asks for an image instead of text.
pub const IMAGE_PREFIX: &str = "/imagine ";

/// 1x1 transparent PNG.
const PLACEHOLDER_PNG: [u8; 67] = [
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

pub type Responder = Box<dyn FnMut(&[PromptMessage]) -> String + Send>;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedFile {
    pub file: String,
    pub size: u64,
}

impl ScriptedFile {
    pub fn new(file: impl Into<String>, size: u64) -> Self {
        Self {
            file: file.into(),
            size,
        }
    }
}

pub struct ScriptedBackend {
    config: Config,
    files: Vec<ScriptedFile>,
    progress_steps: u32,
    supported: bool,
    load_error: Option<String>,
    responder: Responder,
}

impl ScriptedBackend {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            files: vec![
                ScriptedFile::new("config.json", 880),
                ScriptedFile::new("tokenizer.json", 3_520_000),
                ScriptedFile::new("onnx/model_q4f16.onnx", 1_130_000_000),
            ],
            progress_steps: 4,
            supported: true,
            load_error: None,
            responder: Box::new(echo_reply),
        }
    }

    pub fn files(mut self, files: Vec<ScriptedFile>) -> Self {
        self.files = files;
        self
    }

    pub fn progress_steps(mut self, steps: u32) -> Self {
        self.progress_steps = steps.max(1);
        self
    }

    /// Makes the capability probe fail.
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn failing_load(mut self, message: impl Into<String>) -> Self {
        self.load_error = Some(message.into());
        self
    }

    pub fn responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&[PromptMessage]) -> String + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    fn tokens_per_second(&self) -> f64 {
        if self.config.token_interval_ms == 0 {
            1000.0
        } else {
            1000.0 / self.config.token_interval_ms as f64
        }
    }

    async fn stream_text(&mut self, prompt: Vec<PromptMessage>, ctx: &GenerationContext) -> Result<()> {
        tracing::debug!(
            prompt_chars = template::render_chatml(&prompt, true).len(),
            "prompt rendered"
        );
        let reply = (self.responder)(&prompt);
        let tps = self.tokens_per_second();

        for (i, token) in split_tokens(&reply).into_iter().take(self.config.max_new_tokens).enumerate() {
            if ctx.is_interrupted() {
                tracing::debug!("generation interrupted");
                break;
            }
            pace(self.config.token_interval_ms).await;
            ctx.sink.emit(WorkerEvent::TextUpdate {
                output: token.to_string(),
                tps,
                num_tokens: i as u64 + 1,
                generation: ctx.generation,
            })?;
        }
        Ok(())
    }

    async fn paint(&mut self, ctx: &GenerationContext) -> Result<()> {
        let steps = self.config.image_steps.max(1);
        for step in 1..=steps {
            if ctx.is_interrupted() {
                return Ok(());
            }
            pace(self.config.token_interval_ms).await;
            ctx.sink.emit(WorkerEvent::ImageUpdate {
                blob: None,
                progress: Some(step as f64 / steps as f64),
                time: Some((step as u64 * self.config.token_interval_ms) as f64),
                generation: ctx.generation,
            })?;
        }
        ctx.sink.emit(WorkerEvent::ImageUpdate {
            blob: Some(ImageBlob::png(PLACEHOLDER_PNG.to_vec())),
            progress: None,
            time: None,
            generation: ctx.generation,
        })
    }
}

#[async_trait]
impl WorkerBackend for ScriptedBackend {
    async fn check(&mut self) -> Result<()> {
        if !self.supported {
            return Err(anyhow!("WebGPU is not supported by this browser."));
        }
        Ok(())
    }

    async fn load(&mut self, sink: &EventSink) -> Result<()> {
        sink.emit(WorkerEvent::Loading {
            data: format!("Loading {} ({}, {})...", self.config.model, self.config.dtype, self.config.device),
        })?;

        for f in &self.files {
            sink.emit(WorkerEvent::Initiate {
                file: f.file.clone(),
                progress: 0.0,
                name: Some(self.config.model.clone()),
                loaded: Some(0),
                total: Some(f.size),
            })?;
            for step in 1..=self.progress_steps {
                if let Some(message) = &self.load_error {
                    return Err(anyhow!("{}", message));
                }
                pace(self.config.token_interval_ms).await;
                let loaded = f.size * step as u64 / self.progress_steps as u64;
                sink.emit(WorkerEvent::Progress {
                    file: f.file.clone(),
                    progress: step as f64 * 100.0 / self.progress_steps as f64,
                    loaded: Some(loaded),
                    total: Some(f.size),
                })?;
            }
            sink.emit(WorkerEvent::Done { file: f.file.clone() })?;
        }

        sink.emit(WorkerEvent::Loading {
            data: "Compiling shaders and warming up model...".to_string(),
        })
    }

    async fn generate(&mut self, messages: Vec<Message>, ctx: &GenerationContext) -> Result<()> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| anyhow!("no user message to respond to"))?;

        if last_user.content.starts_with(IMAGE_PREFIX) {
            return self.paint(ctx).await;
        }

        let prompt = template::chat_messages(&self.config.system_prompt, &messages);
        self.stream_text(prompt, ctx).await
    }

    async fn paraphrase(&mut self, text: String, style: ParaphraseStyle, ctx: &GenerationContext) -> Result<()> {
        let prompt = template::paraphrase_messages(style, &text)?;
        let reply = (self.responder)(&prompt);
        for token in split_tokens(&reply) {
            if ctx.is_interrupted() {
                break;
            }
            pace(self.config.token_interval_ms).await;
            ctx.sink.emit(WorkerEvent::Update {
                output: token.to_string(),
                generation: ctx.generation,
            })?;
        }
        Ok(())
    }
}

async fn pace(interval_ms: u64) {
    if interval_ms > 0 {
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }
}

/// Default reply: repeats the last user turn back.
fn echo_reply(prompt: &[PromptMessage]) -> String {
    match prompt.iter().rev().find(|m| m.role == template::PromptRole::User) {
        Some(m) => format!("You said: {}", m.content),
        None => "Hello!".to_string(),
    }
}

/// Word-sized chunks that concatenate back to the input.
pub fn split_tokens(text: &str) -> Vec<&str> {
    text.split_inclusive(' ').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tokens_round_trips() {
        let text = "Hi there, how are you?";
        let tokens = split_tokens(text);
        assert_eq!(tokens, vec!["Hi ", "there, ", "how ", "are ", "you?"]);
        assert_eq!(tokens.concat(), text);
    }

    #[test]
    fn test_echo_reply() {
        let prompt = template::chat_messages("sys", &[Message::user("ping")]);
        assert_eq!(echo_reply(&prompt), "You said: ping");
    }

    #[test]
    fn test_placeholder_png_signature() {
        assert_eq!(&PLACEHOLDER_PNG[1..4], b"PNG");
    }
}
