use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::core::error::SessionError;
use crate::core::Result;

/// Author of a turn. The set is closed: a transcript only ever holds user and
/// assistant turns.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Token identifying one generate request. Events carrying a different id than
/// the open generation are stale.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GenerationId(pub u64);

impl GenerationId {
    pub fn next(self) -> Self {
        GenerationId(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParaphraseStyle {
    #[default]
    Standard,
    Formal,
    Simple,
}

impl std::str::FromStr for ParaphraseStyle {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(ParaphraseStyle::Standard),
            "formal" => Ok(ParaphraseStyle::Formal),
            "simple" => Ok(ParaphraseStyle::Simple),
            other => Err(SessionError::Config(format!("unknown paraphrase style: {}", other))),
        }
    }
}

/// Commands posted from the UI side to the worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerCommand {
    Check,
    Load,
    Generate {
        data: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
    Interrupt,
    Paraphrase {
        text: String,
        #[serde(default)]
        style: ParaphraseStyle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Check => "check",
            WorkerCommand::Load => "load",
            WorkerCommand::Generate { .. } => "generate",
            WorkerCommand::Interrupt => "interrupt",
            WorkerCommand::Paraphrase { .. } => "paraphrase",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Binary image result. Travels as base64 on the wire and is never stored in
/// the transcript; consumers turn it into a URL on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBlob {
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageBlob {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            mime: "image/png".to_string(),
            data,
        }
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            general_purpose::STANDARD.encode(&self.data)
        )
    }
}

#[derive(Serialize, Deserialize)]
struct WireBlob {
    #[serde(rename = "type", default = "default_mime")]
    mime: String,
    data: String,
}

fn default_mime() -> String {
    "image/png".to_string()
}

impl Serialize for ImageBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireBlob {
            mime: self.mime.clone(),
            data: general_purpose::STANDARD.encode(&self.data),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireBlob::deserialize(deserializer)?;
        let data = general_purpose::STANDARD
            .decode(wire.data.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(ImageBlob {
            mime: wire.mime,
            data,
        })
    }
}

/// Events the worker posts back, discriminated by `status`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WorkerEvent {
    Success,
    Error {
        data: String,
    },
    Loading {
        data: String,
    },
    Initiate {
        file: String,
        #[serde(default)]
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loaded: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    Progress {
        file: String,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loaded: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    Done {
        file: String,
    },
    Ready,
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
    TextUpdate {
        output: String,
        tps: f64,
        #[serde(rename = "numTokens")]
        num_tokens: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
    ImageUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blob: Option<ImageBlob>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
    Update {
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<GenerationId>,
    },
}

impl WorkerEvent {
    /// Decodes and validates one inbound event.
    pub fn from_json(json: &str) -> Result<Self> {
        let event: WorkerEvent = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let event: WorkerEvent = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn status(&self) -> &'static str {
        match self {
            WorkerEvent::Success => "success",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::Loading { .. } => "loading",
            WorkerEvent::Initiate { .. } => "initiate",
            WorkerEvent::Progress { .. } => "progress",
            WorkerEvent::Done { .. } => "done",
            WorkerEvent::Ready => "ready",
            WorkerEvent::Start { .. } => "start",
            WorkerEvent::TextUpdate { .. } => "text-update",
            WorkerEvent::ImageUpdate { .. } => "image-update",
            WorkerEvent::Update { .. } => "update",
            WorkerEvent::Complete { .. } => "complete",
        }
    }

    pub fn generation(&self) -> Option<GenerationId> {
        match self {
            WorkerEvent::Start { generation }
            | WorkerEvent::TextUpdate { generation, .. }
            | WorkerEvent::ImageUpdate { generation, .. }
            | WorkerEvent::Update { generation, .. }
            | WorkerEvent::Complete { generation } => *generation,
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            WorkerEvent::Initiate { file, progress, loaded, total, .. }
            | WorkerEvent::Progress { file, progress, loaded, total } => {
                if file.is_empty() {
                    return Err(violation(self, "empty file key"));
                }
                if let (Some(loaded), Some(total)) = (loaded, total) {
                    if loaded > total {
                        return Err(violation(self, "loaded exceeds total"));
                    }
                }
                check_percentage(self, *progress)
            }
            WorkerEvent::Done { file } if file.is_empty() => Err(violation(self, "empty file key")),
            WorkerEvent::TextUpdate { tps, .. } => {
                if !tps.is_finite() || *tps < 0.0 {
                    return Err(violation(self, "tps must be finite and non-negative"));
                }
                Ok(())
            }
            WorkerEvent::ImageUpdate { blob, progress, time, .. } => {
                if blob.is_none() && progress.is_none() {
                    return Err(violation(self, "needs a blob or a progress value"));
                }
                if let Some(p) = progress {
                    if !p.is_finite() || !(0.0..=1.0).contains(p) {
                        return Err(violation(self, "image progress must be within 0..=1"));
                    }
                }
                if let Some(t) = time {
                    if !t.is_finite() || *t < 0.0 {
                        return Err(violation(self, "time must be finite and non-negative"));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_percentage(event: &WorkerEvent, progress: f64) -> Result<()> {
    if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
        return Err(violation(event, "progress must be within 0..=100"));
    }
    Ok(())
}

fn violation(event: &WorkerEvent, reason: &str) -> SessionError {
    SessionError::ProtocolViolation(format!("{}: {}", event.status(), reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_update() {
        let event = WorkerEvent::from_json(
            r#"{"status":"text-update","output":"Hi","tps":12.5,"numTokens":1}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            WorkerEvent::TextUpdate {
                output: "Hi".to_string(),
                tps: 12.5,
                num_tokens: 1,
                generation: None,
            }
        );
    }

    #[test]
    fn test_decode_initiate_ignores_extra_fields() {
        let event = WorkerEvent::from_json(
            r#"{"status":"initiate","name":"HuggingFaceTB/SmolLM2","file":"config.json","extra":true}"#,
        )
        .unwrap();
        match event {
            WorkerEvent::Initiate { file, progress, name, .. } => {
                assert_eq!(file, "config.json");
                assert_eq!(progress, 0.0);
                assert_eq!(name.as_deref(), Some("HuggingFaceTB/SmolLM2"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = WorkerEvent::from_json(r#"{"status":"teleport"}"#).unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
    }

    #[test]
    fn test_progress_out_of_range_rejected() {
        let err = WorkerEvent::from_json(r#"{"status":"progress","file":"a","progress":140}"#).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation(_)));
    }

    #[test]
    fn test_loaded_beyond_total_rejected() {
        let err = WorkerEvent::from_json(
            r#"{"status":"progress","file":"a","progress":10,"loaded":11,"total":10}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation(_)));
    }

    #[test]
    fn test_image_update_needs_payload() {
        let err = WorkerEvent::from_json(r#"{"status":"image-update"}"#).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation(_)));
    }

    #[test]
    fn test_image_blob_wire_format() {
        let json = r#"{"status":"image-update","blob":{"type":"image/png","data":"AQID"}}"#;
        let event = WorkerEvent::from_json(json).unwrap();
        match event {
            WorkerEvent::ImageUpdate { blob: Some(blob), .. } => {
                assert_eq!(blob.data, vec![1, 2, 3]);
                assert_eq!(blob.to_data_url(), "data:image/png;base64,AQID");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_generate_command_shape() {
        let cmd = WorkerCommand::Generate {
            data: vec![Message::user("Hello")],
            generation: Some(GenerationId(3)),
        };
        let value: serde_json::Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "generate");
        assert_eq!(value["data"][0]["role"], "user");
        assert_eq!(value["data"][0]["content"], "Hello");
        assert!(value["data"][0].get("image").is_none());
        assert_eq!(value["generation"], 3);
    }

    #[test]
    fn test_role_is_closed() {
        let err = serde_json::from_str::<Message>(r#"{"role":"system","content":"x"}"#);
        assert!(err.is_err());
    }
}
