//! Shared types between the conversation driver and the renderer
//!
//! These types are used by both:
//! - the native-testable render core (`chat-render`)
//! - Dioxus components (WASM)
//!
//! Serializable with serde for JSON over HTTP, TypeScript bindings via ts-rs

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Messages
// ============================================================================

/// Kind of a conversation message as sent by the agent runtime.
///
/// Unknown kinds deserialize to [`MessageType::Default`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../webui/src/types/generated.ts")]
pub enum MessageType {
    User,
    Agent,
    Response,
    Tool,
    CodeExe,
    Browser,
    Warning,
    RateLimit,
    Error,
    Info,
    Util,
    Hint,
    #[serde(other)]
    Default,
}

impl MessageType {
    pub fn parse(value: &str) -> Self {
        match value {
            "user" => Self::User,
            "agent" => Self::Agent,
            "response" => Self::Response,
            "tool" => Self::Tool,
            "code_exe" => Self::CodeExe,
            "browser" => Self::Browser,
            "warning" => Self::Warning,
            "rate_limit" => Self::RateLimit,
            "error" => Self::Error,
            "info" => Self::Info,
            "util" => Self::Util,
            "hint" => Self::Hint,
            _ => Self::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Response => "response",
            Self::Tool => "tool",
            Self::CodeExe => "code_exe",
            Self::Browser => "browser",
            Self::Warning => "warning",
            Self::RateLimit => "rate_limit",
            Self::Error => "error",
            Self::Info => "info",
            Self::Util => "util",
            Self::Hint => "hint",
            Self::Default => "default",
        }
    }

    /// Visual cluster this kind belongs to.
    pub fn group_type(&self) -> GroupType {
        match self {
            Self::User => GroupType::Right,
            Self::Info
            | Self::Warning
            | Self::Error
            | Self::RateLimit
            | Self::Util
            | Self::Hint => GroupType::Mid,
            _ => GroupType::Left,
        }
    }

    /// Kinds that always open a new group, even after a same-side group.
    pub fn forces_group_start(&self) -> bool {
        matches!(self, Self::Agent)
    }
}

/// Side of the conversation a message group is laid out on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../webui/src/types/generated.ts")]
pub enum GroupType {
    Left,
    Right,
    Mid,
}

impl GroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Mid => "mid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "mid" => Some(Self::Mid),
            _ => None,
        }
    }
}

/// One logical conversation message.
///
/// `id` is stable across updates; the rendered node for a message is keyed by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../webui/src/types/generated.ts")]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Structured metadata, iterated in insertion order.
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    pub kvps: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub temp: bool,
    #[serde(default, alias = "followUp")]
    pub follow_up: bool,
}

impl Message {
    pub fn new(id: impl Into<String>, kind: MessageType) -> Self {
        Self {
            id: id.into(),
            kind,
            heading: None,
            content: None,
            kvps: None,
            temp: false,
            follow_up: false,
        }
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach kvps from a JSON object; any other JSON value clears them.
    pub fn with_kvps(mut self, kvps: serde_json::Value) -> Self {
        self.kvps = match kvps {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        };
        self
    }

    /// Attachment descriptors carried by user messages under `kvps.attachments`.
    pub fn attachments(&self) -> &[serde_json::Value] {
        self.kvps
            .as_ref()
            .and_then(|kvps| kvps.get(KVP_ATTACHMENTS))
            .and_then(|value| value.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ============================================================================
// Attachments
// ============================================================================

/// How an attachment should be displayed in a user message gallery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../webui/src/types/generated.ts")]
pub struct AttachmentDisplay {
    pub is_image: bool,
    pub preview_url: String,
    pub filename: String,
    pub extension: String,
}

// ============================================================================
// API Types
// ============================================================================

/// Body of the anti-forgery token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../webui/src/types/generated.ts")]
pub struct CsrfTokenResponse {
    pub ok: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub runtime_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Constants
// ============================================================================

/// Prefix marking a string value as a server-side image reference.
pub const IMAGE_REF_PREFIX: &str = "img://";
/// kvp key that carries user attachments.
pub const KVP_ATTACHMENTS: &str = "attachments";
/// kvp key whose object entries are flattened into agent messages.
pub const KVP_TOOL_ARGS: &str = "tool_args";

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    #[test]
    fn test_message_type_roundtrip_names() {
        for kind in [
            MessageType::User,
            MessageType::CodeExe,
            MessageType::RateLimit,
            MessageType::Hint,
        ] {
            assert_eq!(MessageType::parse(kind.as_str()), kind);
        }
        assert_eq!(MessageType::parse("something_new"), MessageType::Default);
    }

    #[test]
    fn test_unknown_type_deserializes_to_default() {
        let msg: Message =
            serde_json::from_str(r#"{"id":"1","type":"mystery","content":"x"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Default);
        assert!(!msg.temp);
    }

    #[test]
    fn test_group_classification() {
        assert_eq!(MessageType::User.group_type(), GroupType::Right);
        assert_eq!(MessageType::RateLimit.group_type(), GroupType::Mid);
        assert_eq!(MessageType::Tool.group_type(), GroupType::Left);
        assert_eq!(MessageType::Default.group_type(), GroupType::Left);
        assert!(MessageType::Agent.forces_group_start());
        assert!(!MessageType::Response.forces_group_start());
    }

    #[test]
    fn test_kvps_keep_insertion_order() {
        let msg: Message = serde_json::from_str(
            r#"{"id":"1","type":"tool","kvps":{"zeta":1,"alpha":2,"mid":3},"followUp":true}"#,
        )
        .unwrap();
        let keys: Vec<_> = msg.kvps.unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert!(msg.follow_up);
    }

    #[test]
    fn test_attachments_accessor() {
        let msg = Message::new("u1", MessageType::User)
            .with_kvps(serde_json::json!({"attachments": ["a.png", "b.txt"]}));
        assert_eq!(msg.attachments().len(), 2);
        assert!(Message::new("u2", MessageType::User).attachments().is_empty());
    }

    #[test]
    fn export_types() {
        let config = Config::default();
        MessageType::export(&config).unwrap();
        GroupType::export(&config).unwrap();
        Message::export(&config).unwrap();
        AttachmentDisplay::export(&config).unwrap();
        CsrfTokenResponse::export(&config).unwrap();
    }
}
