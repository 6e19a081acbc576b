//! Outbound collaborators the renderer talks to.
//!
//! The browser implementations live in the `webui` crate; tests use fakes.
//! Everything runs on one thread, so the async traits are `?Send`.

use async_trait::async_trait;
use shared_types::AttachmentDisplay;

use crate::dom::NodeSpec;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ClipboardError {
    #[error("Clipboard write rejected: {0}")]
    WriteRejected(String),

    #[error("Copy command failed")]
    CopyCommandFailed,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SpeechError {
    #[error("Speech synthesis unavailable")]
    Unavailable,

    #[error("Speech failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("{0}")]
    Fetch(String),

    #[error("Component not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MathError {
    #[error("LaTeX render error: {0}")]
    Render(String),
}

/// System clipboard.
#[async_trait(?Send)]
pub trait Clipboard {
    /// Whether the secure async clipboard API can be used.
    fn is_secure(&self) -> bool;

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError>;

    /// Hidden textarea + legacy copy command.
    fn legacy_copy(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Copy through the secure API when available, else the legacy fallback.
pub async fn copy_to_clipboard(clipboard: &dyn Clipboard, text: &str) -> Result<(), ClipboardError> {
    if clipboard.is_secure() {
        clipboard.write_text(text).await
    } else {
        clipboard.legacy_copy(text)
    }
}

/// Text-to-speech.
#[async_trait(?Send)]
pub trait SpeechService {
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

/// External image viewer.
pub trait ImageViewer {
    fn open(&self, url: &str, refresh_interval_ms: u64);
}

/// Resolves attachment descriptors for the user message gallery.
pub trait AttachmentDisplayService {
    fn describe(&self, attachment: &serde_json::Value) -> AttachmentDisplay;

    fn open(&self, attachment: &serde_json::Value);
}

/// Renders a TeX source to markup.
pub trait MathRenderer {
    fn render(&self, source: &str) -> Result<String, MathError>;
}

/// Content fetched for a modal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedComponent {
    pub title: Option<String>,
    /// Classes adopted by the modal's inner container.
    pub root_classes: Vec<String>,
    /// Classes adopted by the modal body.
    pub body_classes: Vec<String>,
    pub body: Vec<NodeSpec>,
    /// Stylesheets scoped to the modal's lifetime.
    pub styles: Vec<String>,
    /// Scripts scoped to the modal's lifetime.
    pub scripts: Vec<String>,
}

/// Fetches remote components (modal content).
#[async_trait(?Send)]
pub trait ComponentLoader {
    async fn load(&self, path: &str) -> Result<LoadedComponent, LoadError>;
}
