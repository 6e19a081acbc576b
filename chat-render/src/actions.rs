//! Copy / speak button cluster attached to rendered content blocks.
//!
//! The cluster fades in on hover. Activation while it is still mostly
//! transparent is ignored, so a click that lands during the hover
//! transition does nothing.

use std::cell::RefCell;

use chrono::{DateTime, Utc};

use crate::config::RenderConfig;
use crate::dom::{ClickAction, Document, NodeId, NodeSpec};
use crate::services::{copy_to_clipboard, Clipboard, SpeechService};

pub const CONTAINER_CLASS: &str = "action-buttons-container";
const CONTAINER_CLASSES: &str = "action-buttons-container absolute top-2 right-2 flex gap-1 opacity-0 group-hover:opacity-100 transition-opacity duration-200 z-10";
const BUTTON_CLASSES: &str = "flex items-center justify-center w-7 h-7 text-gray-400 bg-white border border-gray-200 rounded hover:bg-gray-100 hover:text-gray-700 dark:bg-gray-800 dark:border-gray-700 dark:text-gray-400 dark:hover:text-white dark:hover:bg-gray-700 transition-colors shadow-sm";
const ICON_CLASSES: &str = "material-symbols-outlined text-[16px]";

const SUCCESS_CLASSES: &str = "text-green-500 border-green-500";
const ERROR_CLASSES: &str = "text-red-500 border-red-500";
const NEUTRAL_CLASSES: &str = "text-gray-400 border-gray-200 dark:border-gray-700";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Copy,
    Speak,
}

impl ButtonKind {
    fn idle_glyph(&self) -> &'static str {
        match self {
            Self::Copy => "content_copy",
            Self::Speak => "volume_up",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Attach the overlay to `element` unless it already has one. Returns the
/// overlay container.
pub fn attach(doc: &mut Document, element: NodeId) -> NodeId {
    if let Some(existing) = overlay_of(doc, element) {
        return existing;
    }

    let spec = NodeSpec::new("div")
        .class(CONTAINER_CLASSES)
        .child(button_spec(ButtonKind::Copy, element))
        .child(button_spec(ButtonKind::Speak, element));
    let container = doc.build(&spec);
    doc.set_computed_opacity(container, 0.0);

    doc.add_class(element, "relative");
    doc.add_class(element, "group");
    doc.append_child(element, container);
    container
}

fn button_spec(kind: ButtonKind, target: NodeId) -> NodeSpec {
    let (label, action) = match kind {
        ButtonKind::Copy => ("Copy text", ClickAction::CopyText { target }),
        ButtonKind::Speak => ("Speak text", ClickAction::SpeakText { target }),
    };
    NodeSpec::new("button")
        .class(BUTTON_CLASSES)
        .attr("aria-label", label)
        .action(action)
        .child(NodeSpec::new("span").class(ICON_CLASSES).text(kind.idle_glyph()))
}

/// The overlay directly inside `element`, if any.
pub fn overlay_of(doc: &Document, element: NodeId) -> Option<NodeId> {
    doc.children(element)
        .iter()
        .copied()
        .find(|c| doc.has_class(*c, CONTAINER_CLASS))
}

/// Text a copy or speak action works on: each direct child's trimmed text
/// (an image contributes its source URL), blank-line separated. The overlay
/// itself is skipped.
pub fn gather_text(doc: &Document, element: NodeId) -> String {
    let mut parts = Vec::new();
    if let Some(crate::dom::Content::Text(text)) = doc.content(element) {
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    for child in doc.children(element) {
        if doc.has_class(*child, CONTAINER_CLASS) {
            continue;
        }
        if doc.tag(*child) == "img" {
            if let Some(src) = doc.attr(*child, "src") {
                parts.push(src.to_string());
            }
            continue;
        }
        let text = doc.inner_text(*child);
        if !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    parts.join("\n\n")
}

#[derive(Debug, Clone)]
struct PendingRevert {
    button: NodeId,
    kind: ButtonKind,
    outcome: Outcome,
    deadline: DateTime<Utc>,
}

/// Feedback state for every overlay button on the page.
#[derive(Debug)]
pub struct ActionButtons {
    feedback_duration: chrono::Duration,
    activation_opacity: f64,
    pending: Vec<PendingRevert>,
}

impl ActionButtons {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            feedback_duration: chrono::Duration::from_std(config.feedback_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(2)),
            activation_opacity: config.overlay_activation_opacity,
            pending: Vec::new(),
        }
    }

    /// Resolve a button click to the text it should act on, or `None` when
    /// the click must be ignored (overlay still fading in, unknown button).
    pub fn begin(&self, doc: &Document, button: NodeId) -> Option<(ButtonKind, String)> {
        let (kind, target) = match doc.action(button)? {
            ClickAction::CopyText { target } => (ButtonKind::Copy, *target),
            ClickAction::SpeakText { target } => (ButtonKind::Speak, *target),
            _ => return None,
        };
        let container = doc.parent(button)?;
        if doc.computed_opacity(container) < self.activation_opacity {
            tracing::debug!(button = button.index(), "Overlay still fading in; click ignored");
            return None;
        }
        Some((kind, gather_text(doc, target)))
    }

    /// Show the success or error glyph and schedule its reversion.
    pub fn show_feedback(
        &mut self,
        doc: &mut Document,
        button: NodeId,
        kind: ButtonKind,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) {
        let Some(icon) = doc.first_child(button) else {
            return;
        };
        match outcome {
            Outcome::Success => {
                doc.set_text(icon, "check");
                doc.add_class(button, SUCCESS_CLASSES);
                if kind == ButtonKind::Copy {
                    doc.remove_class(button, NEUTRAL_CLASSES);
                }
            }
            Outcome::Failure => {
                doc.set_text(icon, "error");
                doc.add_class(button, ERROR_CLASSES);
            }
        }
        self.pending.push(PendingRevert {
            button,
            kind,
            outcome,
            deadline: now + self.feedback_duration,
        });
    }

    /// Revert every feedback glyph whose time is up. Returns how many were
    /// reverted.
    pub fn expire_feedback(&mut self, doc: &mut Document, now: DateTime<Utc>) -> usize {
        let (due, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.deadline <= now);
        self.pending = keep;
        for revert in &due {
            if let Some(icon) = doc.first_child(revert.button) {
                doc.set_text(icon, revert.kind.idle_glyph());
            }
            match (revert.outcome, revert.kind) {
                (Outcome::Success, ButtonKind::Copy) => {
                    doc.remove_class(revert.button, SUCCESS_CLASSES);
                    doc.add_class(revert.button, NEUTRAL_CLASSES);
                }
                (Outcome::Success, ButtonKind::Speak) => {
                    doc.remove_class(revert.button, SUCCESS_CLASSES);
                }
                (Outcome::Failure, _) => {
                    doc.remove_class(revert.button, ERROR_CLASSES);
                }
            }
        }
        due.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.iter().map(|p| p.deadline).min()
    }
}

/// Handle a click on a copy button.
pub async fn click_copy(
    doc: &RefCell<Document>,
    buttons: &RefCell<ActionButtons>,
    clipboard: &dyn Clipboard,
    button: NodeId,
    now: DateTime<Utc>,
) {
    let Some((kind, text)) = buttons.borrow().begin(&doc.borrow(), button) else {
        return;
    };
    let outcome = match copy_to_clipboard(clipboard, &text).await {
        Ok(()) => Outcome::Success,
        Err(e) => {
            tracing::error!(error = %e, "Copy failed");
            Outcome::Failure
        }
    };
    buttons
        .borrow_mut()
        .show_feedback(&mut doc.borrow_mut(), button, kind, outcome, now);
}

/// Handle a click on a speak button. Empty text is a no-op.
pub async fn click_speak(
    doc: &RefCell<Document>,
    buttons: &RefCell<ActionButtons>,
    speech: &dyn SpeechService,
    button: NodeId,
    now: DateTime<Utc>,
) {
    let Some((kind, text)) = buttons.borrow().begin(&doc.borrow(), button) else {
        return;
    };
    if text.trim().is_empty() {
        return;
    }
    buttons
        .borrow_mut()
        .show_feedback(&mut doc.borrow_mut(), button, kind, Outcome::Success, now);
    if let Err(e) = speech.speak(&text).await {
        tracing::error!(error = %e, "Speech failed");
        buttons
            .borrow_mut()
            .show_feedback(&mut doc.borrow_mut(), button, kind, Outcome::Failure, now);
    }
}
