//! Page controller: owns the document projection and every reconciler, and
//! routes host events (clicks, keys, pointer, timer ticks) to them.
//!
//! Everything lives behind `RefCell`s so async click handlers can await a
//! collaborator without holding a borrow across the await point.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use shared_types::Message;

use crate::actions::{self, ActionButtons};
use crate::config::RenderConfig;
use crate::dom::{ClickAction, Document, NodeId};
use crate::markdown::MarkdownRenderer;
use crate::messages::{chat_history, Conversation, MessageRenderer, RenderProfile};
use crate::modals::{self, ModalHandle, ModalStack};
use crate::preferences::{ClassVisibility, ResizeSettings};
use crate::project::{Projector, RenderTarget};
use crate::services::{
    AttachmentDisplayService, Clipboard, ComponentLoader, ImageViewer, MathRenderer, SpeechService,
};

/// Outbound collaborators supplied by the host.
pub struct Services {
    pub clipboard: Box<dyn Clipboard>,
    pub speech: Box<dyn SpeechService>,
    pub images: Box<dyn ImageViewer>,
    pub attachments: Rc<dyn AttachmentDisplayService>,
    pub loader: Box<dyn ComponentLoader>,
    pub markdown: Box<dyn MarkdownRenderer>,
    pub math: Option<Box<dyn MathRenderer>>,
}

pub struct Page {
    config: RenderConfig,
    doc: RefCell<Document>,
    projector: RefCell<Projector>,
    renderer: RefCell<MessageRenderer>,
    conversation: RefCell<Conversation>,
    buttons: RefCell<ActionButtons>,
    modals: RefCell<ModalStack>,
    resize: RefCell<ResizeSettings>,
    visibility: Cell<ClassVisibility>,
    clipboard: Box<dyn Clipboard>,
    speech: Box<dyn SpeechService>,
    images: Box<dyn ImageViewer>,
    attachments: Rc<dyn AttachmentDisplayService>,
    loader: Box<dyn ComponentLoader>,
}

impl Page {
    pub fn new(config: RenderConfig, services: Services) -> Self {
        let mut doc = Document::new();
        chat_history(&mut doc);
        let modals = ModalStack::new(&mut doc, &config);
        let renderer = MessageRenderer::new(
            config.clone(),
            services.markdown,
            services.math,
            Rc::clone(&services.attachments),
        );

        Self {
            buttons: RefCell::new(ActionButtons::new(&config)),
            config,
            doc: RefCell::new(doc),
            projector: RefCell::new(Projector::new()),
            renderer: RefCell::new(renderer),
            conversation: RefCell::new(Conversation::new()),
            modals: RefCell::new(modals),
            resize: RefCell::new(ResizeSettings::default()),
            visibility: Cell::new(ClassVisibility::default()),
            clipboard: services.clipboard,
            speech: services.speech,
            images: services.images,
            attachments: services.attachments,
            loader: services.loader,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Run `f` against the document, e.g. to feed back host metrics.
    pub fn with_document<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(&mut self.doc.borrow_mut())
    }

    /// Send pending changes and scroll requests to the page.
    pub fn project<T: RenderTarget + ?Sized>(&self, target: &mut T) -> bool {
        self.projector
            .borrow_mut()
            .sync(&mut self.doc.borrow_mut(), target)
    }

    /// Feed real scroll geometry back before handling an event.
    pub fn measure<T: RenderTarget + ?Sized>(&self, target: &T) {
        self.projector
            .borrow()
            .measure(&mut self.doc.borrow_mut(), target);
    }

    /// Serialized page content with `data-node` markers.
    pub fn html(&self) -> String {
        let doc = self.doc.borrow();
        doc.children(doc.body())
            .iter()
            .map(|node| doc.outer_html_with_ids(*node))
            .collect()
    }

    /// Whether dialogs currently lock page scrolling.
    pub fn scroll_locked(&self) -> bool {
        let doc = self.doc.borrow();
        doc.style(doc.body(), "overflow") == Some("hidden")
    }

    // ------------------------------------------------------------------
    // Conversation
    // ------------------------------------------------------------------

    /// Record and render one message (new or updated).
    pub fn set_message(&self, message: Message) -> NodeId {
        let mut doc = self.doc.borrow_mut();
        let container = self.renderer.borrow_mut().render(&mut doc, &message);

        if message.kind != shared_types::MessageType::User {
            let main_class = RenderProfile::for_type(message.kind).main_class;
            self.resize.borrow().apply_to(&mut doc, container, main_class);
        }
        self.visibility.get().apply_within(&mut doc, container);

        self.conversation.borrow_mut().upsert(message);
        container
    }

    pub fn conversation_len(&self) -> usize {
        self.conversation.borrow().len()
    }

    /// Drop every message (context switch).
    pub fn clear(&self) {
        self.conversation.borrow_mut().clear();
        let mut doc = self.doc.borrow_mut();
        let history = chat_history(&mut doc);
        doc.clear(history);
    }

    /// Re-render the whole log from the recorded messages.
    pub fn rebuild(&self) {
        let mut doc = self.doc.borrow_mut();
        self.renderer
            .borrow_mut()
            .rebuild(&mut doc, &self.conversation.borrow());
        self.resize.borrow().apply(&mut doc);
        self.visibility.get().apply(&mut doc);
    }

    pub fn set_visibility(&self, visibility: ClassVisibility) {
        self.visibility.set(visibility);
        visibility.apply(&mut self.doc.borrow_mut());
    }

    pub fn visibility(&self) -> ClassVisibility {
        self.visibility.get()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Handle a click on `node`. Returns whether anything reacted.
    pub async fn click(&self, node: NodeId, now: DateTime<Utc>) -> bool {
        let trigger = modals::trigger_for_click(&self.doc.borrow(), node);
        if let Some(path) = trigger {
            self.open_modal(&path).await;
            return true;
        }

        let Some((target, action)) = self.doc.borrow().click_target(node) else {
            return false;
        };
        match action {
            ClickAction::CopyText { .. } => {
                actions::click_copy(&self.doc, &self.buttons, self.clipboard.as_ref(), target, now)
                    .await;
            }
            ClickAction::SpeakText { .. } => {
                actions::click_speak(&self.doc, &self.buttons, self.speech.as_ref(), target, now)
                    .await;
            }
            ClickAction::OpenImage {
                url,
                refresh_interval_ms,
            } => self.images.open(&url, refresh_interval_ms),
            ClickAction::OpenAttachment { attachment } => self.attachments.open(&attachment),
            ClickAction::ToggleMinimize { main_class } => {
                self.resize.borrow_mut().toggle_minimize(&main_class);
                self.resize.borrow().apply(&mut self.doc.borrow_mut());
            }
            ClickAction::ToggleMaximize { main_class } => {
                self.resize.borrow_mut().toggle_maximize(&main_class);
                self.resize.borrow().apply(&mut self.doc.borrow_mut());
            }
            ClickAction::CloseModal => {
                self.close_modal(None);
            }
        }
        true
    }

    pub fn key_down(&self, key: &str) -> bool {
        self.modals
            .borrow_mut()
            .key_down(&mut self.doc.borrow_mut(), key)
    }

    pub fn pointer_down(&self, node: NodeId) {
        self.modals.borrow_mut().pointer_down(node);
    }

    pub fn pointer_up(&self, node: NodeId) -> bool {
        self.modals
            .borrow_mut()
            .pointer_up(&mut self.doc.borrow_mut(), node)
    }

    /// Timer tick: revert expired button feedback and run deferred modal
    /// work. Returns the next feedback deadline, if any.
    pub fn tick(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut doc = self.doc.borrow_mut();
        self.modals.borrow_mut().flush_deferred(&mut doc);
        let mut buttons = self.buttons.borrow_mut();
        buttons.expire_feedback(&mut doc, now);
        buttons.next_deadline()
    }

    // ------------------------------------------------------------------
    // Modals
    // ------------------------------------------------------------------

    pub async fn open_modal(&self, path: &str) -> ModalHandle {
        modals::open_modal(&self.doc, &self.modals, self.loader.as_ref(), path).await
    }

    pub fn close_modal(&self, path: Option<&str>) -> Option<ModalHandle> {
        self.modals
            .borrow_mut()
            .close(&mut self.doc.borrow_mut(), path)
    }

    pub fn scroll_modal(&self, id: &str) {
        self.modals.borrow().scroll_to(&mut self.doc.borrow_mut(), id);
    }

    pub fn modal_count(&self) -> usize {
        self.modals.borrow().len()
    }

    /// Open the file browser at `path` (target of rewritten path links).
    pub async fn open_file_link(&self, path: &str) -> ModalHandle {
        let modal = format!("{}?path={path}", self.config.file_browser_modal);
        self.open_modal(&modal).await
    }
}
