//! Conversation renderer core
//!
//! Reconciles streaming chat messages into an element tree, manages a stack
//! of modal dialogs and carries the small utilities around them (markup
//! rewriting, markdown, copy / speak overlays, JSON API calls with CSRF
//! handling). Runs natively so it can be tested without a browser; the
//! `webui` crate implements [`RenderTarget`] over the real page and the
//! [`Projector`] keeps it in step with the tree.

pub mod actions;
pub mod api;
pub mod config;
pub mod dom;
pub mod kvp;
pub mod markdown;
pub mod markup;
pub mod messages;
pub mod modals;
pub mod page;
pub mod preferences;
pub mod project;
pub mod scroll;
pub mod services;

pub use api::{ApiClient, ApiError, HttpRequest, HttpResponse, HttpTransport};
pub use config::RenderConfig;
pub use dom::{ClickAction, Content, Document, NodeId, NodeSpec, ScrollMetrics, ScrollRequest};
pub use messages::{Conversation, ConversationRenderState, MessageRenderer};
pub use modals::{ModalHandle, ModalStack};
pub use page::{Page, Services};
pub use project::{Projector, RenderTarget};
