//! Message reconciler
//!
//! Renders one [`Message`] at a time into the conversation log, reusing the
//! node keyed by `message-{id}` so a streaming message can be re-rendered on
//! every tick without losing node identity or scroll position.
//!
//! ## Layout
//!
//! ```text
//! #chat-history
//!   .message-group-{first id}  [data-group-type]
//!     #message-{id}            (container, carries the main class)
//!       .message-bubble
//!         .msg-heading
//!         .message-body        (kvp table, content, overlay)
//! ```

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};
use shared_types::{GroupType, Message, MessageType, KVP_TOOL_ARGS};

use crate::actions;
use crate::config::RenderConfig;
use crate::dom::{ClickAction, Document, NodeId, NodeSpec};
use crate::kvp;
use crate::markdown::{adjust_markdown_render, render_latex, MarkdownRenderer};
use crate::markup::{
    add_blank_targets_to_links, convert_icons, convert_image_tags, convert_img_file_paths,
    convert_paths_to_links, escape_html,
};
use crate::preferences::MIN_MAX_CLASS;
use crate::scroll::Scroller;
use crate::services::{AttachmentDisplayService, MathRenderer};

pub const CHAT_HISTORY_ID: &str = "chat-history";

const GROUP_CLASSES: &str = "flex flex-col gap-1 w-full px-4 md:px-0 max-w-4xl mx-auto";
const HEADING_CLASSES: &str = "msg-heading flex items-center justify-between mb-2 pb-1 border-b border-gray-100 dark:border-gray-700";
const HEADING_H4_CLASSES: &str = "text-sm font-semibold text-gray-600 dark:text-gray-300 flex items-center gap-2";
const RESIZE_LINK_CLASSES: &str = "text-gray-400 hover:text-gray-600 dark:hover:text-gray-200 transition-colors";
const MARKDOWN_CONTENT_CLASSES: &str = "msg-content text-gray-800 dark:text-gray-200 leading-relaxed space-y-2 break-words break-all";
const PLAIN_CONTENT_CLASSES: &str = "msg-content whitespace-pre-wrap break-words font-mono text-xs bg-gray-50 dark:bg-gray-900/50 p-3 rounded-lg border border-gray-100 dark:border-gray-700 text-gray-800 dark:text-gray-200";

const USER_HEADING_CLASSES: &str = "msg-heading text-xs font-bold mb-2 flex items-center justify-end gap-2 opacity-70";
const USER_TEXT_CLASSES: &str = "message-text whitespace-pre-wrap break-words break-all leading-relaxed";
const ATTACHMENTS_CLASSES: &str = "attachments-container grid grid-cols-2 gap-2 mt-3";
const ATTACHMENT_ITEM_CLASSES: &str = "attachment-item relative group overflow-hidden rounded-lg border border-blue-200 dark:border-blue-700 bg-white dark:bg-blue-900/20 hover:shadow-md transition-all cursor-pointer";

// ============================================================================
// Bubble palette
// ============================================================================

const BUBBLE_BASE: &str = "message-bubble relative p-4 text-sm rounded-xl shadow-sm max-w-[95%] md:max-w-[85%] group border";

/// Colour scheme of a message bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleStyle {
    User,
    Agent,
    Tool,
    Error,
    Warning,
    /// Compact centred card for info, util and hint messages.
    InfoCard,
}

impl BubbleStyle {
    pub fn classes(&self) -> String {
        let palette = match self {
            Self::User => "bg-blue-50 text-blue-900 border-blue-100 rounded-tr-none dark:bg-blue-900/40 dark:border-blue-800 dark:text-blue-100",
            Self::Agent => "bg-white text-gray-900 border-gray-200 rounded-tl-none dark:bg-gray-800 dark:border-gray-700 dark:text-gray-100",
            Self::Tool => "bg-gray-50 text-gray-800 border-gray-200 rounded-xl dark:bg-gray-800/50 dark:border-gray-700 dark:text-gray-200",
            Self::Error => "bg-red-50 text-red-900 border-red-100 rounded-xl dark:bg-red-900/30 dark:border-red-800 dark:text-red-100",
            Self::Warning => "bg-yellow-50 text-yellow-900 border-yellow-100 rounded-xl dark:bg-yellow-900/30 dark:border-yellow-800 dark:text-yellow-100",
            Self::InfoCard => {
                return "message-bubble relative px-4 py-2 text-xs text-center rounded-lg bg-gray-50 dark:bg-gray-800 text-gray-500 dark:text-gray-400 border border-gray-200 dark:border-gray-700 shadow-sm max-w-[90%]".to_string();
            }
        };
        format!("{BUBBLE_BASE} {palette}")
    }
}

// ============================================================================
// Render profiles
// ============================================================================

/// Which kvps a message kind shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvpPolicy {
    Show,
    Hide,
    /// Merge `tool_args` entries into the top level.
    FlattenToolArgs,
}

/// How a message kind is drawn by the generic body renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderProfile {
    pub main_class: &'static str,
    pub follow_up: bool,
    pub kvps: KvpPolicy,
    pub content_classes: &'static str,
    pub latex: bool,
    pub markdown: bool,
    pub resize_buttons: bool,
    pub style: BubbleStyle,
    /// Extra bubble classes on top of the palette.
    pub bubble_extra: &'static str,
    pub centered: bool,
}

impl RenderProfile {
    const fn base(main_class: &'static str, style: BubbleStyle) -> Self {
        Self {
            main_class,
            follow_up: false,
            kvps: KvpPolicy::Show,
            content_classes: "",
            latex: false,
            markdown: false,
            resize_buttons: true,
            style,
            bubble_extra: "",
            centered: false,
        }
    }

    /// Profile for every kind except `user`, which has its own path.
    pub fn for_type(kind: MessageType) -> Self {
        use MessageType as T;
        match kind {
            T::Agent => Self {
                kvps: KvpPolicy::FlattenToolArgs,
                content_classes: "msg-json",
                ..Self::base("message-agent", BubbleStyle::Agent)
            },
            T::Response => Self {
                follow_up: true,
                kvps: KvpPolicy::Hide,
                latex: true,
                markdown: true,
                bubble_extra: "ring-1 ring-purple-100 dark:ring-purple-900",
                ..Self::base("message-agent-response", BubbleStyle::Agent)
            },
            T::Tool => Self {
                follow_up: true,
                ..Self::base("message-tool", BubbleStyle::Tool)
            },
            T::CodeExe => Self {
                follow_up: true,
                kvps: KvpPolicy::Hide,
                bubble_extra: "bg-gray-100 dark:bg-gray-900",
                ..Self::base("message-code-exe", BubbleStyle::Tool)
            },
            T::Browser => Self {
                follow_up: true,
                ..Self::base("message-browser", BubbleStyle::Tool)
            },
            T::Warning | T::RateLimit => Self {
                centered: true,
                ..Self::base("message-warning", BubbleStyle::Warning)
            },
            T::Error => Self {
                centered: true,
                ..Self::base("message-error", BubbleStyle::Error)
            },
            T::Info | T::Util | T::Hint => Self {
                centered: true,
                ..Self::base("message-util", BubbleStyle::InfoCard)
            },
            T::User | T::Default => Self::base("message-default", BubbleStyle::Agent),
        }
    }
}

/// Merge `tool_args` into the top level: existing keys are overridden in
/// place, new keys go last, and `tool_args` itself is dropped.
pub fn flatten_tool_args(kvps: &Map<String, Value>) -> Map<String, Value> {
    let mut flat: Map<String, Value> = kvps
        .iter()
        .filter(|(key, _)| key.as_str() != KVP_TOOL_ARGS)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(Value::Object(args)) = kvps.get(KVP_TOOL_ARGS) {
        for (key, value) in args {
            flat.insert(key.clone(), value.clone());
        }
    }
    flat
}

// ============================================================================
// Reconciler
// ============================================================================

/// Grouping state carried between renders.
#[derive(Debug, Clone, Default)]
pub struct ConversationRenderState {
    /// The group new containers join when their side matches.
    pub last_group: Option<NodeId>,
}

pub struct MessageRenderer {
    config: RenderConfig,
    markdown: Box<dyn MarkdownRenderer>,
    math: Option<Box<dyn MathRenderer>>,
    attachments: Rc<dyn AttachmentDisplayService>,
    state: ConversationRenderState,
}

impl MessageRenderer {
    pub fn new(
        config: RenderConfig,
        markdown: Box<dyn MarkdownRenderer>,
        math: Option<Box<dyn MathRenderer>>,
        attachments: Rc<dyn AttachmentDisplayService>,
    ) -> Self {
        Self {
            config,
            markdown,
            math,
            attachments,
            state: ConversationRenderState::default(),
        }
    }

    pub fn state(&self) -> &ConversationRenderState {
        &self.state
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Create or update the node for `message` and return its container.
    pub fn render(&mut self, doc: &mut Document, message: &Message) -> NodeId {
        let container_id = format!("message-{}", message.id);
        let container = match doc.get_element_by_id(&container_id) {
            Some(existing) => existing,
            None => {
                let justify = if message.kind == MessageType::User {
                    "justify-end"
                } else {
                    "justify-start"
                };
                doc.build(
                    &NodeSpec::new("div")
                        .id(&container_id)
                        .class(&format!("flex w-full mb-4 {justify}")),
                )
            }
        };

        match message.kind {
            MessageType::User => self.draw_user(doc, container, message),
            kind => {
                let profile = RenderProfile::for_type(kind);
                let kvps = match profile.kvps {
                    KvpPolicy::Show => message.kvps.clone(),
                    KvpPolicy::Hide => None,
                    KvpPolicy::FlattenToolArgs => message.kvps.as_ref().map(flatten_tool_args),
                };
                self.draw_message(doc, container, message, &profile, kvps.as_ref());
            }
        }

        if !doc.is_connected(container) {
            self.place(doc, container, message);
        }
        container
    }

    /// Append a freshly created container to the right group.
    fn place(&mut self, doc: &mut Document, container: NodeId, message: &Message) {
        let group_type = message.kind.group_type();

        if let Some(group) = self.state.last_group {
            if !doc.is_connected(group) {
                tracing::debug!("Last message group left the document; starting over");
                self.state.last_group = None;
            }
        }

        let group = match self.state.last_group {
            Some(group)
                if !message.kind.forces_group_start()
                    && doc.attr(group, "data-group-type").and_then(GroupType::parse)
                        == Some(group_type) =>
            {
                group
            }
            _ => {
                let group = doc.build(
                    &NodeSpec::new("div")
                        .id(&format!("message-group-{}", message.id))
                        .class(GROUP_CLASSES)
                        .attr("data-group-type", group_type.as_str()),
                );
                tracing::debug!(id = %message.id, group_type = group_type.as_str(), "New message group");
                self.state.last_group = Some(group);
                group
            }
        };

        doc.append_child(group, container);
        let history = chat_history(doc);
        doc.append_child(history, group);
    }

    /// Generic body renderer shared by every non-user kind.
    pub fn draw_message(
        &self,
        doc: &mut Document,
        container: NodeId,
        message: &Message,
        profile: &RenderProfile,
        kvps: Option<&Map<String, Value>>,
    ) -> NodeId {
        let bubble = match doc.query_class(container, "message-bubble") {
            Some(bubble) => bubble,
            None => doc.append_spec(container, &NodeSpec::new("div").class(BUBBLE_BASE)),
        };
        doc.add_class(container, profile.main_class);

        match message.heading.as_deref().filter(|h| !h.is_empty()) {
            Some(heading) => self.draw_heading(doc, bubble, heading, profile),
            None => {
                if let Some(existing) = doc.query_class(bubble, "msg-heading") {
                    doc.remove(existing);
                }
            }
        }

        let body = match doc.query_class(bubble, "message-body") {
            Some(body) => body,
            None => doc.append_spec(
                bubble,
                &NodeSpec::new("div").class("message-body overflow-x-auto"),
            ),
        };

        let scroller = Scroller::capture(doc, body, self.config.scroll_tolerance_px);
        kvp::render(doc, body, kvps, &self.config);

        match message.content.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(content) if profile.markdown => {
                let content_div = match doc.query_class(body, "msg-content") {
                    Some(div) => div,
                    None => doc.append_spec(body, &NodeSpec::new("div")),
                };
                doc.set_class_name(
                    content_div,
                    &join_classes(MARKDOWN_CONTENT_CLASSES, profile.content_classes),
                );
                let span = ensure_span(doc, content_div, None);
                let html = self.markdown_html(content, profile.latex);
                doc.set_inner_html(span, &html);
                actions::attach(doc, body);
            }
            Some(content) => {
                let pre = match doc.query_class(body, "msg-content") {
                    Some(pre) => pre,
                    None => doc.append_spec(body, &NodeSpec::new("pre")),
                };
                doc.set_class_name(
                    pre,
                    &join_classes(PLAIN_CONTENT_CLASSES, profile.content_classes),
                );
                let span = ensure_span(doc, pre, None);
                doc.set_text(span, content);
                actions::attach(doc, body);
            }
            None => {
                if let Some(existing) = doc.query_class(body, "msg-content") {
                    doc.remove(existing);
                }
            }
        }

        scroller.restore(doc);

        if profile.follow_up || message.follow_up {
            doc.add_class(container, "mt-0");
        }

        doc.set_class_name(bubble, &profile.style.classes());
        if !profile.bubble_extra.is_empty() {
            doc.add_class(bubble, profile.bubble_extra);
        }
        if profile.centered {
            doc.add_class(container, "justify-center");
        }
        bubble
    }

    fn draw_heading(&self, doc: &mut Document, bubble: NodeId, heading: &str, profile: &RenderProfile) {
        let heading_el = match doc.query_class(bubble, "msg-heading") {
            Some(el) => el,
            None => {
                let el = doc.build(&NodeSpec::new("div").class(HEADING_CLASSES));
                doc.prepend_child(bubble, el);
                el
            }
        };
        let h4 = match doc.query_tag(heading_el, "h4") {
            Some(h4) => h4,
            None => doc.append_spec(heading_el, &NodeSpec::new("h4").class(HEADING_H4_CLASSES)),
        };
        doc.set_inner_html(h4, &convert_icons(&escape_html(heading)));

        if profile.resize_buttons && doc.query_class(heading_el, MIN_MAX_CLASS).is_none() {
            let main_class = profile.main_class.to_string();
            doc.append_spec(
                heading_el,
                &NodeSpec::new("div")
                    .class(&format!("{MIN_MAX_CLASS} flex gap-1"))
                    .child(resize_link(
                        "minimize",
                        ClickAction::ToggleMinimize {
                            main_class: main_class.clone(),
                        },
                    ))
                    .child(resize_link(
                        "expand_all",
                        ClickAction::ToggleMaximize { main_class },
                    )),
            );
        }
    }

    fn markdown_html(&self, content: &str, latex: bool) -> String {
        let html = convert_image_tags(content);
        let html = convert_img_file_paths(&html, &self.config.image_endpoint);
        let html = self.markdown.to_html(&html, true);
        let html = convert_paths_to_links(&html);
        let mut html = add_blank_targets_to_links(&html);
        if latex {
            if let Some(math) = &self.math {
                html = render_latex(&html, math.as_ref());
            }
        }
        adjust_markdown_render(&html)
    }

    fn draw_user(&self, doc: &mut Document, container: NodeId, message: &Message) {
        let bubble = match doc.query_class(container, "message-bubble") {
            Some(bubble) => bubble,
            None => doc.append_spec(
                container,
                &NodeSpec::new("div").class(&BubbleStyle::User.classes()),
            ),
        };

        let heading = match doc.query_class(bubble, "msg-heading") {
            Some(heading) => heading,
            None => {
                let heading = doc.build(&NodeSpec::new("h4").class(USER_HEADING_CLASSES));
                doc.prepend_child(bubble, heading);
                heading
            }
        };
        doc.set_inner_html(
            heading,
            &format!(
                "{} <span class='material-symbols-outlined text-sm'>person</span>",
                escape_html(message.heading.as_deref().unwrap_or_default())
            ),
        );

        let text_div = doc.query_class(bubble, "message-text");
        match message.content.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(content) => {
                let text_div = match text_div {
                    Some(div) => div,
                    None => doc.append_spec(bubble, &NodeSpec::new("div").class(USER_TEXT_CLASSES)),
                };
                let span = ensure_span(doc, text_div, Some("user-content"));
                doc.set_text(span, content);
                actions::attach(doc, text_div);
            }
            None => {
                if let Some(div) = text_div {
                    doc.remove(div);
                }
            }
        }

        let gallery = doc.query_class(bubble, "attachments-container");
        let attachments = message.attachments();
        if attachments.is_empty() {
            if let Some(gallery) = gallery {
                doc.remove(gallery);
            }
            return;
        }
        let gallery = match gallery {
            Some(gallery) => gallery,
            None => doc.append_spec(bubble, &NodeSpec::new("div").class(ATTACHMENTS_CLASSES)),
        };
        let items: Vec<NodeSpec> = attachments
            .iter()
            .map(|attachment| self.attachment_spec(attachment))
            .collect();
        doc.reconcile_children(gallery, &items, |_, _| false);
    }

    fn attachment_spec(&self, attachment: &Value) -> NodeSpec {
        let display = self.attachments.describe(attachment);
        let item = NodeSpec::new("div")
            .class(ATTACHMENT_ITEM_CLASSES)
            .action(ClickAction::OpenAttachment {
                attachment: attachment.clone(),
            });

        if display.is_image {
            return item.child(
                NodeSpec::new("img")
                    .class("w-full h-24 object-cover")
                    .attr("src", &display.preview_url)
                    .attr("alt", &display.filename),
            );
        }

        let mut item = item.class("flex items-center p-2 gap-2");
        if !display.preview_url.is_empty() && display.preview_url != display.filename {
            item = item.child(
                NodeSpec::new("img")
                    .class("w-8 h-8")
                    .attr("src", &display.preview_url)
                    .attr("alt", &format!("{} file", display.extension)),
            );
        }
        item.child(
            NodeSpec::new("div")
                .class("text-xs font-medium truncate max-w-full")
                .text(&display.filename),
        )
    }

    /// Drop every rendered message and re-render the log from scratch.
    pub fn rebuild(&mut self, doc: &mut Document, conversation: &Conversation) {
        let history = chat_history(doc);
        doc.clear(history);
        self.state = ConversationRenderState::default();
        for message in conversation.messages() {
            self.render(doc, message);
        }
    }
}

/// The log root, created on first use.
pub fn chat_history(doc: &mut Document) -> NodeId {
    match doc.get_element_by_id(CHAT_HISTORY_ID) {
        Some(history) => history,
        None => {
            let body = doc.body();
            doc.append_spec(body, &NodeSpec::new("div").id(CHAT_HISTORY_ID))
        }
    }
}

fn ensure_span(doc: &mut Document, parent: NodeId, class: Option<&str>) -> NodeId {
    let existing = doc.children(parent).iter().copied().find(|c| {
        doc.tag(*c) == "span" && class.map_or(true, |class| doc.has_class(*c, class))
    });
    match existing {
        Some(span) => span,
        None => {
            let mut spec = NodeSpec::new("span");
            if let Some(class) = class {
                spec = spec.class(class);
            }
            doc.append_spec(parent, &spec)
        }
    }
}

fn resize_link(glyph: &str, action: ClickAction) -> NodeSpec {
    NodeSpec::new("a")
        .attr("href", "#")
        .class(RESIZE_LINK_CLASSES)
        .action(action)
        .child(
            NodeSpec::new("span")
                .class("material-symbols-outlined text-sm")
                .text(glyph),
        )
}

fn join_classes(base: &str, extra: &str) -> String {
    if extra.is_empty() {
        base.to_string()
    } else {
        format!("{base} {extra}")
    }
}

// ============================================================================
// Conversation log
// ============================================================================

/// Append-only record of every message seen, in first-appearance order.
/// Updates replace the stored record but keep its position.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id. Returns `true` when the id is new.
    pub fn upsert(&mut self, message: Message) -> bool {
        match self.index.get(&message.id) {
            Some(position) => {
                self.messages[*position] = message;
                false
            }
            None => {
                self.index.insert(message.id.clone(), self.messages.len());
                self.messages.push(message);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|position| &self.messages[*position])
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::PulldownMarkdown;
    use serde_json::json;
    use shared_types::AttachmentDisplay;

    struct NamedAttachments;

    impl AttachmentDisplayService for NamedAttachments {
        fn describe(&self, attachment: &Value) -> AttachmentDisplay {
            let name = attachment["name"].as_str().unwrap_or_default().to_string();
            let is_image = name.ends_with(".png");
            AttachmentDisplay {
                is_image,
                preview_url: format!("/preview/{name}"),
                extension: name.rsplit('.').next().unwrap_or_default().to_string(),
                filename: name,
            }
        }

        fn open(&self, _attachment: &Value) {}
    }

    fn renderer() -> MessageRenderer {
        MessageRenderer::new(
            RenderConfig::default(),
            Box::new(PulldownMarkdown::default()),
            None,
            Rc::new(NamedAttachments),
        )
    }

    #[test]
    fn test_profiles_match_kind_table() {
        let response = RenderProfile::for_type(MessageType::Response);
        assert_eq!(response.main_class, "message-agent-response");
        assert!(response.markdown && response.latex && response.follow_up);
        assert_eq!(response.kvps, KvpPolicy::Hide);

        let rate_limit = RenderProfile::for_type(MessageType::RateLimit);
        assert_eq!(rate_limit.main_class, "message-warning");
        assert!(rate_limit.centered);

        let hint = RenderProfile::for_type(MessageType::Hint);
        assert_eq!(hint.main_class, "message-util");
        assert_eq!(hint.style, BubbleStyle::InfoCard);

        let unknown = RenderProfile::for_type(MessageType::parse("telemetry"));
        assert_eq!(unknown.main_class, "message-default");
    }

    #[test]
    fn test_flatten_tool_args_overrides_in_place() {
        let kvps = json!({"thoughts": "t", "tool_args": {"query": "q", "thoughts": "u"}, "tool_name": "x"});
        let flat = flatten_tool_args(kvps.as_object().unwrap());
        let keys: Vec<_> = flat.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["thoughts", "tool_name", "query"]);
        assert_eq!(flat["thoughts"], "u");
    }

    #[test]
    fn test_plain_content_and_empty_content_removal() {
        let mut doc = Document::new();
        let mut renderer = renderer();
        let message = Message::new("1", MessageType::Tool)
            .with_heading("icon://build Running")
            .with_content("<out>");
        let container = renderer.render(&mut doc, &message);

        let pre = doc.query_class(container, "msg-content").unwrap();
        assert_eq!(doc.tag(pre), "pre");
        assert!(doc.outer_html(pre).contains("&lt;out&gt;"));
        assert!(doc.has_class(container, "mt-0"));
        let h4 = doc.query_tag(container, "h4").unwrap();
        assert!(doc.inner_html(h4).contains("material-symbols-outlined"));
        assert!(doc.query_class(container, MIN_MAX_CLASS).is_some());

        renderer.render(&mut doc, &Message::new("1", MessageType::Tool).with_content("   "));
        assert!(doc.query_class(container, "msg-content").is_none());
        assert!(doc.query_class(container, "msg-heading").is_none());
    }

    #[test]
    fn test_markdown_response_is_styled() {
        let mut doc = Document::new();
        let mut renderer = renderer();
        let message = Message::new("r", MessageType::Response)
            .with_content("See `/tmp/x`\n\n> quoted\n\n[site](https://example.com)");
        let container = renderer.render(&mut doc, &message);

        let content = doc.query_class(container, "msg-content").unwrap();
        let html = doc.inner_html(content);
        assert!(html.contains("openFileLink('/tmp/x')"));
        assert!(html.contains("target=\"_blank\""));
        assert!(html.contains("border-l-4"));
        let bubble = doc.query_class(container, "message-bubble").unwrap();
        assert!(doc.has_class(bubble, "ring-purple-100"));
    }

    #[test]
    fn test_user_message_gallery() {
        let mut doc = Document::new();
        let mut renderer = renderer();
        let message = Message::new("u", MessageType::User)
            .with_heading("User <me>")
            .with_content("hello")
            .with_kvps(json!({"attachments": [{"name": "a.png"}, {"name": "notes.txt"}]}));
        let container = renderer.render(&mut doc, &message);

        assert!(doc.has_class(container, "justify-end"));
        let heading = doc.query_class(container, "msg-heading").unwrap();
        assert!(doc.inner_html(heading).starts_with("User &lt;me&gt; <span"));
        let gallery = doc.query_class(container, "attachments-container").unwrap();
        let items = doc.children(gallery).to_vec();
        assert_eq!(items.len(), 2);
        assert!(doc.query_tag(items[0], "img").is_some());
        assert_eq!(doc.inner_text(items[1]), "notes.txt");
        assert!(matches!(
            doc.action(items[1]),
            Some(ClickAction::OpenAttachment { .. })
        ));

        renderer.render(&mut doc, &message);
        assert_eq!(doc.children(gallery), items.as_slice());

        // Re-render without attachments drops the gallery.
        renderer.render(&mut doc, &Message::new("u", MessageType::User).with_content("hello"));
        assert!(doc.query_class(container, "attachments-container").is_none());
    }

    #[test]
    fn test_grouping_by_side_and_agent_restart() {
        let mut doc = Document::new();
        let mut renderer = renderer();
        let group_of = |doc: &Document, node| doc.parent(node).unwrap();

        let a = renderer.render(&mut doc, &Message::new("a", MessageType::Tool));
        let b = renderer.render(&mut doc, &Message::new("b", MessageType::Browser));
        let c = renderer.render(&mut doc, &Message::new("c", MessageType::Agent));
        let d = renderer.render(&mut doc, &Message::new("d", MessageType::Info));
        let e = renderer.render(&mut doc, &Message::new("e", MessageType::Error));

        assert_eq!(group_of(&doc, a), group_of(&doc, b));
        assert_ne!(group_of(&doc, b), group_of(&doc, c));
        assert_ne!(group_of(&doc, c), group_of(&doc, d));
        assert_eq!(group_of(&doc, d), group_of(&doc, e));
        assert_eq!(doc.id_of(group_of(&doc, a)), Some("message-group-a"));
        assert_eq!(doc.attr(group_of(&doc, d), "data-group-type"), Some("mid"));

        let history = doc.get_element_by_id(CHAT_HISTORY_ID).unwrap();
        assert_eq!(doc.children(history).len(), 3);
    }

    #[test]
    fn test_detached_last_group_starts_a_new_one() {
        let mut doc = Document::new();
        let mut renderer = renderer();
        let a = renderer.render(&mut doc, &Message::new("a", MessageType::Tool));
        let history = chat_history(&mut doc);
        doc.clear(history);

        let b = renderer.render(&mut doc, &Message::new("b", MessageType::Tool));
        assert_ne!(doc.parent(a), doc.parent(b));
        assert_eq!(doc.id_of(doc.parent(b).unwrap()), Some("message-group-b"));
    }

    #[test]
    fn test_conversation_upsert_keeps_first_position() {
        let mut conversation = Conversation::new();
        assert!(conversation.upsert(Message::new("1", MessageType::User)));
        assert!(conversation.upsert(Message::new("2", MessageType::Agent)));
        assert!(!conversation.upsert(Message::new("1", MessageType::User).with_content("edited")));

        let ids: Vec<_> = conversation.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(conversation.get("1").unwrap().content.as_deref(), Some("edited"));
    }

    #[test]
    fn test_rebuild_reproduces_log() {
        let mut doc = Document::new();
        let mut renderer = renderer();
        let mut conversation = Conversation::new();
        conversation.upsert(Message::new("1", MessageType::User).with_content("hi"));
        conversation.upsert(Message::new("2", MessageType::Response).with_content("hello"));
        for message in conversation.messages() {
            renderer.render(&mut doc, message);
        }
        let history = chat_history(&mut doc);
        let before = doc.outer_html(history);

        renderer.rebuild(&mut doc, &conversation);
        let history = chat_history(&mut doc);
        let after = doc.outer_html(history);
        assert_eq!(before, after);
    }
}
