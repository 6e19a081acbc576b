//! Arena-backed element tree
//!
//! The page is modelled as a projection: an arena of element nodes that the
//! reconcilers mutate in place and the web front end mirrors into the real
//! document (see [`crate::project`]). Removing a node frees its subtree and
//! the slots are recycled; a [`NodeId`] carries the slot generation, so a
//! handle to a freed node never resolves to its successor. Stale handles read
//! as an empty detached element and writes through them are dropped, which
//! lets callers hold on to ids and check liveness with
//! [`Document::is_connected`].
//!
//! There is no layout engine. Heights are estimated from content (one line per
//! text line, fixed image height) unless the host fed back real metrics with
//! [`Document::set_measured`].

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::markup::{decode_entities, escape_html, strip_tags};

/// Estimated height of one line of text, in px.
pub const LINE_HEIGHT: f64 = 20.0;
/// Estimated height of an image, in px.
pub const IMAGE_HEIGHT: f64 = 96.0;

pub const VOID_TAGS: &[&str] = &["img", "br", "hr", "input", "meta", "link"];
const BLOCK_TAGS: &[&str] = &[
    "div", "p", "pre", "table", "tr", "h1", "h2", "h3", "h4", "ul", "ol", "li", "blockquote",
];
const SCROLL_CONTAINER_CLASSES: &[&str] = &[
    "overflow-auto",
    "overflow-scroll",
    "overflow-y-auto",
    "overflow-y-scroll",
    "overflow-x-auto",
    "overflow-x-scroll",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// `{index}.{generation}`, the form written to `data-node`.
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id: {0}")]
pub struct ParseNodeIdError(String);

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseNodeIdError(s.to_string());
        let (index, generation) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            index: index.parse().map_err(|_| invalid())?,
            generation: generation.parse().map_err(|_| invalid())?,
        })
    }
}

/// Leaf content of an element, rendered before its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Html(String),
}

/// Behavior attached to a clickable node. Clicks bubble to the nearest
/// ancestor carrying an action, like DOM event listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickAction {
    /// Copy the gathered text of `target` to the clipboard.
    CopyText { target: NodeId },
    /// Read the gathered text of `target` aloud.
    SpeakText { target: NodeId },
    /// Open an image in the external image viewer.
    OpenImage {
        url: String,
        refresh_interval_ms: u64,
    },
    /// Open a user attachment through the attachment display service.
    OpenAttachment { attachment: serde_json::Value },
    ToggleMinimize { main_class: String },
    ToggleMaximize { main_class: String },
    /// Close the top-most modal.
    CloseModal,
}

/// A scroll position change the host has to apply to the real element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollRequest {
    To(f64),
    /// Follow the bottom, whatever the real content height turned out to be.
    End,
    /// Bring `target` to `padding` px below the container's top edge.
    Reveal { target: NodeId, padding: f64 },
}

/// Scroll geometry read back from a real element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String)>,
    style: Vec<(String, String)>,
    content: Option<Content>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    action: Option<ClickAction>,
    scroll_top: f64,
    client_height: Option<f64>,
    measured_scroll_height: Option<f64>,
    opacity: Option<f64>,
}

static VACANT: Node = Node::vacant();

impl Node {
    const fn vacant() -> Self {
        Self {
            tag: String::new(),
            id: None,
            classes: Vec::new(),
            attrs: Vec::new(),
            style: Vec::new(),
            content: None,
            children: Vec::new(),
            parent: None,
            action: None,
            scroll_top: 0.0,
            client_height: None,
            measured_scroll_height: None,
            opacity: None,
        }
    }

    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::vacant()
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Detached element description, mounted with [`Document::append_spec`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSpec {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<(String, String)>,
    pub style: Vec<(String, String)>,
    pub content: Option<Content>,
    pub children: Vec<NodeSpec>,
    pub action: Option<ClickAction>,
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Add one or more whitespace separated classes.
    pub fn class(mut self, classes: &str) -> Self {
        for class in classes.split_whitespace() {
            if !self.classes.iter().any(|c| c == class) {
                self.classes.push(class.to_string());
            }
        }
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn style(mut self, property: &str, value: &str) -> Self {
        self.style.push((property.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.content = Some(Content::Text(text.to_string()));
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.content = Some(Content::Html(html.to_string()));
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn action(mut self, action: ClickAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// The element tree. The first node is `<body>` and is never freed.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    ids: HashMap<String, NodeId>,
    scroll_requests: Vec<(NodeId, ScrollRequest)>,
    revision: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node::new("body")),
            }],
            free: Vec::new(),
            ids: HashMap::new(),
            scroll_requests: Vec::new(),
            revision: 0,
        }
    }

    pub fn body(&self) -> NodeId {
        NodeId {
            index: 0,
            generation: 0,
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .unwrap_or(&VACANT)
    }

    /// Mutable access for state the projection does not mirror.
    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.revision += 1;
        self.slot_mut(id)
    }

    /// Whether `id` still names an allocated node (attached or not).
    pub fn is_live(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation && slot.node.is_some())
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped by every change the projection mirrors.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.revision += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.node = Some(Node::new(tag));
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(Node::new(tag)),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Build a detached subtree from a spec.
    pub fn build(&mut self, spec: &NodeSpec) -> NodeId {
        let node = self.create_element(&spec.tag);
        if let Some(id) = &spec.id {
            self.set_id(node, id);
        }
        if let Some(n) = self.node_mut(node) {
            n.classes = spec.classes.clone();
            n.attrs = spec.attrs.clone();
            n.style = spec.style.clone();
            n.content = spec.content.clone();
            n.action = spec.action.clone();
        }
        for child in &spec.children {
            let child_id = self.build(child);
            self.append_child(node, child_id);
        }
        node
    }

    pub fn append_spec(&mut self, parent: NodeId, spec: &NodeSpec) -> NodeId {
        let node = self.build(spec);
        self.append_child(parent, node);
        node
    }

    /// Whether the subtree at `node` is exactly what `spec` would build.
    pub fn matches_spec(&self, node: NodeId, spec: &NodeSpec) -> bool {
        let n = self.node(node);
        self.is_live(node)
            && n.tag.eq_ignore_ascii_case(&spec.tag)
            && n.id == spec.id
            && n.classes == spec.classes
            && n.attrs == spec.attrs
            && n.style == spec.style
            && n.content == spec.content
            && n.action == spec.action
            && n.children.len() == spec.children.len()
            && n
                .children
                .iter()
                .zip(&spec.children)
                .all(|(child, child_spec)| self.matches_spec(*child, child_spec))
    }

    /// Make the children of `parent` match `specs` position by position,
    /// rebuilding only positions whose subtree differs. Children selected
    /// by `keep` are left alone and do not count as positions. Returns
    /// whether anything changed.
    pub fn reconcile_children(
        &mut self,
        parent: NodeId,
        specs: &[NodeSpec],
        keep: impl Fn(&Document, NodeId) -> bool,
    ) -> bool {
        let current: Vec<NodeId> = self
            .children(parent)
            .iter()
            .copied()
            .filter(|child| !keep(self, *child))
            .collect();

        let mut changed = false;
        for (position, spec) in specs.iter().enumerate() {
            match current.get(position) {
                Some(existing) if self.matches_spec(*existing, spec) => {}
                Some(existing) => {
                    let node = self.build(spec);
                    self.insert_before(parent, node, Some(*existing));
                    self.remove(*existing);
                    changed = true;
                }
                None => {
                    self.append_spec(parent, spec);
                    changed = true;
                }
            }
        }
        for surplus in current.iter().skip(specs.len()) {
            self.remove(*surplus);
            changed = true;
        }
        changed
    }

    // ------------------------------------------------------------------
    // Tree structure
    // ------------------------------------------------------------------

    /// Append `child` as the last child of `parent`, moving it if it is
    /// already attached somewhere.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` before `reference`; appends when `reference` is not a
    /// child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if !self.is_live(parent) || !self.is_live(child) || self.contains(child, parent) {
            return;
        }
        self.detach(child);
        let position = reference.and_then(|r| {
            self.node(parent)
                .children
                .iter()
                .position(|c| *c == r)
        });
        if let Some(p) = self.node_mut(parent) {
            match position {
                Some(index) => p.children.insert(index, child),
                None => p.children.push(child),
            }
        }
        if let Some(c) = self.node_mut(child) {
            c.parent = Some(parent);
        }
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        let first = self.first_child(parent);
        self.insert_before(parent, child, first);
    }

    /// Detach a node from its parent and free it with its whole subtree.
    /// Handles to the freed nodes go stale.
    pub fn remove(&mut self, node: NodeId) {
        if node == self.body() {
            return;
        }
        self.detach(node);
        self.release(node);
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.node_mut(node).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != node);
        }
    }

    fn release(&mut self, node: NodeId) {
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            let released = match self.slots.get_mut(id.index()) {
                Some(slot) if slot.generation == id.generation => slot.node.take(),
                _ => None,
            };
            let Some(released) = released else {
                continue;
            };
            pending.extend(released.children);
            if let Some(name) = released.id {
                if self.ids.get(&name) == Some(&id) {
                    self.ids.remove(&name);
                }
            }
            self.free.push(id.index);
        }
        self.revision += 1;
    }

    /// Drop content and free every child, like `innerHTML = ""`.
    pub fn clear(&mut self, node: NodeId) {
        let Some(n) = self.node_mut(node) else {
            return;
        };
        n.content = None;
        let children = std::mem::take(&mut n.children);
        for child in children {
            self.release(child);
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).children.first().copied()
    }

    /// Whether the node is reachable from `<body>`.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.is_live(node) && self.contains(self.body(), node)
    }

    /// Whether `node` is `ancestor` or lies inside it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        if let Some(node) = self.ids.get(id) {
            if self.is_connected(*node) && self.node(*node).id.as_deref() == Some(id) {
                return Some(*node);
            }
        }
        self.descendants(self.body())
            .into_iter()
            .find(|n| self.node(*n).id.as_deref() == Some(id))
    }

    /// All descendants in document order, excluding `root`.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    pub fn find_descendant(&self, root: NodeId, pred: impl Fn(&Document, NodeId) -> bool) -> Option<NodeId> {
        self.descendants(root).into_iter().find(|n| pred(self, *n))
    }

    pub fn query_class(&self, root: NodeId, class: &str) -> Option<NodeId> {
        self.find_descendant(root, |doc, n| doc.has_class(n, class))
    }

    pub fn query_class_all(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|n| self.has_class(*n, class))
            .collect()
    }

    pub fn query_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.find_descendant(root, |doc, n| doc.tag(n) == tag)
    }

    pub fn query_tag_all(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|n| self.tag(*n) == tag)
            .collect()
    }

    pub fn query_attr(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.find_descendant(root, |doc, n| doc.has_attr(n, name))
    }

    /// Nearest inclusive ancestor matching `pred`.
    pub fn closest(&self, node: NodeId, pred: impl Fn(&Document, NodeId) -> bool) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(n) = current {
            if pred(self, n) {
                return Some(n);
            }
            current = self.parent(n);
        }
        None
    }

    // ------------------------------------------------------------------
    // Element data
    // ------------------------------------------------------------------

    pub fn tag(&self, node: NodeId) -> &str {
        &self.node(node).tag
    }

    pub fn id_of(&self, node: NodeId) -> Option<&str> {
        self.node(node).id.as_deref()
    }

    pub fn set_id(&mut self, node: NodeId, id: &str) {
        if let Some(n) = self.node_mut(node) {
            n.id = Some(id.to_string());
            self.ids.insert(id.to_string(), node);
        }
    }

    pub fn classes(&self, node: NodeId) -> &[String] {
        &self.node(node).classes
    }

    pub fn class_name(&self, node: NodeId) -> String {
        self.node(node).classes.join(" ")
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.node(node).classes.iter().any(|c| c == class)
    }

    /// Replace the whole class list.
    pub fn set_class_name(&mut self, node: NodeId, classes: &str) {
        if let Some(n) = self.node_mut(node) {
            n.classes.clear();
            push_classes(&mut n.classes, classes);
        }
    }

    /// Add whitespace separated classes, skipping ones already present.
    pub fn add_class(&mut self, node: NodeId, classes: &str) {
        if let Some(n) = self.node_mut(node) {
            push_classes(&mut n.classes, classes);
        }
    }

    pub fn remove_class(&mut self, node: NodeId, classes: &str) {
        let remove: Vec<&str> = classes.split_whitespace().collect();
        if let Some(n) = self.node_mut(node) {
            n.classes.retain(|c| !remove.contains(&c.as_str()));
        }
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(n) = self.node_mut(node) else {
            return;
        };
        match n.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => n.attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let Some(n) = self.node_mut(node) {
            n.attrs.retain(|(k, _)| k != name);
        }
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<&str> {
        self.node(node)
            .style
            .iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v.as_str())
    }

    /// Set an inline style property; an empty value removes it.
    pub fn set_style(&mut self, node: NodeId, property: &str, value: &str) {
        if self.style(node, property).unwrap_or_default() == value {
            return;
        }
        let Some(n) = self.node_mut(node) else {
            return;
        };
        if value.is_empty() {
            n.style.retain(|(k, _)| k != property);
            return;
        }
        match n.style.iter_mut().find(|(k, _)| k == property) {
            Some((_, v)) => *v = value.to_string(),
            None => n.style.push((property.to_string(), value.to_string())),
        }
    }

    /// Every attribute as written to the page: `id`, `class`, the plain
    /// attributes, then `style`.
    pub fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        let n = self.node(node);
        let mut out = Vec::with_capacity(n.attrs.len() + 3);
        if let Some(id) = &n.id {
            out.push(("id".to_string(), id.clone()));
        }
        if !n.classes.is_empty() {
            out.push(("class".to_string(), n.classes.join(" ")));
        }
        out.extend(n.attrs.iter().cloned());
        if !n.style.is_empty() {
            let style = n
                .style
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("; ");
            out.push(("style".to_string(), style));
        }
        out
    }

    pub fn content(&self, node: NodeId) -> Option<&Content> {
        self.node(node).content.as_ref()
    }

    /// Replace children and content with plain text.
    pub fn set_text(&mut self, node: NodeId, text: &str) {
        self.set_content(node, Content::Text(text.to_string()));
    }

    /// Replace children and content with raw markup.
    pub fn set_inner_html(&mut self, node: NodeId, html: &str) {
        self.set_content(node, Content::Html(html.to_string()));
    }

    fn set_content(&mut self, node: NodeId, content: Content) {
        let n = self.node(node);
        if n.children.is_empty() && n.content.as_ref() == Some(&content) {
            return;
        }
        self.clear(node);
        if let Some(n) = self.node_mut(node) {
            n.content = Some(content);
        }
    }

    pub fn action(&self, node: NodeId) -> Option<&ClickAction> {
        self.node(node).action.as_ref()
    }

    pub fn set_action(&mut self, node: NodeId, action: ClickAction) {
        if let Some(n) = self.node_mut(node) {
            n.action = Some(action);
        }
    }

    /// Resolve a click on `node` to the nearest action, bubbling upwards.
    pub fn click_target(&self, node: NodeId) -> Option<(NodeId, ClickAction)> {
        self.closest(node, |doc, n| doc.action(n).is_some())
            .and_then(|n| self.action(n).cloned().map(|a| (n, a)))
    }

    // ------------------------------------------------------------------
    // Visibility and scroll metrics
    // ------------------------------------------------------------------

    /// Computed opacity. Defaults to fully opaque unless set by the host.
    pub fn computed_opacity(&self, node: NodeId) -> f64 {
        self.node(node).opacity.unwrap_or(1.0)
    }

    pub fn set_computed_opacity(&mut self, node: NodeId, opacity: f64) {
        if let Some(n) = self.slot_mut(node) {
            n.opacity = Some(opacity.clamp(0.0, 1.0));
        }
    }

    pub fn is_displayed(&self, node: NodeId) -> bool {
        self.style(node, "display") != Some("none")
    }

    /// Whether the node's own classes or style let it scroll.
    pub fn is_scroll_container(&self, node: NodeId) -> bool {
        self.node(node)
            .classes
            .iter()
            .any(|c| SCROLL_CONTAINER_CLASSES.contains(&c.as_str()))
            || ["overflow", "overflow-y", "overflow-x"]
                .iter()
                .any(|p| matches!(self.style(node, p), Some("auto" | "scroll")))
    }

    /// Give the node a fixed viewport height, making it a scroll container.
    pub fn set_client_height(&mut self, node: NodeId, height: f64) {
        if let Some(n) = self.slot_mut(node) {
            n.client_height = Some(height.max(0.0));
        }
    }

    /// Replace the estimates for `node` with geometry read from the page.
    pub fn set_measured(&mut self, node: NodeId, metrics: ScrollMetrics) {
        if let Some(n) = self.slot_mut(node) {
            n.client_height = Some(metrics.client_height.max(0.0));
            n.measured_scroll_height = Some(metrics.scroll_height.max(0.0));
            n.scroll_top = metrics.scroll_top.max(0.0);
        }
    }

    pub fn client_height(&self, node: NodeId) -> f64 {
        self.node(node)
            .client_height
            .unwrap_or_else(|| self.content_height(node))
    }

    /// Height of everything inside the node.
    pub fn content_height(&self, node: NodeId) -> f64 {
        if !self.is_displayed(node) {
            return 0.0;
        }
        let n = self.node(node);
        let own = match (&n.content, n.tag.as_str()) {
            (_, "img") => IMAGE_HEIGHT,
            (Some(content), _) => {
                let text = content_text(content);
                if text.is_empty() {
                    0.0
                } else {
                    text.lines().count().max(1) as f64 * LINE_HEIGHT
                }
            }
            (None, _) => 0.0,
        };
        own + n
            .children
            .iter()
            .map(|c| self.outer_height(*c))
            .sum::<f64>()
    }

    fn outer_height(&self, node: NodeId) -> f64 {
        if !self.is_displayed(node) {
            return 0.0;
        }
        self.node(node)
            .client_height
            .unwrap_or_else(|| self.content_height(node))
    }

    /// Measured scroll height when the host reported one, else the estimate.
    pub fn scroll_height(&self, node: NodeId) -> f64 {
        self.node(node)
            .measured_scroll_height
            .unwrap_or_else(|| self.content_height(node))
            .max(self.client_height(node))
    }

    pub fn max_scroll_top(&self, node: NodeId) -> f64 {
        (self.scroll_height(node) - self.client_height(node)).max(0.0)
    }

    pub fn scroll_top(&self, node: NodeId) -> f64 {
        self.node(node).scroll_top
    }

    /// Set the scroll offset, clamped to the scrollable range.
    pub fn set_scroll_top(&mut self, node: NodeId, top: f64) {
        let top = top.clamp(0.0, self.max_scroll_top(node));
        if let Some(n) = self.slot_mut(node) {
            n.scroll_top = top;
            self.request_scroll(node, ScrollRequest::To(top));
        }
    }

    /// Pin the node to its bottom edge.
    pub fn scroll_to_end(&mut self, node: NodeId) {
        let bottom = self.max_scroll_top(node);
        if let Some(n) = self.slot_mut(node) {
            n.scroll_top = bottom;
            self.request_scroll(node, ScrollRequest::End);
        }
    }

    /// Scroll `container` so `target` sits `padding` px below its top edge.
    pub fn reveal(&mut self, container: NodeId, target: NodeId, padding: f64) {
        let top = (self.offset_top(target, container) - padding)
            .clamp(0.0, self.max_scroll_top(container));
        if let Some(n) = self.slot_mut(container) {
            n.scroll_top = top;
            self.request_scroll(container, ScrollRequest::Reveal { target, padding });
        }
    }

    fn request_scroll(&mut self, node: NodeId, request: ScrollRequest) {
        self.scroll_requests.retain(|(n, _)| *n != node);
        self.scroll_requests.push((node, request));
    }

    /// Scroll changes not yet applied to the page, oldest first.
    pub fn take_scroll_requests(&mut self) -> Vec<(NodeId, ScrollRequest)> {
        std::mem::take(&mut self.scroll_requests)
    }

    pub fn has_scroll_requests(&self) -> bool {
        !self.scroll_requests.is_empty()
    }

    /// Distance from the top of `container`'s content to the top of `node`.
    pub fn offset_top(&self, node: NodeId, container: NodeId) -> f64 {
        let mut offset = 0.0;
        let mut current = node;
        while current != container {
            let Some(parent) = self.parent(current) else {
                break;
            };
            let p = self.node(parent);
            if let Some(content) = &p.content {
                offset += content_text(content).lines().count() as f64 * LINE_HEIGHT;
            }
            for sibling in &p.children {
                if *sibling == current {
                    break;
                }
                offset += self.outer_height(*sibling);
            }
            current = parent;
        }
        offset
    }

    // ------------------------------------------------------------------
    // Text and serialization
    // ------------------------------------------------------------------

    /// Rendered text of the subtree, tags stripped and entities decoded.
    pub fn inner_text(&self, node: NodeId) -> String {
        let n = self.node(node);
        let mut out = String::new();
        if let Some(content) = &n.content {
            out.push_str(&content_text(content));
        }
        for child in &n.children {
            if !self.is_displayed(*child) {
                continue;
            }
            let text = self.inner_text(*child);
            if text.is_empty() {
                continue;
            }
            if BLOCK_TAGS.contains(&self.tag(*child)) && !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&text);
        }
        out
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, false, &mut out);
        out
    }

    /// Serialize with a `data-node` attribute on every element so the host
    /// can map page events back to arena nodes.
    pub fn outer_html_with_ids(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, true, &mut out);
        out
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        let n = self.node(node);
        if let Some(content) = &n.content {
            write_content(content, &mut out);
        }
        for child in &n.children {
            self.write_html(*child, false, &mut out);
        }
        out
    }

    fn write_html(&self, node: NodeId, with_ids: bool, out: &mut String) {
        let n = self.node(node);
        out.push('<');
        out.push_str(&n.tag);
        if with_ids {
            let _ = write!(out, " data-node=\"{node}\"");
        }
        for (name, value) in self.attributes(node) {
            let _ = write!(out, " {}=\"{}\"", name, escape_html(&value));
        }
        out.push('>');
        if VOID_TAGS.contains(&n.tag.as_str()) {
            return;
        }
        if let Some(content) = &n.content {
            write_content(content, out);
        }
        for child in &n.children {
            self.write_html(*child, with_ids, out);
        }
        let _ = write!(out, "</{}>", n.tag);
    }
}

fn push_classes(list: &mut Vec<String>, classes: &str) {
    for class in classes.split_whitespace() {
        if !list.iter().any(|c| c == class) {
            list.push(class.to_string());
        }
    }
}

fn content_text(content: &Content) -> String {
    match content {
        Content::Text(text) => text.clone(),
        Content::Html(html) => decode_entities(&strip_tags(html)),
    }
}

fn write_content(content: &Content, out: &mut String) {
    match content {
        Content::Text(text) => out.push_str(&escape_html(text)),
        Content::Html(html) => out.push_str(html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_moves_existing_child() {
        let mut doc = Document::new();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        let child = doc.create_element("span");
        doc.append_child(doc.body(), a);
        doc.append_child(doc.body(), b);
        doc.append_child(a, child);
        doc.append_child(b, child);
        assert!(doc.children(a).is_empty());
        assert_eq!(doc.children(b), &[child]);
        assert_eq!(doc.parent(child), Some(b));
    }

    #[test]
    fn test_get_element_by_id_ignores_detached_nodes() {
        let mut doc = Document::new();
        let node = doc.create_element("div");
        doc.set_id(node, "message-1");
        assert_eq!(doc.get_element_by_id("message-1"), None);
        doc.append_child(doc.body(), node);
        assert_eq!(doc.get_element_by_id("message-1"), Some(node));
        doc.remove(node);
        assert_eq!(doc.get_element_by_id("message-1"), None);
    }

    #[test]
    fn test_class_list_operations() {
        let mut doc = Document::new();
        let node = doc.create_element("div");
        doc.set_class_name(node, "a b  b c");
        assert_eq!(doc.class_name(node), "a b c");
        doc.add_class(node, "c d");
        doc.remove_class(node, "a");
        assert_eq!(doc.class_name(node), "b c d");
    }

    #[test]
    fn test_click_bubbles_to_nearest_action() {
        let mut doc = Document::new();
        let button = doc.append_spec(
            doc.body(),
            &NodeSpec::new("button")
                .action(ClickAction::CloseModal)
                .child(NodeSpec::new("span").text("x")),
        );
        let icon = doc.first_child(button).unwrap();
        assert_eq!(doc.click_target(icon), Some((button, ClickAction::CloseModal)));
        assert_eq!(doc.click_target(doc.body()), None);
    }

    #[test]
    fn test_scroll_metrics_follow_content() {
        let mut doc = Document::new();
        let viewport = doc.create_element("div");
        doc.append_child(doc.body(), viewport);
        doc.set_client_height(viewport, 100.0);
        let pre = doc.create_element("pre");
        doc.append_child(viewport, pre);
        doc.set_text(pre, &"line\n".repeat(10));
        assert_eq!(doc.scroll_height(viewport), 200.0);
        assert_eq!(doc.max_scroll_top(viewport), 100.0);
        doc.set_scroll_top(viewport, 500.0);
        assert_eq!(doc.scroll_top(viewport), 100.0);
        assert_eq!(
            doc.take_scroll_requests(),
            vec![(viewport, ScrollRequest::To(100.0))]
        );
        assert!(!doc.has_scroll_requests());
    }

    #[test]
    fn test_measured_metrics_override_estimates() {
        let mut doc = Document::new();
        let viewport = doc.append_spec(doc.body(), &NodeSpec::new("div").class("overflow-y-auto"));
        assert!(doc.is_scroll_container(viewport));
        doc.set_measured(
            viewport,
            ScrollMetrics {
                scroll_top: 40.0,
                scroll_height: 900.0,
                client_height: 300.0,
            },
        );
        assert_eq!(doc.scroll_top(viewport), 40.0);
        assert_eq!(doc.max_scroll_top(viewport), 600.0);
        doc.scroll_to_end(viewport);
        assert_eq!(doc.scroll_top(viewport), 600.0);
        assert_eq!(doc.take_scroll_requests(), vec![(viewport, ScrollRequest::End)]);
    }

    #[test]
    fn test_freed_slot_is_reused_with_new_generation() {
        let mut doc = Document::new();
        let old = doc.append_spec(doc.body(), &NodeSpec::new("div").child(NodeSpec::new("span")));
        let before = doc.len();
        doc.remove(old);
        assert_eq!(doc.len(), before - 2);
        assert!(!doc.is_live(old));

        let fresh = doc.create_element("p");
        assert_eq!(fresh.generation(), 1);
        assert_ne!(fresh, old);
        assert_eq!(doc.tag(old), "");
        doc.set_text(old, "ignored");
        assert_eq!(doc.content(fresh), None);
        assert_eq!(doc.len(), before - 1);
    }

    #[test]
    fn test_reconcile_children_rebuilds_only_changed_positions() {
        let mut doc = Document::new();
        let list = doc.append_spec(doc.body(), &NodeSpec::new("ul"));
        let specs = vec![
            NodeSpec::new("li").text("a"),
            NodeSpec::new("li").text("b"),
        ];
        assert!(doc.reconcile_children(list, &specs, |_, _| false));
        let first = doc.children(list)[0];
        let size = doc.len();

        assert!(!doc.reconcile_children(list, &specs, |_, _| false));
        assert_eq!(doc.len(), size);

        let changed = vec![NodeSpec::new("li").text("a"), NodeSpec::new("li").text("c")];
        assert!(doc.reconcile_children(list, &changed, |_, _| false));
        assert_eq!(doc.children(list)[0], first);
        assert_eq!(doc.inner_text(list), "a\nc");
        assert_eq!(doc.len(), size);
    }

    #[test]
    fn test_node_id_parses_its_display_form() {
        let mut doc = Document::new();
        let node = doc.create_element("div");
        doc.remove(node);
        let node = doc.create_element("div");
        assert_eq!(node.to_string(), "1.1");
        assert_eq!("1.1".parse::<NodeId>(), Ok(node));
        assert!("1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_outer_html_escapes_text_and_attributes() {
        let mut doc = Document::new();
        let node = doc.append_spec(
            doc.body(),
            &NodeSpec::new("a")
                .class("link")
                .attr("title", "say \"hi\"")
                .text("<b>"),
        );
        assert_eq!(
            doc.outer_html(node),
            "<a class=\"link\" title=\"say &quot;hi&quot;\">&lt;b&gt;</a>"
        );
    }

    #[test]
    fn test_inner_text_strips_markup() {
        let mut doc = Document::new();
        let node = doc.append_spec(
            doc.body(),
            &NodeSpec::new("div")
                .child(NodeSpec::new("span").html("<b>bold</b> &amp; plain"))
                .child(NodeSpec::new("pre").text("code")),
        );
        assert_eq!(doc.inner_text(node), "bold & plain\ncode");
    }
}
