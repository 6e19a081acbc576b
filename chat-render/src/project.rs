//! Incremental projection of the arena into a real element tree.
//!
//! [`Projector`] remembers what it last wrote for every node and, on each
//! [`sync`](Projector::sync), sends a [`RenderTarget`] only the differences:
//! new elements, changed attributes and content, reordered children and
//! nodes that went away. Elements that did not change are never recreated,
//! so whatever the page keeps on them (scroll offsets, focus, typed input,
//! hover state) survives a re-render.
//!
//! Scroll requests queued on the document are forwarded after the tree is
//! in place, and [`measure`](Projector::measure) feeds real scroll geometry
//! back into the arena before the next event is handled.

use std::collections::{HashMap, HashSet};

use crate::dom::{Content, Document, NodeId, ScrollMetrics, ScrollRequest, VOID_TAGS};

/// Attribute carrying the arena id of each projected element.
pub const NODE_ATTR: &str = "data-node";

/// The page side of the projection.
///
/// `set_content` replaces an element's leading text or markup and may drop
/// its element children; when the node has children the projector follows
/// it with `set_children`. Elements handed to `set_children` were already
/// created and filled in.
pub trait RenderTarget {
    fn create(&mut self, node: NodeId, tag: &str);
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);
    fn remove_attribute(&mut self, node: NodeId, name: &str);
    fn set_content(&mut self, node: NodeId, content: Option<&Content>);
    fn set_children(&mut self, node: NodeId, children: &[NodeId]);
    /// The node left the tree; forget its element.
    fn discard(&mut self, node: NodeId);
    fn scroll(&mut self, node: NodeId, request: ScrollRequest);
    fn metrics(&self, node: NodeId) -> Option<ScrollMetrics>;
}

#[derive(Debug, Clone, Default)]
struct Rendered {
    attrs: Vec<(String, String)>,
    content: Option<Content>,
    children: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct Projector {
    rendered: HashMap<NodeId, Rendered>,
    revision: Option<u64>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements currently mirrored.
    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    /// Bring `target` up to date with `doc`. Returns whether anything was
    /// examined; an unchanged document with no pending scrolls is skipped.
    pub fn sync<T: RenderTarget + ?Sized>(&mut self, doc: &mut Document, target: &mut T) -> bool {
        let requests = doc.take_scroll_requests();
        if self.revision == Some(doc.revision()) && requests.is_empty() {
            return false;
        }

        let mut seen = HashSet::with_capacity(self.rendered.len());
        self.visit(doc, doc.body(), target, &mut seen);

        let gone: Vec<NodeId> = self
            .rendered
            .keys()
            .filter(|node| !seen.contains(*node))
            .copied()
            .collect();
        for node in &gone {
            self.rendered.remove(node);
            target.discard(*node);
        }

        for (node, request) in requests {
            if self.rendered.contains_key(&node) {
                target.scroll(node, request);
            }
        }

        tracing::trace!(
            revision = doc.revision(),
            elements = self.rendered.len(),
            discarded = gone.len(),
            "Projected document"
        );
        self.revision = Some(doc.revision());
        true
    }

    fn visit<T: RenderTarget + ?Sized>(
        &mut self,
        doc: &Document,
        node: NodeId,
        target: &mut T,
        seen: &mut HashSet<NodeId>,
    ) {
        seen.insert(node);
        let is_body = node == doc.body();
        let previous = match self.rendered.remove(&node) {
            Some(previous) => previous,
            None => {
                if !is_body {
                    target.create(node, doc.tag(node));
                }
                Rendered::default()
            }
        };

        let mut attrs = doc.attributes(node);
        if !is_body {
            attrs.insert(0, (NODE_ATTR.to_string(), node.to_string()));
        }
        for (name, value) in &attrs {
            let before = previous.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v);
            if before != Some(value) {
                target.set_attribute(node, name, value);
            }
        }
        for (name, _) in &previous.attrs {
            if !attrs.iter().any(|(k, _)| k == name) {
                target.remove_attribute(node, name);
            }
        }

        let content = doc.content(node).cloned();
        let children = doc.children(node).to_vec();
        if !VOID_TAGS.contains(&doc.tag(node)) {
            let content_changed = previous.content != content;
            if content_changed {
                target.set_content(node, content.as_ref());
            }
            for child in &children {
                self.visit(doc, *child, target, seen);
            }
            if (content_changed && !children.is_empty()) || previous.children != children {
                target.set_children(node, &children);
            }
        }

        self.rendered.insert(
            node,
            Rendered {
                attrs,
                content,
                children,
            },
        );
    }

    /// Read back the geometry of every projected scroll container.
    pub fn measure<T: RenderTarget + ?Sized>(&self, doc: &mut Document, target: &T) {
        for node in self.rendered.keys() {
            if !doc.is_scroll_container(*node) {
                continue;
            }
            if let Some(metrics) = target.metrics(*node) {
                doc.set_measured(*node, metrics);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSpec;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Create(NodeId, String),
        Attr(NodeId, String, String),
        RemoveAttr(NodeId, String),
        Content(NodeId, Option<Content>),
        Children(NodeId, Vec<NodeId>),
        Discard(NodeId),
        Scroll(NodeId, ScrollRequest),
    }

    #[derive(Default)]
    struct Recording {
        ops: Vec<Op>,
        metrics: HashMap<NodeId, ScrollMetrics>,
    }

    impl RenderTarget for Recording {
        fn create(&mut self, node: NodeId, tag: &str) {
            self.ops.push(Op::Create(node, tag.to_string()));
        }
        fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
            self.ops.push(Op::Attr(node, name.to_string(), value.to_string()));
        }
        fn remove_attribute(&mut self, node: NodeId, name: &str) {
            self.ops.push(Op::RemoveAttr(node, name.to_string()));
        }
        fn set_content(&mut self, node: NodeId, content: Option<&Content>) {
            self.ops.push(Op::Content(node, content.cloned()));
        }
        fn set_children(&mut self, node: NodeId, children: &[NodeId]) {
            self.ops.push(Op::Children(node, children.to_vec()));
        }
        fn discard(&mut self, node: NodeId) {
            self.ops.push(Op::Discard(node));
        }
        fn scroll(&mut self, node: NodeId, request: ScrollRequest) {
            self.ops.push(Op::Scroll(node, request));
        }
        fn metrics(&self, node: NodeId) -> Option<ScrollMetrics> {
            self.metrics.get(&node).copied()
        }
    }

    #[test]
    fn test_first_sync_builds_children_before_attaching_them() {
        let mut doc = Document::new();
        let list = doc.append_spec(
            doc.body(),
            &NodeSpec::new("ul").class("items").child(NodeSpec::new("li").text("one")),
        );
        let item = doc.children(list)[0];
        let mut projector = Projector::new();
        let mut target = Recording::default();

        assert!(projector.sync(&mut doc, &mut target));
        assert_eq!(
            target.ops,
            vec![
                Op::Create(list, "ul".to_string()),
                Op::Attr(list, NODE_ATTR.to_string(), list.to_string()),
                Op::Attr(list, "class".to_string(), "items".to_string()),
                Op::Create(item, "li".to_string()),
                Op::Attr(item, NODE_ATTR.to_string(), item.to_string()),
                Op::Content(item, Some(Content::Text("one".to_string()))),
                Op::Children(list, vec![item]),
                Op::Children(doc.body(), vec![list]),
            ]
        );
        assert_eq!(projector.len(), 3);
    }

    #[test]
    fn test_unchanged_document_is_skipped() {
        let mut doc = Document::new();
        doc.append_spec(doc.body(), &NodeSpec::new("div").text("x"));
        let mut projector = Projector::new();
        let mut target = Recording::default();
        projector.sync(&mut doc, &mut target);
        target.ops.clear();

        assert!(!projector.sync(&mut doc, &mut target));
        // A no-op write bumps the revision but produces no operations.
        let body = doc.body();
        doc.set_style(body, "overflow", "");
        let first = doc.children(body)[0];
        doc.add_class(first, "");
        projector.sync(&mut doc, &mut target);
        assert!(target.ops.is_empty());
    }

    #[test]
    fn test_only_differences_are_sent() {
        let mut doc = Document::new();
        let list = doc.append_spec(
            doc.body(),
            &NodeSpec::new("ul")
                .child(NodeSpec::new("li").text("a"))
                .child(NodeSpec::new("li").text("b")),
        );
        let (a, b) = (doc.children(list)[0], doc.children(list)[1]);
        let mut projector = Projector::new();
        let mut target = Recording::default();
        projector.sync(&mut doc, &mut target);
        target.ops.clear();

        doc.set_text(a, "A");
        doc.set_attr(list, "title", "t");
        doc.remove(b);
        projector.sync(&mut doc, &mut target);

        assert_eq!(
            target.ops,
            vec![
                Op::Attr(list, "title".to_string(), "t".to_string()),
                Op::Content(a, Some(Content::Text("A".to_string()))),
                Op::Children(list, vec![a]),
                Op::Discard(b),
            ]
        );

        target.ops.clear();
        doc.remove_attr(list, "title");
        projector.sync(&mut doc, &mut target);
        assert_eq!(target.ops, vec![Op::RemoveAttr(list, "title".to_string())]);
    }

    #[test]
    fn test_scroll_requests_follow_the_tree() {
        let mut doc = Document::new();
        let pane = doc.append_spec(doc.body(), &NodeSpec::new("div").class("overflow-y-auto"));
        let line = doc.append_spec(pane, &NodeSpec::new("p").text("x"));
        let mut projector = Projector::new();
        let mut target = Recording::default();
        projector.sync(&mut doc, &mut target);
        target.ops.clear();

        target.metrics.insert(
            pane,
            ScrollMetrics {
                scroll_top: 0.0,
                scroll_height: 500.0,
                client_height: 100.0,
            },
        );
        projector.measure(&mut doc, &target);
        assert_eq!(doc.max_scroll_top(pane), 400.0);

        doc.reveal(pane, line, 8.0);
        assert!(projector.sync(&mut doc, &mut target));
        assert_eq!(
            target.ops,
            vec![Op::Scroll(pane, ScrollRequest::Reveal { target: line, padding: 8.0 })]
        );
    }

    #[test]
    fn test_scroll_request_for_removed_node_is_dropped() {
        let mut doc = Document::new();
        let pane = doc.append_spec(doc.body(), &NodeSpec::new("div"));
        let mut projector = Projector::new();
        let mut target = Recording::default();
        projector.sync(&mut doc, &mut target);
        target.ops.clear();

        doc.scroll_to_end(pane);
        doc.remove(pane);
        projector.sync(&mut doc, &mut target);
        assert_eq!(
            target.ops,
            vec![Op::Children(doc.body(), vec![]), Op::Discard(pane)]
        );
    }

    #[test]
    fn test_void_elements_get_no_content() {
        let mut doc = Document::new();
        let img = doc.append_spec(doc.body(), &NodeSpec::new("img").attr("src", "/a.png"));
        let mut projector = Projector::new();
        let mut target = Recording::default();
        projector.sync(&mut doc, &mut target);
        assert!(!target
            .ops
            .iter()
            .any(|op| matches!(op, Op::Content(n, _) | Op::Children(n, _) if *n == img)));
    }
}
