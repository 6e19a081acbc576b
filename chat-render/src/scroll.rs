use crate::dom::{Document, NodeId};

/// Remembers whether a scroll container was pinned to the bottom before a
/// mutation, so the pin can be re-applied afterwards.
#[derive(Debug, Clone, Copy)]
pub struct Scroller {
    node: NodeId,
    was_at_bottom: bool,
}

impl Scroller {
    pub fn capture(doc: &Document, node: NodeId, tolerance: f64) -> Self {
        Self {
            node,
            was_at_bottom: is_at_bottom(doc, node, tolerance),
        }
    }

    pub fn was_at_bottom(&self) -> bool {
        self.was_at_bottom
    }

    /// Follow new content when pinned; otherwise leave the user's position.
    pub fn restore(self, doc: &mut Document) {
        if self.was_at_bottom {
            doc.scroll_to_end(self.node);
        }
    }
}

pub fn is_at_bottom(doc: &Document, node: NodeId, tolerance: f64) -> bool {
    let distance = doc.scroll_height(node) - doc.scroll_top(node) - doc.client_height(node);
    distance <= tolerance
}
