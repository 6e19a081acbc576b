//! Real-page side of the projection: applies the projector's changes to
//! live elements and reads their scroll geometry back.
//!
//! Arena `<body>` maps onto two elements: its attributes land on the page
//! `<body>` (scroll locking) and its children live in the mount element.

use std::collections::HashMap;

use chat_render::project::NODE_ATTR;
use chat_render::{Content, NodeId, RenderTarget, ScrollMetrics, ScrollRequest};
use wasm_bindgen::JsCast;
use web_sys::{Document, Element};

pub struct DomTarget {
    document: Document,
    mount: Element,
    body: NodeId,
    elements: HashMap<NodeId, Element>,
}

impl DomTarget {
    /// Mount onto the element with `mount_id`. `body` is the arena root.
    pub fn mount(mount_id: &str, body: NodeId) -> Option<Self> {
        let document = web_sys::window()?.document()?;
        let mount = document.get_element_by_id(mount_id)?;
        Some(Self {
            document,
            mount,
            body,
            elements: HashMap::new(),
        })
    }

    /// Element that receives `node`'s children and content.
    fn container(&self, node: NodeId) -> Option<&Element> {
        if node == self.body {
            Some(&self.mount)
        } else {
            self.elements.get(&node)
        }
    }

    /// Element that receives `node`'s attributes.
    fn attribute_host(&self, node: NodeId) -> Option<Element> {
        if node == self.body {
            self.document.body().map(Into::into)
        } else {
            self.elements.get(&node).cloned()
        }
    }
}

/// Next projected element after `node` among its siblings.
fn next_projected(node: &web_sys::Node) -> Option<Element> {
    let mut current = node.next_sibling();
    while let Some(sibling) = current {
        if let Some(element) = sibling.dyn_ref::<Element>() {
            if element.has_attribute(NODE_ATTR) {
                return Some(element.clone());
            }
        }
        current = sibling.next_sibling();
    }
    None
}

fn first_projected(parent: &Element) -> Option<Element> {
    let first = parent.first_child()?;
    match first.dyn_ref::<Element>() {
        Some(element) if element.has_attribute(NODE_ATTR) => Some(element.clone()),
        _ => next_projected(&first),
    }
}

impl RenderTarget for DomTarget {
    fn create(&mut self, node: NodeId, tag: &str) {
        match self.document.create_element(tag) {
            Ok(element) => {
                self.elements.insert(node, element);
            }
            Err(e) => log::error!("Failed to create <{}>: {:?}", tag, e),
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(element) = self.attribute_host(node) else {
            return;
        };
        if let Err(e) = element.set_attribute(name, value) {
            log::error!("Failed to set {} on node {}: {:?}", name, node, e);
        }
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(element) = self.attribute_host(node) {
            let _ = element.remove_attribute(name);
        }
    }

    fn set_content(&mut self, node: NodeId, content: Option<&Content>) {
        let Some(element) = self.container(node) else {
            return;
        };
        match content {
            Some(Content::Html(html)) => element.set_inner_html(html),
            Some(Content::Text(text)) => element.set_text_content(Some(text)),
            None => element.set_text_content(None),
        }
    }

    fn set_children(&mut self, node: NodeId, children: &[NodeId]) {
        let Some(parent) = self.container(node) else {
            return;
        };
        let mut cursor = first_projected(parent);
        for child in children {
            let Some(element) = self.elements.get(child) else {
                continue;
            };
            if cursor.as_ref() == Some(element) {
                cursor = next_projected(element);
                continue;
            }
            let reference: Option<&web_sys::Node> = cursor.as_ref().map(|c| c.as_ref());
            if let Err(e) = parent.insert_before(element, reference) {
                log::error!("Failed to attach node {} under {}: {:?}", child, node, e);
            }
        }
        while let Some(stale) = cursor {
            cursor = next_projected(&stale);
            stale.remove();
        }
    }

    fn discard(&mut self, node: NodeId) {
        if let Some(element) = self.elements.remove(&node) {
            element.remove();
        }
    }

    fn scroll(&mut self, node: NodeId, request: ScrollRequest) {
        let Some(element) = self.container(node) else {
            return;
        };
        match request {
            ScrollRequest::To(top) => element.set_scroll_top(top.round() as i32),
            ScrollRequest::End => element.set_scroll_top(element.scroll_height()),
            ScrollRequest::Reveal { target, padding } => {
                let Some(target) = self.elements.get(&target) else {
                    return;
                };
                let offset = target.get_bounding_client_rect().top()
                    - element.get_bounding_client_rect().top()
                    + element.scroll_top() as f64;
                element.set_scroll_top((offset - padding).max(0.0).round() as i32);
            }
        }
    }

    fn metrics(&self, node: NodeId) -> Option<ScrollMetrics> {
        let element = self.container(node)?;
        Some(ScrollMetrics {
            scroll_top: element.scroll_top() as f64,
            scroll_height: element.scroll_height() as f64,
            client_height: element.client_height() as f64,
        })
    }
}
