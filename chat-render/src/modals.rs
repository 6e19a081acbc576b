//! Modal stack manager
//!
//! Dialogs stack on top of each other with a single shared backdrop that
//! always sits directly beneath the top-most dialog. Content is fetched
//! through a [`ComponentLoader`]; since a dialog may be closed while its
//! content is still loading, every load result is applied against a
//! [`ModalHandle`] and dropped if that dialog is gone.
//!
//! Styles and scripts shipped with loaded content are mounted as `<style>`
//! and `<script>` elements on the page body, tagged with the dialog token so
//! they go away with it. Scripts run once, when first projected into the
//! page.

use std::cell::RefCell;

use crate::config::RenderConfig;
use crate::dom::{ClickAction, Document, NodeId, NodeSpec};
use crate::markup::escape_html;
use crate::services::{ComponentLoader, LoadError, LoadedComponent};

const BACKDROP_CLASSES: &str = "fixed inset-0 z-40 bg-gray-900/50 dark:bg-gray-900/80 backdrop-blur-sm transition-opacity";
const WRAPPER_CLASSES: &str = "fixed top-0 left-0 right-0 z-50 w-full p-4 overflow-x-hidden overflow-y-auto md:inset-0 h-[calc(100%-1rem)] max-h-full justify-center items-center flex";
const INNER_CLASSES: &str = "relative w-full max-w-2xl max-h-full";
const CONTENT_CLASSES: &str = "relative bg-white rounded-lg shadow dark:bg-gray-700 flex flex-col max-h-[calc(100vh-2rem)]";
const HEADER_CLASSES: &str = "flex items-start justify-between p-4 border-b rounded-t dark:border-gray-600 shrink-0";
const TITLE_CLASSES: &str = "text-xl font-semibold text-gray-900 dark:text-white modal-title";
const CLOSE_CLASSES: &str = "modal-close text-gray-400 bg-transparent hover:bg-gray-200 hover:text-gray-900 rounded-lg text-sm w-8 h-8 ml-auto inline-flex justify-center items-center dark:hover:bg-gray-600 dark:hover:text-white";
const SCROLL_CLASSES: &str = "p-6 space-y-6 overflow-y-auto modal-scroll";
const FOOTER_SLOT_CLASSES: &str = "modal-footer-slot shrink-0 hidden";
const LOADING_HTML: &str = r#"<div class="flex items-center justify-center p-4"><div class="animate-spin rounded-full h-8 w-8 border-b-2 border-blue-600"></div></div>"#;
const ERROR_PANEL_CLASSES: &str = "p-4 mb-4 text-sm text-red-800 rounded-lg bg-red-50 dark:bg-gray-800 dark:text-red-400";

/// Attribute marking a declarative modal trigger; its `href` is the path.
pub const TRIGGER_ATTR: &str = "data-modal-content";
/// Attribute marking the part of loaded content that belongs in the footer.
pub const FOOTER_ATTR: &str = "data-modal-footer";
pub const STYLE_ATTR: &str = "data-modal-style";
pub const SCRIPT_ATTR: &str = "data-modal-script";

/// Identifies one opened dialog, even after others with the same path come
/// and go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalHandle {
    pub token: u64,
    pub path: String,
}

#[derive(Debug, Clone)]
struct Modal {
    token: u64,
    path: String,
    node: NodeId,
    inner: NodeId,
    title: NodeId,
    body: NodeId,
    scroll: NodeId,
    footer_slot: NodeId,
    styles: Vec<String>,
    scripts: Vec<String>,
}

#[derive(Debug)]
pub struct ModalStack {
    stack: Vec<Modal>,
    backdrop: NodeId,
    base_z_index: i32,
    scroll_padding: f64,
    next_token: u64,
    deferred_footers: Vec<u64>,
    pointer_down: Option<NodeId>,
}

impl ModalStack {
    /// Create the manager and its (hidden) shared backdrop.
    pub fn new(doc: &mut Document, config: &RenderConfig) -> Self {
        let body = doc.body();
        let backdrop = doc.append_spec(
            body,
            &NodeSpec::new("div")
                .class(BACKDROP_CLASSES)
                .style("display", "none"),
        );
        Self {
            stack: Vec::new(),
            backdrop,
            base_z_index: config.modal_base_z_index,
            scroll_padding: config.modal_scroll_padding_px,
            next_token: 1,
            deferred_footers: Vec::new(),
            pointer_down: None,
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn backdrop(&self) -> NodeId {
        self.backdrop
    }

    /// Wrapper nodes, bottom first.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.stack.iter().map(|m| m.node).collect()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.stack.iter().map(|m| m.path.as_str()).collect()
    }

    pub fn is_open(&self, handle: &ModalHandle) -> bool {
        self.find(handle.token).is_some()
    }

    /// Body node of an open dialog.
    pub fn body_of(&self, handle: &ModalHandle) -> Option<NodeId> {
        self.find(handle.token).map(|m| m.body)
    }

    fn find(&self, token: u64) -> Option<&Modal> {
        self.stack.iter().find(|m| m.token == token)
    }

    /// Push a new dialog for `path` showing a loading placeholder.
    pub fn open(&mut self, doc: &mut Document, path: &str) -> ModalHandle {
        let token = self.next_token;
        self.next_token += 1;

        let body = doc.body();
        let node = doc.append_spec(body, &NodeSpec::new("div").class(WRAPPER_CLASSES));
        let inner = doc.append_spec(node, &NodeSpec::new("div").class(INNER_CLASSES));
        let content = doc.append_spec(inner, &NodeSpec::new("div").class(CONTENT_CLASSES));
        let header = doc.append_spec(content, &NodeSpec::new("div").class(HEADER_CLASSES));
        let title = doc.append_spec(header, &NodeSpec::new("h3").class(TITLE_CLASSES));
        doc.append_spec(
            header,
            &NodeSpec::new("button")
                .attr("type", "button")
                .class(CLOSE_CLASSES)
                .action(ClickAction::CloseModal)
                .child(NodeSpec::new("span").class("material-symbols-outlined").text("close"))
                .child(NodeSpec::new("span").class("sr-only").text("Close modal")),
        );
        let scroll = doc.append_spec(content, &NodeSpec::new("div").class(SCROLL_CLASSES));
        let modal_body = doc.append_spec(scroll, &NodeSpec::new("div").class("modal-bd"));
        let footer_slot = doc.append_spec(content, &NodeSpec::new("div").class(FOOTER_SLOT_CLASSES));
        doc.set_inner_html(modal_body, LOADING_HTML);

        self.stack.push(Modal {
            token,
            path: path.to_string(),
            node,
            inner,
            title,
            body: modal_body,
            scroll,
            footer_slot,
            styles: Vec::new(),
            scripts: Vec::new(),
        });
        doc.set_style(body, "overflow", "hidden");
        self.update_layers(doc);

        tracing::debug!(path, token, depth = self.stack.len(), "Modal opened");
        ModalHandle {
            token,
            path: path.to_string(),
        }
    }

    /// Apply fetched content to the dialog behind `handle`. Returns `false`
    /// when the dialog was closed in the meantime.
    pub fn apply_loaded(
        &mut self,
        doc: &mut Document,
        handle: &ModalHandle,
        result: Result<LoadedComponent, LoadError>,
    ) -> bool {
        let Some(modal) = self.stack.iter_mut().find(|m| m.token == handle.token) else {
            tracing::warn!(path = %handle.path, "Modal closed before its content arrived");
            return false;
        };

        match result {
            Ok(component) => {
                let title = component
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| modal.path.clone());
                doc.set_text(modal.title, &title);
                for class in &component.root_classes {
                    doc.add_class(modal.inner, class);
                }
                for class in &component.body_classes {
                    doc.add_class(modal.body, class);
                }

                doc.clear(modal.body);
                for spec in &component.body {
                    doc.append_spec(modal.body, spec);
                }

                let page = doc.body();
                for (i, css) in component.styles.iter().enumerate() {
                    let id = format!("{}-{i}", modal.token);
                    doc.append_spec(page, &NodeSpec::new("style").attr(STYLE_ATTR, &id).text(css));
                    modal.styles.push(id);
                }
                for (i, source) in component.scripts.iter().enumerate() {
                    let id = format!("{}-{i}", modal.token);
                    doc.append_spec(
                        page,
                        &NodeSpec::new("script").attr(SCRIPT_ATTR, &id).text(source),
                    );
                    modal.scripts.push(id);
                }

                self.deferred_footers.push(handle.token);
            }
            Err(e) => {
                tracing::error!(path = %modal.path, error = %e, "Error loading modal content");
                doc.set_inner_html(
                    modal.body,
                    &format!(
                        r#"<div class="{ERROR_PANEL_CLASSES}">Failed to load modal content: {}</div>"#,
                        escape_html(&e.to_string())
                    ),
                );
            }
        }
        true
    }

    /// Run footer relocations queued by [`apply_loaded`](Self::apply_loaded).
    /// Call once the loaded content has been mounted (next frame).
    pub fn flush_deferred(&mut self, doc: &mut Document) {
        for token in std::mem::take(&mut self.deferred_footers) {
            let Some(modal) = self.find(token) else {
                continue;
            };
            let (body, slot) = (modal.body, modal.footer_slot);
            if let Some(footer) = doc.query_attr(body, FOOTER_ATTR) {
                doc.append_child(slot, footer);
                doc.remove_class(slot, "hidden");
                doc.set_style(slot, "display", "block");
            }
        }
    }

    /// Close the first dialog opened for `path`, or the top one when `path`
    /// is `None`. Unknown paths and an empty stack are no-ops.
    pub fn close(&mut self, doc: &mut Document, path: Option<&str>) -> Option<ModalHandle> {
        let index = match path {
            Some(path) => self.stack.iter().position(|m| m.path == path)?,
            None => self.stack.len().checked_sub(1)?,
        };
        Some(self.close_at(doc, index))
    }

    fn close_at(&mut self, doc: &mut Document, index: usize) -> ModalHandle {
        let modal = self.stack.remove(index);
        let page = doc.body();

        for id in &modal.styles {
            if let Some(node) = doc.find_descendant(page, |d, n| d.attr(n, STYLE_ATTR) == Some(id.as_str())) {
                doc.remove(node);
            }
        }
        for id in &modal.scripts {
            if let Some(node) = doc.find_descendant(page, |d, n| d.attr(n, SCRIPT_ATTR) == Some(id.as_str())) {
                doc.remove(node);
            }
        }
        doc.remove(modal.node);

        if self.stack.is_empty() {
            doc.set_style(page, "overflow", "");
        }
        self.update_layers(doc);

        tracing::debug!(path = %modal.path, depth = self.stack.len(), "Modal closed");
        ModalHandle {
            token: modal.token,
            path: modal.path,
        }
    }

    /// Entry *i* sits at `base + 2i`; the backdrop directly beneath the top.
    fn update_layers(&self, doc: &mut Document) {
        for (i, modal) in self.stack.iter().enumerate() {
            let z = self.base_z_index + 2 * i as i32;
            doc.set_style(modal.node, "z-index", &z.to_string());
        }

        let backdrop_z = match self.stack.len() {
            0 => {
                doc.set_style(self.backdrop, "display", "none");
                return;
            }
            1 => self.base_z_index - 1,
            n => self.base_z_index + 2 * (n as i32 - 2) + 1,
        };
        doc.set_style(self.backdrop, "display", "block");
        doc.set_style(self.backdrop, "z-index", &backdrop_z.to_string());
    }

    /// Escape closes only the top dialog. Returns whether a dialog closed.
    pub fn key_down(&mut self, doc: &mut Document, key: &str) -> bool {
        key == "Escape" && !self.stack.is_empty() && self.close(doc, None).is_some()
    }

    pub fn pointer_down(&mut self, target: NodeId) {
        self.pointer_down = Some(target);
    }

    /// A dialog closes only when both press and release landed on its own
    /// wrapper (the dimmed area around the panel), never on its content.
    pub fn pointer_up(&mut self, doc: &mut Document, target: NodeId) -> bool {
        let pressed = self.pointer_down.take();
        if pressed != Some(target) {
            return false;
        }
        match self.stack.iter().position(|m| m.node == target) {
            Some(index) => {
                self.close_at(doc, index);
                true
            }
            None => false,
        }
    }

    /// Scroll the top dialog so the element with `id` sits just below the
    /// top edge of its scroll area.
    pub fn scroll_to(&self, doc: &mut Document, id: &str) {
        if id.is_empty() {
            return;
        }
        let Some(top) = self.stack.last() else {
            return;
        };
        let Some(target) = doc.find_descendant(top.node, |d, n| d.id_of(n) == Some(id)) else {
            tracing::debug!(id, "Scroll target not found in top modal");
            return;
        };
        doc.reveal(top.scroll, target, self.scroll_padding);
    }

    pub fn scroll_node_of_top(&self) -> Option<NodeId> {
        self.stack.last().map(|m| m.scroll)
    }
}

/// Resolve a click to a declarative modal trigger's path. Disabled
/// triggers resolve to nothing.
pub fn trigger_for_click(doc: &Document, node: NodeId) -> Option<String> {
    let trigger = doc.closest(node, |d, n| d.has_attr(n, TRIGGER_ATTR))?;
    if doc.has_attr(trigger, "disabled") || doc.has_class(trigger, "disabled") {
        return None;
    }
    doc.attr(trigger, "href").map(str::to_string)
}

/// Open a dialog for `path`, fetch its content and apply it if the dialog
/// is still open when the fetch completes.
pub async fn open_modal(
    doc: &RefCell<Document>,
    modals: &RefCell<ModalStack>,
    loader: &dyn ComponentLoader,
    path: &str,
) -> ModalHandle {
    let handle = modals.borrow_mut().open(&mut doc.borrow_mut(), path);
    let result = loader.load(path).await;
    modals
        .borrow_mut()
        .apply_loaded(&mut doc.borrow_mut(), &handle, result);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z_of(doc: &Document, node: NodeId) -> i32 {
        doc.style(node, "z-index").unwrap().parse().unwrap()
    }

    fn setup() -> (Document, ModalStack) {
        let mut doc = Document::new();
        let modals = ModalStack::new(&mut doc, &RenderConfig::default());
        (doc, modals)
    }

    #[test]
    fn test_layering_for_one_and_many() {
        let (mut doc, mut modals) = setup();
        assert!(!doc.is_displayed(modals.backdrop()));

        modals.open(&mut doc, "a");
        assert_eq!(z_of(&doc, modals.nodes()[0]), 50);
        assert_eq!(z_of(&doc, modals.backdrop()), 49);
        assert_eq!(doc.style(doc.body(), "overflow"), Some("hidden"));

        modals.open(&mut doc, "b");
        modals.open(&mut doc, "c");
        let zs: Vec<_> = modals.nodes().iter().map(|n| z_of(&doc, *n)).collect();
        assert_eq!(zs, vec![50, 52, 54]);
        assert_eq!(z_of(&doc, modals.backdrop()), 53);
    }

    #[test]
    fn test_close_middle_by_path() {
        let (mut doc, mut modals) = setup();
        modals.open(&mut doc, "a");
        modals.open(&mut doc, "b");
        modals.open(&mut doc, "c");

        let closed = modals.close(&mut doc, Some("b")).unwrap();
        assert_eq!(closed.path, "b");
        assert_eq!(modals.paths(), vec!["a", "c"]);
        let zs: Vec<_> = modals.nodes().iter().map(|n| z_of(&doc, *n)).collect();
        assert_eq!(zs, vec![50, 52]);
        assert_eq!(z_of(&doc, modals.backdrop()), 51);
    }

    #[test]
    fn test_close_noops_and_unlock() {
        let (mut doc, mut modals) = setup();
        assert!(modals.close(&mut doc, None).is_none());
        modals.open(&mut doc, "a");
        assert!(modals.close(&mut doc, Some("missing")).is_none());
        assert_eq!(modals.len(), 1);

        assert!(modals.key_down(&mut doc, "Escape"));
        assert!(modals.is_empty());
        assert!(!doc.is_displayed(modals.backdrop()));
        assert_eq!(doc.style(doc.body(), "overflow"), None);
        assert!(!modals.key_down(&mut doc, "Escape"));
    }

    #[test]
    fn test_same_path_twice_closes_first() {
        let (mut doc, mut modals) = setup();
        let first = modals.open(&mut doc, "settings");
        let second = modals.open(&mut doc, "settings");
        modals.close(&mut doc, Some("settings"));
        assert!(!modals.is_open(&first));
        assert!(modals.is_open(&second));
    }

    #[test]
    fn test_load_after_close_is_dropped() {
        let (mut doc, mut modals) = setup();
        let handle = modals.open(&mut doc, "a");
        modals.close(&mut doc, None);
        let applied = modals.apply_loaded(
            &mut doc,
            &handle,
            Ok(LoadedComponent {
                title: Some("Late".to_string()),
                ..Default::default()
            }),
        );
        assert!(!applied);
    }

    #[test]
    fn test_loaded_content_footer_and_scoped_assets() {
        let (mut doc, mut modals) = setup();
        let handle = modals.open(&mut doc, "settings");
        let component = LoadedComponent {
            title: None,
            root_classes: vec!["max-w-4xl".to_string()],
            body_classes: vec!["settings-body".to_string()],
            body: vec![
                NodeSpec::new("p").text("General"),
                NodeSpec::new("div")
                    .attr(FOOTER_ATTR, "")
                    .child(NodeSpec::new("button").text("Save")),
            ],
            styles: vec![".x { color: red }".to_string()],
            scripts: vec!["init()".to_string()],
        };
        assert!(modals.apply_loaded(&mut doc, &handle, Ok(component)));

        let body = modals.body_of(&handle).unwrap();
        assert!(doc.has_class(body, "settings-body"));
        let wrapper = modals.nodes()[0];
        let title = doc.query_class(wrapper, "modal-title").unwrap();
        assert_eq!(doc.inner_text(title), "settings");

        let slot = doc.query_class(wrapper, "modal-footer-slot").unwrap();
        assert!(doc.children(slot).is_empty());
        modals.flush_deferred(&mut doc);
        assert_eq!(doc.children(slot).len(), 1);
        assert!(!doc.has_class(slot, "hidden"));
        assert_eq!(doc.style(slot, "display"), Some("block"));
        assert!(doc.query_attr(body, FOOTER_ATTR).is_none());

        assert!(doc.query_attr(doc.body(), STYLE_ATTR).is_some());
        modals.close(&mut doc, None);
        assert!(doc.query_attr(doc.body(), STYLE_ATTR).is_none());
        assert!(doc.query_attr(doc.body(), SCRIPT_ATTR).is_none());
    }

    #[test]
    fn test_load_failure_shows_error_panel() {
        let (mut doc, mut modals) = setup();
        let handle = modals.open(&mut doc, "broken");
        modals.apply_loaded(&mut doc, &handle, Err(LoadError::Fetch("HTTP 500".to_string())));
        let body = modals.body_of(&handle).unwrap();
        assert_eq!(doc.inner_text(body), "Failed to load modal content: HTTP 500");
    }

    #[test]
    fn test_pointer_close_requires_press_and_release_on_wrapper() {
        let (mut doc, mut modals) = setup();
        let handle = modals.open(&mut doc, "a");
        let wrapper = modals.nodes()[0];
        let body = modals.body_of(&handle).unwrap();

        modals.pointer_down(body);
        assert!(!modals.pointer_up(&mut doc, wrapper));
        modals.pointer_down(wrapper);
        assert!(!modals.pointer_up(&mut doc, body));
        assert_eq!(modals.len(), 1);

        modals.pointer_down(wrapper);
        assert!(modals.pointer_up(&mut doc, wrapper));
        assert!(modals.is_empty());
    }

    #[test]
    fn test_scroll_to_leaves_padding() {
        let (mut doc, mut modals) = setup();
        let handle = modals.open(&mut doc, "docs");
        let mut body = Vec::new();
        for i in 0..20 {
            body.push(NodeSpec::new("p").text(&format!("line {i}")));
        }
        body.push(NodeSpec::new("h2").id("target").text("Target"));
        body.push(NodeSpec::new("pre").text(&"more\n".repeat(20)));
        modals.apply_loaded(
            &mut doc,
            &handle,
            Ok(LoadedComponent {
                body,
                ..Default::default()
            }),
        );
        let scroll = modals.scroll_node_of_top().unwrap();
        doc.set_client_height(scroll, 100.0);

        modals.scroll_to(&mut doc, "target");
        // 20 paragraphs of 20px precede the target
        assert_eq!(doc.scroll_top(scroll), 400.0 - 20.0);
    }

    #[test]
    fn test_trigger_resolution() {
        let mut doc = Document::new();
        let link = doc.append_spec(
            doc.body(),
            &NodeSpec::new("a")
                .attr(TRIGGER_ATTR, "")
                .attr("href", "settings/modal.html")
                .child(NodeSpec::new("span").text("Settings")),
        );
        let span = doc.first_child(link).unwrap();
        assert_eq!(trigger_for_click(&doc, span).as_deref(), Some("settings/modal.html"));

        doc.add_class(link, "disabled");
        assert_eq!(trigger_for_click(&doc, span), None);
        assert_eq!(trigger_for_click(&doc, doc.body()), None);
    }
}
