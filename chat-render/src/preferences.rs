//! User display preferences applied across the whole conversation log:
//! per-kind minimize / maximize toggles driven by the heading buttons, and
//! bulk show / hide switches for utility messages, thoughts and raw JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dom::{ClickAction, Document, NodeId};

pub const MIN_MAX_CLASS: &str = "msg-min-max-btns";
const MAXIMIZED_CLASS: &str = "message-maximized";

/// Resize state for one message kind, keyed by its main class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeSetting {
    pub minimized: bool,
    pub maximized: bool,
}

impl ResizeSetting {
    pub fn minimize_glyph(&self) -> &'static str {
        if self.minimized {
            "expand_content"
        } else {
            "minimize"
        }
    }

    pub fn maximize_glyph(&self) -> &'static str {
        if self.maximized {
            "expand"
        } else {
            "expand_all"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResizeSettings {
    settings: HashMap<String, ResizeSetting>,
}

impl ResizeSettings {
    pub fn get(&self, main_class: &str) -> ResizeSetting {
        self.settings.get(main_class).copied().unwrap_or_default()
    }

    pub fn toggle_minimize(&mut self, main_class: &str) -> ResizeSetting {
        let setting = self.settings.entry(main_class.to_string()).or_default();
        setting.minimized = !setting.minimized;
        *setting
    }

    pub fn toggle_maximize(&mut self, main_class: &str) -> ResizeSetting {
        let setting = self.settings.entry(main_class.to_string()).or_default();
        setting.maximized = !setting.maximized;
        *setting
    }

    /// Apply every known setting to every message container of that kind.
    pub fn apply(&self, doc: &mut Document) {
        for (main_class, setting) in &self.settings {
            for container in doc.query_class_all(doc.body(), main_class) {
                apply_setting(doc, container, *setting);
            }
        }
    }

    /// Apply the setting for `main_class` to a single message container.
    pub fn apply_to(&self, doc: &mut Document, container: NodeId, main_class: &str) {
        apply_setting(doc, container, self.get(main_class));
    }
}

fn apply_setting(doc: &mut Document, container: NodeId, setting: ResizeSetting) {
    if let Some(body) = doc.query_class(container, "message-body") {
        doc.set_style(body, "display", if setting.minimized { "none" } else { "" });
    }
    if let Some(bubble) = doc.query_class(container, "message-bubble") {
        if setting.maximized && !setting.minimized {
            doc.add_class(bubble, MAXIMIZED_CLASS);
        } else {
            doc.remove_class(bubble, MAXIMIZED_CLASS);
        }
    }

    let Some(buttons) = doc.query_class(container, MIN_MAX_CLASS) else {
        return;
    };
    for link in doc.children(buttons).to_vec() {
        let glyph = match doc.action(link) {
            Some(ClickAction::ToggleMinimize { .. }) => setting.minimize_glyph(),
            Some(ClickAction::ToggleMaximize { .. }) => {
                doc.set_style(link, "display", if setting.minimized { "none" } else { "" });
                setting.maximize_glyph()
            }
            _ => continue,
        };
        if let Some(icon) = doc.first_child(link) {
            doc.set_text(icon, glyph);
        }
    }
}

/// Bulk visibility switches. Everything is shown by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassVisibility {
    pub show_utils: bool,
    pub show_thoughts: bool,
    pub show_json: bool,
}

impl Default for ClassVisibility {
    fn default() -> Self {
        Self {
            show_utils: true,
            show_thoughts: true,
            show_json: true,
        }
    }
}

impl ClassVisibility {
    fn rules(&self) -> [(&'static str, bool); 3] {
        [
            ("message-util", self.show_utils),
            ("msg-thoughts", self.show_thoughts),
            ("msg-json", self.show_json),
        ]
    }

    /// Show or hide `root` and every matching node under it.
    pub fn apply_within(&self, doc: &mut Document, root: NodeId) {
        let mut nodes = doc.descendants(root);
        nodes.insert(0, root);
        for (class, visible) in self.rules() {
            for node in nodes.iter().copied().filter(|n| doc.has_class(*n, class)).collect::<Vec<_>>() {
                doc.set_style(node, "display", if visible { "" } else { "none" });
            }
        }
    }

    pub fn apply(&self, doc: &mut Document) {
        let body = doc.body();
        self.apply_within(doc, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSpec;

    fn message(doc: &mut Document, main_class: &str) -> NodeId {
        let spec = NodeSpec::new("div").class(main_class).child(
            NodeSpec::new("div")
                .class("message-bubble")
                .child(
                    NodeSpec::new("div").class(MIN_MAX_CLASS).child(
                        NodeSpec::new("a")
                            .action(ClickAction::ToggleMinimize {
                                main_class: main_class.to_string(),
                            })
                            .child(NodeSpec::new("span").text("minimize")),
                    )
                    .child(
                        NodeSpec::new("a")
                            .action(ClickAction::ToggleMaximize {
                                main_class: main_class.to_string(),
                            })
                            .child(NodeSpec::new("span").text("expand_all")),
                    ),
                )
                .child(NodeSpec::new("div").class("message-body").text("body")),
        );
        doc.append_spec(doc.body(), &spec)
    }

    #[test]
    fn test_minimize_hides_bodies_of_that_kind_only() {
        let mut doc = Document::new();
        let tool = message(&mut doc, "message-tool");
        let agent = message(&mut doc, "message-agent");
        let mut settings = ResizeSettings::default();

        let setting = settings.toggle_minimize("message-tool");
        assert!(setting.minimized);
        settings.apply(&mut doc);

        let tool_body = doc.query_class(tool, "message-body").unwrap();
        let agent_body = doc.query_class(agent, "message-body").unwrap();
        assert!(!doc.is_displayed(tool_body));
        assert!(doc.is_displayed(agent_body));

        let buttons = doc.query_class(tool, MIN_MAX_CLASS).unwrap();
        let min_icon = doc.first_child(doc.children(buttons)[0]).unwrap();
        assert_eq!(doc.inner_text(min_icon), "expand_content");
        assert!(!doc.is_displayed(doc.children(buttons)[1]));

        settings.toggle_minimize("message-tool");
        settings.apply(&mut doc);
        assert!(doc.is_displayed(tool_body));
        assert_eq!(doc.inner_text(min_icon), "minimize");
    }

    #[test]
    fn test_maximize_marks_bubble() {
        let mut doc = Document::new();
        let tool = message(&mut doc, "message-tool");
        let mut settings = ResizeSettings::default();
        settings.toggle_maximize("message-tool");
        settings.apply_to(&mut doc, tool, "message-tool");

        let bubble = doc.query_class(tool, "message-bubble").unwrap();
        assert!(doc.has_class(bubble, MAXIMIZED_CLASS));
        let buttons = doc.query_class(tool, MIN_MAX_CLASS).unwrap();
        let max_icon = doc.first_child(doc.children(buttons)[1]).unwrap();
        assert_eq!(doc.inner_text(max_icon), "expand");
    }

    #[test]
    fn test_class_visibility_toggles() {
        let mut doc = Document::new();
        let util = doc.append_spec(doc.body(), &NodeSpec::new("div").class("message-util"));
        let row = doc.append_spec(doc.body(), &NodeSpec::new("tr").class("kvps-row msg-thoughts"));

        let mut visibility = ClassVisibility {
            show_utils: false,
            ..Default::default()
        };
        visibility.apply(&mut doc);
        assert!(!doc.is_displayed(util));
        assert!(doc.is_displayed(row));

        visibility.show_utils = true;
        visibility.show_thoughts = false;
        visibility.apply(&mut doc);
        assert!(doc.is_displayed(util));
        assert!(!doc.is_displayed(row));
    }
}
