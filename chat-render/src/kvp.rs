//! Key-value panel shown under a message body.
//!
//! Rows are matched to entries by position, not by key: entry *i* always
//! lands in row *i*, and surplus rows are dropped from the end. Value blocks
//! that did not change are kept, so re-rendering a streaming message only
//! touches what moved.

use serde_json::{Map, Value};
use shared_types::IMAGE_REF_PREFIX;

use crate::actions;
use crate::config::RenderConfig;
use crate::dom::{ClickAction, Document, NodeId, NodeSpec};
use crate::markup::convert_to_title_case;
use crate::scroll::Scroller;

pub const TABLE_CLASS: &str = "msg-kvps";
const TABLE_CLASSES: &str = "msg-kvps w-full text-sm text-left mt-3 border-separate border-spacing-y-2";
const KEY_CELL_BASE: &str = "kvps-key py-1.5 pr-3 font-semibold whitespace-nowrap align-top";
const KEY_CELL_TAIL: &str = "w-1 text-xs uppercase tracking-wide";
const VALUE_CELL_CLASSES: &str = "py-1.5 align-top break-all";
const VALUE_DIV_CLASSES: &str = "kvps-val text-gray-700 dark:text-gray-300";
const IMAGE_CLASSES: &str = "max-w-xs rounded shadow-sm hover:opacity-90 transition-opacity cursor-pointer mt-1";
const PRE_CLASSES: &str = "whitespace-pre-wrap font-sans text-sm";
const CODE_PRE_CLASSES: &str = "whitespace-pre-wrap font-mono text-xs bg-gray-100 dark:bg-gray-900 p-3 rounded-lg border border-gray-200 dark:border-gray-700 mt-2 overflow-x-auto";

/// Background and toggle classes for a row, by key.
fn row_classes(key: &str) -> &'static str {
    match key {
        "thoughts" | "reasoning" => "kvps-row bg-purple-50 dark:bg-purple-900/20 msg-thoughts",
        "text" | "content" | "response" => "kvps-row bg-green-50 dark:bg-green-900/20",
        _ => "kvps-row",
    }
}

fn label_color(key: &str) -> &'static str {
    match key {
        "thoughts" | "reasoning" => "text-purple-600 dark:text-purple-400",
        "headline" | "tool_name" => "text-amber-600 dark:text-amber-400",
        "text" | "content" | "response" => "text-green-600 dark:text-green-400",
        "query" | "memories" => "text-cyan-600 dark:text-cyan-400",
        "result" | "finished" => "text-emerald-600 dark:text-emerald-400",
        _ => "text-blue-600 dark:text-blue-400",
    }
}

/// Reconcile the kvp table inside `container` with `kvps`. `None` removes it.
pub fn render(
    doc: &mut Document,
    container: NodeId,
    kvps: Option<&Map<String, Value>>,
    config: &RenderConfig,
) {
    let Some(kvps) = kvps else {
        if let Some(table) = doc.query_class(container, TABLE_CLASS) {
            doc.remove(table);
        }
        return;
    };

    let table = match doc.query_class(container, TABLE_CLASS) {
        Some(table) => table,
        None => doc.append_spec(container, &NodeSpec::new("table").class(TABLE_CLASSES)),
    };

    for (index, (key, value)) in kvps.iter().enumerate() {
        let row = match doc.query_tag_all(table, "tr").get(index) {
            Some(row) => *row,
            None => doc.append_spec(table, &NodeSpec::new("tr")),
        };
        doc.set_class_name(row, row_classes(key));
        // A reused row may still carry the hidden state of its previous key.
        doc.set_style(row, "display", "");

        let th = match doc.query_tag(row, "th") {
            Some(th) => th,
            None => doc.append_spec(row, &NodeSpec::new("th")),
        };
        doc.set_class_name(
            th,
            &format!("{KEY_CELL_BASE} {} {KEY_CELL_TAIL}", label_color(key)),
        );
        doc.set_text(th, &convert_to_title_case(key));

        let td = match doc.query_tag(row, "td") {
            Some(td) => td,
            None => doc.append_spec(row, &NodeSpec::new("td").class(VALUE_CELL_CLASSES)),
        };
        let value_div = match doc.query_class(td, "kvps-val") {
            Some(div) => div,
            None => doc.append_spec(td, &NodeSpec::new("div").class(VALUE_DIV_CLASSES)),
        };

        let blocks: Vec<NodeSpec> = match value {
            Value::Array(items) => items.iter().map(|item| value_spec(item, config)).collect(),
            other => vec![value_spec(other, config)],
        };
        let scroller = Scroller::capture(doc, value_div, config.scroll_tolerance_px);
        actions::attach(doc, value_div);
        let changed = doc.reconcile_children(value_div, &blocks, |d, n| {
            d.has_class(n, actions::CONTAINER_CLASS)
        });
        if changed {
            scroller.restore(doc);
        }
    }

    let rows = doc.query_tag_all(table, "tr");
    if rows.len() > kvps.len() {
        tracing::debug!(
            removed = rows.len() - kvps.len(),
            "Dropping surplus kvp rows"
        );
        for row in &rows[kvps.len()..] {
            doc.remove(*row);
        }
    }
}

/// One rendered value block.
fn value_spec(value: &Value, config: &RenderConfig) -> NodeSpec {
    let text = match value {
        Value::String(s) if s.starts_with(IMAGE_REF_PREFIX) => {
            let url = s.replacen(IMAGE_REF_PREFIX, &config.image_endpoint, 1);
            return NodeSpec::new("img")
                .class(IMAGE_CLASSES)
                .attr("src", &url)
                .attr("alt", "Image Attachment")
                .action(ClickAction::OpenImage {
                    url,
                    refresh_interval_ms: config.image_refresh_interval_ms,
                });
        }
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) | Value::Null => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
        scalar => scalar.to_string(),
    };

    let classes = if looks_like_code(&text) {
        CODE_PRE_CLASSES
    } else {
        PRE_CLASSES
    };
    NodeSpec::new("pre")
        .class(classes)
        .child(NodeSpec::new("span").text(&text))
}

fn looks_like_code(text: &str) -> bool {
    text.contains('\n') || text.contains('{') || text.contains("  ")
}
