//! Browser implementations of the renderer's collaborators and the glue
//! that routes page events into the [`Page`] controller.

use std::rc::Rc;

use async_trait::async_trait;
use chat_render::services::{
    AttachmentDisplayService, Clipboard, ClipboardError, ImageViewer, MathError, MathRenderer,
    SpeechError, SpeechService,
};
use chat_render::project::NODE_ATTR;
use chat_render::{NodeId, Page};
use dioxus::prelude::*;
use serde_json::Value;
use shared_types::AttachmentDisplay;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use web_sys::{window, Element, HtmlDocument, HtmlTextAreaElement, KeyboardEvent, MouseEvent};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = ["navigator", "clipboard"], js_name = writeText, catch)]
    fn clipboard_write_text(text: &str) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(js_namespace = katex, js_name = renderToString, catch)]
    fn katex_render_to_string(source: &str, options: &JsValue) -> Result<String, JsValue>;
}

#[wasm_bindgen(js_namespace = window)]
extern "C" {
    #[wasm_bindgen(js_name = openImageViewer)]
    fn open_image_viewer(url: &str, refresh_interval_ms: f64);
}

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];

fn js_error(e: &JsValue) -> String {
    e.as_string().unwrap_or_else(|| format!("{e:?}"))
}

// ----------------------------------------------------------------------------
// Collaborators
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct BrowserClipboard;

#[async_trait(?Send)]
impl Clipboard for BrowserClipboard {
    fn is_secure(&self) -> bool {
        let Some(window) = window() else {
            return false;
        };
        window.is_secure_context()
            && js_sys::Reflect::has(&window.navigator(), &JsValue::from_str("clipboard"))
                .unwrap_or(false)
    }

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let promise = clipboard_write_text(text).map_err(|e| ClipboardError::WriteRejected(js_error(&e)))?;
        wasm_bindgen_futures::JsFuture::from(promise)
            .await
            .map(|_| ())
            .map_err(|e| ClipboardError::WriteRejected(js_error(&e)))
    }

    fn legacy_copy(&self, text: &str) -> Result<(), ClipboardError> {
        let document = window()
            .and_then(|w| w.document())
            .ok_or(ClipboardError::CopyCommandFailed)?;
        let body = document.body().ok_or(ClipboardError::CopyCommandFailed)?;
        let textarea = document
            .create_element("textarea")
            .ok()
            .and_then(|el| el.dyn_into::<HtmlTextAreaElement>().ok())
            .ok_or(ClipboardError::CopyCommandFailed)?;

        textarea.set_value(text);
        let _ = textarea.style().set_property("position", "fixed");
        let _ = textarea.style().set_property("left", "-999999px");
        let _ = textarea.style().set_property("top", "-999999px");
        let _ = body.append_child(&textarea);
        let _ = textarea.focus();
        textarea.select();

        let copied = document
            .dyn_into::<HtmlDocument>()
            .ok()
            .and_then(|d| d.exec_command("copy").ok())
            .unwrap_or(false);
        textarea.remove();

        if copied {
            Ok(())
        } else {
            Err(ClipboardError::CopyCommandFailed)
        }
    }
}

#[derive(Debug, Default)]
pub struct BrowserSpeech;

#[async_trait(?Send)]
impl SpeechService for BrowserSpeech {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let synthesis = window()
            .and_then(|w| w.speech_synthesis().ok())
            .ok_or(SpeechError::Unavailable)?;
        let utterance = web_sys::SpeechSynthesisUtterance::new_with_text(text)
            .map_err(|e| SpeechError::Failed(js_error(&e)))?;

        let done = js_sys::Promise::new(&mut |resolve, reject| {
            utterance.set_onend(Some(&resolve));
            utterance.set_onerror(Some(&reject));
        });
        synthesis.cancel();
        synthesis.speak(&utterance);

        wasm_bindgen_futures::JsFuture::from(done)
            .await
            .map(|_| ())
            .map_err(|e| SpeechError::Failed(js_error(&e)))
    }
}

/// KaTeX via the page's global `katex` object.
#[derive(Debug, Default)]
pub struct KatexMath;

impl MathRenderer for KatexMath {
    fn render(&self, source: &str) -> Result<String, MathError> {
        let options = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&options, &"throwOnError".into(), &JsValue::FALSE);
        let _ = js_sys::Reflect::set(&options, &"displayMode".into(), &JsValue::TRUE);
        katex_render_to_string(source, &options).map_err(|e| MathError::Render(js_error(&e)))
    }
}

/// Forwards to the page's `openImageViewer(url, refreshMs)` bridge.
#[derive(Debug, Default)]
pub struct BrowserImageViewer;

impl ImageViewer for BrowserImageViewer {
    fn open(&self, url: &str, refresh_interval_ms: u64) {
        open_image_viewer(url, refresh_interval_ms as f64);
    }
}

/// Attachment descriptors are either a path string or an object with
/// `name` and `url` / `path`.
pub struct BrowserAttachments {
    image_endpoint: String,
    viewer: Rc<dyn ImageViewer>,
    refresh_interval_ms: u64,
}

impl BrowserAttachments {
    pub fn new(image_endpoint: &str, viewer: Rc<dyn ImageViewer>, refresh_interval_ms: u64) -> Self {
        Self {
            image_endpoint: image_endpoint.to_string(),
            viewer,
            refresh_interval_ms,
        }
    }

    fn location(attachment: &Value) -> String {
        match attachment {
            Value::String(path) => path.clone(),
            Value::Object(map) => ["url", "path", "name"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }

    fn url_for(&self, location: &str) -> String {
        if location.starts_with('/') {
            format!("{}{location}", self.image_endpoint)
        } else {
            location.to_string()
        }
    }
}

impl AttachmentDisplayService for BrowserAttachments {
    fn describe(&self, attachment: &Value) -> AttachmentDisplay {
        let location = Self::location(attachment);
        let filename = attachment
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| location.rsplit('/').next().unwrap_or_default().to_string());
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        let is_image = IMAGE_EXTENSIONS.contains(&extension.as_str());

        AttachmentDisplay {
            is_image,
            preview_url: if is_image {
                self.url_for(&location)
            } else {
                String::new()
            },
            filename,
            extension,
        }
    }

    fn open(&self, attachment: &Value) {
        let display = self.describe(attachment);
        let url = self.url_for(&Self::location(attachment));
        if display.is_image {
            self.viewer.open(&url, self.refresh_interval_ms);
        } else if let Some(window) = window() {
            if let Err(e) = window.open_with_url_and_target(&url, "_blank") {
                dioxus_logger::tracing::error!("Failed to open attachment: {:?}", e);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Event routing
// ----------------------------------------------------------------------------

/// Arena node for the nearest projected element at or above `target`.
fn node_of(target: Option<web_sys::EventTarget>) -> Option<(Element, NodeId)> {
    let element = target?.dyn_into::<Element>().ok()?;
    let projected = element.closest(&format!("[{NODE_ATTR}]")).ok()??;
    let node = projected.get_attribute(NODE_ATTR)?.parse().ok()?;
    Some((projected, node))
}

/// Copy the live computed opacity of `element` and its projected ancestors
/// into the arena so the overlay guard sees what the user sees.
fn sync_opacity(page: &Page, element: &Element) {
    let Some(window) = window() else {
        return;
    };
    let mut current = Some(element.clone());
    while let Some(el) = current {
        let node = el
            .get_attribute(NODE_ATTR)
            .and_then(|value| value.parse::<NodeId>().ok());
        if let Some(node) = node {
            let opacity = window
                .get_computed_style(&el)
                .ok()
                .flatten()
                .and_then(|style| style.get_property_value("opacity").ok())
                .and_then(|value| value.parse::<f64>().ok())
                .unwrap_or(1.0);
            page.with_document(|doc| doc.set_computed_opacity(node, opacity));
        }
        current = el.parent_element();
    }
}

/// Route document clicks, keys and pointer presses into `page`. Calls
/// `measure` before an event reaches the page and `on_change` after every
/// event that may have changed the projection.
pub fn install_event_bridge(page: Rc<Page>, measure: Callback<()>, on_change: Callback<()>) {
    let Some(document) = window().and_then(|w| w.document()) else {
        log::error!("No document; event bridge not installed");
        return;
    };

    let click_page = page.clone();
    let click_closure = Closure::wrap(Box::new(move |e: MouseEvent| {
        let Some((element, node)) = node_of(e.target()) else {
            return;
        };
        measure.call(());
        sync_opacity(&click_page, &element);
        let page = click_page.clone();
        wasm_bindgen_futures::spawn_local(async move {
            if page.click(node, chrono::Utc::now()).await {
                on_change.call(());
            }
        });
        on_change.call(());
    }) as Box<dyn FnMut(MouseEvent)>);

    let key_page = page.clone();
    let keydown_closure = Closure::wrap(Box::new(move |e: KeyboardEvent| {
        if key_page.key_down(&e.key()) {
            on_change.call(());
        }
    }) as Box<dyn FnMut(KeyboardEvent)>);

    let down_page = page.clone();
    let mousedown_closure = Closure::wrap(Box::new(move |e: MouseEvent| {
        if let Some((_, node)) = node_of(e.target()) {
            down_page.pointer_down(node);
        }
    }) as Box<dyn FnMut(MouseEvent)>);

    let up_page = page;
    let mouseup_closure = Closure::wrap(Box::new(move |e: MouseEvent| {
        if let Some((_, node)) = node_of(e.target()) {
            if up_page.pointer_up(node) {
                on_change.call(());
            }
        }
    }) as Box<dyn FnMut(MouseEvent)>);

    let listeners: [(&str, &js_sys::Function); 4] = [
        ("click", click_closure.as_ref().unchecked_ref()),
        ("keydown", keydown_closure.as_ref().unchecked_ref()),
        ("mousedown", mousedown_closure.as_ref().unchecked_ref()),
        ("mouseup", mouseup_closure.as_ref().unchecked_ref()),
    ];
    for (event, callback) in listeners {
        if let Err(e) = document.add_event_listener_with_callback(event, callback) {
            log::error!("Failed to add {} listener: {:?}", event, e);
        }
    }

    // Leak the closures to keep them alive (they will be cleaned up when the page unloads)
    click_closure.forget();
    keydown_closure.forget();
    mousedown_closure.forget();
    mouseup_closure.forget();
}

/// Expose `openModal`, `closeModal`, `scrollModal`, `openFileLink` and
/// `setMessage` on `window` for inline handlers and the conversation driver.
pub fn install_globals(page: Rc<Page>, measure: Callback<()>, on_change: Callback<()>) {
    let Some(window) = window() else {
        return;
    };

    let open_page = page.clone();
    let open_modal = Closure::wrap(Box::new(move |path: String| {
        let page = open_page.clone();
        wasm_bindgen_futures::spawn_local(async move {
            page.open_modal(&path).await;
            on_change.call(());
        });
        on_change.call(());
    }) as Box<dyn FnMut(String)>);

    let close_page = page.clone();
    let close_modal = Closure::wrap(Box::new(move |path: JsValue| {
        let path = path.as_string();
        if close_page.close_modal(path.as_deref()).is_some() {
            on_change.call(());
        }
    }) as Box<dyn FnMut(JsValue)>);

    let scroll_page = page.clone();
    let scroll_modal = Closure::wrap(Box::new(move |id: String| {
        measure.call(());
        scroll_page.scroll_modal(&id);
        on_change.call(());
    }) as Box<dyn FnMut(String)>);

    let file_page = page.clone();
    let open_file_link = Closure::wrap(Box::new(move |path: String| {
        let page = file_page.clone();
        wasm_bindgen_futures::spawn_local(async move {
            page.open_file_link(&path).await;
            on_change.call(());
        });
        on_change.call(());
    }) as Box<dyn FnMut(String)>);

    let message_page = page;
    let set_message = Closure::wrap(Box::new(move |json: String| {
        match serde_json::from_str::<shared_types::Message>(&json) {
            Ok(message) => {
                measure.call(());
                message_page.set_message(message);
                on_change.call(());
            }
            Err(e) => log::error!("Invalid message: {}", e),
        }
    }) as Box<dyn FnMut(String)>);

    let globals: [(&str, &JsValue); 5] = [
        ("openModal", open_modal.as_ref()),
        ("closeModal", close_modal.as_ref()),
        ("scrollModal", scroll_modal.as_ref()),
        ("openFileLink", open_file_link.as_ref()),
        ("setMessage", set_message.as_ref()),
    ];
    for (name, callback) in globals {
        if let Err(e) = js_sys::Reflect::set(&window, &JsValue::from_str(name), callback) {
            log::error!("Failed to expose {}: {:?}", name, e);
        }
    }

    open_modal.forget();
    close_modal.forget();
    scroll_modal.forget();
    open_file_link.forget();
    set_message.forget();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoViewer;

    impl ImageViewer for NoViewer {
        fn open(&self, _url: &str, _refresh_interval_ms: u64) {}
    }

    fn attachments() -> BrowserAttachments {
        BrowserAttachments::new("/image_get?path=", Rc::new(NoViewer), 1000)
    }

    #[test]
    fn test_image_attachment_gets_preview() {
        let display = attachments().describe(&json!("/tmp/uploads/Photo.PNG"));
        assert!(display.is_image);
        assert_eq!(display.filename, "Photo.PNG");
        assert_eq!(display.extension, "png");
        assert_eq!(display.preview_url, "/image_get?path=/tmp/uploads/Photo.PNG");
    }

    #[test]
    fn test_file_attachment_uses_name() {
        let display = attachments().describe(&json!({"name": "notes.txt", "path": "/tmp/a1"}));
        assert!(!display.is_image);
        assert_eq!(display.filename, "notes.txt");
        assert_eq!(display.extension, "txt");
        assert!(display.preview_url.is_empty());
    }
}
