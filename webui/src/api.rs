use std::rc::Rc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chat_render::api::{ApiClient, ApiError, HttpRequest, HttpResponse, HttpTransport};
use chat_render::dom::NodeSpec;
use chat_render::services::{ComponentLoader, LoadError, LoadedComponent};
use gloo_net::http::{Method, Request, RequestBuilder};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use web_sys::{DomParser, Element, HtmlDocument, Node, SupportedType};

/// Get the API base URL based on current environment
/// - In development (localhost): use http://localhost:8080
/// - In production: use same origin (API serves static files)
fn get_api_base() -> String {
    let hostname = web_sys::window()
        .and_then(|w| w.location().hostname().ok())
        .unwrap_or_default();

    if hostname == "localhost" || hostname == "127.0.0.1" {
        "http://localhost:8080".to_string()
    } else {
        "".to_string()
    }
}

static API_BASE_CACHE: OnceLock<String> = OnceLock::new();

/// Get the cached API base URL
pub fn api_base() -> &'static str {
    API_BASE_CACHE.get_or_init(get_api_base).as_str()
}

fn absolute(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{}/{}", api_base(), url.trim_start_matches('/'))
    }
}

fn method_of(name: &str) -> Method {
    match name {
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        _ => Method::GET,
    }
}

/// `fetch`-backed transport for [`chat_render::ApiClient`].
#[derive(Debug, Default, Clone)]
pub struct GlooTransport;

#[async_trait(?Send)]
impl HttpTransport for GlooTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut builder = RequestBuilder::new(&absolute(&request.url)).method(method_of(&request.method));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let built = match request.body {
            Some(body) => builder.body(body),
            None => builder.build(),
        }
        .map_err(|e| ApiError::Transport(e.to_string()))?;

        let response = built
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let headers = response.headers().entries().collect();
        Ok(HttpResponse {
            status: response.status(),
            url: response.url(),
            redirected: response.redirected(),
            headers,
            body: response.text().await.unwrap_or_default(),
        })
    }

    fn set_cookie(&self, cookie: &str) {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.dyn_into::<HtmlDocument>().ok());
        match document {
            Some(document) => {
                if let Err(e) = document.set_cookie(cookie) {
                    dioxus_logger::tracing::error!("Failed to set cookie: {:?}", e);
                }
            }
            None => dioxus_logger::tracing::error!("No HTML document to set cookie on"),
        }
    }
}

/// Loads modal content from HTML component files served under `prefix`.
#[derive(Debug, Clone)]
pub struct RemoteComponentLoader {
    prefix: String,
}

impl RemoteComponentLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for RemoteComponentLoader {
    fn default() -> Self {
        Self::new("components")
    }
}

#[async_trait(?Send)]
impl ComponentLoader for RemoteComponentLoader {
    async fn load(&self, path: &str) -> Result<LoadedComponent, LoadError> {
        let url = absolute(&format!(
            "{}/{}",
            self.prefix.trim_end_matches('/'),
            path.trim_start_matches('/')
        ));

        let response = Request::get(&url)
            .send()
            .await
            .map_err(|e| LoadError::Fetch(format!("Request failed: {e}")))?;
        if response.status() == 404 {
            return Err(LoadError::NotFound(path.to_string()));
        }
        if !response.ok() {
            return Err(LoadError::Fetch(format!("HTTP error: {}", response.status())));
        }
        let text = response
            .text()
            .await
            .map_err(|e| LoadError::Fetch(format!("Failed to read body: {e}")))?;

        parse_component(&text)
    }
}

/// Split a component document into title, scoped assets and body specs.
fn parse_component(html: &str) -> Result<LoadedComponent, LoadError> {
    let parser = DomParser::new().map_err(|e| LoadError::Fetch(format!("{e:?}")))?;
    let document = parser
        .parse_from_string(html, SupportedType::TextHtml)
        .map_err(|e| LoadError::Fetch(format!("{e:?}")))?;

    let mut component = LoadedComponent {
        title: Some(document.title()).filter(|t| !t.is_empty()),
        ..Default::default()
    };
    if let Some(root) = document.document_element() {
        component.root_classes = split_classes(&root.class_name());
    }

    for (selector, target) in [
        ("style", &mut component.styles),
        ("script", &mut component.scripts),
    ] {
        let Ok(nodes) = document.query_selector_all(selector) else {
            continue;
        };
        for i in 0..nodes.length() {
            if let Some(node) = nodes.item(i) {
                target.push(node.text_content().unwrap_or_default());
                if let Some(parent) = node.parent_node() {
                    let _ = parent.remove_child(&node);
                }
            }
        }
    }

    if let Some(body) = document.body() {
        component.body_classes = split_classes(&body.class_name());
        component.body = child_specs(&body);
    }
    Ok(component)
}

fn split_classes(classes: &str) -> Vec<String> {
    classes.split_whitespace().map(str::to_string).collect()
}

fn child_specs(parent: &Node) -> Vec<NodeSpec> {
    let nodes = parent.child_nodes();
    let mut specs = Vec::new();
    for i in 0..nodes.length() {
        let Some(node) = nodes.item(i) else {
            continue;
        };
        if let Some(element) = node.dyn_ref::<Element>() {
            specs.push(element_spec(element));
        } else if node.node_type() == Node::TEXT_NODE {
            let text = node.text_content().unwrap_or_default();
            if !text.trim().is_empty() {
                specs.push(NodeSpec::new("span").text(&text));
            }
        }
    }
    specs
}

fn element_spec(element: &Element) -> NodeSpec {
    let mut spec = NodeSpec::new(&element.tag_name().to_lowercase());
    for name in element.get_attribute_names().iter() {
        let Some(name) = name.as_string() else {
            continue;
        };
        let value = element.get_attribute(&name).unwrap_or_default();
        spec = match name.as_str() {
            "id" => spec.id(&value),
            "class" => spec.class(&value),
            "style" => value
                .split(';')
                .filter_map(|decl| decl.split_once(':'))
                .fold(spec, |spec, (k, v)| spec.style(k.trim(), v.trim())),
            _ => spec.attr(&name, &value),
        };
    }

    if element.child_element_count() == 0 {
        let text = element.text_content().unwrap_or_default();
        if !text.is_empty() {
            spec = spec.text(&text);
        }
        return spec;
    }
    child_specs(element)
        .into_iter()
        .fold(spec, |spec, child| spec.child(child))
}

/// Run a JSON call, following the login redirect when the session expired.
pub async fn call_json_api(
    client: &ApiClient<GlooTransport>,
    endpoint: &str,
    body: &serde_json::Value,
) -> Result<Option<serde_json::Value>, ApiError> {
    let result = client.call_json(endpoint, body).await;
    if let Err(ApiError::AuthExpired { location }) = &result {
        if let Some(window) = web_sys::window() {
            let _ = window.location().set_href(location);
        }
    }
    result
}

/// Expose `callJsonApi(endpoint, data)` on `window`, returning a promise of
/// the decoded reply.
pub fn install_api_global(client: Rc<ApiClient<GlooTransport>>) {
    let Some(window) = web_sys::window() else {
        return;
    };

    let call = Closure::wrap(Box::new(move |endpoint: String, data: JsValue| {
        let client = client.clone();
        wasm_bindgen_futures::future_to_promise(async move {
            let body = match data.as_string() {
                Some(text) => serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
                None => js_sys::JSON::stringify(&data)
                    .ok()
                    .and_then(|s| s.as_string())
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(serde_json::Value::Null),
            };
            match call_json_api(&client, &endpoint, &body).await {
                Ok(Some(value)) => js_sys::JSON::parse(&value.to_string()),
                Ok(None) => Ok(JsValue::UNDEFINED),
                Err(e) => Err(JsValue::from_str(&e.to_string())),
            }
        })
    }) as Box<dyn FnMut(String, JsValue) -> js_sys::Promise>);

    if let Err(e) = js_sys::Reflect::set(&window, &JsValue::from_str("callJsonApi"), call.as_ref()) {
        dioxus_logger::tracing::error!("Failed to expose callJsonApi: {:?}", e);
    }
    call.forget();
}
