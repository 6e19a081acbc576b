use std::cell::RefCell;
use std::rc::Rc;

use chat_render::api::ApiClient;
use chat_render::markdown::PulldownMarkdown;
use chat_render::preferences::ClassVisibility;
use chat_render::services::ImageViewer;
use chat_render::{Page, RenderConfig, Services};
use dioxus::prelude::*;
use gloo_timers::future::TimeoutFuture;

use crate::api::{install_api_global, GlooTransport, RemoteComponentLoader};
use crate::interop::{
    install_event_bridge, install_globals, BrowserAttachments, BrowserClipboard,
    BrowserImageViewer, BrowserSpeech, KatexMath,
};
use crate::projection::DomTarget;

const SCROLL_AREA_ID: &str = "conversation-scroll";
const TICK_MS: u32 = 100;

fn load_config() -> RenderConfig {
    RenderConfig::from_env().unwrap_or_else(|e| {
        dioxus_logger::tracing::error!("Invalid renderer configuration, using defaults: {}", e);
        RenderConfig::default()
    })
}

fn build_page(config: RenderConfig) -> Page {
    let viewer: Rc<dyn ImageViewer> = Rc::new(BrowserImageViewer);
    let services = Services {
        clipboard: Box::new(BrowserClipboard),
        speech: Box::new(BrowserSpeech),
        images: Box::new(BrowserImageViewer),
        attachments: Rc::new(BrowserAttachments::new(
            &config.image_endpoint,
            viewer,
            config.image_refresh_interval_ms,
        )),
        loader: Box::new(RemoteComponentLoader::default()),
        markdown: Box::new(PulldownMarkdown::default()),
        math: Some(Box::new(KatexMath)),
    };
    Page::new(config, services)
}

/// Whether the real scroll area sits at (or within `tolerance` of) its bottom.
fn scroll_area_pinned(tolerance: f64) -> bool {
    let Some(area) = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(SCROLL_AREA_ID))
    else {
        return true;
    };
    let distance = area.scroll_height() - area.scroll_top() - area.client_height();
    distance as f64 <= tolerance
}

fn scroll_area_to_bottom() {
    if let Some(area) = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(SCROLL_AREA_ID))
    {
        area.set_scroll_top(area.scroll_height());
    }
}

#[component]
pub fn ConversationView() -> Element {
    let page = use_hook(|| Rc::new(build_page(load_config())));
    let target = use_hook(|| Rc::new(RefCell::new(None::<DomTarget>)));
    let mut visibility = use_signal(ClassVisibility::default);

    // Mounts lazily: the scroll area exists only after the first render.
    let refresh_page = page.clone();
    let refresh_target = target.clone();
    let refresh = use_callback(move |_: ()| {
        let mut slot = refresh_target.borrow_mut();
        if slot.is_none() {
            let body = refresh_page.with_document(|doc| doc.body());
            *slot = DomTarget::mount(SCROLL_AREA_ID, body);
        }
        let Some(target) = slot.as_mut() else {
            return;
        };
        let pinned = scroll_area_pinned(refresh_page.config().scroll_tolerance_px);
        if refresh_page.project(target) && pinned {
            scroll_area_to_bottom();
        }
    });

    let measure_page = page.clone();
    let measure_target = target.clone();
    let measure = use_callback(move |_: ()| {
        if let Some(target) = measure_target.borrow().as_ref() {
            measure_page.measure(target);
        }
    });

    // Wire the page into the browser once
    let bridge_page = page.clone();
    use_hook(move || {
        install_event_bridge(bridge_page.clone(), measure, refresh);
        install_globals(bridge_page.clone(), measure, refresh);
        let client = ApiClient::new(GlooTransport, bridge_page.config());
        install_api_global(Rc::new(client));
        refresh.call(());
    });

    // Feedback reversion and deferred modal work
    let tick_page = page.clone();
    use_future(move || {
        let page = tick_page.clone();
        async move {
            loop {
                TimeoutFuture::new(TICK_MS).await;
                page.tick(chrono::Utc::now());
                refresh.call(());
            }
        }
    });

    let toggle_page = page.clone();
    let toggle = move |update: fn(&mut ClassVisibility)| {
        let mut next = *visibility.peek();
        update(&mut next);
        toggle_page.set_visibility(next);
        visibility.set(next);
        refresh.call(());
    };
    let mut toggle_utils = toggle.clone();
    let mut toggle_thoughts = toggle.clone();
    let mut toggle_json = toggle;
    let current = visibility();

    rsx! {
        div {
            class: "flex flex-col h-screen",

            div {
                class: "flex gap-2 p-2 text-xs border-b border-gray-200 dark:border-gray-700",
                VisibilityToggle {
                    label: "Utility messages".to_string(),
                    active: current.show_utils,
                    on_toggle: move |_| toggle_utils(|v| v.show_utils = !v.show_utils),
                }
                VisibilityToggle {
                    label: "Thoughts".to_string(),
                    active: current.show_thoughts,
                    on_toggle: move |_| toggle_thoughts(|v| v.show_thoughts = !v.show_thoughts),
                }
                VisibilityToggle {
                    label: "JSON".to_string(),
                    active: current.show_json,
                    on_toggle: move |_| toggle_json(|v| v.show_json = !v.show_json),
                }
            }

            div {
                id: SCROLL_AREA_ID,
                class: "flex-1 overflow-y-auto p-4",
                onmounted: move |_| refresh.call(()),
            }
        }
    }
}

#[component]
fn VisibilityToggle(label: String, active: bool, on_toggle: EventHandler<()>) -> Element {
    rsx! {
        button {
            class: if active {
                "px-2 py-1 rounded bg-blue-600 text-white"
            } else {
                "px-2 py-1 rounded bg-gray-200 dark:bg-gray-700"
            },
            onclick: move |_| on_toggle.call(()),
            "{label}"
        }
    }
}
