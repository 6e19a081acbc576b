use dioxus::launch;
use dioxus::prelude::*;
use dioxus_logger::tracing::Level;

use webui::ConversationView;

fn main() {
    // Initialize logging for WASM
    wasm_logger::init(wasm_logger::Config::default());
    dioxus_logger::init(Level::INFO).ok();

    launch(App);
}

#[component]
fn App() -> Element {
    rsx! {
        div {
            class: "min-h-screen bg-white text-gray-900 dark:bg-gray-900 dark:text-gray-100",
            ConversationView {}
        }
    }
}
