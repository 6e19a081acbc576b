use std::time::Duration;

/// Tunables for the renderer, overlays, modals and API helper.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Replacement for `img://` prefixes.
    pub image_endpoint: String,
    /// Endpoint returning the anti-forgery token.
    pub csrf_path: String,
    /// Redirect target that means the session expired.
    pub login_path: String,
    /// Distance from the bottom (px) still treated as pinned.
    pub scroll_tolerance_px: f64,
    /// z-index of the first modal; each further modal sits two above.
    pub modal_base_z_index: i32,
    /// Space (px) left above an element scrolled to inside a modal.
    pub modal_scroll_padding_px: f64,
    /// How long copy/speak feedback glyphs stay up.
    pub feedback_duration: Duration,
    /// Overlay buttons ignore clicks while the overlay is fainter than this.
    pub overlay_activation_opacity: f64,
    /// Refresh hint passed to the image viewer.
    pub image_refresh_interval_ms: u64,
    /// Modal opened for file links; the clicked path is appended as `?path=`.
    pub file_browser_modal: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            image_endpoint: "/image_get?path=".to_string(),
            csrf_path: "/csrf_token".to_string(),
            login_path: "/login".to_string(),
            scroll_tolerance_px: 10.0,
            modal_base_z_index: 50,
            modal_scroll_padding_px: 20.0,
            feedback_duration: Duration::from_millis(2000),
            overlay_activation_opacity: 0.1,
            image_refresh_interval_ms: 1000,
            file_browser_modal: "modals/file-browser/file-browser.html".to_string(),
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `CHAT_RENDER_*` variables (a `.env` file is
    /// honoured when present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            image_endpoint: std::env::var("CHAT_RENDER_IMAGE_ENDPOINT")
                .unwrap_or(defaults.image_endpoint),
            csrf_path: std::env::var("CHAT_RENDER_CSRF_PATH").unwrap_or(defaults.csrf_path),
            login_path: std::env::var("CHAT_RENDER_LOGIN_PATH").unwrap_or(defaults.login_path),
            scroll_tolerance_px: env_parse(
                "CHAT_RENDER_SCROLL_TOLERANCE_PX",
                defaults.scroll_tolerance_px,
            )?,
            modal_base_z_index: env_parse(
                "CHAT_RENDER_MODAL_BASE_Z_INDEX",
                defaults.modal_base_z_index,
            )?,
            modal_scroll_padding_px: env_parse(
                "CHAT_RENDER_MODAL_SCROLL_PADDING_PX",
                defaults.modal_scroll_padding_px,
            )?,
            feedback_duration: Duration::from_millis(env_parse(
                "CHAT_RENDER_FEEDBACK_MS",
                defaults.feedback_duration.as_millis() as u64,
            )?),
            overlay_activation_opacity: env_parse(
                "CHAT_RENDER_OVERLAY_ACTIVATION_OPACITY",
                defaults.overlay_activation_opacity,
            )?,
            image_refresh_interval_ms: env_parse(
                "CHAT_RENDER_IMAGE_REFRESH_MS",
                defaults.image_refresh_interval_ms,
            )?,
            file_browser_modal: std::env::var("CHAT_RENDER_FILE_BROWSER_MODAL")
                .unwrap_or(defaults.file_browser_modal),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {key} '{value}': {e}")),
        Err(_) => Ok(default),
    }
}
