//! String transforms applied to message text before it reaches the page.
//!
//! Everything here is pure: text in, text out.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const PATH_LINK_CLASS: &str = "text-blue-600 dark:text-blue-400 hover:underline";
const EXTERNAL_LINK_CLASSES: &[&str] = &["text-blue-600", "dark:text-blue-400", "hover:underline"];

static ICON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"icon://([a-zA-Z0-9_]+)").unwrap());
static IMAGE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<image>(.*?)</image>").unwrap());
static PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/[a-zA-Z0-9_/.\-]*[a-zA-Z0-9_\-/]").unwrap());
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(?:[^<>"']+|"[^"]*"|'[^']*')*>"#).unwrap());
static ANCHOR_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<a(\s(?:[^<>"']+|"[^"]*"|'[^']*')*)?>"#).unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});
static STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the entities produced by [`escape_html`] and common markdown output.
pub fn decode_entities(input: &str) -> String {
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Remove every markup tag, keeping the text between them.
pub fn strip_tags(html: &str) -> String {
    STRIP_RE.replace_all(html, "").into_owned()
}

/// `tool_args` -> `Tool Args`.
pub fn convert_to_title_case(input: &str) -> String {
    let lowered = input.replace('_', " ").to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut prev_is_word = false;
    for c in lowered.chars() {
        let is_word = c.is_ascii_alphanumeric() || c == '_';
        if is_word && !prev_is_word {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        prev_is_word = is_word;
    }
    out
}

/// Replace `icon://name` markers with material symbol spans.
pub fn convert_icons(input: &str) -> String {
    ICON_RE
        .replace_all(
            input,
            r#"<span class="material-symbols-outlined align-text-bottom text-base mr-1">$1</span>"#,
        )
        .into_owned()
}

/// Turn inline `<image>base64</image>` blocks into data-URI images.
pub fn convert_image_tags(input: &str) -> String {
    IMAGE_TAG_RE
        .replace_all(input, |caps: &Captures| {
            format!(
                r#"<img src="data:image/jpeg;base64,{}" alt="Image Attachment" class="max-w-xs rounded shadow-sm my-2" />"#,
                &caps[1]
            )
        })
        .into_owned()
}

/// Point `img://` references at the image endpoint.
pub fn convert_img_file_paths(input: &str, image_endpoint: &str) -> String {
    input.replace(shared_types::IMAGE_REF_PREFIX, image_endpoint)
}

/// Turn absolute file paths in text into per-segment file links.
///
/// Tags are left untouched, so paths inside attributes (for example an
/// `<img src="/a/b">`) never get rewritten. A path only qualifies when it
/// starts a chunk or follows `>`, a space, a backtick, a quote, a newline,
/// `&#39;` or `&quot;`.
pub fn convert_paths_to_links(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for tag in TAG_RE.find_iter(input) {
        out.push_str(&link_paths_in_text(&input[last..tag.start()]));
        out.push_str(tag.as_str());
        last = tag.end();
    }
    out.push_str(&link_paths_in_text(&input[last..]));
    out
}

fn link_paths_in_text(chunk: &str) -> String {
    let mut out = String::with_capacity(chunk.len());
    let mut last = 0;
    for m in PATH_RE.find_iter(chunk) {
        if !path_may_start_at(chunk, m.start()) {
            continue;
        }
        out.push_str(&chunk[last..m.start()]);
        out.push_str(&path_links(m.as_str()));
        last = m.end();
    }
    out.push_str(&chunk[last..]);
    out
}

fn path_may_start_at(chunk: &str, start: usize) -> bool {
    if start == 0 {
        return true;
    }
    let before = &chunk[..start];
    if before.ends_with("&#39;") || before.ends_with("&quot;") {
        return true;
    }
    matches!(
        before.chars().next_back(),
        Some('>' | ' ' | '`' | '\'' | '"' | '\n')
    )
}

fn path_links(path: &str) -> String {
    let mut parts: Vec<&str> = path.split('/').collect();
    if parts.first().is_some_and(|p| p.is_empty()) {
        parts.remove(0);
    }
    let mut conc = String::new();
    let mut html = String::new();
    for part in parts {
        conc.push('/');
        conc.push_str(part);
        html.push_str(&format!(
            r##"/<a href="#" class="{PATH_LINK_CLASS}" onclick="openFileLink('{conc}');">{part}</a>"##
        ));
    }
    html
}

/// Force outbound links to open in a new tab with a safe `rel`.
///
/// In-page anchors (`#...`) and `javascript:` links are left alone.
pub fn add_blank_targets_to_links(input: &str) -> String {
    ANCHOR_OPEN_RE
        .replace_all(input, |caps: &Captures| {
            let mut attrs = parse_attrs(caps.get(1).map_or("", |m| m.as_str()));
            let href = attr_value(&attrs, "href").unwrap_or_default().to_string();
            if href.starts_with('#') || href.trim().to_lowercase().starts_with("javascript") {
                return caps[0].to_string();
            }
            if attr_value(&attrs, "target").map_or(true, str::is_empty) {
                set_attr_value(&mut attrs, "target", "_blank".to_string());
            }
            let mut rel: Vec<String> = attr_value(&attrs, "rel")
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            for needed in ["noopener", "noreferrer"] {
                if !rel.iter().any(|r| r == needed) {
                    rel.push(needed.to_string());
                }
            }
            set_attr_value(&mut attrs, "rel", rel.join(" "));
            add_classes(&mut attrs, EXTERNAL_LINK_CLASSES);
            render_open_tag("a", &attrs)
        })
        .into_owned()
}

// ----------------------------------------------------------------------------
// Tag attribute helpers shared with the markdown restyling pass
// ----------------------------------------------------------------------------

pub(crate) type Attrs = Vec<(String, Option<String>)>;

pub(crate) fn parse_attrs(source: &str) -> Attrs {
    ATTR_RE
        .captures_iter(source)
        .map(|caps| {
            let name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()));
            (name, value)
        })
        .collect()
}

pub(crate) fn attr_value<'a>(attrs: &'a Attrs, name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_deref().unwrap_or(""))
}

pub(crate) fn set_attr_value(attrs: &mut Attrs, name: &str, value: String) {
    match attrs.iter_mut().find(|(k, _)| k == name) {
        Some((_, v)) => *v = Some(value),
        None => attrs.push((name.to_string(), Some(value))),
    }
}

pub(crate) fn add_classes(attrs: &mut Attrs, classes: &[&str]) {
    let mut list: Vec<String> = attr_value(attrs, "class")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    for class in classes {
        if !list.iter().any(|c| c == class) {
            list.push(class.to_string());
        }
    }
    set_attr_value(attrs, "class", list.join(" "));
}

pub(crate) fn render_open_tag(tag: &str, attrs: &Attrs) -> String {
    let mut out = format!("<{tag}");
    for (name, value) in attrs {
        match value {
            Some(value) => out.push_str(&format!(" {name}=\"{}\"", escape_attr(value))),
            None => out.push_str(&format!(" {name}")),
        }
    }
    out.push('>');
    out
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html_exact() {
        assert_eq!(escape_html("<b>&'\""), "&lt;b&gt;&amp;&#39;&quot;");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(convert_to_title_case("tool_args"), "Tool Args");
        assert_eq!(convert_to_title_case("TOOL_NAME"), "Tool Name");
        assert_eq!(convert_to_title_case("a"), "A");
    }

    #[test]
    fn test_convert_icons() {
        assert_eq!(
            convert_icons("icon://terminal run"),
            r#"<span class="material-symbols-outlined align-text-bottom text-base mr-1">terminal</span> run"#
        );
    }

    #[test]
    fn test_convert_image_tags() {
        let out = convert_image_tags("see <image>QUJD</image> here");
        assert!(out.contains(r#"src="data:image/jpeg;base64,QUJD""#));
        assert!(out.starts_with("see <img"));
    }

    #[test]
    fn test_convert_img_file_paths() {
        assert_eq!(
            convert_img_file_paths("![x](img:///tmp/a.png)", "/image_get?path="),
            "![x](/image_get?path=/tmp/a.png)"
        );
    }

    #[test]
    fn test_paths_become_nested_links() {
        let out = convert_paths_to_links("`/a/b/c`");
        assert!(out.starts_with('`') && out.ends_with('`'));
        assert!(out.contains(r#"onclick="openFileLink('/a');">a</a>"#));
        assert!(out.contains(r#"onclick="openFileLink('/a/b');">b</a>"#));
        assert!(out.contains(r#"onclick="openFileLink('/a/b/c');">c</a>"#));
        assert_eq!(out.matches("<a ").count(), 3);
    }

    #[test]
    fn test_paths_inside_tags_untouched() {
        let input = r#"<img src="`/a/b/c`">"#;
        assert_eq!(convert_paths_to_links(input), input);
    }

    #[test]
    fn test_path_needs_a_boundary_before_it() {
        assert_eq!(convert_paths_to_links("and/or"), "and/or");
        assert!(convert_paths_to_links("see /etc/hosts").contains("openFileLink('/etc/hosts')"));
        assert!(convert_paths_to_links("<code>/tmp/x</code>").contains("openFileLink('/tmp/x')"));
        assert!(convert_paths_to_links("&quot;/srv&quot;").contains("openFileLink('/srv')"));
    }

    #[test]
    fn test_trailing_dot_excluded_from_path() {
        let out = convert_paths_to_links("open /tmp/file.txt.");
        assert!(out.contains("openFileLink('/tmp/file.txt')"));
        assert!(out.ends_with("</a>."));
    }

    #[test]
    fn test_blank_targets_added_to_external_links() {
        let out = add_blank_targets_to_links(r#"<a href="https://example.com" rel="nofollow">x</a>"#);
        assert!(out.contains(r#"target="_blank""#));
        assert!(out.contains(r#"rel="nofollow noopener noreferrer""#));
        assert!(out.contains("hover:underline"));
    }

    #[test]
    fn test_blank_targets_skip_local_and_script_links() {
        let local = "<a href=\"#\" onclick=\"openFileLink('/a');\">a</a>";
        assert_eq!(add_blank_targets_to_links(local), local);
        let script = r#"<a href=" JavaScript:void(0)">x</a>"#;
        assert_eq!(add_blank_targets_to_links(script), script);
    }

    #[test]
    fn test_existing_target_kept() {
        let out = add_blank_targets_to_links(r#"<a href="/x" target="_self">x</a>"#);
        assert!(out.contains(r#"target="_self""#));
    }
}
