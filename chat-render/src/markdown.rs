//! Markdown Parsing and Rendering Module
//!
//! Converts message markdown into HTML for the conversation log.
//! Uses pulldown-cmark for parsing CommonMark-compliant markdown.
//!
//! ## Features
//! - GitHub-flavored tables, strikethrough, task lists
//! - Single newlines rendered as `<br>` when `breaks` is on
//! - HTML sanitization for security
//! - Restyling pass for tables, lists, blockquotes and code
//! - `<latex>` elements rendered through a [`MathRenderer`]

use once_cell::sync::Lazy;
use pulldown_cmark::{html, Event, Options, Parser};
use regex::{Captures, Regex};

use crate::markup::{add_classes, decode_entities, parse_attrs, render_open_tag, set_attr_value};
use crate::services::MathRenderer;

/// Error type for markdown operations
#[derive(Debug, thiserror::Error)]
pub enum MarkdownError {
    #[error("HTML sanitization failed")]
    SanitizationError,
}

/// Result type for markdown operations
pub type Result<T> = std::result::Result<T, MarkdownError>;

/// Configuration for markdown rendering
#[derive(Debug, Clone)]
pub struct MarkdownConfig {
    /// Enable GitHub-flavored markdown (tables, strikethrough, task lists)
    pub gfm: bool,
    /// Enable HTML sanitization
    pub sanitize_html: bool,
    /// Render single newlines as line breaks
    pub breaks: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            gfm: true,
            sanitize_html: true,
            breaks: true,
        }
    }
}

/// Parsed markdown result
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMarkdown {
    /// Rendered HTML
    pub html: String,
    /// Whether the content contained potentially unsafe HTML
    pub has_unsafe_html: bool,
}

/// Converts message text to HTML.
pub trait MarkdownRenderer {
    fn to_html(&self, text: &str, breaks: bool) -> String;
}

/// pulldown-cmark backed renderer.
#[derive(Debug, Clone, Default)]
pub struct PulldownMarkdown {
    pub config: MarkdownConfig,
}

impl MarkdownRenderer for PulldownMarkdown {
    fn to_html(&self, text: &str, breaks: bool) -> String {
        let config = MarkdownConfig {
            breaks,
            ..self.config.clone()
        };
        match render_markdown(text, &config) {
            Ok(parsed) => {
                if parsed.has_unsafe_html {
                    tracing::debug!("Stripped unsafe markup from message text");
                }
                parsed.html
            }
            Err(e) => {
                tracing::warn!(error = %e, "Markdown rendering failed; falling back to escaped text");
                crate::markup::escape_html(text)
            }
        }
    }
}

/// Parse markdown and render to HTML
pub fn render_markdown(input: &str, config: &MarkdownConfig) -> Result<ParsedMarkdown> {
    let options = build_options(config);
    let breaks = config.breaks;
    let parser = Parser::new_ext(input, options).map(|event| match event {
        Event::SoftBreak if breaks => Event::HardBreak,
        other => other,
    });

    let mut html_output = String::with_capacity(input.len() * 2);
    html::push_html(&mut html_output, parser);

    let has_unsafe_html = config.sanitize_html && contains_unsafe_html(&html_output);

    let final_html = if has_unsafe_html {
        sanitize_html(&html_output)?
    } else {
        html_output
    };

    Ok(ParsedMarkdown {
        html: final_html,
        has_unsafe_html,
    })
}

/// Build parser options from config
fn build_options(config: &MarkdownConfig) -> Options {
    let mut options = Options::empty();

    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    if config.gfm {
        options.insert(Options::ENABLE_TABLES);
    }

    options
}

/// Check if HTML contains potentially unsafe content
fn contains_unsafe_html(html: &str) -> bool {
    let unsafe_patterns = [
        "<script",
        "</script>",
        "javascript:",
        "onload=",
        "onerror=",
        "onclick=",
        "<iframe",
        "</iframe>",
        "<object",
        "</object>",
        "<embed",
        "</embed>",
    ];

    let lower = html.to_lowercase();
    unsafe_patterns
        .iter()
        .any(|pattern| lower.contains(pattern))
}

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap());
static IFRAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<iframe[^>]*>.*?</iframe>").unwrap());
static OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<object[^>]*>.*?</object>").unwrap());
// <embed> can be self-closing or not have closing tag
static EMBED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<embed[^>]*>").unwrap());
static EVENT_HANDLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\s*on\w+=["'][^"']*["']"#).unwrap());
static JS_PROTOCOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href=["']javascript:[^"']*["']"#).unwrap());

/// Sanitize HTML by removing unsafe tags and attributes
fn sanitize_html(html: &str) -> Result<String> {
    let mut sanitized = SCRIPT_RE.replace_all(html, "").into_owned();
    sanitized = IFRAME_RE.replace_all(&sanitized, "").into_owned();
    sanitized = OBJECT_RE.replace_all(&sanitized, "").into_owned();
    sanitized = EMBED_RE.replace_all(&sanitized, "").into_owned();
    sanitized = EVENT_HANDLER_RE.replace_all(&sanitized, "").into_owned();
    sanitized = JS_PROTOCOL_RE
        .replace_all(&sanitized, "href=\"#\"")
        .into_owned();

    if contains_unsafe_html(&sanitized) && sanitized.to_lowercase().contains("<script") {
        return Err(MarkdownError::SanitizationError);
    }
    Ok(sanitized)
}

// ============================================================================
// Post-processing
// ============================================================================

static LATEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<latex>(.*?)</latex>").unwrap());
static OPEN_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(/?)([a-zA-Z][a-zA-Z0-9]*)((?:[^<>"']+|"[^"]*"|'[^']*')*)>"#).unwrap());

const TABLE_CLASSES: &[&str] = &[
    "w-full",
    "text-sm",
    "text-left",
    "text-gray-500",
    "dark:text-gray-400",
    "border-collapse",
    "my-2",
];
const TABLE_WRAP_CLASS: &str = "overflow-x-auto rounded-lg border border-gray-200 dark:border-gray-700 my-2";
const TH_CLASS: &str = "px-4 py-2 bg-gray-50 dark:bg-gray-700 text-gray-700 dark:text-gray-200 border border-gray-200 dark:border-gray-600 font-semibold";
const TD_CLASS: &str = "px-4 py-2 border border-gray-200 dark:border-gray-600";
const BLOCKQUOTE_CLASS: &str = "border-l-4 border-gray-300 dark:border-gray-600 pl-4 italic my-2 text-gray-600 dark:text-gray-400";
const UL_CLASS: &str = "list-disc list-inside space-y-1 my-2";
const OL_CLASS: &str = "list-decimal list-inside space-y-1 my-2";
const INLINE_CODE_CLASS: &str = "font-mono text-xs bg-gray-100 dark:bg-gray-700 text-red-500 dark:text-red-400 px-1 py-0.5 rounded";

/// Render every `<latex>` element through `math`.
///
/// Rendering never fails the message: on error the TeX source stays as is.
pub fn render_latex(html: &str, math: &dyn MathRenderer) -> String {
    LATEX_RE
        .replace_all(html, |caps: &Captures| {
            let source = decode_entities(&caps[1]);
            match math.render(&source) {
                Ok(rendered) => format!("<latex>{rendered}</latex>"),
                Err(e) => {
                    tracing::warn!(error = %e, "LaTeX rendering failed; keeping source");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Apply the conversation styling to markdown output: tables get classes
/// and a scroll wrapper, lists, blockquotes and code get their classes.
pub fn adjust_markdown_render(html: &str) -> String {
    let mut out = String::with_capacity(html.len() + 256);
    let mut last = 0;
    let mut after_pre_open = false;

    for caps in OPEN_TAG_RE.captures_iter(html) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&html[last..whole.start]);
        let between_is_empty = last == whole.start;
        last = whole.end;

        let closing = !caps[1].is_empty();
        let tag = caps[2].to_ascii_lowercase();
        let raw_attrs = caps.get(3).map_or("", |m| m.as_str());
        let inside_pre = after_pre_open && between_is_empty;
        after_pre_open = false;

        if closing {
            out.push_str(&caps[0]);
            if tag == "table" {
                out.push_str("</div>");
            }
            continue;
        }

        let mut attrs = parse_attrs(raw_attrs);
        match tag.as_str() {
            "table" => {
                add_classes(&mut attrs, TABLE_CLASSES);
                out.push_str(&format!("<div class=\"{TABLE_WRAP_CLASS}\">"));
                out.push_str(&render_open_tag("table", &attrs));
            }
            "th" => {
                set_attr_value(&mut attrs, "class", TH_CLASS.to_string());
                out.push_str(&render_open_tag("th", &attrs));
            }
            "td" => {
                set_attr_value(&mut attrs, "class", TD_CLASS.to_string());
                out.push_str(&render_open_tag("td", &attrs));
            }
            "blockquote" => {
                set_attr_value(&mut attrs, "class", BLOCKQUOTE_CLASS.to_string());
                out.push_str(&render_open_tag("blockquote", &attrs));
            }
            "ul" => {
                set_attr_value(&mut attrs, "class", UL_CLASS.to_string());
                out.push_str(&render_open_tag("ul", &attrs));
            }
            "ol" => {
                set_attr_value(&mut attrs, "class", OL_CLASS.to_string());
                out.push_str(&render_open_tag("ol", &attrs));
            }
            "code" if inside_pre => {
                add_classes(&mut attrs, &["font-mono", "text-sm"]);
                out.push_str(&render_open_tag("code", &attrs));
            }
            "code" => {
                set_attr_value(&mut attrs, "class", INLINE_CODE_CLASS.to_string());
                out.push_str(&render_open_tag("code", &attrs));
            }
            "pre" => {
                after_pre_open = true;
                out.push_str(&caps[0]);
            }
            _ => out.push_str(&caps[0]),
        }
    }
    out.push_str(&html[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MathError;

    struct UpperMath;

    impl MathRenderer for UpperMath {
        fn render(&self, source: &str) -> std::result::Result<String, MathError> {
            if source.contains("\\bad") {
                return Err(MathError::Render("bad macro".to_string()));
            }
            Ok(format!("<span class=\"katex\">{}</span>", source.to_uppercase()))
        }
    }

    #[test]
    fn test_render_basic_paragraph() {
        let html = PulldownMarkdown::default().to_html("Hello, world!", true);
        assert!(html.contains("Hello, world!"));
    }

    #[test]
    fn test_breaks_turn_newlines_into_br() {
        let with = PulldownMarkdown::default().to_html("one\ntwo", true);
        assert!(with.contains("<br />"));
        let without = PulldownMarkdown::default().to_html("one\ntwo", false);
        assert!(!without.contains("<br"));
    }

    #[test]
    fn test_sanitizes_script() {
        let parsed = render_markdown("<script>alert(1)</script>\n\n**hi**", &MarkdownConfig::default()).unwrap();
        assert!(parsed.has_unsafe_html);
        assert!(!parsed.html.contains("<script"));
        assert!(parsed.html.contains("<strong>hi</strong>"));
    }

    #[test]
    fn test_latex_rendered_or_kept() {
        let html = "<p><latex>x^2</latex> and <latex>\\bad</latex></p>";
        let out = render_latex(html, &UpperMath);
        assert!(out.contains("<latex><span class=\"katex\">X^2</span></latex>"));
        assert!(out.contains("<latex>\\bad</latex>"));
    }

    #[test]
    fn test_adjust_wraps_tables_and_styles_code() {
        let html = PulldownMarkdown::default().to_html(
            "| a | b |\n|---|---|\n| 1 | 2 |\n\n```\nfn x() {}\n```\n\nuse `y`",
            true,
        );
        let out = adjust_markdown_render(&html);
        assert!(out.contains(&format!("<div class=\"{TABLE_WRAP_CLASS}\"><table class=\"")));
        assert!(out.contains("</table></div>"));
        assert!(out.contains(&format!("<th class=\"{TH_CLASS}\"")));
        assert!(out.contains(&format!("<td class=\"{TD_CLASS}\"")));
        assert!(out.contains("<pre><code class=\"font-mono text-sm\">"));
        assert!(out.contains(&format!("<code class=\"{INLINE_CODE_CLASS}\">y</code>")));
    }
}
