//! Reduces fetched markup to the canonical text that snapshots are compared on.
//!
//! Block-level elements and `<br>` become line breaks, runs of whitespace collapse
//! to a single space, blank lines are dropped. Anchors go through an
//! [`AnchorRenderer`] chosen from the watch configuration.

mod anchor;

pub use anchor::{anchor_renderer, AnchorRenderer, TextWithTarget, VisibleTextOnly};

use ego_tree::NodeRef;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::collections::HashSet;

use crate::config::EffectiveConfig;
use crate::models::NormalizedText;

static BLOCK_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "address", "article", "aside", "blockquote", "body", "dd", "details", "div", "dl",
        "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4",
        "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p", "pre", "section",
        "summary", "table", "tbody", "thead", "tfoot", "tr", "ul",
    ]
    .into_iter()
    .collect()
});

static SKIPPED_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["head", "iframe", "noscript", "script", "style", "template"]
        .into_iter()
        .collect()
});

// Zero-width characters that editors and CMSes sprinkle in without visible effect.
static INVISIBLE_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\u{200B}\u{200C}\u{200D}\u{2060}\u{FEFF}]").expect("Invalid invisible char regex")
});

pub struct Normalizer {
    anchors: &'static dyn AnchorRenderer,
}

impl Normalizer {
    pub fn new(anchors: &'static dyn AnchorRenderer) -> Self {
        Self { anchors }
    }

    pub fn for_config(config: &EffectiveConfig) -> Self {
        Self::new(anchor_renderer(config.render_anchor_tag_content))
    }

    /// Never fails: undecodable bytes are replaced and the HTML parser recovers
    /// from any malformed markup, so the worst case is less text, not an error.
    pub fn normalize(&self, raw: &[u8]) -> NormalizedText {
        let decoded = String::from_utf8_lossy(raw);
        let cleaned = INVISIBLE_CHARS.replace_all(&decoded, "");
        let document = Html::parse_document(&cleaned);

        let mut text = TextBuilder::default();
        for child in document.tree.root().children() {
            self.visit_node(child, &mut text);
        }

        NormalizedText(text.finish())
    }

    fn visit_node(&self, node: NodeRef<'_, Node>, text: &mut TextBuilder) {
        match node.value() {
            Node::Text(content) => text.append(content),
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(node) {
                    self.visit_element(element, text);
                }
            }
            Node::Document | Node::Fragment => {
                for child in node.children() {
                    self.visit_node(child, text);
                }
            }
            _ => {}
        }
    }

    fn visit_element(&self, element: ElementRef<'_>, text: &mut TextBuilder) {
        let tag = element.value().name().to_ascii_lowercase();
        let tag = tag.as_str();

        if SKIPPED_TAGS.contains(tag) {
            return;
        }

        match tag {
            "a" => self.visit_anchor(element, text),
            "br" => text.break_line(),
            "td" | "th" => {
                text.separate();
                self.visit_children(element, text);
                text.separate();
            }
            _ if BLOCK_TAGS.contains(tag) => {
                text.break_line();
                self.visit_children(element, text);
                text.break_line();
            }
            _ => self.visit_children(element, text),
        }
    }

    fn visit_children(&self, element: ElementRef<'_>, text: &mut TextBuilder) {
        for child in element.children() {
            self.visit_node(child, text);
        }
    }

    fn visit_anchor(&self, element: ElementRef<'_>, text: &mut TextBuilder) {
        let mut inner = TextBuilder::default();
        self.visit_children(element, &mut inner);
        let leading_space = inner.leading_space;
        let trailing_space = inner.pending_space;
        let visible = inner.finish_inline();

        // Whitespace just inside the tag still separates it from its neighbours.
        if leading_space {
            text.separate();
        }
        let rendered = self.anchors.render(&visible, element.value().attr("href"));
        text.append(&rendered);
        if trailing_space {
            text.separate();
        }
    }
}

/// Convenience entry point resolving the anchor strategy from `config`.
pub fn normalize(raw: &[u8], config: &EffectiveConfig) -> NormalizedText {
    Normalizer::for_config(config).normalize(raw)
}

#[derive(Default)]
struct TextBuilder {
    lines: Vec<String>,
    current: String,
    pending_space: bool,
    leading_space: bool,
}

impl TextBuilder {
    fn append(&mut self, fragment: &str) {
        for ch in fragment.chars() {
            if ch.is_whitespace() {
                if self.current.is_empty() && self.lines.is_empty() {
                    self.leading_space = true;
                }
                self.pending_space = true;
                continue;
            }
            if self.pending_space && !self.current.is_empty() {
                self.current.push(' ');
            }
            self.pending_space = false;
            self.current.push(ch);
        }
    }

    fn separate(&mut self) {
        self.pending_space = true;
    }

    fn break_line(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(std::mem::take(&mut self.current));
        }
        self.pending_space = false;
    }

    fn finish(mut self) -> String {
        self.break_line();
        self.lines.join("\n")
    }

    /// Anchor text is a single inline run even when it wraps block elements.
    fn finish_inline(mut self) -> String {
        self.break_line();
        self.lines.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ORIGINAL: &str = r#"<html>
       <body>
     Some initial text</br>
     <a href="/original_link"> Some More Text </a>
     </br>
     So let's see what happens.  </br>
     </body>
     </html>
    "#;

    fn config(render_anchor_tag_content: bool) -> EffectiveConfig {
        EffectiveConfig {
            render_anchor_tag_content,
            ..EffectiveConfig::default()
        }
    }

    #[test]
    fn strips_link_targets_by_default() {
        let text = normalize(ORIGINAL.as_bytes(), &EffectiveConfig::default());
        assert_eq!(
            text.as_str(),
            "Some initial text\nSome More Text\nSo let's see what happens."
        );
    }

    #[test]
    fn renders_link_targets_when_enabled() {
        let text = normalize(ORIGINAL.as_bytes(), &config(true));
        assert_eq!(
            text.as_str(),
            "Some initial text\nSome More Text (/original_link)\nSo let's see what happens."
        );
    }

    #[test]
    fn output_is_deterministic() {
        for flag in [false, true] {
            let first = normalize(ORIGINAL.as_bytes(), &config(flag));
            let second = normalize(ORIGINAL.as_bytes(), &config(flag));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn attribute_order_and_formatting_do_not_matter() {
        let a = r#"<p class="x"   id="y">Hello   <a title="t" href="/z">world</a></p>"#;
        let b = "<p id=\"y\" class=\"x\">\n  Hello\n<a href=\"/z\" title=\"t\">world</a>\n</p>";
        for flag in [false, true] {
            assert_eq!(normalize(a.as_bytes(), &config(flag)), normalize(b.as_bytes(), &config(flag)));
        }
    }

    #[test]
    fn inline_anchor_keeps_surrounding_spacing() {
        let html = "<p>Read <a href='/docs'>the docs</a> now.</p>";
        assert_eq!(normalize(html.as_bytes(), &config(false)).as_str(), "Read the docs now.");
        assert_eq!(
            normalize(html.as_bytes(), &config(true)).as_str(),
            "Read the docs (/docs) now."
        );
    }

    #[test]
    fn whitespace_inside_anchor_edges_separates_words() {
        let inside = "<p>Click<a href='/x'> here </a>now</p>";
        let outside = "<p>Click <a href='/x'>here</a> now</p>";

        assert_eq!(normalize(inside.as_bytes(), &config(false)).as_str(), "Click here now");
        assert_eq!(normalize(outside.as_bytes(), &config(false)).as_str(), "Click here now");
        assert_eq!(
            normalize(inside.as_bytes(), &config(true)),
            normalize(outside.as_bytes(), &config(true))
        );
        assert_eq!(
            normalize(inside.as_bytes(), &config(true)).as_str(),
            "Click here (/x) now"
        );
    }

    #[test]
    fn anchor_without_edge_whitespace_stays_attached() {
        let html = "<p>(<a href='/x'>see</a>)</p>";
        assert_eq!(normalize(html.as_bytes(), &config(false)).as_str(), "(see)");
    }

    #[test]
    fn scripts_and_styles_are_ignored() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><script>var x = 1;</script><p>Visible</p><noscript>js off</noscript></body></html>";
        assert_eq!(normalize(html.as_bytes(), &config(false)).as_str(), "Visible");
    }

    #[test]
    fn block_elements_and_cells_split_text() {
        let html = "<div>One</div><div>Two</div><table><tr><td>a</td><td>b</td></tr></table>";
        assert_eq!(normalize(html.as_bytes(), &config(false)).as_str(), "One\nTwo\na b");
    }

    #[test]
    fn malformed_markup_still_yields_text() {
        let html = b"<div><p>Unclosed <b>bold <a href='/x'>link</div></span>tail \xff";
        let text = normalize(html, &config(false));
        assert!(text.as_str().contains("Unclosed bold link"));
        assert!(text.as_str().contains("tail"));
    }

    #[test]
    fn zero_width_characters_are_removed() {
        let html = "<p>Pri\u{200B}ce</p>";
        assert_eq!(normalize(html.as_bytes(), &config(false)).as_str(), "Price");
    }

    #[test]
    fn anchor_wrapping_blocks_is_rendered_inline() {
        let html = "<a href='/card'><div>Title</div><div>Subtitle</div></a>";
        assert_eq!(
            normalize(html.as_bytes(), &config(true)).as_str(),
            "Title Subtitle (/card)"
        );
    }
}
