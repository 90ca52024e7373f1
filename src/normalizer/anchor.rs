/// How an `<a>` element is folded into the comparable text.
pub trait AnchorRenderer: Send + Sync {
    fn render(&self, text: &str, href: Option<&str>) -> String;
}

/// Emits only the visible link text; the target never reaches the comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisibleTextOnly;

impl AnchorRenderer for VisibleTextOnly {
    fn render(&self, text: &str, _href: Option<&str>) -> String {
        text.trim().to_string()
    }
}

/// Emits `text (target)` so a target-only edit shows up as a change.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextWithTarget;

impl AnchorRenderer for TextWithTarget {
    fn render(&self, text: &str, href: Option<&str>) -> String {
        let text = text.trim();
        let href = href.map(str::trim).filter(|h| !h.is_empty());

        match href {
            Some(target) if text.is_empty() => format!("({})", target),
            Some(target) => format!("{} ({})", text, target),
            None => text.to_string(),
        }
    }
}

static VISIBLE_TEXT_ONLY: VisibleTextOnly = VisibleTextOnly;
static TEXT_WITH_TARGET: TextWithTarget = TextWithTarget;

/// Picks the anchor strategy for the `render_anchor_tag_content` setting.
pub fn anchor_renderer(render_anchor_tag_content: bool) -> &'static dyn AnchorRenderer {
    if render_anchor_tag_content {
        &TEXT_WITH_TARGET
    } else {
        &VISIBLE_TEXT_ONLY
    }
}
