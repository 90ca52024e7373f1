use serde_json::{json, Value};

use super::ChangeEvent;

const EMBED_COLOR: u32 = 0xDAA520;
const EMBED_TITLE_LIMIT: usize = 250;

pub fn create_embed(event: &ChangeEvent) -> Value {
    let mut fields = vec![
        json!({
            "name": "Lines added",
            "value": event.summary.lines_added.to_string(),
            "inline": true
        }),
        json!({
            "name": "Lines removed",
            "value": event.summary.lines_removed.to_string(),
            "inline": true
        }),
    ];

    if let Some(line) = &event.summary.first_added_line {
        fields.push(json!({
            "name": "New content",
            "value": line,
            "inline": false
        }));
    }

    json!({
        "title": build_title(&event.url),
        "url": event.url,
        "color": EMBED_COLOR,
        "fields": fields,
        "footer": {
            "text": format!("Watch {} - Detected: {}",
                event.watch_id,
                event.detected_at.format("%Y-%m-%d %H:%M:%S")
            )
        }
    })
}

fn build_title(url: &str) -> String {
    let title = format!("Page changed: {}", url);
    if title.chars().count() > EMBED_TITLE_LIMIT {
        let cut: String = title.chars().take(EMBED_TITLE_LIMIT).collect();
        format!("{}...", cut)
    } else {
        title
    }
}
