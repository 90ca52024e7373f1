use serde::Serialize;
use std::collections::HashMap;

use crate::models::{truncate_chars, NormalizedText, PREVIEW_CHARS};

/// Line-level description of a change, attached to notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub lines_added: usize,
    pub lines_removed: usize,
    pub first_added_line: Option<String>,
}

impl ChangeSummary {
    /// Lines are compared as a multiset, so reordering shows up as nothing added
    /// or removed even though the texts differ.
    pub fn between(previous: &NormalizedText, current: &NormalizedText) -> Self {
        let mut remaining: HashMap<&str, usize> = HashMap::new();
        for line in previous.lines() {
            *remaining.entry(line).or_insert(0) += 1;
        }

        let mut lines_added = 0;
        let mut first_added_line = None;
        for line in current.lines() {
            match remaining.get_mut(line) {
                Some(count) if *count > 0 => *count -= 1,
                _ => {
                    lines_added += 1;
                    if first_added_line.is_none() {
                        first_added_line = Some(truncate_chars(line, PREVIEW_CHARS));
                    }
                }
            }
        }

        let lines_removed = remaining.values().sum();

        Self {
            lines_added,
            lines_removed,
            first_added_line,
        }
    }

    pub fn describe(&self) -> String {
        let mut description = format!(
            "{} line(s) added, {} line(s) removed",
            self.lines_added, self.lines_removed
        );
        if let Some(line) = &self.first_added_line {
            description.push_str(&format!(": \"{}\"", line));
        }
        description
    }
}
