//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps report output bounded and aligned while preserving signal.

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Left-align `input` in a cell of `width` characters, truncating when needed.
/// Pad before colorizing; ANSI escapes would otherwise count toward the width.
pub fn cell(input: &str, width: usize) -> String {
    let shown = if input.chars().count() > width {
        compact_line(input, width.saturating_sub(3))
    } else {
        input.to_string()
    };
    format!("{:<width$}", shown, width = width)
}

/// Right-align a count in a cell of `width` characters.
pub fn num_cell(value: usize, width: usize) -> String {
    format!("{:>width$}", value, width = width)
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}
