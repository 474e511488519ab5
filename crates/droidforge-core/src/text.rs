/// Truncates text to at most `max_chars` characters for user-facing display,
/// marking the cut with an ellipsis. Char-safe, never splits a code point.
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}
