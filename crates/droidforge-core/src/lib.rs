//! Foundational low-level utilities shared across droidforge crates.
//!
//! Provides atomic file-write helpers, time utilities, random token
//! generation, and display truncation used by session state and tool
//! output reporting.

pub mod atomic_io;
pub mod text;
pub mod time_utils;
pub mod token;

pub use atomic_io::write_text_atomic;
pub use text::truncate_for_display;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
pub use token::random_token;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn time_utils_round_trip_bounds() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn random_token_uses_lowercase_alphanumerics() {
        let token = random_token(32);
        assert_eq!(token.len(), 32);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn truncate_for_display_preserves_short_text() {
        assert_eq!(truncate_for_display("short", 10), "short");
        let truncated = truncate_for_display("0123456789abcdef", 10);
        assert_eq!(truncated.chars().count(), 10);
        assert!(truncated.ends_with('…'));
    }
}
