//! String utilities
//!
//! Character-safe truncation for text that ends up in logs, warnings and
//! prompts.

/// Truncate a string to at most `max_chars` characters, on a character
/// boundary.
///
/// # Example
/// ```
/// use snippet_test_runner::utils::truncate_str;
///
/// assert_eq!(truncate_str("pip install", 3), "pip");
/// assert_eq!(truncate_str("ok", 100), "ok");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncate a string and append `suffix` if anything was cut
///
/// # Example
/// ```
/// use snippet_test_runner::utils::truncate_with_suffix;
///
/// assert_eq!(truncate_with_suffix("AssertionError: 2 != 3", 14, "..."), "AssertionError...");
/// assert_eq!(truncate_with_suffix("ok", 5, "..."), "ok");
/// ```
pub fn truncate_with_suffix(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}{}", truncate_str(s, max_chars), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_ascii() {
        let text = "ModuleNotFoundError";
        assert_eq!(truncate_str(text, 6), "Module");
        assert_eq!(truncate_str(text, 100), text);
    }

    #[test]
    fn test_truncate_str_multibyte() {
        let text = "r\u{e9}sum\u{e9} \u{2192} ok";
        assert_eq!(truncate_str(text, 2), "r\u{e9}");
        assert_eq!(truncate_str(text, 8), "r\u{e9}sum\u{e9} \u{2192}");
    }

    #[test]
    fn test_truncate_with_suffix() {
        assert_eq!(truncate_with_suffix("numpy pandas", 5, "..."), "numpy...");
        assert_eq!(truncate_with_suffix("numpy", 5, "..."), "numpy");
    }

    #[test]
    fn test_truncate_empty() {
        assert_eq!(truncate_str("", 10), "");
        assert_eq!(truncate_with_suffix("", 0, "..."), "");
    }
}
