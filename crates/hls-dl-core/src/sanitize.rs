//! Filename sanitization: §6 of the specification.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Sanitize a string for use as a path component: strip forbidden/control
/// characters, leading dots, and collapse to a conservative character class.
///
/// Titles with no characters in the surviving class (e.g. CJK-only titles)
/// would otherwise all collapse to the same empty path component, silently
/// merging different shows' output directories; falls back to a
/// content-derived placeholder in that case.
pub fn sanitize_filename(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '/' | '\\' | '|' | '?' | '*' | '"') && !c.is_control())
        .collect();

    let no_leading_dots = stripped.trim_start_matches('.');

    let collapsed: String = no_leading_dots
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_' | '(' | ')'))
        .collect();

    let result = collapsed.trim_end().to_string();
    if result.is_empty() {
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        format!("untitled-{:x}", hasher.finish())
    } else {
        result
    }
}

/// The basename of a URL's path component, with the query string stripped.
pub fn url_basename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_forbidden_characters() {
        assert_eq!(sanitize_filename("a<b>c:d/e\\f|g?h*i\"j"), "abcdefghij");
    }

    #[test]
    fn strips_leading_dots() {
        assert_eq!(sanitize_filename("...Show Title"), "Show Title");
    }

    #[test]
    fn trims_trailing_whitespace() {
        assert_eq!(sanitize_filename("Show Title   "), "Show Title");
    }

    #[test]
    fn basename_strips_query() {
        assert_eq!(url_basename("https://cdn.example/seg/001.ts?token=abc"), "001.ts");
    }

    #[test]
    fn non_ascii_only_title_falls_back_to_nonempty_placeholder() {
        assert!(sanitize_filename("<>:\"|").starts_with("untitled-"));
        assert!(!sanitize_filename("日本語のタイトル").is_empty());
    }

    #[test]
    fn different_non_ascii_titles_do_not_collide() {
        assert_ne!(sanitize_filename("進撃の巨人"), sanitize_filename("鬼滅の刃"));
    }
}
