//! Extraction of `<tag>...</tag>` directives from generated text

use regex::Regex;

/// Tag the model uses to request a web search
pub const SEARCH_TAG: &str = "search";

/// Return every payload enclosed by `<tag>`/`</tag>`, trimmed, in document order.
///
/// Matching is case-sensitive and non-greedy and may span line breaks. An
/// opening tag without a closing tag yields nothing.
pub fn extract_tag_content(text: &str, tag: &str) -> Vec<String> {
    let escaped = regex::escape(tag);
    let pattern = format!(r"(?s)<{0}>(.*?)</{0}>", escaped);
    let Ok(regex) = Regex::new(&pattern) else {
        return Vec::new();
    };

    regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// First search query in `text`. Later directives in the same reply are ignored.
pub fn first_search_query(text: &str) -> Option<String> {
    extract_tag_content(text, SEARCH_TAG).into_iter().next()
}
