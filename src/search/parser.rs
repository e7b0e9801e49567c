use scraper::{ElementRef, Html, Selector};

use crate::types::SearchResult;

/// Parse a DuckDuckGo HTML result page.
///
/// Only `.result` entries carrying both an `a.result__a` link and a
/// `.result__snippet` are kept, in page order, up to `limit`.
pub(crate) fn parse_search_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for article in document.select(&result_sel) {
        if out.len() >= limit {
            break;
        }
        let link = article.select(&link_sel).next();
        let snippet = article.select(&snippet_sel).next();
        let (Some(link), Some(snippet)) = (link, snippet) else {
            continue;
        };

        out.push(SearchResult {
            title: text_content(link).trim().to_string(),
            url: link.value().attr("href").unwrap_or_default().to_string(),
            snippet: text_content(snippet).trim().to_string(),
        });
    }
    out
}

/// Visible text of an HTML page with `script`/`style` content dropped,
/// whitespace collapsed, and cut to `char_limit` characters.
pub(crate) fn page_text(html: &str, char_limit: usize) -> String {
    let document = Html::parse_document(html);

    let mut raw = String::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| matches!(el.name(), "script" | "style"))
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }

    compact_ws(&raw).chars().take(char_limit).collect()
}

fn text_content(elem: ElementRef<'_>) -> String {
    elem.text().collect::<String>()
}

fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
