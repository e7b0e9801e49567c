use std::fmt;

use crate::types::SearchResult;

/// Formatting cap, independent of how many results a search keeps
pub const MAX_FORMATTED_RESULTS: usize = 5;

/// Why a lookup produced no context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    /// The search page parsed but contained no usable entries
    NoResults,
    /// Transport or parse failure; the message is for diagnostics only
    FetchFailed(String),
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyReason::NoResults => f.write_str("no results"),
            EmptyReason::FetchFailed(message) => write!(f, "fetch failed: {}", message),
        }
    }
}

/// Result of a context lookup. Failures degrade to `Empty`, never to an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextOutcome {
    Found {
        context: String,
        results: Vec<SearchResult>,
    },
    Empty {
        reason: EmptyReason,
    },
}

impl ContextOutcome {
    pub(crate) fn from_results(results: Vec<SearchResult>) -> Self {
        if results.is_empty() {
            return ContextOutcome::Empty { reason: EmptyReason::NoResults };
        }
        ContextOutcome::Found {
            context: format_context(&results),
            results,
        }
    }

    /// Formatted context blob, `""` when empty
    pub fn context(&self) -> &str {
        match self {
            ContextOutcome::Found { context, .. } => context,
            ContextOutcome::Empty { .. } => "",
        }
    }

    pub fn into_context(self) -> String {
        match self {
            ContextOutcome::Found { context, .. } => context,
            ContextOutcome::Empty { .. } => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ContextOutcome::Empty { .. })
    }
}

/// Render results as `"{n}. {title}\n{snippet}\n{url}"` entries separated by a blank line
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .take(MAX_FORMATTED_RESULTS)
        .enumerate()
        .map(|(i, result)| format!("{}. {}\n{}\n{}", i + 1, result.title, result.snippet, result.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One entry of a formatted context blob, as shown in a context panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub number: String,
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Split a formatted context blob back into its entries
pub fn parse_context_entries(context: &str) -> Vec<ContextEntry> {
    context
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut lines = block.split('\n');
            let title_line = lines.next().unwrap_or_default();
            let (number, title) = title_line.split_once(". ").unwrap_or((title_line, ""));
            ContextEntry {
                number: number.to_string(),
                title: title.to_string(),
                snippet: lines.next().unwrap_or_default().to_string(),
                url: lines.next().unwrap_or_default().to_string(),
            }
        })
        .collect()
}
