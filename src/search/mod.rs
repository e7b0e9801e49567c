//! Web context lookup: proxy transport, result parsing and context formatting

mod context;
mod fetcher;
mod parser;
mod transport;

pub use context::{
    format_context,
    parse_context_entries,
    ContextEntry,
    ContextOutcome,
    EmptyReason,
    MAX_FORMATTED_RESULTS,
};
pub use fetcher::{WebContextFetcher, WEATHER_SHORTCUT_DOMAIN, WEATHER_SHORTCUT_TEXT};
pub use transport::{ProxyTransport, SearchTransport};
