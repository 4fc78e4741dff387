//! Cache key construction
//!
//! Callers never hand-roll key strings. Keys are built from semantic parts
//! joined with [`KEY_SEPARATOR`], e.g. `cards:set:sv4`.

/// Separator between key segments
pub const KEY_SEPARATOR: char = ':';

/// Namespace for card lookups
pub const CARDS: &str = "cards";

/// Namespace for price quotes
pub const PRICES: &str = "prices";

/// Segment marking a set identifier
pub const SET: &str = "set";

/// Join arbitrary parts into a cache key
///
/// Empty parts are skipped so `build_key(["cards", "", "x"])` is `cards:x`.
pub fn build_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::new();
    for part in parts {
        let part = part.as_ref().trim();
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// Key for every card in a set: `cards:set:<set_id>`
pub fn set_key(set_id: &str) -> String {
    build_key([CARDS, SET, set_id])
}

/// Key for a single card: `cards:<card_id>`
pub fn card_key(card_id: &str) -> String {
    build_key([CARDS, card_id])
}

/// Key for a price quote from one source: `prices:<source>:<card_id>`
pub fn price_key(source: &str, card_id: &str) -> String {
    build_key([PRICES, source, card_id])
}

/// Extract the set identifier from a key built with [`set_key`]
pub fn set_id(key: &str) -> Option<&str> {
    let mut parts = key.split(KEY_SEPARATOR);
    while let Some(part) = parts.next() {
        if part == SET {
            return parts.next().filter(|id| !id.is_empty());
        }
    }
    None
}

/// Infer a context tag for an access: the key's leading namespace
pub fn context_tag(key: &str) -> &str {
    match key.split(KEY_SEPARATOR).next() {
        Some(ns) if !ns.is_empty() && ns.len() < key.len() => ns,
        _ => "default",
    }
}
