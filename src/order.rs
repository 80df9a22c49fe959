//! Numeric-aware ordering for chunk indices and page numbers.
//!
//! Chunk indices arrive as strings. Sorting them lexicographically puts
//! `"10"` before `"2"`, which silently corrupts any file uploaded in more
//! than nine chunks. The rule used everywhere in this crate:
//!
//! 1. keys that parse as an integer sort numerically, and before any
//!    non-integer key;
//! 2. everything else sorts lexicographically;
//! 3. equal numbers (`"7"` vs `"07"`) fall back to the raw text so the
//!    order stays total and deterministic.

/// Sort key derived from a chunk index or page number string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Numeric(i64, String),
    Text(String),
}

/// Build the [`SortKey`] for `raw`.
pub fn sort_key(raw: &str) -> SortKey {
    match raw.parse::<i64>() {
        Ok(n) => SortKey::Numeric(n, raw.to_string()),
        Err(_) => SortKey::Text(raw.to_string()),
    }
}

/// Sort `items` in place by the numeric-aware rule applied to `key`.
pub fn sort_by_index<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by_cached_key(|item| sort_key(key(item)));
}
