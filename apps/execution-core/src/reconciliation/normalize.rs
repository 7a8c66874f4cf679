//! Broker symbol normalization.

/// Series suffixes some venues append to cash-equity symbols.
const SERIES_SUFFIXES: [&str; 4] = ["-EQ", "-BE", "-BZ", "-SM"];

/// Canonical form of a broker symbol.
///
/// Drops a `VENUE:` prefix (`NSE:`, `NFO:`, ...), uppercases, and strips a
/// trailing series suffix such as `-EQ`.
#[must_use]
pub fn normalize_symbol(raw: &str) -> String {
    let trimmed = raw.trim();
    let unprefixed = trimmed
        .split_once(':')
        .map_or(trimmed, |(_, symbol)| symbol)
        .trim();
    let upper = unprefixed.to_ascii_uppercase();

    if let Some(base) = SERIES_SUFFIXES
        .iter()
        .find_map(|suffix| upper.strip_suffix(suffix))
    {
        return base.to_string();
    }
    upper
}
