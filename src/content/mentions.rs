use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static MENTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w@])@([A-Za-z0-9_.]{1,30})").expect("mention regex is valid"));

/// Usernames mentioned in `text`, lowercased, deduplicated, first occurrence first.
///
/// Email-like tokens (`me@host`) are not mentions; trailing dots are trimmed.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}
