use std::collections::HashSet;

use crate::models::UserId;

/// Split the caller plus everyone they follow into author chunks of at most
/// `max_chunk` ids.
///
/// Ids are deduplicated (first occurrence wins) and the caller is appended
/// unless already present. A caller who follows nobody gets no chunks at all,
/// which the fan-out executor answers with the global fallback feed.
pub fn chunk_authors(principal_id: &str, following: &[UserId], max_chunk: usize) -> Vec<Vec<UserId>> {
    let max_chunk = max_chunk.max(1);
    let mut seen: HashSet<&str> = HashSet::with_capacity(following.len() + 1);
    let mut authors: Vec<UserId> = Vec::with_capacity(following.len() + 1);

    for id in following {
        if id.as_str() != principal_id && seen.insert(id.as_str()) {
            authors.push(id.clone());
        }
    }
    if authors.is_empty() {
        return Vec::new();
    }
    authors.push(principal_id.to_string());

    authors.chunks(max_chunk).map(|chunk| chunk.to_vec()).collect()
}
