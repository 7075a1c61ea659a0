use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

use crate::models::Post;

/// Feed order: newest first, ties broken by the lexicographically greater id.
/// Total over posts with distinct ids.
pub fn feed_order(a: &Post, b: &Post) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

pub fn is_feed_ordered(posts: &[Post]) -> bool {
    posts
        .windows(2)
        .all(|w| feed_order(&w[0], &w[1]) != Ordering::Greater)
}

struct HeapEntry {
    post: Post,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap pops the greatest entry, which must be the one that comes first.
    fn cmp(&self, other: &Self) -> Ordering {
        feed_order(&self.post, &other.post)
            .reverse()
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge of per-chunk results into one feed of at most `feed_cap` posts.
///
/// Each input list is expected in feed order; a list that is not gets sorted
/// first. Duplicate post ids keep their first occurrence.
pub fn merge_feeds(lists: Vec<Vec<Post>>, feed_cap: usize) -> Vec<Post> {
    let mut sources: Vec<std::vec::IntoIter<Post>> = lists
        .into_iter()
        .enumerate()
        .map(|(index, mut list)| {
            if !is_feed_ordered(&list) {
                debug!("Chunk result {} arrived out of order, sorting", index);
                list.sort_by(feed_order);
            }
            list.into_iter()
        })
        .collect();

    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (source, iter) in sources.iter_mut().enumerate() {
        if let Some(post) = iter.next() {
            heap.push(HeapEntry { post, source });
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(feed_cap.min(64));
    while merged.len() < feed_cap {
        let Some(HeapEntry { post, source }) = heap.pop() else {
            break;
        };
        if let Some(next) = sources[source].next() {
            heap.push(HeapEntry { post: next, source });
        }
        if seen.insert(post.id.clone()) {
            merged.push(post);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rand::Rng;

    fn post(id: &str, author: &str, at: i64) -> Post {
        Post {
            id: id.to_string(),
            author_id: author.to_string(),
            author_username: author.to_string(),
            author_avatar_url: None,
            image_url: None,
            caption: String::new(),
            location: None,
            created_at: Utc.timestamp_millis_opt(at).unwrap(),
            updated_at: None,
            likes: Default::default(),
            comment_count: 0,
            metadata: Default::default(),
        }
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_interleaves_chunks_by_recency() {
        let chunk_a = vec![post("b30", "B", 30), post("b10", "B", 10)];
        let chunk_b = vec![post("c20", "C", 20)];
        let merged = merge_feeds(vec![chunk_a, chunk_b], 50);
        assert_eq!(ids(&merged), vec!["b30", "c20", "b10"]);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_greater_id() {
        let merged = merge_feeds(
            vec![vec![post("p1", "A", 5)], vec![post("p9", "B", 5)], vec![post("p5", "C", 5)]],
            50,
        );
        assert_eq!(ids(&merged), vec!["p9", "p5", "p1"]);
    }

    #[test]
    fn test_duplicates_removed_and_truncated() {
        let shared = post("dup", "A", 40);
        let merged = merge_feeds(
            vec![
                vec![shared.clone(), post("a1", "A", 10)],
                vec![shared, post("b1", "B", 20)],
            ],
            2,
        );
        assert_eq!(ids(&merged), vec!["dup", "b1"]);
    }

    #[test]
    fn test_unsorted_chunk_is_tolerated() {
        let merged = merge_feeds(vec![vec![post("old", "A", 1), post("new", "A", 9)]], 10);
        assert_eq!(ids(&merged), vec!["new", "old"]);
    }

    #[test]
    fn test_random_chunks_merge_into_total_order() {
        let mut rng = rand::rng();
        for round in 0..100 {
            let chunk_count = rng.random_range(1..6);
            let mut lists = Vec::new();
            let mut total = 0;
            for c in 0..chunk_count {
                let len = rng.random_range(0..30);
                let mut list: Vec<Post> = (0..len)
                    .map(|i| post(&format!("r{}c{}i{}", round, c, i), "X", rng.random_range(0..20)))
                    .collect();
                list.sort_by(feed_order);
                total += list.len();
                lists.push(list);
            }
            let cap = rng.random_range(1..60);
            let merged = merge_feeds(lists, cap);

            assert!(is_feed_ordered(&merged));
            assert_eq!(merged.len(), total.min(cap));
            let unique: HashSet<&str> = merged.iter().map(|p| p.id.as_str()).collect();
            assert_eq!(unique.len(), merged.len());
        }
    }
}
