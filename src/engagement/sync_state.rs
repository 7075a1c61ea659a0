use serde::{Deserialize, Serialize};

/// Reconciliation state of one optimistic relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    /// Local value matches the last confirmed server value
    #[default]
    Synced,
    /// An additive write (set-add / increment) is in flight
    PendingApply,
    /// A subtractive write (set-remove) is in flight
    PendingRevert,
}

/// Per (post, user) like relation.
///
/// Every accepted operation bumps `generation`; only the operation holding the
/// latest generation may settle the relation or roll back the snapshot.
/// `confirmed` is the membership the server last acknowledged, and is what a
/// failed latest write rolls back to.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationSync {
    state: SyncState,
    generation: u64,
    confirmed: bool,
}

impl RelationSync {
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Last membership acknowledged by the server
    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    /// Desired membership while a write is in flight
    pub fn pending_target(&self) -> Option<bool> {
        match self.state {
            SyncState::Synced => None,
            SyncState::PendingApply => Some(true),
            SyncState::PendingRevert => Some(false),
        }
    }

    /// Start a write toward `liked`. `current` is the local membership, taken as
    /// confirmed when nothing is in flight. `None` when the same write is already
    /// in flight.
    pub fn begin(&mut self, liked: bool, current: bool) -> Option<u64> {
        let pending = if liked {
            SyncState::PendingApply
        } else {
            SyncState::PendingRevert
        };
        if self.state == pending {
            return None;
        }
        if self.state == SyncState::Synced {
            self.confirmed = current;
        }
        self.state = pending;
        self.generation += 1;
        Some(self.generation)
    }

    /// Record the outcome of the write for `generation`. `accepted` carries the
    /// written membership when the server took the write, even if a newer
    /// operation has superseded it. Returns false when superseded, in which case
    /// the state stays pending.
    pub fn settle(&mut self, generation: u64, accepted: Option<bool>) -> bool {
        if let Some(liked) = accepted {
            self.confirmed = liked;
        }
        if self.generation != generation {
            return false;
        }
        self.state = SyncState::Synced;
        true
    }
}

/// Per post comment-count increments in flight
#[derive(Debug, Clone, Copy, Default)]
pub struct CountSync {
    pending: u64,
}

impl CountSync {
    pub fn state(&self) -> SyncState {
        if self.pending > 0 {
            SyncState::PendingApply
        } else {
            SyncState::Synced
        }
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn begin(&mut self) {
        self.pending += 1;
    }

    pub fn finish(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_like_is_coalesced() {
        let mut relation = RelationSync::default();
        let first = relation.begin(true, false);
        assert_eq!(first, Some(1));
        assert_eq!(relation.begin(true, true), None);
        assert_eq!(relation.state(), SyncState::PendingApply);
        assert!(relation.settle(1, Some(true)));
        assert_eq!(relation.state(), SyncState::Synced);
        assert!(relation.confirmed());
    }

    #[test]
    fn test_opposite_write_supersedes_pending_one() {
        let mut relation = RelationSync::default();
        let like = relation.begin(true, false).unwrap();
        let unlike = relation.begin(false, true).unwrap();
        assert_eq!(relation.state(), SyncState::PendingRevert);

        assert!(!relation.settle(like, Some(true)));
        assert_eq!(relation.pending_target(), Some(false));
        assert!(relation.settle(unlike, Some(false)));
        assert_eq!(relation.pending_target(), None);
        assert!(!relation.confirmed());
    }

    #[test]
    fn test_failed_writes_keep_last_confirmed_membership() {
        let mut relation = RelationSync::default();
        let like = relation.begin(true, false).unwrap();
        let unlike = relation.begin(false, true).unwrap();

        // Both writes rejected: the server never saw the like.
        assert!(!relation.settle(like, None));
        assert!(relation.settle(unlike, None));
        assert!(!relation.confirmed());

        // Superseded like accepted, latest unlike rejected: the like stands.
        let like = relation.begin(true, false).unwrap();
        let unlike = relation.begin(false, true).unwrap();
        assert!(!relation.settle(like, Some(true)));
        assert!(relation.settle(unlike, None));
        assert!(relation.confirmed());
    }

    #[test]
    fn test_count_sync_tracks_in_flight_increments() {
        let mut count = CountSync::default();
        count.begin();
        count.begin();
        assert_eq!(count.state(), SyncState::PendingApply);
        count.finish();
        count.finish();
        count.finish();
        assert_eq!(count.pending(), 0);
        assert_eq!(count.state(), SyncState::Synced);
    }
}
