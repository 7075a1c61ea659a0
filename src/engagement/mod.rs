// Optimistic likes and comments over a caller-owned feed session

pub mod session;
pub mod sync_state;
pub mod synchronizer;

pub use session::FeedSession;
pub use sync_state::{CountSync, RelationSync, SyncState};
pub use synchronizer::{EngagementStats, EngagementStatsSnapshot, EngagementSynchronizer};
