// Feed assembly: author chunking, concurrent fan-out, K-way merge and the live path

pub mod assembler;
pub mod chunker;
pub mod fan_out;
pub mod live;
pub mod merger;

pub use assembler::FeedAssembler;
pub use chunker::chunk_authors;
pub use fan_out::{FanOutExecutor, FanOutOutcome};
pub use live::{FeedSubscription, LiveFeedSubscriber};
pub use merger::{feed_order, is_feed_ordered, merge_feeds};
