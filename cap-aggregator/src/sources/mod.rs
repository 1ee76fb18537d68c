pub mod cap_feed;

pub use cap_feed::{CapFeedSource, FeedEvent, FetchState, UnresolvedItem};
