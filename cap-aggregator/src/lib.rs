pub mod types;
pub mod geometry;
pub mod traits;
pub mod fetcher;
pub mod cache;
pub mod parser;
pub mod detail;
pub mod sources;
pub mod geo_filter;
pub mod snapshot;
pub mod aggregator;

pub use types::*;
pub use geometry::{contains_point, parse_polygon_set, parse_polygon_string, GeoPoint, Polygon};
pub use traits::{FetchedDocument, Fetcher};
pub use fetcher::HttpFetcher;
pub use cache::CachedFetcher;
pub use parser::FeedParser;
pub use detail::{parse_cap_document, DetailResolver};
pub use sources::{CapFeedSource, FeedEvent, FetchState};
pub use geo_filter::GeoFilter;
pub use snapshot::{FeedAlert, FeedItems};
pub use aggregator::{AggregatorEvent, CapAggregator};
