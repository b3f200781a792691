//! Feed ingestion: fetch archive records per market and turn them into
//! rows ready for the dedup repository.

pub mod client;
pub mod collector;
pub mod error;
pub mod mapper;

pub use client::{BingFeedClient, FeedClient};
pub use collector::{CollectionRequest, Collector};
pub use error::FeedError;
pub use mapper::{to_new_wallpaper, to_new_wallpapers};
