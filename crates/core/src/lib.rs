pub mod config;
pub mod error;
pub mod market;
pub mod resolution;
pub mod retry;
pub mod wallpaper;

pub use config::Config;
pub use error::*;
pub use market::{MarketCode, MarketInfo};
pub use resolution::{ResolutionCode, ResolutionInfo};
pub use retry::{Backoff, RetryPolicy, Transient};
pub use wallpaper::*;
