//! SQLite persistence for collected wallpapers.
//!
//! [`init_pool`] opens the database and applies migrations;
//! [`WallpaperRepository`] provides dedup-insert and read queries.

pub mod db;
pub mod error;
pub mod repository;

pub use db::{init_pool, init_pool_at};
pub use error::StorageError;
pub use repository::WallpaperRepository;
