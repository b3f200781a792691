use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Collect daily wallpaper metadata and manage image downloads.
#[derive(Parser, Debug)]
#[command(name = "binggo", version, about)]
pub struct CliArgs {
    /// SQLite database URL (overrides DATABASE_URL).
    #[arg(long, global = true, env = "BINGGO_DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the archive feed and store new wallpapers.
    Collect {
        /// Collect every supported market.
        #[arg(long)]
        all_markets: bool,

        /// Market code, region or name (e.g. en-US, US, UnitedStates).
        #[arg(long, env = "BINGGO_MARKET")]
        market: Option<String>,

        /// Days of history to fetch (1-8).
        #[arg(long, env = "BINGGO_DAYS")]
        days: Option<u32>,

        /// Resolution code (Standard, FullHD, HD, UHD4K).
        #[arg(long, env = "BINGGO_RESOLUTION")]
        resolution: Option<String>,

        /// Concurrent market requests (1-5).
        #[arg(long, env = "BINGGO_MAX_CONCURRENT_REQUESTS")]
        max_concurrent_requests: Option<u32>,
    },

    /// Most recent wallpapers for a market.
    Latest {
        #[arg(long, default_value = "en-US")]
        market: String,

        #[arg(long, default_value_t = 10)]
        count: u32,
    },

    /// Page through a market's wallpapers, newest first.
    List {
        #[arg(long, default_value = "en-US")]
        market: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        size: u32,
    },

    /// Wallpapers within an inclusive date range.
    Range {
        #[arg(long, default_value = "en-US")]
        market: String,

        /// YYYY-MM-DD
        #[arg(long)]
        start: NaiveDate,

        /// YYYY-MM-DD
        #[arg(long)]
        end: NaiveDate,
    },

    /// Print one stored wallpaper as JSON.
    Show { id: Uuid },

    /// Download one wallpaper image and wait for it to finish.
    Download {
        id: Uuid,

        #[arg(long, env = "BINGGO_RESOLUTION")]
        resolution: Option<String>,

        /// Target directory (overrides DOWNLOAD_DIR).
        #[arg(long, env = "BINGGO_DOWNLOAD_DIR")]
        dir: Option<PathBuf>,
    },

    /// List supported markets.
    Markets,

    /// List supported resolutions.
    Resolutions,
}
