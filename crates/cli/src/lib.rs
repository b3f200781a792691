//! Host-side glue for the `binggo` binary.

pub mod pipeline;

pub use pipeline::{run_collection, CollectSummary};
