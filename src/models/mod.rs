pub(crate) mod stats;

pub use stats::{ClassificationStats, ConfidenceBand};
