pub mod batch;
pub mod classifier;
