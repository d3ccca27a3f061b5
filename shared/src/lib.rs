pub mod metrics_defs;

// Re-exported so the metric macros resolve without callers naming the crate.
pub use metrics;
