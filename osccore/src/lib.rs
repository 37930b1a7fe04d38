// error module
pub mod error;

// data module
pub mod data {
    pub mod profile;
    pub mod trials;
    pub mod candidates;
}

// algorithm module
pub mod algorithm {
    pub mod extrema;
    pub mod kmeans;
    pub mod cluster_count;
    pub mod levenberg;
    pub mod gauss_mixture;
    pub mod bootstrap;
}

// pipeline module
pub mod pipeline {
    pub mod config;
    pub mod rng;
    pub mod cross_validation;
    pub mod consensus;
}

// Re-export commonly used types
pub use error::{PeakError, Result};
pub use pipeline::config::PipelineConfig;
pub use pipeline::consensus::ConsensusPeak;
pub use pipeline::cross_validation::{extract_peaks, PeakExtraction};
