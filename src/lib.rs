//! Harmonization, classification and aggregation of an open canteen-menu
//! dataset into a cleaned meal table and a monthly indicator grid.

pub mod config;
pub mod dates;
pub mod dedup;
pub mod error;
pub mod geo;
pub mod indicators;
pub mod loader;
pub mod meals;
pub mod notes;
pub mod org;
pub mod output;
pub mod overrides;
pub mod pipeline;
pub mod rules;
pub mod types;
pub mod util;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{run, run_from_config, Inputs, PipelineOutput, RunReport};
