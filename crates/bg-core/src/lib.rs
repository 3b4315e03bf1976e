//! Shared types, configuration, and error definitions for beatgrid.
//!
//! This crate holds everything the analysis pipeline and its callers agree on:
//! input clips and signals, the onset envelope, the published feature set,
//! configuration, and the stage instrumentation hook.

pub mod config;
pub mod envelope;
pub mod error;
pub mod features;
pub mod signal;
pub mod traits;

pub use config::AnalysisConfig;
pub use envelope::OnsetEnvelope;
pub use error::AnalysisError;
pub use features::{FeatureName, FeatureSet, Publication};
pub use signal::{AudioClip, ClipId, Signal};
pub use traits::{LogObserver, Stage, StageObserver};
