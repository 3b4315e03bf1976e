//! Offline analysis pipeline for beatgrid.
//!
//! Stages, in execution order: [`preprocess`] (mono mixdown and decimation),
//! [`flux`] (spectral-flux onset envelope), [`onset`] (peak picking),
//! [`tempo`] (autocorrelation tempo), [`beat`] (dynamic-programming beat
//! tracking) and the optional [`align`] energy snap. [`coordinator`] runs them
//! on a worker thread and streams the results back.

pub mod align;
pub mod beat;
pub mod coordinator;
pub mod fft;
pub mod flux;
pub mod onset;
pub mod preprocess;
pub mod tempo;

pub use coordinator::{AnalysisHandle, Coordinator, RunStatus, analyze};
