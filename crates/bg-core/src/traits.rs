use std::fmt;
use std::time::{Duration, Instant};

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Preprocess,
    Envelope,
    Onsets,
    Tempo,
    Beats,
    EnergyAlign,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Envelope => "onset envelope",
            Self::Onsets => "onset events",
            Self::Tempo => "tempo",
            Self::Beats => "beat tracking",
            Self::EnergyAlign => "energy alignment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook invoked around every pipeline stage.
///
/// Called from the analysis worker thread, hence `Send + Sync`.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use bg_core::traits::{Stage, StageObserver};
///
/// struct Silent;
/// impl StageObserver for Silent {
///     fn stage_finished(&self, _stage: Stage, _elapsed: Duration) {}
/// }
/// ```
pub trait StageObserver: Send + Sync {
    /// Called right before a stage runs.
    fn stage_started(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called right after, with the measured duration.
    fn stage_finished(&self, stage: Stage, elapsed: Duration);
}

/// Default observer: stage timings through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl StageObserver for LogObserver {
    fn stage_started(&self, stage: Stage) {
        log::trace!(">{stage}");
    }

    fn stage_finished(&self, stage: Stage, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs < 1.0 {
            log::debug!("<{stage}: {:.2} ms", secs * 1000.0);
        } else {
            log::debug!("<{stage}: {secs:.2} s");
        }
    }
}

/// Run `f` as `stage`, reporting to `observer` before and after.
///
/// # Example
/// ```
/// use bg_core::traits::{instrument, LogObserver, Stage};
/// let n = instrument(&LogObserver, Stage::Tempo, || 40 + 2);
/// assert_eq!(n, 42);
/// ```
pub fn instrument<T>(observer: &dyn StageObserver, stage: Stage, f: impl FnOnce() -> T) -> T {
    observer.stage_started(stage);
    let start = Instant::now();
    let out = f();
    observer.stage_finished(stage, start.elapsed());
    out
}
