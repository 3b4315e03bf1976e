//! Tempo estimation by windowed autocorrelation of a coarse onset envelope.
//!
//! The coarse envelope (non-overlapping 512-sample frames) is cheaper to
//! correlate than the fine one and carries enough timing detail for
//! periodicity. An 8 s Hann window slides over it one frame at a time; each
//! window's autocorrelation, scaled to its own peak, accumulates into a
//! tempogram. The tempogram is weighted by a log-normal prior centred on
//! 120 BPM with a one-octave spread, and the best lag becomes the tempo.

use bg_core::config::AnalysisConfig;
use bg_core::envelope::OnsetEnvelope;
use bg_core::error::AnalysisError;
use bg_core::signal::Signal;

use crate::fft::{Autocorrelator, Taper};
use crate::flux::coarse_envelope;

/// Autocorrelation tempo estimator.
#[derive(Clone, Copy, Debug)]
pub struct TempoEstimator {
    hop: usize,
    window_secs: f32,
    prior_bpm: f32,
    prior_octaves: f32,
}

impl TempoEstimator {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            hop: config.tempo_hop,
            window_secs: config.tempo_window_secs,
            prior_bpm: config.tempo_prior_bpm,
            prior_octaves: config.tempo_prior_octaves,
        }
    }

    /// Estimate the tempo of `signal`, in BPM.
    ///
    /// # Errors
    /// [`AnalysisError::InvalidInput`] if the signal is shorter than one
    /// autocorrelation window (8 s by default) or silent.
    pub fn estimate(&self, signal: &Signal) -> Result<f32, AnalysisError> {
        let envelope = coarse_envelope(signal, self.hop);
        self.estimate_from_envelope(&envelope)
    }

    /// Estimate the tempo from an existing coarse envelope.
    ///
    /// # Errors
    /// [`AnalysisError::InvalidInput`] if the frame rate is not positive, the
    /// envelope is shorter than one autocorrelation window, or the envelope
    /// carries no periodic energy (silence).
    pub fn estimate_from_envelope(&self, envelope: &OnsetEnvelope) -> Result<f32, AnalysisError> {
        let frame_rate = envelope.frame_rate;
        if frame_rate <= 0.0 {
            return Err(AnalysisError::invalid("tempo: frame rate must be positive"));
        }
        let window = (self.window_secs * frame_rate) as usize;
        if window < 2 || envelope.len() < window {
            return Err(AnalysisError::invalid(format!(
                "tempo: {} envelope frames, at least {window} needed ({:.1} s)",
                envelope.len(),
                self.window_secs
            )));
        }

        let bpms = bpm_axis(window, frame_rate);
        let prior = self.prior(&bpms);
        let tempogram = tempogram(&envelope.values, window);

        let Some(lag) = best_lag(&tempogram, &prior) else {
            log::warn!("Tempogramme vide (signal silencieux ?)");
            return Err(AnalysisError::invalid("tempo: no periodic energy"));
        };
        let bpm = bpms[lag];
        log::info!("Tempo estimé : {bpm:.2} BPM (lag {lag})");
        Ok(bpm)
    }

    /// Log-normal prior weight per lag. Lag 0 gets no weight.
    fn prior(&self, bpms: &[f32]) -> Vec<f32> {
        let centre = self.prior_bpm.log2();
        bpms.iter()
            .map(|&bpm| {
                if bpm.is_finite() {
                    let z = (bpm.log2() - centre) / self.prior_octaves;
                    (-0.5 * z * z).exp()
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// BPM of every lag: `60 × frame_rate / k`; lag 0 is an infinite sentinel.
///
/// # Example
/// ```
/// use bg_audio::tempo::bpm_axis;
/// let axis = bpm_axis(4, 2.0);
/// assert!(axis[0].is_infinite());
/// assert_eq!(&axis[1..], &[120.0, 60.0, 40.0]);
/// ```
#[must_use]
pub fn bpm_axis(window: usize, frame_rate: f32) -> Vec<f32> {
    (0..window)
        .map(|k| {
            if k == 0 {
                f32::INFINITY
            } else {
                60.0 * frame_rate / k as f32
            }
        })
        .collect()
}

/// Mean of peak-normalized autocorrelations over every Hann-windowed slice.
///
/// Silent slices (zero autocorrelation) are counted but add nothing.
fn tempogram(envelope: &[f32], window: usize) -> Vec<f32> {
    let mask = Taper::Hann.coefficients(window);
    let mut correlator = Autocorrelator::new(window);
    let mut frame = vec![0.0f32; window];
    let mut corr = vec![0.0f32; window];
    let mut sum = vec![0.0f64; window];

    let windows = envelope.len() + 1 - window;
    for start in 0..windows {
        for ((slot, &v), &w) in frame.iter_mut().zip(&envelope[start..start + window]).zip(&mask) {
            *slot = v * w;
        }
        correlator.process(&frame, &mut corr);
        let peak = corr.iter().fold(0.0f32, |m, &c| m.max(c.abs()));
        if peak <= f32::EPSILON {
            continue;
        }
        for (acc, &c) in sum.iter_mut().zip(&corr) {
            *acc += f64::from(c / peak);
        }
    }

    log::debug!("Tempogramme : {windows} fenêtres de {window} trames");
    let scale = 1.0 / windows as f64;
    sum.into_iter().map(|v| (v * scale) as f32).collect()
}

/// Lag ≥ 1 maximizing `tempogram × prior`; the first maximum wins. `None`
/// when no lag scores above zero.
fn best_lag(tempogram: &[f32], prior: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for k in 1..prior.len() {
        let s = tempogram[k] * prior[k];
        if s > best.map_or(0.0, |(_, b)| b) {
            best = Some((k, s));
        }
    }
    best.map(|(lag, _)| lag)
}
