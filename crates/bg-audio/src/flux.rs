use std::collections::VecDeque;

use bg_core::config::AnalysisConfig;
use bg_core::envelope::OnsetEnvelope;
use bg_core::signal::Signal;

use crate::fft::{FftPipeline, Taper};

/// Onset-strength envelope from half-wave-rectified spectral flux.
///
/// Frames of `window_size` samples are Hamming-tapered and centred on every
/// multiple of the hop (`window / overlap / 2`, 128 samples by default, about
/// 5.8 ms at 22050 Hz). Each frame's magnitude spectrum is compared with the one
/// `overlap - 1` frames earlier; only increases count. After the last
/// spectrum, `overlap - 1` zero-flux frames close the envelope, one for each
/// spectrum still waiting in the comparison history.
///
/// # Example
/// ```
/// use bg_audio::flux::SpectralFlux;
/// use bg_core::{AnalysisConfig, Signal};
///
/// let signal = Signal::new(vec![0.0; 22050], 22050).unwrap();
/// let mut engine = SpectralFlux::new(&AnalysisConfig::default());
/// let env = engine.envelope(&signal);
/// assert!((env.frame_rate - 22050.0 / 128.0).abs() < 1e-3);
/// assert!(env.values.iter().all(|&v| v == 0.0));
/// ```
pub struct SpectralFlux {
    fft: FftPipeline,
    hop: usize,
    lag: usize,
    frame_buf: Vec<f32>,
    spectrum_buf: Vec<f32>,
}

impl SpectralFlux {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        let fft = FftPipeline::new(config.window_size, Taper::Hamming);
        let bins = fft.bins();
        Self {
            frame_buf: vec![0.0; config.window_size],
            spectrum_buf: vec![0.0; bins],
            fft,
            hop: config.hop_size(),
            lag: config.flux_lag(),
        }
    }

    /// Stride between frames, in samples.
    #[must_use]
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Compute the normalized envelope of `signal`.
    pub fn envelope(&mut self, signal: &Signal) -> OnsetEnvelope {
        let frame_rate = signal.sample_rate() as f32 / self.hop as f32;
        let samples = signal.samples();
        let count = frame_count(samples.len(), self.hop);
        let bins = self.fft.bins();

        // Les `lag` premières trames sont comparées à du silence.
        let mut history: VecDeque<Vec<f32>> = (0..self.lag).map(|_| vec![0.0; bins]).collect();
        let mut flux = Vec::with_capacity(count + self.lag);

        for k in 0..count {
            fill_centred(samples, k * self.hop, &mut self.frame_buf);
            self.fft.magnitudes_into(&self.frame_buf, &mut self.spectrum_buf);

            let Some(mut oldest) = history.pop_front() else {
                break;
            };
            flux.push(rectified_flux(&self.spectrum_buf, &oldest));
            oldest.copy_from_slice(&self.spectrum_buf);
            history.push_back(oldest);
        }
        if count > 0 {
            flux.extend(std::iter::repeat_n(0.0, self.lag));
        }

        log::debug!("Enveloppe d'onset : {} trames @ {frame_rate:.2} fps", flux.len());
        OnsetEnvelope::normalized(flux, frame_rate)
    }
}

/// Coarse envelope for tempo estimation: non-overlapping, untapered frames of
/// `hop` samples, flux between consecutive frames.
///
/// A trailing partial frame is dropped, so `len / hop` spectra give
/// `len / hop - 1` flux values.
#[must_use]
pub fn coarse_envelope(signal: &Signal, hop: usize) -> OnsetEnvelope {
    let hop = hop.max(1);
    let frame_rate = signal.sample_rate() as f32 / hop as f32;
    let mut fft = FftPipeline::new(hop, Taper::Rectangular);
    let mut prev = vec![0.0; fft.bins()];
    let mut current = vec![0.0; fft.bins()];

    let mut flux = Vec::with_capacity(signal.len() / hop);
    for (i, frame) in signal.samples().chunks_exact(hop).enumerate() {
        fft.magnitudes_into(frame, &mut current);
        if i > 0 {
            flux.push(rectified_flux(&current, &prev));
        }
        std::mem::swap(&mut prev, &mut current);
    }

    OnsetEnvelope::normalized(flux, frame_rate)
}

/// Number of frames needed so the first is centred on sample 0 and the last
/// centre reaches or passes the final sample.
///
/// # Example
/// ```
/// use bg_audio::flux::frame_count;
/// assert_eq!(frame_count(0, 128), 0);
/// assert_eq!(frame_count(1, 128), 1);
/// assert_eq!(frame_count(129, 128), 2);
/// assert_eq!(frame_count(200, 128), 3);
/// ```
#[must_use]
pub fn frame_count(len: usize, hop: usize) -> usize {
    if len == 0 {
        0
    } else {
        (len - 1).div_ceil(hop.max(1)) + 1
    }
}

/// Copy the window centred on `centre` into `out`, zero-padding outside the signal.
fn fill_centred(samples: &[f32], centre: usize, out: &mut [f32]) {
    let half = out.len() / 2;
    let start = centre as isize - half as isize;
    for (i, slot) in out.iter_mut().enumerate() {
        let idx = start + i as isize;
        *slot = if idx >= 0 && (idx as usize) < samples.len() {
            samples[idx as usize]
        } else {
            0.0
        };
    }
}

/// Sum of positive bin-wise differences.
#[inline]
fn rectified_flux(current: &[f32], previous: &[f32]) -> f32 {
    current
        .iter()
        .zip(previous)
        .map(|(&cur, &prev)| (cur - prev).max(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst_signal(len: usize, at: &[usize]) -> Signal {
        let mut samples = vec![0.0f32; len];
        for &start in at {
            for i in 0..400 {
                if let Some(s) = samples.get_mut(start + i) {
                    let t = i as f32 / 22050.0;
                    *s += 0.8 * (2.0 * std::f32::consts::PI * 880.0 * t).sin() * (-t * 60.0).exp();
                }
            }
        }
        let Ok(signal) = Signal::new(samples, 22050) else {
            panic!("valid signal rejected");
        };
        signal
    }

    #[test]
    fn envelope_is_normalized_and_peaks_at_attack() {
        let signal = burst_signal(22050, &[11025]);
        let mut engine = SpectralFlux::new(&AnalysisConfig::default());
        let env = engine.envelope(&signal);

        assert_eq!(env.len(), frame_count(22050, 128) + 3);
        let max = env.values.iter().copied().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);
        assert!(env.values.iter().all(|&v| (0.0..=1.0).contains(&v)));

        let peak = env
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i);
        let peak_time = env.frame_time(peak);
        assert!((peak_time - 0.5).abs() < 0.05, "peak at {peak_time}");
    }

    #[test]
    fn short_and_empty_signals_do_not_fault() {
        let mut engine = SpectralFlux::new(&AnalysisConfig::default());
        let Ok(empty) = Signal::new(Vec::<f32>::new(), 22050) else {
            panic!("empty signal rejected");
        };
        assert!(engine.envelope(&empty).is_empty());

        let Ok(tiny) = Signal::new(vec![0.5, -0.5, 0.25], 22050) else {
            panic!("valid signal rejected");
        };
        assert_eq!(engine.envelope(&tiny).len(), 5);
    }

    #[test]
    fn envelope_ends_with_lag_zero_frames() {
        let signal = burst_signal(4096, &[0]);
        let mut engine = SpectralFlux::new(&AnalysisConfig::default());
        let env = engine.envelope(&signal);
        let count = frame_count(4096, 128);
        assert_eq!(env.len(), count + 3);
        assert_eq!(&env.values[count..], &[0.0, 0.0, 0.0]);
        assert!(env.values[..count].iter().any(|&v| v > 0.0));
    }

    #[test]
    fn coarse_envelope_drops_partial_frame() {
        let signal = burst_signal(512 * 10 + 100, &[2048]);
        let env = coarse_envelope(&signal, 512);
        assert_eq!(env.len(), 9);
        assert!((env.frame_rate - 22050.0 / 512.0).abs() < 1e-3);
        assert!((env.values[3] - 1.0).abs() < 1e-6);
    }
}
