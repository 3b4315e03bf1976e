use bg_core::config::AnalysisConfig;
use bg_core::error::AnalysisError;
use bg_core::signal::{AudioClip, Signal};

/// Mix the clip to mono and bring it down to the analysis rate.
///
/// Above `canonical_rate` the signal is halved with an anti-aliasing kernel,
/// then halved again while the result still sits at twice the canonical rate
/// or more: 44.1 kHz and 88.2 kHz land on 22050 Hz, 48 kHz on 24000 Hz,
/// 32 kHz on 16000 Hz. Onset and tempo cues live well below 10 kHz.
///
/// # Errors
/// Only if the resulting rate is zero, which a clamped config cannot produce.
///
/// # Example
/// ```
/// use bg_audio::preprocess::preprocess;
/// use bg_core::{AnalysisConfig, AudioClip};
///
/// let clip = AudioClip::new(vec![0.25; 44100 * 2], 2, 44100).unwrap();
/// let signal = preprocess(&clip, &AnalysisConfig::default()).unwrap();
/// assert_eq!(signal.sample_rate(), 22050);
/// assert_eq!(signal.len(), 22050);
/// ```
pub fn preprocess(clip: &AudioClip, config: &AnalysisConfig) -> Result<Signal, AnalysisError> {
    let mut samples = mixdown(clip.samples(), clip.channels());
    let mut rate = clip.sample_rate();
    let canonical = config.canonical_rate;

    if rate > canonical {
        let kernel = half_band_kernel(config.decimation_taps);
        loop {
            samples = decimate_by_two(&samples, &kernel);
            rate /= 2;
            if rate < canonical.saturating_mul(2) {
                break;
            }
        }
        log::debug!(
            "Sous-échantillonnage {} Hz -> {rate} Hz ({} échantillons)",
            clip.sample_rate(),
            samples.len()
        );
    }

    Signal::new(samples, rate)
}

/// Per-frame arithmetic mean of interleaved channels.
///
/// # Example
/// ```
/// use bg_audio::preprocess::mixdown;
/// assert_eq!(mixdown(&[1.0, 3.0, -2.0, 2.0], 2), vec![2.0, 0.0]);
/// ```
#[must_use]
pub fn mixdown(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / scale)
        .collect()
}

/// Symmetric windowed-sinc low-pass with its cutoff at a quarter of the input
/// rate (the Nyquist frequency after halving). Odd length, unit DC gain.
#[must_use]
pub fn half_band_kernel(taps: usize) -> Vec<f32> {
    let taps = taps.max(3) | 1;
    let centre = (taps / 2) as f64;
    let span = (taps - 1) as f64;
    let mut kernel: Vec<f64> = (0..taps)
        .map(|i| {
            let x = i as f64 - centre;
            let sinc = if x == 0.0 {
                0.5
            } else {
                (std::f64::consts::FRAC_PI_2 * x).sin() / (std::f64::consts::PI * x)
            };
            // Blackman
            let phase = 2.0 * std::f64::consts::PI * i as f64 / span;
            let window = 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos();
            sinc * window
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel.into_iter().map(|k| k as f32).collect()
}

/// Filter with `kernel` (centred, zeros outside the signal) and keep every
/// other sample. Output length is `ceil(len / 2)`.
#[must_use]
pub fn decimate_by_two(samples: &[f32], kernel: &[f32]) -> Vec<f32> {
    let len = samples.len() as isize;
    let centre = (kernel.len() / 2) as isize;
    (0..samples.len().div_ceil(2))
        .map(|m| {
            let origin = 2 * m as isize + centre;
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, &h)| {
                    let idx = origin - k as isize;
                    (0..len).contains(&idx).then(|| h * samples[idx as usize])
                })
                .sum()
        })
        .collect()
}
