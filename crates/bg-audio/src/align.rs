use bg_core::config::AnalysisConfig;
use bg_core::signal::Signal;

/// Block length for the energy curve, in samples.
const ENERGY_BLOCK: usize = 128;

/// Optional post-pass moving each beat onto the loudest nearby instant.
///
/// The signal is cut into 128-sample blocks whose RMS forms an energy curve;
/// each beat moves to the centre of the strongest block within
/// `snap_radius_secs`. Beats in silent neighbourhoods stay put.
///
/// # Example
/// ```
/// use bg_audio::align::EnergyAligner;
/// use bg_core::{AnalysisConfig, Signal};
///
/// let mut samples = vec![0.0f32; 22050];
/// samples[11025..11153].fill(0.5);
/// let signal = Signal::new(samples, 22050).unwrap();
/// let config = AnalysisConfig { snap_radius_secs: 0.05, ..AnalysisConfig::default() };
/// let snapped = EnergyAligner::new(&config).align(&[0.48, 0.9], &signal);
/// assert!((snapped[0] - 0.5021).abs() < 1e-3);
/// assert_eq!(snapped[1], 0.9);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct EnergyAligner {
    radius_secs: f32,
}

impl EnergyAligner {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            radius_secs: config.snap_radius_secs,
        }
    }

    /// Snapped copies of `beats` (seconds). Order is not re-established here.
    #[must_use]
    pub fn align(&self, beats: &[f64], signal: &Signal) -> Vec<f64> {
        let energy = block_rms(signal.samples());
        if energy.is_empty() || self.radius_secs <= 0.0 {
            return beats.to_vec();
        }
        let block_secs = ENERGY_BLOCK as f64 / f64::from(signal.sample_rate());
        let radius = (f64::from(self.radius_secs) / block_secs).round() as usize;

        let mut moved = 0usize;
        let snapped = beats
            .iter()
            .map(|&t| {
                let block = ((t / block_secs).max(0.0) as usize).min(energy.len() - 1);
                let lo = block.saturating_sub(radius);
                let hi = (block + radius).min(energy.len() - 1);
                let mut best = (block, energy[block]);
                for (i, &e) in energy.iter().enumerate().take(hi + 1).skip(lo) {
                    if e > best.1 {
                        best = (i, e);
                    }
                }
                if best.0 == block && energy[block] <= 0.0 {
                    return t;
                }
                moved += 1;
                (best.0 as f64 + 0.5) * block_secs
            })
            .collect();

        log::debug!("Alignement énergie : {moved}/{} temps recalés", beats.len());
        snapped
    }
}

/// RMS of consecutive blocks; the last one may be partial.
fn block_rms(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks(ENERGY_BLOCK)
        .map(|block| {
            let sum_sq: f32 = block.iter().map(|s| s * s).sum();
            (sum_sq / block.len() as f32).sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(radius: f32) -> AnalysisConfig {
        AnalysisConfig {
            snap_radius_secs: radius,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn beats_move_to_nearby_burst() {
        let mut samples = vec![0.0f32; 44100];
        samples[22050..22050 + 256].fill(0.9);
        let Ok(signal) = Signal::new(samples, 22050) else {
            panic!("valid signal rejected");
        };
        let snapped = EnergyAligner::new(&config(0.03)).align(&[0.99, 1.02], &signal);
        for t in snapped {
            assert!((1.0..1.013).contains(&t), "beat at {t}");
        }
    }

    #[test]
    fn far_or_silent_beats_stay() {
        let mut samples = vec![0.0f32; 44100];
        samples[22050..22050 + 256].fill(0.9);
        let Ok(signal) = Signal::new(samples, 22050) else {
            panic!("valid signal rejected");
        };
        let beats = [0.2, 1.6];
        assert_eq!(EnergyAligner::new(&config(0.02)).align(&beats, &signal), beats);
        assert_eq!(EnergyAligner::new(&config(0.0)).align(&[1.01], &signal), vec![1.01]);
    }

    #[test]
    fn beats_past_the_end_are_clamped_to_last_block() {
        let Ok(signal) = Signal::new(vec![0.1f32; 1000], 22050) else {
            panic!("valid signal rejected");
        };
        let snapped = EnergyAligner::new(&config(0.02)).align(&[5.0], &signal);
        assert!(snapped[0] <= signal.duration_secs() + 0.01);
    }

    #[test]
    fn block_rms_handles_partial_tail() {
        let rms = block_rms(&[1.0; 130]);
        assert_eq!(rms.len(), 2);
        assert!(rms.iter().all(|&r| (r - 1.0).abs() < 1e-6));
    }
}
