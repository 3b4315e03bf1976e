use bg_core::config::AnalysisConfig;
use bg_core::envelope::OnsetEnvelope;
use bg_core::error::AnalysisError;

use crate::fft::Taper;

/// Dynamic-programming beat tracker.
///
/// Given an onset envelope and a global tempo, picks the beat sequence that
/// maximizes onset strength at the beats while keeping consecutive beats close
/// to one period apart. The deviation penalty is `tightness × ln(Δ/period)²`.
///
/// Weak beats at either end of the sequence are trimmed.
///
/// # Example
/// ```
/// use bg_audio::beat::BeatTracker;
/// use bg_core::{AnalysisConfig, OnsetEnvelope};
///
/// let tracker = BeatTracker::new(&AnalysisConfig::default());
/// let silent = OnsetEnvelope::new(vec![0.0; 1000], 172.265625);
/// assert!(tracker.track(&silent, 120.0).unwrap().is_empty());
/// assert!(tracker.track(&silent, 0.0).is_err());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct BeatTracker {
    tightness: f32,
    first_cutoff: f32,
    trim_width: usize,
}

impl BeatTracker {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            tightness: config.beat_tightness,
            first_cutoff: config.beat_first_cutoff,
            trim_width: config.beat_trim_width,
        }
    }

    /// Beat timestamps in seconds, strictly increasing.
    ///
    /// # Errors
    /// [`AnalysisError::InvalidInput`] if `bpm` or the frame rate is not
    /// positive, or if the beat period rounds to zero frames.
    pub fn track(&self, envelope: &OnsetEnvelope, bpm: f32) -> Result<Vec<f64>, AnalysisError> {
        let frames = self.track_frames(envelope, bpm)?;
        log::debug!("{} temps placés @ {bpm:.2} BPM", frames.len());
        // Flux frame k describes the change ending at frame k.
        Ok(frames
            .into_iter()
            .map(|i| envelope.frame_time(i.saturating_sub(1)))
            .collect())
    }

    /// Beat frame indices, strictly increasing.
    ///
    /// # Errors
    /// See [`BeatTracker::track`].
    pub fn track_frames(
        &self,
        envelope: &OnsetEnvelope,
        bpm: f32,
    ) -> Result<Vec<usize>, AnalysisError> {
        let frame_rate = envelope.frame_rate;
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(AnalysisError::invalid(format!(
                "beat: tempo {bpm} BPM must be positive"
            )));
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(AnalysisError::invalid("beat: frame rate must be positive"));
        }
        let period = (60.0 * f64::from(frame_rate) / f64::from(bpm)).round() as usize;
        if period == 0 {
            return Err(AnalysisError::invalid(format!(
                "beat: tempo {bpm} BPM too fast for {frame_rate} fps"
            )));
        }

        if (envelope.len() as f32) < frame_rate {
            log::debug!("Enveloppe trop courte ({} trames), aucun temps", envelope.len());
            return Ok(Vec::new());
        }

        let local = local_score(&envelope.values, period);
        let peak = local.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if peak.is_nan() || peak <= 0.0 {
            return Ok(Vec::new());
        }

        let (cumulative, backlink) = self.accumulate(&local, period, peak);
        let Some(last) = last_beat(&cumulative) else {
            return Ok(Vec::new());
        };

        let mut beats = vec![last];
        let mut cursor = last;
        while let Some(prev) = backlink[cursor] {
            beats.push(prev);
            cursor = prev;
        }
        beats.reverse();

        Ok(self.trim(&local, beats))
    }

    /// Cumulative score and best predecessor of every frame.
    ///
    /// Predecessors lie `round(period / 2)` to `2 × period` frames back. Those
    /// before the start score zero and end the chain. Until the first frame
    /// whose local score reaches `first_cutoff × peak`, every frame starts a
    /// chain.
    fn accumulate(
        &self,
        local: &[f64],
        period: usize,
        peak: f64,
    ) -> (Vec<f64>, Vec<Option<usize>>) {
        let p = period as isize;
        let nearest = ((period as f64 / 2.0).round() as isize).max(1);
        let offsets: Vec<isize> = (-2 * p..=-nearest).collect();
        let tightness = f64::from(self.tightness);
        let penalty: Vec<f64> = offsets
            .iter()
            .map(|&d| {
                let r = (-d as f64 / period as f64).ln();
                -tightness * r * r
            })
            .collect();
        let cutoff = f64::from(self.first_cutoff) * peak;

        let mut cumulative = vec![0.0f64; local.len()];
        let mut backlink = vec![None; local.len()];
        let mut searching_first = true;

        for (i, &score) in local.iter().enumerate() {
            let mut best: (Option<usize>, f64) = (None, f64::NEG_INFINITY);
            for (&d, &w) in offsets.iter().zip(&penalty) {
                let j = i as isize + d;
                let (pred, prior) = if j >= 0 {
                    (Some(j as usize), cumulative[j as usize])
                } else {
                    (None, 0.0)
                };
                if w + prior > best.1 {
                    best = (pred, w + prior);
                }
            }
            cumulative[i] = score + best.1;

            if searching_first && score < cutoff {
                backlink[i] = None;
            } else {
                backlink[i] = best.0;
                searching_first = false;
            }
        }

        (cumulative, backlink)
    }

    /// Drop weak beats at both ends: keep the span whose Hann-smoothed local
    /// score exceeds half its RMS.
    fn trim(&self, local: &[f64], beats: Vec<usize>) -> Vec<usize> {
        if beats.is_empty() {
            return beats;
        }
        let strengths: Vec<f64> = beats.iter().map(|&b| local[b]).collect();
        let window: Vec<f64> = Taper::Hann
            .coefficients(self.trim_width.max(1))
            .into_iter()
            .map(f64::from)
            .collect();
        let smooth = convolve_same(&strengths, &window);
        let rms = (smooth.iter().map(|v| v * v).sum::<f64>() / smooth.len() as f64).sqrt();
        let threshold = 0.5 * rms;

        match (
            smooth.iter().position(|&v| v > threshold),
            smooth.iter().rposition(|&v| v > threshold),
        ) {
            (Some(first), Some(last)) => beats[first..=last].to_vec(),
            _ => Vec::new(),
        }
    }
}

/// Envelope scaled by its sample standard deviation, then smoothed with a
/// Gaussian spanning one period either side.
fn local_score(values: &[f32], period: usize) -> Vec<f64> {
    let n = values.len();
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n.max(1) as f64;
    let std = if n > 1 {
        let var = values
            .iter()
            .map(|&v| (f64::from(v) - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    let scale = if std > 0.0 { 1.0 / std } else { 1.0 };
    let scaled: Vec<f64> = values.iter().map(|&v| f64::from(v) * scale).collect();

    let p = period as isize;
    let kernel: Vec<f64> = (-p..=p)
        .map(|j| {
            let x = j as f64 * 32.0 / period as f64;
            (-0.5 * x * x).exp()
        })
        .collect();
    convolve_same(&scaled, &kernel)
}

/// Last local maximum of the cumulative score above half the median of all
/// local maxima. Edges compare against themselves.
fn last_beat(cumulative: &[f64]) -> Option<usize> {
    let n = cumulative.len();
    if n == 0 {
        return None;
    }
    let is_max = |i: usize| {
        let left = cumulative[i.saturating_sub(1)];
        let right = cumulative[(i + 1).min(n - 1)];
        cumulative[i] >= left && cumulative[i] >= right
    };

    let mut maxima: Vec<f64> = (0..n).filter(|&i| is_max(i)).map(|i| cumulative[i]).collect();
    let median = median(&mut maxima)?;
    (0..n).rev().find(|&i| is_max(i) && 2.0 * cumulative[i] > median)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    })
}

/// Convolution trimmed to the input length, kernel centred on each sample.
fn convolve_same(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    let half = (kernel.len().saturating_sub(1) / 2) as isize;
    let len = x.len() as isize;
    (0..len)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(t, &k)| {
                    let idx = i + half - t as isize;
                    (0..len).contains(&idx).then(|| k * x[idx as usize])
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPS: f32 = 22050.0 / 128.0;

    fn tracker() -> BeatTracker {
        BeatTracker::new(&AnalysisConfig::default())
    }

    /// Gaussian pulses (σ = 2 frames) every `spacing` seconds from `offset`.
    fn pulse_train(offset: f32, spacing: f32, duration: f32) -> OnsetEnvelope {
        let frames = (duration * FPS) as usize;
        let mut values = vec![0.0f32; frames];
        let mut centre = offset * FPS;
        while centre < frames as f32 {
            for (i, v) in values.iter_mut().enumerate() {
                let d = (i as f32 - centre) / 2.0;
                *v += (-0.5 * d * d).exp();
            }
            centre += spacing * FPS;
        }
        OnsetEnvelope::normalized(values, FPS)
    }

    #[test]
    fn regular_pulses_give_regular_beats() {
        let env = pulse_train(0.25, 0.5, 20.0);
        let Ok(beats) = tracker().track(&env, 120.0) else {
            panic!("tracking failed");
        };
        assert!(beats.len() > 30, "only {} beats", beats.len());

        let spacings: Vec<f64> = beats.windows(2).map(|w| w[1] - w[0]).collect();
        let regular = spacings.iter().filter(|&&s| (s - 0.5).abs() <= 0.05).count();
        assert!(
            regular * 10 >= spacings.len() * 9,
            "{regular}/{} regular spacings",
            spacings.len()
        );
    }

    #[test]
    fn beats_land_on_pulses() {
        let env = pulse_train(0.25, 0.5, 20.0);
        let Ok(beats) = tracker().track(&env, 120.0) else {
            panic!("tracking failed");
        };
        for t in beats {
            let phase = (t - 0.25).rem_euclid(0.5);
            let distance = phase.min(0.5 - phase);
            assert!(distance < 0.03, "beat at {t} is {distance} s off");
        }
    }

    #[test]
    fn beats_are_strictly_increasing_and_bounded() {
        let env = pulse_train(0.1, 0.47, 15.0);
        let Ok(beats) = tracker().track(&env, 128.0) else {
            panic!("tracking failed");
        };
        assert!(!beats.is_empty());
        assert!(beats.windows(2).all(|w| w[0] < w[1]));
        assert!(beats.iter().all(|&t| t >= 0.0 && t <= env.duration_secs()));
    }

    #[test]
    fn short_or_silent_envelopes_give_no_beats() {
        let short = pulse_train(0.1, 0.5, 0.9);
        assert_eq!(tracker().track(&short, 120.0), Ok(Vec::new()));

        let silent = OnsetEnvelope::new(vec![0.0; 2000], FPS);
        assert_eq!(tracker().track(&silent, 120.0), Ok(Vec::new()));
    }

    #[test]
    fn invalid_tempo_is_rejected() {
        let env = pulse_train(0.25, 0.5, 5.0);
        for bpm in [0.0, -120.0, f32::NAN] {
            assert!(matches!(
                tracker().track(&env, bpm),
                Err(AnalysisError::InvalidInput(_))
            ));
        }
        // Period rounds to zero frames.
        assert!(matches!(
            tracker().track(&env, 1.0e6),
            Err(AnalysisError::InvalidInput(_))
        ));
    }

    #[test]
    fn helpers() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);

        let out = convolve_same(&[0.0, 0.0, 1.0, 0.0, 0.0], &[0.0, 0.5, 1.0, 0.5, 0.0]);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 0.5, 0.0]);

        assert_eq!(last_beat(&[1.0, 2.0, 3.0, 2.0, 4.0]), Some(4));
    }
}
