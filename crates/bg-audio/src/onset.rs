use bg_core::config::AnalysisConfig;
use bg_core::envelope::OnsetEnvelope;

/// Peak picker turning an onset envelope into onset timestamps.
///
/// A frame is an onset when it is positive, equals the moving maximum around
/// it, and reaches `threshold` times the trailing moving average. The average
/// spans one fastest plausible beat (8 Hz, +10 %); the maximum spans about
/// 25 ms, the threshold of interval perception.
///
/// The trailing average divides the running sum by the full window width, so
/// the first frames of an envelope are compared with a partially filled
/// window and an early attack is kept. A flat envelope, zero or not, has no
/// attack and never yields onsets.
///
/// # Example
/// ```
/// use bg_audio::onset::OnsetPicker;
/// use bg_core::{AnalysisConfig, OnsetEnvelope};
///
/// let mut values = vec![0.0f32; 400];
/// values[100] = 1.0;
/// values[300] = 0.8;
/// let env = OnsetEnvelope::new(values, 172.265625);
/// let onsets = OnsetPicker::new(&AnalysisConfig::default()).pick(&env);
/// assert_eq!(onsets.len(), 2);
/// assert!((onsets[0] - 100.0 / 172.265625).abs() < 1e-9);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct OnsetPicker {
    threshold: f32,
    average_secs: f32,
    peak_secs: f32,
}

impl OnsetPicker {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            threshold: config.onset_threshold,
            average_secs: config.onset_average_secs,
            peak_secs: config.onset_peak_secs,
        }
    }

    /// Qualifying frame indices, ascending and unique.
    #[must_use]
    pub fn pick_frames(&self, envelope: &OnsetEnvelope) -> Vec<usize> {
        let values = &envelope.values;
        if values.is_empty() || envelope.frame_rate <= 0.0 {
            return Vec::new();
        }
        let (lo, hi) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if hi - lo <= 0.0 {
            return Vec::new();
        }
        let avg_width = ((envelope.frame_rate * self.average_secs) as usize).max(1);
        let max_width = ((envelope.frame_rate * self.peak_secs) as usize).max(1);

        let average = trailing_average(values, avg_width);
        let maximum = moving_maximum(values, max_width);

        values
            .iter()
            .zip(average.iter().zip(&maximum))
            .enumerate()
            .filter(|&(_, (&v, (&avg, &max)))| {
                v > 0.0 && v >= max && v >= self.threshold * avg
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Onset timestamps in seconds.
    #[must_use]
    pub fn pick(&self, envelope: &OnsetEnvelope) -> Vec<f64> {
        let frames = self.pick_frames(envelope);
        log::debug!("{} onsets détectés", frames.len());
        frames.into_iter().map(|i| envelope.frame_time(i)).collect()
    }
}

/// Sum of the `width` frames ending at each index (current frame included),
/// divided by `width`. Frames before the start count as zero.
fn trailing_average(values: &[f32], width: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0f64;
    for (i, &v) in values.iter().enumerate() {
        sum += f64::from(v);
        if i >= width {
            sum -= f64::from(values[i - width]);
        }
        out.push((sum / width as f64) as f32);
    }
    out
}

/// Maximum over a `width`-frame window starting `width / 2` frames back,
/// shifted right at the start and clipped at the end.
fn moving_maximum(values: &[f32], width: usize) -> Vec<f32> {
    let half = width / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let stop = (start + width).min(values.len());
            values[start..stop]
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .collect()
}
