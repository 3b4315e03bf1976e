use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AnalysisError;

static NEXT_CLIP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique clip identifier, shared by its clones.
///
/// Keys the coordinator's single-flight check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClipId(u64);

impl ClipId {
    fn next() -> Self {
        Self(NEXT_CLIP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Decoded audio as handed over by the caller: interleaved `f32` frames.
///
/// Immutable once built; clones share the same buffer and the same [`ClipId`].
///
/// # Example
/// ```
/// use bg_core::signal::AudioClip;
/// let clip = AudioClip::new(vec![0.0; 8], 2, 44100).unwrap();
/// assert_eq!(clip.frames(), 4);
/// assert!(AudioClip::new(vec![0.0; 3], 2, 44100).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct AudioClip {
    id: ClipId,
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
}

impl AudioClip {
    /// Validate and wrap an interleaved buffer.
    ///
    /// # Errors
    /// Returns [`AnalysisError::InvalidInput`] if `sample_rate` or `channels` is zero,
    /// or if the buffer length is not a multiple of `channels`.
    pub fn new(
        samples: impl Into<Arc<[f32]>>,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, AnalysisError> {
        if sample_rate == 0 {
            return Err(AnalysisError::invalid("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(AnalysisError::invalid("channel count must be positive"));
        }
        let samples = samples.into();
        if samples.len() % channels != 0 {
            return Err(AnalysisError::invalid(format!(
                "{} samples cannot be split into {channels} interleaved channels",
                samples.len()
            )));
        }
        Ok(Self {
            id: ClipId::next(),
            samples,
            channels,
            sample_rate,
        })
    }

    /// Mono convenience constructor.
    ///
    /// # Errors
    /// Returns [`AnalysisError::InvalidInput`] if `sample_rate` is zero.
    pub fn mono(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Result<Self, AnalysisError> {
        Self::new(samples, 1, sample_rate)
    }

    #[must_use]
    pub fn id(&self) -> ClipId {
        self.id
    }

    /// Interleaved samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel).
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Single-channel signal at the analysis rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Signal {
    /// Wrap mono samples.
    ///
    /// # Errors
    /// Returns [`AnalysisError::InvalidInput`] if `sample_rate` is zero.
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Result<Self, AnalysisError> {
        if sample_rate == 0 {
            return Err(AnalysisError::invalid("sample rate must be positive"));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_rejects_invalid_layouts() {
        assert!(matches!(
            AudioClip::new(vec![0.0; 4], 2, 0),
            Err(AnalysisError::InvalidInput(_))
        ));
        assert!(matches!(
            AudioClip::new(vec![0.0; 4], 0, 44100),
            Err(AnalysisError::InvalidInput(_))
        ));
        assert!(matches!(
            AudioClip::new(vec![0.0; 5], 2, 44100),
            Err(AnalysisError::InvalidInput(_))
        ));
    }

    #[test]
    fn clones_share_identity() {
        let Ok(a) = AudioClip::mono(vec![0.0; 10], 22050) else {
            panic!("valid clip rejected");
        };
        let Ok(b) = AudioClip::mono(vec![0.0; 10], 22050) else {
            panic!("valid clip rejected");
        };
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn empty_clip_is_valid() {
        let Ok(clip) = AudioClip::new(Vec::<f32>::new(), 2, 48000) else {
            panic!("empty clip rejected");
        };
        assert_eq!(clip.frames(), 0);
        assert!(clip.duration_secs().abs() < f64::EPSILON);
    }
}
