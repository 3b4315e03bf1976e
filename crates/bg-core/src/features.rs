use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::envelope::OnsetEnvelope;
use crate::error::AnalysisError;

/// Names of the published features, in canonical publication order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureName {
    Envelope,
    Onsets,
    Tempo,
    Beats,
}

impl FeatureName {
    /// Publication order.
    pub const ALL: [Self; 4] = [Self::Envelope, Self::Onsets, Self::Tempo, Self::Beats];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Envelope => "envelope",
            Self::Onsets => "onsets",
            Self::Tempo => "tempo",
            Self::Beats => "beats",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureName {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AnalysisError::invalid(format!("unknown feature '{s}'")))
    }
}

/// One result sent from the analysis worker to the caller.
///
/// Payloads are immutable and cheap to clone.
#[derive(Clone, Debug, PartialEq)]
pub enum Publication {
    Envelope(Arc<OnsetEnvelope>),
    Onsets(Arc<[f64]>),
    Tempo(f32),
    Beats(Arc<[f64]>),
    /// Every stage finished.
    Completed,
    /// A stage failed; no further publications follow.
    Failed(AnalysisError),
    /// Cancellation was observed between stages.
    Cancelled,
}

impl Publication {
    /// Feature carried by this publication, if any.
    #[must_use]
    pub fn feature(&self) -> Option<FeatureName> {
        match self {
            Self::Envelope(_) => Some(FeatureName::Envelope),
            Self::Onsets(_) => Some(FeatureName::Onsets),
            Self::Tempo(_) => Some(FeatureName::Tempo),
            Self::Beats(_) => Some(FeatureName::Beats),
            Self::Completed | Self::Failed(_) | Self::Cancelled => None,
        }
    }
}

/// Borrowed view on a published feature.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeatureValue<'a> {
    Envelope(&'a OnsetEnvelope),
    Times(&'a [f64]),
    Bpm(f32),
}

/// Features of one analysis run, filled in as publications arrive.
///
/// Each entry is write-once: a second publication for an entry that is already
/// set is ignored.
///
/// # Example
/// ```
/// use bg_core::features::{FeatureName, FeatureSet, FeatureValue, Publication};
/// let mut set = FeatureSet::default();
/// assert!(set.apply(&Publication::Tempo(120.0)));
/// assert!(!set.apply(&Publication::Tempo(90.0)));
/// assert_eq!(set.get(FeatureName::Tempo), Some(FeatureValue::Bpm(120.0)));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureSet {
    envelope: Option<Arc<OnsetEnvelope>>,
    onsets: Option<Arc<[f64]>>,
    tempo: Option<f32>,
    beats: Option<Arc<[f64]>>,
}

impl FeatureSet {
    /// Record a publication. Returns `true` if an entry was newly set.
    pub fn apply(&mut self, publication: &Publication) -> bool {
        let fresh = match publication {
            Publication::Envelope(env) => set_once(&mut self.envelope, Arc::clone(env)),
            Publication::Onsets(times) => set_once(&mut self.onsets, Arc::clone(times)),
            Publication::Tempo(bpm) => set_once(&mut self.tempo, *bpm),
            Publication::Beats(times) => set_once(&mut self.beats, Arc::clone(times)),
            Publication::Completed | Publication::Failed(_) | Publication::Cancelled => false,
        };
        if !fresh && let Some(name) = publication.feature() {
            log::warn!("Feature '{name}' déjà publiée, republication ignorée");
        }
        fresh
    }

    /// Look an entry up by name.
    #[must_use]
    pub fn get(&self, name: FeatureName) -> Option<FeatureValue<'_>> {
        match name {
            FeatureName::Envelope => self.envelope.as_deref().map(FeatureValue::Envelope),
            FeatureName::Onsets => self.onsets.as_deref().map(FeatureValue::Times),
            FeatureName::Tempo => self.tempo.map(FeatureValue::Bpm),
            FeatureName::Beats => self.beats.as_deref().map(FeatureValue::Times),
        }
    }

    #[must_use]
    pub fn contains(&self, name: FeatureName) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn envelope(&self) -> Option<&OnsetEnvelope> {
        self.envelope.as_deref()
    }

    #[must_use]
    pub fn onsets(&self) -> Option<&[f64]> {
        self.onsets.as_deref()
    }

    /// Tempo in BPM.
    #[must_use]
    pub fn tempo(&self) -> Option<f32> {
        self.tempo
    }

    #[must_use]
    pub fn beats(&self) -> Option<&[f64]> {
        self.beats.as_deref()
    }

    /// Owned snapshot suitable for serialization.
    #[must_use]
    pub fn report(&self) -> FeatureReport {
        FeatureReport {
            tempo: self.tempo,
            onsets: self.onsets.as_deref().map(<[f64]>::to_vec),
            beats: self.beats.as_deref().map(<[f64]>::to_vec),
            envelope_frames: self.envelope.as_ref().map(|e| e.len()),
            envelope_frame_rate: self.envelope.as_ref().map(|e| e.frame_rate),
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

/// Serializable summary of a [`FeatureSet`].
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FeatureReport {
    pub tempo: Option<f32>,
    pub onsets: Option<Vec<f64>>,
    pub beats: Option<Vec<f64>>,
    pub envelope_frames: Option<usize>,
    pub envelope_frame_rate: Option<f32>,
}
