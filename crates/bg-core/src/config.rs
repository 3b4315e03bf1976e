use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Full set of analysis parameters.
///
/// Serializable to TOML. Every field has a sane default, and the empirical
/// constants (thresholds, windows, tracking tightness) stay tunable.
///
/// # Example
/// ```
/// use bg_core::config::AnalysisConfig;
/// let config = AnalysisConfig::default();
/// assert_eq!(config.canonical_rate, 22050);
/// assert_eq!(config.hop_size(), 128);
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AnalysisConfig {
    // === Prétraitement ===
    /// Analysis rate the preprocessor decimates towards (Hz).
    pub canonical_rate: u32,
    /// Taps of the half-band decimation kernel (odd).
    pub decimation_taps: usize,

    // === Enveloppe d'onset ===
    /// FFT frame size (power of two).
    pub window_size: usize,
    /// Overlap factor; two interleaved streams halve the hop again.
    pub overlap_factor: usize,

    // === Détection d'onsets ===
    /// A peak must reach this multiple of the trailing average.
    pub onset_threshold: f32,
    /// Trailing average span in seconds (one 8 Hz beat, +10 %).
    pub onset_average_secs: f32,
    /// Moving-maximum span in seconds.
    pub onset_peak_secs: f32,

    // === Tempo ===
    /// Hop of the coarse, non-overlapping tempo envelope.
    pub tempo_hop: usize,
    /// Autocorrelation window in seconds.
    pub tempo_window_secs: f32,
    /// Centre of the log-normal tempo prior (BPM).
    pub tempo_prior_bpm: f32,
    /// Standard deviation of the prior, in octaves.
    pub tempo_prior_octaves: f32,

    // === Suivi de beats ===
    /// Weight of the log-gaussian transition cost.
    pub beat_tightness: f32,
    /// Fraction of the peak local score below which no beat is anchored.
    pub beat_first_cutoff: f32,
    /// Width of the Hann window used to trim weak leading/trailing beats.
    pub beat_trim_width: usize,
    /// Snap each beat to the nearest local energy peak of the signal.
    pub snap_to_energy: bool,
    /// Search radius of the energy snap, in seconds.
    pub snap_radius_secs: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            canonical_rate: 22050,
            decimation_taps: 31,
            window_size: 1024,
            overlap_factor: 4,
            onset_threshold: 1.5,
            onset_average_secs: 1.1 / 8.0,
            onset_peak_secs: 0.025,
            tempo_hop: 512,
            tempo_window_secs: 8.0,
            tempo_prior_bpm: 120.0,
            tempo_prior_octaves: 1.0,
            beat_tightness: 100.0,
            beat_first_cutoff: 0.01,
            beat_trim_width: 5,
            snap_to_energy: false,
            snap_radius_secs: 0.02,
        }
    }
}

impl AnalysisConfig {
    /// Stride between onset-envelope frames: `window / overlap / 2`.
    #[must_use]
    pub fn hop_size(&self) -> usize {
        (self.window_size / self.overlap_factor.max(1) / 2).max(1)
    }

    /// Distance in frames between the two spectra compared by the flux.
    #[must_use]
    pub fn flux_lag(&self) -> usize {
        self.overlap_factor.saturating_sub(1).max(1)
    }

    /// Force every value into its valid range.
    pub fn clamp_all(&mut self) {
        self.canonical_rate = self.canonical_rate.clamp(4000, 192_000);
        self.decimation_taps = self.decimation_taps.clamp(3, 255) | 1;
        self.window_size = self.window_size.clamp(64, 16384).next_power_of_two();
        self.overlap_factor = self.overlap_factor.clamp(1, 16);
        self.onset_threshold = self.onset_threshold.clamp(1.0, 10.0);
        self.onset_average_secs = self.onset_average_secs.clamp(0.01, 2.0);
        self.onset_peak_secs = self.onset_peak_secs.clamp(0.001, 0.5);
        self.tempo_hop = self.tempo_hop.clamp(64, 8192);
        self.tempo_window_secs = self.tempo_window_secs.clamp(2.0, 60.0);
        self.tempo_prior_bpm = self.tempo_prior_bpm.clamp(20.0, 400.0);
        self.tempo_prior_octaves = self.tempo_prior_octaves.clamp(0.1, 4.0);
        self.beat_tightness = self.beat_tightness.clamp(0.0, 10_000.0);
        self.beat_first_cutoff = self.beat_first_cutoff.clamp(0.0, 1.0);
        self.beat_trim_width = self.beat_trim_width.clamp(1, 63) | 1;
        self.snap_radius_secs = self.snap_radius_secs.clamp(0.0, 0.25);
    }
}

/// Intermediate TOML layout; every section is optional.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    preprocess: Option<PreprocessSection>,
    onset: Option<OnsetSection>,
    tempo: Option<TempoSection>,
    beat: Option<BeatSection>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PreprocessSection {
    canonical_rate: Option<u32>,
    decimation_taps: Option<usize>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OnsetSection {
    window_size: Option<usize>,
    overlap_factor: Option<usize>,
    threshold: Option<f32>,
    average_secs: Option<f32>,
    peak_secs: Option<f32>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TempoSection {
    hop: Option<usize>,
    window_secs: Option<f32>,
    prior_bpm: Option<f32>,
    prior_octaves: Option<f32>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BeatSection {
    tightness: Option<f32>,
    first_cutoff: Option<f32>,
    trim_width: Option<usize>,
    snap_to_energy: Option<bool>,
    snap_radius_secs: Option<f32>,
}

macro_rules! merge {
    ($section:expr, $config:expr, { $($src:ident => $dst:ident),* $(,)? }) => {
        $(
            if let Some(v) = $section.$src {
                $config.$dst = v;
            }
        )*
    };
}

/// Parse TOML text and merge it over the defaults.
///
/// # Errors
/// Returns [`AnalysisError::Config`] if the text is not valid TOML for this schema.
///
/// # Example
/// ```
/// use bg_core::config::parse_config;
/// let config = parse_config("[beat]\ntightness = 400.0\n").unwrap();
/// assert_eq!(config.beat_tightness, 400.0);
/// assert_eq!(config.window_size, 1024);
/// ```
pub fn parse_config(text: &str) -> Result<AnalysisConfig, AnalysisError> {
    let file: ConfigFile =
        toml::from_str(text).map_err(|e| AnalysisError::Config(format!("TOML : {e}")))?;

    let mut config = AnalysisConfig::default();

    if let Some(s) = file.preprocess {
        merge!(s, config, {
            canonical_rate => canonical_rate,
            decimation_taps => decimation_taps,
        });
    }
    if let Some(s) = file.onset {
        merge!(s, config, {
            window_size => window_size,
            overlap_factor => overlap_factor,
            threshold => onset_threshold,
            average_secs => onset_average_secs,
            peak_secs => onset_peak_secs,
        });
    }
    if let Some(s) = file.tempo {
        merge!(s, config, {
            hop => tempo_hop,
            window_secs => tempo_window_secs,
            prior_bpm => tempo_prior_bpm,
            prior_octaves => tempo_prior_octaves,
        });
    }
    if let Some(s) = file.beat {
        merge!(s, config, {
            tightness => beat_tightness,
            first_cutoff => beat_first_cutoff,
            trim_width => beat_trim_width,
            snap_to_energy => snap_to_energy,
            snap_radius_secs => snap_radius_secs,
        });
    }

    config.clamp_all();
    Ok(config)
}

/// Load a TOML file and merge it over the defaults.
///
/// # Errors
/// Returns [`AnalysisError::Config`] if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use bg_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<AnalysisConfig, AnalysisError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AnalysisError::Config(format!("Impossible de lire {} : {e}", path.display())))?;
    let config = parse_config(&text)?;
    log::info!("Configuration chargée depuis {}", path.display());
    Ok(config)
}
