//! Pipeline coordinator: runs the stages off the caller's thread and streams
//! each result back as a [`Publication`].
//!
//! The worker owns nothing of the caller's. It sends immutable publications
//! through a `flume` channel; the caller drains them into its own
//! [`FeatureSet`] with [`AnalysisHandle::poll`] (event loops) or
//! [`AnalysisHandle::wait`] (blocking).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use bg_core::config::AnalysisConfig;
use bg_core::error::AnalysisError;
use bg_core::features::{FeatureSet, Publication};
use bg_core::signal::{AudioClip, ClipId};
use bg_core::traits::{LogObserver, Stage, StageObserver, instrument};

use crate::align::EnergyAligner;
use crate::beat::BeatTracker;
use crate::flux::SpectralFlux;
use crate::onset::OnsetPicker;
use crate::preprocess::preprocess;
use crate::tempo::TempoEstimator;

type InFlight = Arc<Mutex<HashSet<ClipId>>>;

/// Launches analysis runs, at most one per clip at a time.
///
/// # Example
/// ```no_run
/// use bg_audio::coordinator::Coordinator;
/// use bg_core::{AnalysisConfig, AudioClip};
///
/// let clip = AudioClip::mono(vec![0.0; 22050 * 10], 22050).unwrap();
/// let coordinator = Coordinator::new(AnalysisConfig::default());
/// let mut handle = coordinator.evaluate(&clip).unwrap();
/// let features = handle.wait().unwrap();
/// println!("{:?}", features.tempo());
/// ```
pub struct Coordinator {
    config: Arc<AnalysisConfig>,
    observer: Arc<dyn StageObserver>,
    in_flight: InFlight,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

impl Coordinator {
    /// Build a coordinator; the configuration is clamped to safe ranges.
    #[must_use]
    pub fn new(mut config: AnalysisConfig) -> Self {
        config.clamp_all();
        Self {
            config: Arc::new(config),
            observer: Arc::new(LogObserver),
            in_flight: Arc::default(),
        }
    }

    /// Replace the default logging observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Start analysing `clip` on a background worker.
    ///
    /// # Errors
    /// [`AnalysisError::AlreadyRunning`] if a run for the same clip is still in
    /// flight, [`AnalysisError::WorkerLost`] if the worker cannot be spawned.
    pub fn evaluate(&self, clip: &AudioClip) -> Result<AnalysisHandle, AnalysisError> {
        let slot = SlotGuard::claim(&self.in_flight, clip.id())?;
        let (tx, rx) = flume::unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let job = Job {
            clip: clip.clone(),
            config: Arc::clone(&self.config),
            observer: Arc::clone(&self.observer),
            cancel: Arc::clone(&cancel),
        };

        thread::Builder::new()
            .name("bg-analysis".to_string())
            .spawn(move || {
                let terminal = job.run(&mut |publication| tx.send(publication).is_ok());
                // Libéré avant la publication terminale : un appelant qui vient
                // de recevoir `Completed` peut relancer immédiatement.
                drop(slot);
                let _ = tx.send(terminal);
            })
            .map_err(|e| {
                log::error!("Impossible de lancer le thread d'analyse : {e}");
                AnalysisError::WorkerLost
            })?;

        log::info!(
            "Analyse lancée : {} trames @ {} Hz, {} canal(aux)",
            clip.frames(),
            clip.sample_rate(),
            clip.channels()
        );

        Ok(AnalysisHandle {
            clip: clip.id(),
            rx,
            cancel,
            features: FeatureSet::default(),
            status: RunStatus::Running,
        })
    }
}

/// Run the whole pipeline on the calling thread.
///
/// # Errors
/// The first stage error, as [`Coordinator::evaluate`] would report it.
///
/// # Example
/// ```
/// use bg_audio::coordinator::analyze;
/// use bg_core::{AnalysisConfig, AnalysisError, AudioClip};
///
/// let clip = AudioClip::mono(Vec::<f32>::new(), 22050).unwrap();
/// let err = analyze(&clip, &AnalysisConfig::default()).unwrap_err();
/// assert!(matches!(err, AnalysisError::InvalidInput(_)));
/// ```
pub fn analyze(clip: &AudioClip, config: &AnalysisConfig) -> Result<FeatureSet, AnalysisError> {
    let mut config = config.clone();
    config.clamp_all();
    let job = Job {
        clip: clip.clone(),
        config: Arc::new(config),
        observer: Arc::new(LogObserver),
        cancel: Arc::new(AtomicBool::new(false)),
    };
    let mut features = FeatureSet::default();
    let terminal = job.run(&mut |publication| {
        features.apply(&publication);
        true
    });
    match terminal {
        Publication::Failed(e) => Err(e),
        Publication::Cancelled => Err(AnalysisError::Cancelled),
        _ => Ok(features),
    }
}

/// State of a run as seen by its handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed(AnalysisError),
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Caller-side end of one analysis run.
///
/// Dropping the handle lets the worker stop at its next publication.
pub struct AnalysisHandle {
    clip: ClipId,
    rx: flume::Receiver<Publication>,
    cancel: Arc<AtomicBool>,
    features: FeatureSet,
    status: RunStatus,
}

impl AnalysisHandle {
    #[must_use]
    pub fn clip_id(&self) -> ClipId {
        self.clip
    }

    /// Features received so far.
    #[must_use]
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    #[must_use]
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Ask the worker to stop before its next stage.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Drain pending publications without blocking.
    pub fn poll(&mut self) -> Vec<Publication> {
        let mut drained = Vec::new();
        while !self.status.is_finished() {
            let publication = match self.rx.try_recv() {
                Ok(p) => p,
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => worker_lost(),
            };
            self.absorb(&publication);
            drained.push(publication);
        }
        drained
    }

    /// Block for the next publication; `None` once the run is over.
    pub fn recv(&mut self) -> Option<Publication> {
        if self.status.is_finished() {
            return None;
        }
        let publication = self.rx.recv().unwrap_or_else(|_| worker_lost());
        self.absorb(&publication);
        Some(publication)
    }

    /// Block until the run ends.
    ///
    /// # Errors
    /// The failure that ended the run, [`AnalysisError::Cancelled`], or
    /// [`AnalysisError::WorkerLost`] if the worker died.
    pub fn wait(&mut self) -> Result<&FeatureSet, AnalysisError> {
        while self.recv().is_some() {}
        match &self.status {
            RunStatus::Completed => Ok(&self.features),
            RunStatus::Failed(e) => Err(e.clone()),
            RunStatus::Cancelled => Err(AnalysisError::Cancelled),
            RunStatus::Running => Err(AnalysisError::WorkerLost),
        }
    }

    fn absorb(&mut self, publication: &Publication) {
        self.features.apply(publication);
        match publication {
            Publication::Completed => self.status = RunStatus::Completed,
            Publication::Failed(e) => self.status = RunStatus::Failed(e.clone()),
            Publication::Cancelled => self.status = RunStatus::Cancelled,
            _ => {}
        }
    }
}

fn worker_lost() -> Publication {
    log::error!("Thread d'analyse perdu sans publication terminale");
    Publication::Failed(AnalysisError::WorkerLost)
}

/// Single-flight slot, released on drop (panics included).
struct SlotGuard {
    in_flight: InFlight,
    id: ClipId,
}

impl SlotGuard {
    fn claim(in_flight: &InFlight, id: ClipId) -> Result<Self, AnalysisError> {
        let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id) {
            log::warn!("Analyse refusée : clip {id:?} déjà en cours");
            return Err(AnalysisError::AlreadyRunning);
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            id,
        })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Everything one run needs, moved onto the worker.
struct Job {
    clip: AudioClip,
    config: Arc<AnalysisConfig>,
    observer: Arc<dyn StageObserver>,
    cancel: Arc<AtomicBool>,
}

impl Job {
    /// Run every stage, handing results to `publish` (which returns `false`
    /// once nobody listens). Returns the terminal publication.
    fn run(&self, publish: &mut dyn FnMut(Publication) -> bool) -> Publication {
        match self.stages(publish) {
            Ok(()) => {
                log::info!("Analyse terminée");
                Publication::Completed
            }
            Err(AnalysisError::Cancelled) => {
                log::info!("Analyse annulée");
                Publication::Cancelled
            }
            Err(e) => {
                log::warn!("Analyse échouée : {e}");
                Publication::Failed(e)
            }
        }
    }

    fn stages(&self, publish: &mut dyn FnMut(Publication) -> bool) -> Result<(), AnalysisError> {
        let config = self.config.as_ref();
        let observer = self.observer.as_ref();
        let duration = self.clip.duration_secs();
        let mut emit = |publication| {
            if publish(publication) {
                Ok(())
            } else {
                Err(AnalysisError::Cancelled)
            }
        };

        let signal = instrument(observer, Stage::Preprocess, || preprocess(&self.clip, config))?;
        self.checkpoint()?;

        let envelope = Arc::new(instrument(observer, Stage::Envelope, || {
            SpectralFlux::new(config).envelope(&signal)
        }));
        emit(Publication::Envelope(Arc::clone(&envelope)))?;
        self.checkpoint()?;

        let onsets = instrument(observer, Stage::Onsets, || {
            OnsetPicker::new(config).pick(&envelope)
        });
        emit(Publication::Onsets(finalize_times(onsets, duration).into()))?;
        self.checkpoint()?;

        let bpm = instrument(observer, Stage::Tempo, || {
            TempoEstimator::new(config).estimate(&signal)
        })?;
        emit(Publication::Tempo(bpm))?;
        self.checkpoint()?;

        let mut beats = instrument(observer, Stage::Beats, || {
            BeatTracker::new(config).track(&envelope, bpm)
        })?;
        log_tempo_cross_check(bpm, &beats);

        if config.snap_to_energy {
            self.checkpoint()?;
            beats = instrument(observer, Stage::EnergyAlign, || {
                EnergyAligner::new(config).align(&beats, &signal)
            });
        }
        emit(Publication::Beats(finalize_times(beats, duration).into()))?;

        Ok(())
    }

    fn checkpoint(&self) -> Result<(), AnalysisError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Clamp to `[0, duration]`, sort, and drop duplicates.
fn finalize_times(mut times: Vec<f64>, duration: f64) -> Vec<f64> {
    for t in &mut times {
        *t = t.clamp(0.0, duration.max(0.0));
    }
    times.sort_by(f64::total_cmp);
    times.dedup();
    times
}

/// Compare the autocorrelation tempo with the mean inter-beat interval.
fn log_tempo_cross_check(bpm: f32, beats: &[f64]) {
    let (Some(first), Some(last)) = (beats.first(), beats.last()) else {
        return;
    };
    if beats.len() < 2 || last <= first {
        return;
    }
    let ioi_bpm = 60.0 * (beats.len() - 1) as f64 / (last - first);
    log::info!(
        "Tempo post-suivi : {ioi_bpm:.2} BPM (écart avec l'estimation : {:.2})",
        f64::from(bpm) - ioi_bpm
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bg_core::features::FeatureName;

    use super::*;

    /// Decaying 1 kHz clicks every `60 / bpm` seconds.
    fn click_clip(bpm: f32, secs: f32, rate: u32, channels: usize) -> AudioClip {
        let frames = (secs * rate as f32) as usize;
        let period = (60.0 / bpm * rate as f32) as usize;
        let mut mono = vec![0.0f32; frames];
        let mut start = rate as usize / 10;
        while start < frames {
            for i in 0..(rate as usize / 50) {
                if let Some(s) = mono.get_mut(start + i) {
                    let t = i as f32 / rate as f32;
                    *s = 0.8 * (2.0 * std::f32::consts::PI * 1000.0 * t).sin() * (-t * 150.0).exp();
                }
            }
            start += period;
        }
        let samples: Vec<f32> = mono
            .iter()
            .flat_map(|&s| std::iter::repeat_n(s, channels))
            .collect();
        let Ok(clip) = AudioClip::new(samples, channels, rate) else {
            panic!("valid clip rejected");
        };
        clip
    }

    /// Blocks the worker when the onset stage starts until released.
    struct Gate {
        reached: flume::Sender<()>,
        release: flume::Receiver<()>,
    }

    impl StageObserver for Gate {
        fn stage_started(&self, stage: Stage) {
            if stage == Stage::Onsets {
                let _ = self.reached.send(());
                let _ = self.release.recv_timeout(Duration::from_secs(30));
            }
        }

        fn stage_finished(&self, _stage: Stage, _elapsed: Duration) {}
    }

    fn gated() -> (Coordinator, flume::Receiver<()>, flume::Sender<()>) {
        let (reached_tx, reached_rx) = flume::unbounded();
        let (release_tx, release_rx) = flume::unbounded();
        let gate = Gate {
            reached: reached_tx,
            release: release_rx,
        };
        let coordinator = Coordinator::default().with_observer(Arc::new(gate));
        (coordinator, reached_rx, release_tx)
    }

    fn assert_ascending_within(times: &[f64], duration: f64) {
        assert!(times.windows(2).all(|w| w[0] < w[1]), "not ascending");
        assert!(times.iter().all(|&t| (0.0..=duration).contains(&t)), "out of range");
    }

    #[test]
    fn click_track_full_run() {
        let clip = click_clip(120.0, 20.0, 44100, 2);
        let coordinator = Coordinator::default();
        let Ok(mut handle) = coordinator.evaluate(&clip) else {
            panic!("evaluate rejected");
        };
        let Ok(features) = handle.wait() else {
            panic!("run failed");
        };

        let Some(bpm) = features.tempo() else {
            panic!("no tempo");
        };
        assert!(
            [60.0f32, 120.0, 240.0].iter().any(|t| (bpm - t).abs() <= 4.0),
            "tempo {bpm}"
        );

        let (Some(onsets), Some(beats)) = (features.onsets(), features.beats()) else {
            panic!("missing times");
        };
        assert!(onsets.len() >= 30, "{} onsets", onsets.len());
        assert!(beats.len() >= 20, "{} beats", beats.len());
        assert_ascending_within(onsets, clip.duration_secs());
        assert_ascending_within(beats, clip.duration_secs());
        assert_eq!(handle.status(), &RunStatus::Completed);
    }

    #[test]
    fn publications_follow_canonical_order() {
        let clip = click_clip(100.0, 12.0, 22050, 1);
        let Ok(mut handle) = Coordinator::default().evaluate(&clip) else {
            panic!("evaluate rejected");
        };
        let mut seen = Vec::new();
        let mut terminal = None;
        while let Some(publication) = handle.recv() {
            match publication.feature() {
                Some(name) => seen.push(name),
                None => terminal = Some(publication),
            }
        }
        assert_eq!(seen, FeatureName::ALL.to_vec());
        assert_eq!(terminal, Some(Publication::Completed));
        assert!(handle.recv().is_none());
    }

    #[test]
    fn repeated_runs_are_identical() {
        let clip = click_clip(128.0, 10.0, 22050, 1);
        let coordinator = Coordinator::default();
        let mut results = Vec::new();
        for _ in 0..2 {
            let Ok(mut handle) = coordinator.evaluate(&clip) else {
                panic!("evaluate rejected");
            };
            let Ok(features) = handle.wait() else {
                panic!("run failed");
            };
            results.push(features.clone());
        }
        assert_eq!(results[0], results[1]);

        let Ok(direct) = analyze(&clip, coordinator.config()) else {
            panic!("synchronous run failed");
        };
        assert_eq!(direct, results[0]);
    }

    #[test]
    fn empty_clip_fails_at_tempo() {
        let Ok(clip) = AudioClip::mono(Vec::<f32>::new(), 22050) else {
            panic!("empty clip rejected");
        };
        let Ok(mut handle) = Coordinator::default().evaluate(&clip) else {
            panic!("evaluate rejected");
        };
        assert!(matches!(handle.wait(), Err(AnalysisError::InvalidInput(_))));

        let features = handle.features();
        assert!(features.envelope().is_some_and(|env| env.is_empty()));
        assert_eq!(features.onsets(), Some(&[][..]));
        assert_eq!(features.tempo(), None);
        assert_eq!(features.beats(), None);
    }

    #[test]
    fn silent_clip_has_no_tempo() {
        let Ok(clip) = AudioClip::mono(vec![0.0f32; 22050 * 10], 22050) else {
            panic!("valid clip rejected");
        };
        let Ok(mut handle) = Coordinator::default().evaluate(&clip) else {
            panic!("evaluate rejected");
        };
        let Err(AnalysisError::InvalidInput(msg)) = handle.wait() else {
            panic!("silent clip produced a tempo");
        };
        assert!(msg.contains("no periodic energy"), "{msg}");

        let features = handle.features();
        assert!(features.envelope().is_some_and(|env| env.values.iter().all(|&v| v == 0.0)));
        assert_eq!(features.onsets(), Some(&[][..]));
        assert_eq!(features.tempo(), None);
        assert_eq!(features.beats(), None);
    }

    #[test]
    fn second_request_for_same_clip_is_rejected() {
        let (coordinator, reached, release) = gated();
        let clip = click_clip(120.0, 9.0, 22050, 1);

        let Ok(mut first) = coordinator.evaluate(&clip) else {
            panic!("first evaluate rejected");
        };
        assert!(reached.recv_timeout(Duration::from_secs(30)).is_ok());
        assert!(matches!(
            coordinator.evaluate(&clip),
            Err(AnalysisError::AlreadyRunning)
        ));

        // Another clip is independent.
        let other = click_clip(120.0, 9.0, 22050, 1);
        let Ok(mut second) = coordinator.evaluate(&other) else {
            panic!("independent clip rejected");
        };

        for _ in 0..3 {
            let _ = release.send(());
        }
        assert!(first.wait().is_ok());
        assert!(second.wait().is_ok());

        // Slot released once the run is over.
        let Ok(mut again) = coordinator.evaluate(&clip) else {
            panic!("slot not released");
        };
        assert!(again.wait().is_ok());
    }

    #[test]
    fn cancel_stops_between_stages() {
        let (coordinator, reached, release) = gated();
        let clip = click_clip(120.0, 9.0, 22050, 1);
        let Ok(mut handle) = coordinator.evaluate(&clip) else {
            panic!("evaluate rejected");
        };
        assert!(reached.recv_timeout(Duration::from_secs(30)).is_ok());
        handle.cancel();
        let _ = release.send(());

        assert_eq!(handle.wait().err(), Some(AnalysisError::Cancelled));
        assert_eq!(handle.status(), &RunStatus::Cancelled);
        assert!(handle.features().envelope().is_some());
        assert!(handle.features().tempo().is_none());
        assert!(handle.features().beats().is_none());
    }

    #[test]
    fn poll_never_blocks() {
        let (coordinator, reached, release) = gated();
        let clip = click_clip(120.0, 9.0, 22050, 1);
        let Ok(mut handle) = coordinator.evaluate(&clip) else {
            panic!("evaluate rejected");
        };
        assert!(reached.recv_timeout(Duration::from_secs(30)).is_ok());

        // Worker is parked inside the onset stage: only the envelope is out.
        let drained = handle.poll();
        assert!(drained.len() <= 1);
        assert!(!handle.status().is_finished());

        let _ = release.send(());
        let mut total = drained.len();
        while !handle.status().is_finished() {
            total += handle.poll().len();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(total, 5);
        assert_eq!(handle.status(), &RunStatus::Completed);
    }

    #[test]
    fn times_are_clamped_and_deduplicated() {
        assert_eq!(
            finalize_times(vec![2.5, -0.1, 1.0, 1.0, 0.0], 2.0),
            vec![0.0, 1.0, 2.0]
        );
    }
}
