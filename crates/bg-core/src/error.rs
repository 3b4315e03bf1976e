use thiserror::Error;

/// Errors originating from the analysis pipeline.
///
/// Local numeric degeneracies (zero variance, zero range, a silent window) never
/// show up here: stages recover from them. A clip with no periodic energy at
/// all has no tempo and fails with [`AnalysisError::InvalidInput`]. An empty
/// onset or beat list is a valid result, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// Structural precondition violated (sample rate, channel layout, too few samples).
    #[error("Entrée invalide : {0}")]
    InvalidInput(String),

    /// An analysis of the same clip is already in flight.
    #[error("Analyse déjà en cours pour ce clip")]
    AlreadyRunning,

    /// The run was cancelled between two stages.
    #[error("Analyse annulée")]
    Cancelled,

    /// The worker thread exited without reporting completion or failure.
    #[error("Le thread d'analyse s'est arrêté sans résultat")]
    WorkerLost,

    /// Invalid configuration value or unreadable configuration file.
    #[error("Configuration invalide : {0}")]
    Config(String),
}

impl AnalysisError {
    /// Shorthand for [`AnalysisError::InvalidInput`].
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
