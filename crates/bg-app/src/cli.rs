use std::path::PathBuf;

use clap::Parser;

/// beatgrid : onsets, tempo et grille de temps d'un enregistrement audio.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier audio à analyser (WAV, MP3, FLAC, OGG, AAC).
    pub input: PathBuf,

    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Sortie JSON unique en fin d'analyse au lieu de l'affichage progressif.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Recaler chaque temps sur le pic d'énergie voisin (écrase la config).
    #[arg(long, default_value_t = false)]
    pub snap: bool,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}
