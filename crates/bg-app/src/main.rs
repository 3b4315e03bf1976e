use anyhow::{Context, Result};
use bg_audio::{Coordinator, RunStatus};
use bg_core::config::{AnalysisConfig, load_config};
use bg_core::features::Publication;
use clap::Parser;

pub mod cli;
pub mod decode;

/// Values shown per printed time list.
const PREVIEW: usize = 8;

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    // 3. Charger la config, appliquer les overrides CLI
    let mut config = resolve_config(&cli)?;
    if cli.snap {
        config.snap_to_energy = true;
    }

    // 4. Décoder
    let clip = decode::decode_file(&cli.input)?;

    // 5. Analyser
    let coordinator = Coordinator::new(config);
    let mut handle = coordinator
        .evaluate(&clip)
        .context("Impossible de lancer l'analyse")?;

    if cli.json {
        let features = handle
            .wait()
            .with_context(|| format!("Analyse de {} échouée", cli.input.display()))?;
        println!("{}", serde_json::to_string_pretty(&features.report())?);
        return Ok(());
    }

    while let Some(publication) = handle.recv() {
        print_publication(&publication);
    }

    match handle.status() {
        RunStatus::Failed(e) => {
            Err(e.clone()).with_context(|| format!("Analyse de {} échouée", cli.input.display()))
        }
        RunStatus::Cancelled => anyhow::bail!("Analyse annulée"),
        RunStatus::Completed | RunStatus::Running => Ok(()),
    }
}

fn print_publication(publication: &Publication) {
    match publication {
        Publication::Envelope(env) => {
            println!("envelope : {} trames @ {:.2} fps", env.len(), env.frame_rate);
        }
        Publication::Onsets(times) => println!("onsets   : {}", format_times(times)),
        Publication::Tempo(bpm) => println!("tempo    : {bpm:.2} BPM"),
        Publication::Beats(times) => println!("beats    : {}", format_times(times)),
        Publication::Completed | Publication::Failed(_) | Publication::Cancelled => {}
    }
}

fn format_times(times: &[f64]) -> String {
    let shown: Vec<String> = times.iter().take(PREVIEW).map(|t| format!("{t:.3}")).collect();
    let ellipsis = if times.len() > PREVIEW { ", …" } else { "" };
    format!("{} [{}{ellipsis}]", times.len(), shown.join(", "))
}

fn resolve_config(cli: &cli::Cli) -> Result<AnalysisConfig> {
    if cli.config.exists() {
        load_config(&cli.config)
            .with_context(|| format!("Configuration {} illisible", cli.config.display()))
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            cli.config.display()
        );
        Ok(AnalysisConfig::default())
    }
}
