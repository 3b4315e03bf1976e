use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use bg_core::signal::AudioClip;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode an audio file into an interleaved [`AudioClip`].
///
/// Samples are kept at the file's rate and channel layout; mixdown and
/// decimation belong to the analysis pipeline.
///
/// # Errors
/// Returns an error if the file cannot be opened, probed or decoded, or if the
/// decoded stream does not form a valid clip.
pub fn decode_file(path: impl AsRef<Path>) -> Result<AudioClip> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Impossible d'ouvrir le fichier audio : {}", path.display()))?;
    let mss = MediaSourceStream::new(
        Box::new(file),
        symphonia::core::io::MediaSourceStreamOptions::default(),
    );

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Format audio non reconnu")?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .context("Aucune piste audio par défaut")?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .context("Fréquence d'échantillonnage inconnue")?;
    let mut channels = track
        .codec_params
        .channels
        .map_or(0, symphonia::core::audio::Channels::count);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Impossible de créer le décodeur audio")?;

    let track_id = track.id;
    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut max_sample_frames: usize = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("Erreur de paquet audio : {e}");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("Erreur de décodage de trame : {e}");
                continue;
            }
        };

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count();
        if channels == 0 {
            channels = packet_channels;
        } else if packet_channels != channels {
            log::warn!("Paquet à {packet_channels} canaux ignoré (piste à {channels})");
            continue;
        }

        let num_frames = decoded.capacity();
        // Réalloue seulement si le paquet dépasse la capacité courante.
        if sample_buf.is_none() || num_frames > max_sample_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
            max_sample_frames = num_frames;
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    let channels = channels.max(1);
    log::info!(
        "{} trames décodées @ {sample_rate} Hz, {channels} canal(aux) depuis {}",
        samples.len() / channels,
        path.display()
    );

    AudioClip::new(samples, channels, sample_rate)
        .with_context(|| format!("Flux audio invalide : {}", path.display()))
}
