use anyhow::{bail, Result};

/// Maximum upload size accepted by Whisper-compatible APIs (25 MB).
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Map file extension to MIME type for Whisper-compatible transcription APIs.
fn mime_for_audio(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "flac" => Some("audio/flac"),
        "mp3" | "mpeg" | "mpga" => Some("audio/mpeg"),
        "mp4" | "m4a" => Some("audio/mp4"),
        "ogg" | "oga" => Some("audio/ogg"),
        "opus" => Some("audio/opus"),
        "wav" => Some("audio/wav"),
        "webm" => Some("audio/webm"),
        _ => None,
    }
}

/// Guess the container from magic bytes. Lark voice messages are Opus in Ogg.
fn sniff_extension(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"OggS") {
        Some("ogg")
    } else if data.starts_with(b"RIFF") && data.get(8..12) == Some(&b"WAVE"[..]) {
        Some("wav")
    } else if data.starts_with(b"fLaC") {
        Some("flac")
    } else if data.starts_with(b"ID3") || data.starts_with(&[0xFF, 0xFB]) {
        Some("mp3")
    } else if data.get(4..8) == Some(&b"ftyp"[..]) {
        Some("m4a")
    } else if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        Some("webm")
    } else {
        None
    }
}

/// Normalize audio filename for Whisper-compatible APIs.
///
/// `.oga` (Opus-in-Ogg) is rejected by several providers, so it becomes `.ogg`.
/// Names without a recognised extension get one from the sniffed container.
fn normalize_audio_filename(file_name: &str, sniffed: Option<&str>) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("oga") => format!("{stem}.ogg"),
        Some((_, ext)) if mime_for_audio(ext).is_some() => file_name.to_string(),
        _ => match sniffed {
            Some(ext) => format!("{file_name}.{ext}"),
            None => file_name.to_string(),
        },
    }
}

/// An audio clip ready for multipart upload.
#[derive(Debug)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: &'static str,
}

impl AudioUpload {
    /// Validate and label a downloaded voice clip.
    ///
    /// Fails for empty or oversized clips and for containers the
    /// transcription endpoint cannot read.
    pub fn prepare(bytes: Vec<u8>, file_name: &str) -> Result<Self> {
        if bytes.is_empty() {
            bail!("Audio file is empty");
        }
        if bytes.len() > MAX_AUDIO_BYTES {
            bail!(
                "Audio file too large ({} bytes, max {MAX_AUDIO_BYTES})",
                bytes.len()
            );
        }

        let sniffed = sniff_extension(&bytes);
        let file_name = normalize_audio_filename(file_name, sniffed);
        let extension = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        let mime = mime_for_audio(extension).ok_or_else(|| {
            anyhow::anyhow!(
                "Unsupported audio format '.{extension}' (accepted: flac, mp3, mp4, mpeg, mpga, m4a, ogg, opus, wav, webm)"
            )
        })?;

        Ok(Self {
            bytes,
            file_name,
            mime,
        })
    }
}
