//! # Audio Helpers
//!
//! Format handling shared by the server-side providers and the client.
//!
//! ## Key Components:
//! - **AudioFormat**: recognise a container from its magic bytes, so uploads get a
//!   sensible file name and saved replies get the right extension
//! - **buffer**: ordered, size-bounded chunk buffer used while recording
//! - **processor**: PCM sample conversion and WAV wrapping
//!
//! Audio units themselves are opaque to the session protocol; nothing here is required
//! to decode them.

pub mod buffer;
pub mod processor;

/// Container formats we can recognise from the first few bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Ogg,
    Webm,
    Mp3,
    Flac,
    Unknown,
}

impl AudioFormat {
    /// Inspect the leading magic bytes.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            AudioFormat::Wav
        } else if bytes.starts_with(b"OggS") {
            AudioFormat::Ogg
        } else if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            AudioFormat::Webm
        } else if bytes.starts_with(b"fLaC") {
            AudioFormat::Flac
        } else if bytes.starts_with(b"ID3")
            || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
        {
            AudioFormat::Mp3
        } else {
            AudioFormat::Unknown
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Webm => "webm",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Unknown => "bin",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Unknown => "application/octet-stream",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_containers() {
        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&[0, 0, 0, 0]);
        wav.extend_from_slice(b"WAVEfmt ");
        assert_eq!(AudioFormat::detect(&wav), AudioFormat::Wav);
        assert_eq!(AudioFormat::detect(b"OggS\0\x02"), AudioFormat::Ogg);
        assert_eq!(AudioFormat::detect(&[0x1A, 0x45, 0xDF, 0xA3, 0x9F]), AudioFormat::Webm);
        assert_eq!(AudioFormat::detect(b"ID3\x04"), AudioFormat::Mp3);
        assert_eq!(AudioFormat::detect(&[0xFF, 0xFB, 0x90]), AudioFormat::Mp3);
        assert_eq!(AudioFormat::detect(b"fLaC"), AudioFormat::Flac);
    }

    #[test]
    fn test_unknown_bytes() {
        assert_eq!(AudioFormat::detect(&[]), AudioFormat::Unknown);
        assert_eq!(AudioFormat::detect(&[1, 2, 3]).extension(), "bin");
    }
}
