//! # PCM Conversion and WAV Wrapping
//!
//! Microphones hand us raw samples; providers want a file. These helpers convert
//! captured samples into 16-bit little-endian PCM and wrap a finished recording in a
//! WAV header so the Transcriber can recognise it.
//!
//! ## Rust Concepts:
//! - **byteorder**: explicit little-endian reads and writes, independent of the host CPU
//! - **Cursor<Vec<u8>>**: an in-memory `Write + Seek` target for the WAV encoder

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};

/// Shape of raw PCM produced by a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Convert normalised `[-1.0, 1.0]` float samples to 16-bit integers, clamping overshoot.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Serialize samples as little-endian bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

/// Parse little-endian 16-bit samples. A trailing odd byte is ignored.
pub fn le_bytes_to_i16(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}

/// Wrap 16-bit little-endian PCM bytes in a WAV container.
pub fn encode_wav(pcm: &[u8], spec: PcmSpec) -> io::Result<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, spec.channels, spec.sample_rate, 16);
    let samples = le_bytes_to_i16(pcm);
    let mut out = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut out)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;

    #[test]
    fn test_f32_conversion_clamps() {
        let converted = f32_to_i16(&[0.0, 1.0, -1.0, 2.5]);
        assert_eq!(converted, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_le_bytes() {
        let bytes = i16_to_le_bytes(&[1, -2]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(le_bytes_to_i16(&[0x01, 0x00, 0xFE, 0xFF, 0x07]), vec![1, -2]);
    }

    #[test]
    fn test_encode_wav_produces_readable_file() {
        let pcm = i16_to_le_bytes(&[0, 1000, -1000, 32000]);
        let wav_bytes = encode_wav(&pcm, PcmSpec::default()).unwrap();
        assert_eq!(AudioFormat::detect(&wav_bytes), AudioFormat::Wav);

        let (header, data) = wav::read(&mut Cursor::new(wav_bytes)).unwrap();
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.channel_count, 1);
        assert_eq!(data.try_into_sixteen().unwrap(), vec![0, 1000, -1000, 32000]);
    }
}
