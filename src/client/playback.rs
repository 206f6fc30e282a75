//! Where synthesized replies go once they reach the client.

use crate::audio::AudioFormat;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// Something that can "play" a reply. Returns the saved path when there is one.
pub trait AudioSink {
    fn play(&mut self, audio: &[u8]) -> io::Result<Option<PathBuf>>;
}

impl AudioSink for Box<dyn AudioSink> {
    fn play(&mut self, audio: &[u8]) -> io::Result<Option<PathBuf>> {
        (**self).play(audio)
    }
}

/// Writes each reply to `reply-NNN.<ext>` in a directory.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    played: usize,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, played: 0 })
    }

    pub fn played(&self) -> usize {
        self.played
    }
}

impl AudioSink for DirectorySink {
    fn play(&mut self, audio: &[u8]) -> io::Result<Option<PathBuf>> {
        self.played += 1;
        let format = AudioFormat::detect(audio);
        let path = self
            .dir
            .join(format!("reply-{:03}.{}", self.played, format.extension()));
        fs::write(&path, audio)?;
        debug!(path = %path.display(), bytes = audio.len(), "Reply saved");
        Ok(Some(path))
    }
}

/// Discards replies, counting them.
#[derive(Debug, Default)]
pub struct NullSink {
    pub played: usize,
}

impl AudioSink for NullSink {
    fn play(&mut self, _audio: &[u8]) -> io::Result<Option<PathBuf>> {
        self.played += 1;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_sink_numbers_and_names_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path().join("replies")).unwrap();

        let first = sink.play(b"RIFF\0\0\0\0WAVEfmt ").unwrap().unwrap();
        let second = sink.play(&[0x00, 0x01]).unwrap().unwrap();

        assert!(first.ends_with("reply-001.wav"));
        assert!(second.ends_with("reply-002.bin"));
        assert_eq!(fs::read(&second).unwrap(), vec![0x00, 0x01]);
        assert_eq!(sink.played(), 2);
    }
}
