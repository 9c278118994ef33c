//! Transient random test payloads.
//!
//! Each payload lives in its own temp file which is removed when the
//! [`Payload`] is dropped, so a session never leaves data behind.

use rand::RngCore;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::fs::File;

/// Write buffer used while generating
const GENERATE_CHUNK: usize = 64 * 1024;

/// A file of random bytes with a known size
pub struct Payload {
    file: NamedTempFile,
    size: u64,
}

impl Payload {
    /// Generate `size` random bytes in the system temp directory.
    pub async fn generate(size: u64) -> io::Result<Self> {
        Self::generate_in(&std::env::temp_dir(), size).await
    }

    /// Generate `size` random bytes in `dir`.
    pub async fn generate_in(dir: &Path, size: u64) -> io::Result<Self> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write_random(&dir, size))
            .await
            .map_err(io::Error::other)?
    }

    fn write_random(dir: &Path, size: u64) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("lanspeed-")
            .suffix(".bin")
            .tempfile_in(dir)?;

        let mut rng = rand::rng();
        let mut buffer = vec![0u8; GENERATE_CHUNK];
        let mut remaining = size;
        while remaining > 0 {
            let n = remaining.min(GENERATE_CHUNK as u64) as usize;
            rng.fill_bytes(&mut buffer[..n]);
            file.write_all(&buffer[..n])?;
            remaining -= n as u64;
        }
        file.flush()?;

        Ok(Payload { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open an independent read handle positioned at the start.
    pub fn open(&self) -> io::Result<File> {
        Ok(File::from_std(self.file.reopen()?))
    }
}
