//! Sample channel shared between one sensor worker and the supervisor.
//!
//! The worker is the only writer and rewrites the whole buffer on every
//! sample. The supervisor is the only reader and removes the channel at drain
//! time. Removal doubles as a stop signal: a worker that finds its channel
//! gone exits its sampling loop.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SampleChannel: Send + Sync {
    /// Replace the channel contents with the full sample buffer.
    ///
    /// Fails with `NotFound` once the channel has been removed.
    fn publish(&self, samples: &[f64]) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Read the current contents, one sample per line.
    fn read(&self) -> io::Result<String>;

    fn remove(&self) -> io::Result<()>;
}

fn render(samples: &[f64]) -> String {
    samples
        .iter()
        .map(|s| crate::stats::format_number(*s))
        .collect::<Vec<_>>()
        .join("\n")
}

fn removed() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "sample channel removed")
}

/// In-process channel. Writes are atomic, so readers never see a partial buffer.
#[derive(Debug)]
pub struct MemoryChannel {
    buffer: Mutex<Option<String>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Some(String::new())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleChannel for MemoryChannel {
    fn publish(&self, samples: &[f64]) -> io::Result<()> {
        match self.slot().as_mut() {
            Some(buffer) => {
                *buffer = render(samples);
                Ok(())
            }
            None => Err(removed()),
        }
    }

    fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    fn read(&self) -> io::Result<String> {
        self.slot().clone().ok_or_else(removed)
    }

    fn remove(&self) -> io::Result<()> {
        self.slot().take().map(|_| ()).ok_or_else(removed)
    }
}

/// Legacy file-backed channel: a `.monitor*` temp file in the test's install
/// directory. Publishing never re-creates a removed file. A rewrite cut short
/// can leave a truncated last line for the reader.
#[derive(Debug)]
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    /// Create a fresh, empty channel file in `dir`.
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let (_, path) = tempfile::Builder::new()
            .prefix(".monitor")
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleChannel for FileChannel {
    fn publish(&self, samples: &[f64]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(render(samples).as_bytes())
    }

    fn is_open(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.path)
    }

    fn remove(&self) -> io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}
