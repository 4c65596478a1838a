//! File handle abstraction for segment storage
//!
//! A `Directory` is a flat namespace of named files. Segment and manifest
//! files are always published with `write_atomic`: write a temp file,
//! fsync it, rename it over the final name, fsync the directory.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::shared::SharedBytes;
use crate::config::SyncPolicy;
use crate::error::Result;

/// Suffix for files that are not yet published
pub const TEMP_SUFFIX: &str = ".tmp";

/// Sequential output to a new file
pub trait IndexOutput: Write + Send {
    /// Flush and make the written bytes durable
    fn sync(&mut self) -> io::Result<()>;

    fn bytes_written(&self) -> u64;
}

/// Flat namespace of files
pub trait Directory: Send + Sync + fmt::Debug {
    /// Create (or truncate) a file for writing
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>>;

    /// Open a whole file for reading
    fn open_input(&self, name: &str) -> Result<SharedBytes>;

    fn exists(&self, name: &str) -> bool;

    fn delete(&self, name: &str) -> Result<()>;

    /// Atomically replace `to` with `from`
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn list(&self) -> Result<Vec<String>>;

    /// Make completed renames durable
    fn sync_dir(&self) -> Result<()>;

    /// Publish `bytes` under `name` so readers see either nothing or the
    /// complete file
    ///
    /// On failure the temp file is removed and `name` is left untouched.
    fn write_atomic(&self, name: &str, bytes: &[u8], sync: SyncPolicy) -> Result<()> {
        let tmp = format!("{}{}", name, TEMP_SUFFIX);
        let written = (|| -> Result<()> {
            let mut out = self.create_output(&tmp)?;
            out.write_all(bytes)?;
            if sync.sync_files {
                out.sync()?;
            } else {
                out.flush()?;
            }
            drop(out);
            self.rename(&tmp, name)?;
            if sync.sync_directory {
                self.sync_dir()?;
            }
            Ok(())
        })();

        if written.is_err() && self.exists(&tmp) {
            if let Err(e) = self.delete(&tmp) {
                warn!(file = %tmp, error = %e, "failed to remove temp file");
            }
        }
        written
    }
}

/// Directory backed by a filesystem path; reads are memory-mapped
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

struct FsOutput {
    writer: BufWriter<File>,
    written: u64,
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IndexOutput for FsOutput {
    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Directory for FsDirectory {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let file = File::create(self.file_path(name))?;
        Ok(Box::new(FsOutput {
            writer: BufWriter::with_capacity(64 * 1024, file),
            written: 0,
        }))
    }

    fn open_input(&self, name: &str) -> Result<SharedBytes> {
        let file = File::open(self.file_path(name))?;
        Ok(SharedBytes::map_file(&file)?)
    }

    fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    fn delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.file_path(name))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.file_path(from), self.file_path(to))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<()> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}

type RamFiles = Arc<RwLock<HashMap<String, SharedBytes>>>;

/// In-memory directory
///
/// An output becomes visible under its name once flushed, synced or dropped.
#[derive(Debug, Clone, Default)]
pub struct RamDirectory {
    files: RamFiles,
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes across all files
    pub fn size_bytes(&self) -> u64 {
        self.files.read().values().map(|f| f.len() as u64).sum()
    }
}

struct RamOutput {
    name: String,
    buf: Vec<u8>,
    files: RamFiles,
}

impl RamOutput {
    fn publish(&self) {
        self.files
            .write()
            .insert(self.name.clone(), SharedBytes::from_vec(self.buf.clone()));
    }
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl IndexOutput for RamOutput {
    fn sync(&mut self) -> io::Result<()> {
        self.publish();
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buf.len() as u64
    }
}

impl Drop for RamOutput {
    fn drop(&mut self) {
        self.publish();
    }
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", name))
}

impl Directory for RamDirectory {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let output = RamOutput {
            name: name.to_string(),
            buf: Vec::new(),
            files: Arc::clone(&self.files),
        };
        output.publish();
        Ok(Box::new(output))
    }

    fn open_input(&self, name: &str) -> Result<SharedBytes> {
        self.files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name).into())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.files.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(not_found(name).into()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.write();
        let bytes = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_string(), bytes);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}
