//! Failure injection for directory operations
//!
//! `FaultyDirectory` wraps another directory and fails writes once a byte
//! budget is spent, or fails every sync, rename or open while armed. Used
//! to check that flush, merge and commit publish all or nothing.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::store::{Directory, IndexOutput, SharedBytes};

const UNLIMITED: u64 = u64::MAX;

#[derive(Debug)]
struct Faults {
    /// Bytes that may still be written before writes fail
    write_budget: AtomicU64,
    fail_sync: AtomicBool,
    fail_rename: AtomicBool,
    fail_open: AtomicBool,
    bytes_written: AtomicU64,
    injected: AtomicU64,
}

impl Faults {
    fn injected(&self, what: &str) -> io::Error {
        self.injected.fetch_add(1, Ordering::SeqCst);
        io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
    }
}

/// Directory wrapper that fails on demand
#[derive(Debug)]
pub struct FaultyDirectory<D> {
    inner: D,
    faults: Arc<Faults>,
}

impl<D: Directory> FaultyDirectory<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults {
                write_budget: AtomicU64::new(UNLIMITED),
                fail_sync: AtomicBool::new(false),
                fail_rename: AtomicBool::new(false),
                fail_open: AtomicBool::new(false),
                bytes_written: AtomicU64::new(0),
                injected: AtomicU64::new(0),
            }),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Let `bytes` more bytes through, then fail every write
    pub fn fail_after_bytes(&self, bytes: u64) {
        self.faults.write_budget.store(bytes, Ordering::SeqCst);
    }

    pub fn fail_on_sync(&self, fail: bool) {
        self.faults.fail_sync.store(fail, Ordering::SeqCst);
    }

    pub fn fail_on_rename(&self, fail: bool) {
        self.faults.fail_rename.store(fail, Ordering::SeqCst);
    }

    /// Fail reads of files that were already written
    pub fn fail_on_open(&self, fail: bool) {
        self.faults.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Disarm all faults
    pub fn heal(&self) {
        self.faults.write_budget.store(UNLIMITED, Ordering::SeqCst);
        self.fail_on_sync(false);
        self.fail_on_rename(false);
        self.fail_on_open(false);
    }

    /// Bytes accepted by outputs since creation
    pub fn bytes_written(&self) -> u64 {
        self.faults.bytes_written.load(Ordering::SeqCst)
    }

    /// Number of failures injected so far
    pub fn injected_failures(&self) -> u64 {
        self.faults.injected.load(Ordering::SeqCst)
    }
}

struct FaultyOutput {
    inner: Box<dyn IndexOutput>,
    faults: Arc<Faults>,
}

impl Write for FaultyOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let budget = self.faults.write_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(self.faults.injected("write"));
        }
        let allowed = buf.len().min(budget.min(usize::MAX as u64) as usize);
        let n = self.inner.write(&buf[..allowed])?;
        if budget != UNLIMITED {
            self.faults.write_budget.fetch_sub(n as u64, Ordering::SeqCst);
        }
        self.faults.bytes_written.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl IndexOutput for FaultyOutput {
    fn sync(&mut self) -> io::Result<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(self.faults.injected("sync"));
        }
        self.inner.sync()
    }

    fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }
}

impl<D: Directory> Directory for FaultyDirectory<D> {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        Ok(Box::new(FaultyOutput {
            inner: self.inner.create_output(name)?,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn open_input(&self, name: &str) -> Result<SharedBytes> {
        if self.faults.fail_open.load(Ordering::SeqCst) {
            return Err(self.faults.injected("open").into());
        }
        self.inner.open_input(name)
    }

    fn exists(&self, name: &str) -> bool {
        self.inner.exists(name)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        if self.faults.fail_rename.load(Ordering::SeqCst) {
            return Err(self.faults.injected("rename").into());
        }
        self.inner.rename(from, to)
    }

    fn list(&self) -> Result<Vec<String>> {
        self.inner.list()
    }

    fn sync_dir(&self) -> Result<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(self.faults.injected("directory sync").into());
        }
        self.inner.sync_dir()
    }
}
