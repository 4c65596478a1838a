//! Byte storage consumed by the segment engine
//!
//! - `ByteBuffer`: cursor-based buffer with endian-aware numeric access
//! - `SharedBytes`: immutable heap or memory-mapped region
//! - `Directory`: named files with atomic publication

mod buffer;
mod directory;
mod shared;

pub use buffer::{Backing, ByteBuffer, Endian};
pub use directory::{Directory, FsDirectory, IndexOutput, RamDirectory, TEMP_SUFFIX};
pub use shared::SharedBytes;
