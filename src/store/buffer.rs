//! Cursor-based byte buffer over heap or mapped storage
//!
//! One concrete buffer type covers what would otherwise be a family of
//! heap, read-only and file-mapped variants. The cursor follows the usual
//! buffer rules: `position <= limit <= capacity` at all times, reads past
//! the limit underflow, writes past the limit overflow.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use parking_lot::RwLock;

use super::shared::SharedBytes;
use crate::error::{LucentError, Result};

/// Byte order for multi-byte numeric access
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Storage behind a buffer
#[derive(Clone, Debug)]
pub enum Backing {
    /// Writable heap block shared by all slices and duplicates
    Heap(Arc<RwLock<Vec<u8>>>),
    /// Immutable region: a memory-mapped file or a frozen heap block
    Mapped(SharedBytes),
}

/// Byte buffer with position/limit/capacity cursor semantics
#[derive(Clone, Debug)]
pub struct ByteBuffer {
    backing: Backing,
    /// Start of this view within the backing storage
    offset: usize,
    capacity: usize,
    position: usize,
    limit: usize,
    mark: Option<usize>,
    order: Endian,
    read_only: bool,
}

impl ByteBuffer {
    /// Zero-filled writable buffer
    pub fn allocate(capacity: usize) -> Self {
        Self::over_heap(vec![0; capacity])
    }

    /// Writable buffer over existing bytes, without copying
    pub fn wrap(bytes: Vec<u8>) -> Self {
        Self::over_heap(bytes)
    }

    /// Read-only buffer over an immutable region
    pub fn from_shared(bytes: SharedBytes) -> Self {
        let capacity = bytes.len();
        Self {
            backing: Backing::Mapped(bytes),
            offset: 0,
            capacity,
            position: 0,
            limit: capacity,
            mark: None,
            order: Endian::Big,
            read_only: true,
        }
    }

    fn over_heap(bytes: Vec<u8>) -> Self {
        let capacity = bytes.len();
        Self {
            backing: Backing::Heap(Arc::new(RwLock::new(bytes))),
            offset: 0,
            capacity,
            position: 0,
            limit: capacity,
            mark: None,
            order: Endian::Big,
            read_only: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn order(&self) -> Endian {
        self.order
    }

    pub fn set_order(&mut self, order: Endian) {
        self.order = order;
    }

    pub fn with_order(mut self, order: Endian) -> Self {
        self.order = order;
        self
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(LucentError::InvalidArgument(format!(
                "position {} beyond limit {}",
                position, self.limit
            )));
        }
        if self.mark.is_some_and(|m| m > position) {
            self.mark = None;
        }
        self.position = position;
        Ok(())
    }

    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.capacity {
            return Err(LucentError::InvalidArgument(format!(
                "limit {} beyond capacity {}",
                limit, self.capacity
            )));
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.is_some_and(|m| m > limit) {
            self.mark = None;
        }
        Ok(())
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.position);
    }

    /// Return to the mark; no-op without one
    pub fn reset(&mut self) {
        if let Some(mark) = self.mark {
            self.position = mark;
        }
    }

    /// Switch from writing to reading what was written
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
    }

    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
    }

    pub fn rewind(&mut self) {
        self.position = 0;
        self.mark = None;
    }

    /// Move the unread bytes to the front and prepare for more writes
    pub fn compact(&mut self) -> Result<()> {
        if self.read_only {
            return Err(LucentError::ReadOnly);
        }
        let remaining = self.remaining();
        if remaining > 0 && self.position > 0 {
            let mut tmp = vec![0u8; remaining];
            self.read_raw(self.position, &mut tmp);
            self.write_raw(0, &tmp)?;
        }
        self.position = remaining;
        self.limit = self.capacity;
        self.mark = None;
        Ok(())
    }

    /// View of the remaining bytes sharing storage, with its own cursor
    pub fn slice(&self) -> Self {
        let len = self.remaining();
        Self {
            backing: self.backing.clone(),
            offset: self.offset + self.position,
            capacity: len,
            position: 0,
            limit: len,
            mark: None,
            order: self.order,
            read_only: self.read_only,
        }
    }

    /// View of `[index, index + len)` relative to this buffer's start
    pub fn slice_at(&self, index: usize, len: usize) -> Result<Self> {
        self.check_read(index, len)?;
        Ok(Self {
            backing: self.backing.clone(),
            offset: self.offset + index,
            capacity: len,
            position: 0,
            limit: len,
            mark: None,
            order: self.order,
            read_only: self.read_only,
        })
    }

    /// Same storage and bounds, independent cursor
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn as_read_only(&self) -> Self {
        let mut view = self.clone();
        view.read_only = true;
        view
    }

    /// Zero-copy access to the remaining bytes of an immutable region
    pub fn shared_remaining(&self) -> Option<SharedBytes> {
        match &self.backing {
            Backing::Mapped(bytes) => {
                bytes.slice(self.offset + self.position..self.offset + self.limit)
            }
            Backing::Heap(_) => None,
        }
    }

    /// Copy of the remaining bytes; the cursor does not move
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.remaining()];
        self.read_raw(self.position, &mut out);
        out
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_bytes(&[value])
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.get_bytes(&mut buf)?;
        Ok(self.decode_i32(&buf))
    }

    pub fn put_i32(&mut self, value: i32) -> Result<()> {
        let buf = self.encode_i32(value);
        self.put_bytes(&buf)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.get_bytes(&mut buf)?;
        Ok(self.decode_i64(&buf))
    }

    pub fn put_i64(&mut self, value: i64) -> Result<()> {
        let buf = self.encode_i64(value);
        self.put_bytes(&buf)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.get_i32().map(|v| v as u32)
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.put_i32(value as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.get_i64().map(|v| v as u64)
    }

    pub fn put_u64(&mut self, value: u64) -> Result<()> {
        self.put_i64(value as i64)
    }

    pub fn get_u8_at(&self, index: usize) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get_bytes_at(index, &mut buf)?;
        Ok(buf[0])
    }

    pub fn put_u8_at(&mut self, index: usize, value: u8) -> Result<()> {
        self.put_bytes_at(index, &[value])
    }

    pub fn get_i32_at(&self, index: usize) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.get_bytes_at(index, &mut buf)?;
        Ok(self.decode_i32(&buf))
    }

    pub fn put_i32_at(&mut self, index: usize, value: i32) -> Result<()> {
        let buf = self.encode_i32(value);
        self.put_bytes_at(index, &buf)
    }

    pub fn get_i64_at(&self, index: usize) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.get_bytes_at(index, &mut buf)?;
        Ok(self.decode_i64(&buf))
    }

    pub fn put_i64_at(&mut self, index: usize, value: i64) -> Result<()> {
        let buf = self.encode_i64(value);
        self.put_bytes_at(index, &buf)
    }

    /// Fill `dst` from the cursor
    pub fn get_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_read(self.position, dst.len())?;
        self.read_raw(self.position, dst);
        self.position += dst.len();
        Ok(())
    }

    /// Write `src` at the cursor
    pub fn put_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.check_write(self.position, src.len())?;
        self.write_raw(self.position, src)?;
        self.position += src.len();
        Ok(())
    }

    pub fn get_bytes_at(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.check_read(index, dst.len())?;
        self.read_raw(index, dst);
        Ok(())
    }

    pub fn put_bytes_at(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.check_write(index, src.len())?;
        self.write_raw(index, src)
    }

    fn check_read(&self, index: usize, needed: usize) -> Result<()> {
        match index.checked_add(needed) {
            Some(end) if end <= self.limit => Ok(()),
            _ => Err(LucentError::Underflow {
                position: index,
                needed,
                limit: self.limit,
            }),
        }
    }

    fn check_write(&self, index: usize, needed: usize) -> Result<()> {
        if self.read_only {
            return Err(LucentError::ReadOnly);
        }
        match index.checked_add(needed) {
            Some(end) if end <= self.limit => Ok(()),
            _ => Err(LucentError::Overflow {
                position: index,
                needed,
                limit: self.limit,
            }),
        }
    }

    // Bounds are checked by the callers.
    fn read_raw(&self, index: usize, dst: &mut [u8]) {
        let start = self.offset + index;
        match &self.backing {
            Backing::Heap(bytes) => {
                dst.copy_from_slice(&bytes.read()[start..start + dst.len()]);
            }
            Backing::Mapped(bytes) => {
                dst.copy_from_slice(&bytes[start..start + dst.len()]);
            }
        }
    }

    fn write_raw(&self, index: usize, src: &[u8]) -> Result<()> {
        let start = self.offset + index;
        match &self.backing {
            Backing::Heap(bytes) => {
                bytes.write()[start..start + src.len()].copy_from_slice(src);
                Ok(())
            }
            Backing::Mapped(_) => Err(LucentError::ReadOnly),
        }
    }

    fn decode_i32(&self, buf: &[u8]) -> i32 {
        match self.order {
            Endian::Big => BigEndian::read_i32(buf),
            Endian::Little => LittleEndian::read_i32(buf),
        }
    }

    fn decode_i64(&self, buf: &[u8]) -> i64 {
        match self.order {
            Endian::Big => BigEndian::read_i64(buf),
            Endian::Little => LittleEndian::read_i64(buf),
        }
    }

    fn encode_i32(&self, value: i32) -> [u8; 4] {
        let mut buf = [0u8; 4];
        match self.order {
            Endian::Big => BigEndian::write_i32(&mut buf, value),
            Endian::Little => LittleEndian::write_i32(&mut buf, value),
        }
        buf
    }

    fn encode_i64(&self, value: i64) -> [u8; 8] {
        let mut buf = [0u8; 8];
        match self.order {
            Endian::Big => BigEndian::write_i64(&mut buf, value),
            Endian::Little => LittleEndian::write_i64(&mut buf, value),
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_put_get_big_endian() {
        let mut buf = ByteBuffer::allocate(16);
        buf.put_i32(0x0102_0304).unwrap();
        buf.put_i64(-2).unwrap();
        buf.put_u8(7).unwrap();
        assert_eq!(buf.position(), 13);

        buf.flip();
        assert_eq!(buf.limit(), 13);
        assert_eq!(buf.get_u8_at(0).unwrap(), 0x01);
        assert_eq!(buf.get_i32().unwrap(), 0x0102_0304);
        assert_eq!(buf.get_i64().unwrap(), -2);
        assert_eq!(buf.get_u8().unwrap(), 7);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_little_endian() {
        let mut buf = ByteBuffer::allocate(4).with_order(Endian::Little);
        buf.put_i32(0x0102_0304).unwrap();
        assert_eq!(buf.get_u8_at(0).unwrap(), 0x04);

        buf.set_order(Endian::Big);
        assert_eq!(buf.get_i32_at(0).unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_underflow_and_overflow() {
        let mut buf = ByteBuffer::allocate(6);
        buf.put_i32(1).unwrap();
        assert!(matches!(buf.put_i32(2), Err(LucentError::Overflow { .. })));
        // Failed write does not move the cursor
        assert_eq!(buf.position(), 4);

        buf.flip();
        buf.get_i32().unwrap();
        assert!(matches!(buf.get_u8(), Err(LucentError::Underflow { .. })));
        assert!(matches!(buf.get_i64_at(0), Err(LucentError::Underflow { .. })));
    }

    #[test]
    fn test_read_only_views() {
        let mut buf = ByteBuffer::wrap(vec![1, 2, 3, 4]);
        let mut ro = buf.as_read_only();
        assert!(matches!(ro.put_u8(9), Err(LucentError::ReadOnly)));
        assert!(matches!(ro.compact(), Err(LucentError::ReadOnly)));

        // The writable handle still writes, and the view sees it
        buf.put_u8_at(0, 9).unwrap();
        assert_eq!(ro.get_u8().unwrap(), 9);

        let mut mapped = ByteBuffer::from_shared(SharedBytes::from_vec(vec![0, 0, 0, 5]));
        assert!(mapped.is_read_only());
        assert_eq!(mapped.get_i32().unwrap(), 5);
        assert!(matches!(mapped.put_u8_at(0, 1), Err(LucentError::ReadOnly)));
    }

    #[test]
    fn test_slice_and_duplicate_share_storage() {
        let mut buf = ByteBuffer::wrap((0u8..8).collect());
        buf.set_position(2).unwrap();

        let mut slice = buf.slice();
        assert_eq!(slice.capacity(), 6);
        assert_eq!(slice.get_u8().unwrap(), 2);
        slice.put_u8_at(0, 42).unwrap();
        assert_eq!(buf.get_u8_at(2).unwrap(), 42);

        let mut dup = buf.duplicate();
        dup.set_position(0).unwrap();
        assert_eq!(buf.position(), 2);
        assert_eq!(dup.get_u8().unwrap(), 0);

        let window = buf.slice_at(4, 2).unwrap();
        assert_eq!(window.to_vec(), vec![4, 5]);
        assert!(buf.slice_at(7, 2).is_err());
    }

    #[test]
    fn test_compact() {
        let mut buf = ByteBuffer::wrap(vec![1, 2, 3, 4, 5]);
        buf.get_u8().unwrap();
        buf.get_u8().unwrap();
        buf.compact().unwrap();

        assert_eq!(buf.position(), 3);
        assert_eq!(buf.limit(), 5);
        buf.flip();
        assert_eq!(buf.to_vec(), vec![3, 4, 5]);
    }

    #[test]
    fn test_cursor_invariants() {
        let mut buf = ByteBuffer::allocate(8);
        assert!(buf.set_limit(9).is_err());
        buf.set_position(6).unwrap();
        buf.mark();
        buf.set_limit(4).unwrap();
        assert_eq!(buf.position(), 4);
        assert!(buf.set_position(5).is_err());

        // Mark beyond the new limit was discarded
        buf.set_position(1).unwrap();
        buf.reset();
        assert_eq!(buf.position(), 1);

        buf.clear();
        assert_eq!(buf.limit(), 8);
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_shared_remaining_is_zero_copy() {
        let mut buf = ByteBuffer::from_shared(SharedBytes::from_vec(vec![9, 8, 7, 6]));
        buf.get_u8().unwrap();
        let rest = buf.shared_remaining().unwrap();
        assert_eq!(&*rest, &[8, 7, 6]);
        assert!(ByteBuffer::allocate(2).shared_remaining().is_none());
    }
}
