//! GPU buffer resource.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::BufferDescriptor;

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are reference-counted.
/// They hold a weak reference back to their parent device.
///
/// Buffers created with [`BufferUsage::RAW`](crate::types::BufferUsage::RAW)
/// are addressed as 32-bit words, so every write must start and end on a
/// 4-byte boundary.
///
/// When the device does not preserve partial writes, a write that does not
/// cover the whole buffer leaves every byte outside the written range zeroed.
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::RAW))?;
/// buffer.write(0, bytemuck::cast_slice(&header))?;
/// ```
pub struct Buffer {
    device: Weak<GraphicsDevice>,
    descriptor: BufferDescriptor,
    preserve_partial_writes: bool,
    data: RwLock<Vec<u8>>,
    writes: RwLock<u32>,
}

impl Buffer {
    pub(crate) fn new(
        device: Weak<GraphicsDevice>,
        descriptor: BufferDescriptor,
        preserve_partial_writes: bool,
    ) -> Self {
        let data = vec![0u8; descriptor.size as usize];
        Self {
            device,
            descriptor,
            preserve_partial_writes,
            data: RwLock::new(data),
            writes: RwLock::new(0),
        }
    }

    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Number of writes issued to this buffer.
    pub fn write_count(&self) -> u32 {
        *self.writes.read()
    }

    /// Write `bytes` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::OutOfBounds`] if the write does not fit and
    /// [`GraphicsError::InvalidParameter`] for unaligned writes to raw buffers.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), GraphicsError> {
        let len = bytes.len() as u64;
        self.check_range(offset, len)?;
        if self.descriptor.is_raw() && (offset % 4 != 0 || len % 4 != 0) {
            return Err(GraphicsError::InvalidParameter(format!(
                "raw buffer write at offset {offset} with length {len} is not 4-byte aligned"
            )));
        }

        let start = offset as usize;
        let end = start + bytes.len();
        let mut data = self.data.write();
        let whole = start == 0 && end == data.len();
        if !whole && !self.preserve_partial_writes {
            data.fill(0);
        }
        data[start..end].copy_from_slice(bytes);
        *self.writes.write() += 1;
        Ok(())
    }

    /// Write a slice of plain values at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, values: &[T]) -> Result<(), GraphicsError> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, GraphicsError> {
        self.check_range(offset, len)?;
        let start = offset as usize;
        Ok(self.data.read()[start..start + len as usize].to_vec())
    }

    /// Copy of the whole buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), GraphicsError> {
        let size = self.descriptor.size;
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(GraphicsError::OutOfBounds { offset, len, size }),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    fn raw_buffer(size: u64, preserve: bool) -> Buffer {
        Buffer::new(
            Weak::new(),
            BufferDescriptor::new(size, BufferUsage::RAW | BufferUsage::STORAGE),
            preserve,
        )
    }

    #[test]
    fn buffer_debug() {
        let desc = BufferDescriptor::new(1024, BufferUsage::VERTEX);
        let buffer = Buffer::new(Weak::new(), desc, true);
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn partial_writes_preserved() {
        let buffer = raw_buffer(16, true);
        buffer.write(0, &[1, 1, 1, 1]).unwrap();
        buffer.write(8, &[2, 2, 2, 2]).unwrap();
        assert_eq!(
            buffer.contents(),
            vec![1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 0, 0, 0, 0]
        );
        assert_eq!(buffer.write_count(), 2);
    }

    #[test]
    fn partial_writes_discarded() {
        let buffer = raw_buffer(8, false);
        buffer.write(0, &[1, 1, 1, 1]).unwrap();
        buffer.write(4, &[2, 2, 2, 2]).unwrap();
        assert_eq!(buffer.contents(), vec![0, 0, 0, 0, 2, 2, 2, 2]);

        buffer.write(0, &[3; 8]).unwrap();
        assert_eq!(buffer.contents(), vec![3; 8]);
    }

    #[test]
    fn raw_alignment() {
        let buffer = raw_buffer(16, true);
        assert!(matches!(
            buffer.write(2, &[0; 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            buffer.write(0, &[0; 3]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn out_of_bounds() {
        let buffer = raw_buffer(8, true);
        assert_eq!(
            buffer.write(4, &[0; 8]),
            Err(GraphicsError::OutOfBounds {
                offset: 4,
                len: 8,
                size: 8
            })
        );
        assert!(buffer.read(6, 4).is_err());
        assert_eq!(buffer.read(4, 4).unwrap(), vec![0; 4]);
    }
}
