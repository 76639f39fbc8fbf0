use bitflags::bitflags;

bitflags! {
    /// How a buffer is bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        /// Read by compute skinning.
        const STORAGE = 1 << 2;
        /// Addressed in 32-bit words; sizes and writes must be 4-byte aligned.
        const RAW = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    /// Bytes.
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns true for word-addressed buffers.
    pub fn is_raw(&self) -> bool {
        self.usage.contains(BufferUsage::RAW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_usage_marks_word_addressing() {
        let raw = BufferDescriptor::new(64, BufferUsage::RAW | BufferUsage::STORAGE);
        assert!(raw.is_raw());
        assert!(!BufferDescriptor::new(64, BufferUsage::VERTEX).is_raw());
        assert_eq!(BufferUsage::default(), BufferUsage::empty());
    }
}
