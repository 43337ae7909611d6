use ash::vk;

/// Information about the queue transfers are submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueInfo {
    /// Index to the family queue
    pub family_index: u32,
    /// Queue's index in the family
    pub index: u32,
    /// Flags of the queue
    pub queue_flags: vk::QueueFlags,
}

impl QueueInfo {
    /// Graphics and compute queues are implicitly transfer capable
    pub fn supports_transfer(&self) -> bool {
        self.queue_flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_support() {
        let mut info = QueueInfo {
            family_index: 0,
            index: 0,
            queue_flags: vk::QueueFlags::COMPUTE,
        };
        assert!(info.supports_transfer());
        info.queue_flags = vk::QueueFlags::SPARSE_BINDING;
        assert!(!info.supports_transfer());
    }
}
