use thiserror::Error;

/// Failures raised by the GPU resource core.
///
/// Most variants abort a single operation (one texture load, one reload).
/// Device loss, wait timeouts and lost submissions end the frame loop, see [`GpuError::is_fatal`].
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image has zero extent ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    PixelSize { expected: usize, actual: usize },

    #[error("descriptor heap exhausted ({capacity} slots in use)")]
    DescriptorHeapExhausted { capacity: u32 },

    #[error("descriptor handles disagree: cpu index {cpu_index}, gpu index {gpu_index}")]
    DescriptorMismatch { cpu_index: u32, gpu_index: u32 },

    #[error("descriptor slot {index} freed twice")]
    DescriptorDoubleFree { index: u32 },

    #[error("descriptor handle does not address a slot of this heap")]
    DescriptorOutOfRange,

    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: &'static str, reason: String },

    #[error("GPU device removed: {0}")]
    DeviceRemoved(String),

    #[error("timed out waiting for fence value {0}")]
    WaitTimeout(u64),

    /// Work reached the queue but could not be fenced; its copies may still
    /// be reading memory the caller owns.
    #[error("submitted work could not be tracked: {0}")]
    SubmitFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GpuError {
    pub fn resource(what: &'static str, reason: impl ToString) -> Self {
        Self::ResourceCreation {
            what,
            reason: reason.to_string(),
        }
    }

    /// Device loss, synchronization timeouts and untracked submissions have
    /// no recovery path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceRemoved(_) | Self::WaitTimeout(_) | Self::SubmitFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_loss_timeouts_and_lost_submissions_are_fatal() {
        assert!(GpuError::DeviceRemoved("hung".into()).is_fatal());
        assert!(GpuError::WaitTimeout(7).is_fatal());
        assert!(GpuError::SubmitFailed("E_FAIL".into()).is_fatal());
        assert!(!GpuError::DescriptorHeapExhausted { capacity: 64 }.is_fatal());
        assert!(!GpuError::EmptyImage { width: 0, height: 4 }.is_fatal());
        assert!(!GpuError::resource("texture", "E_OUTOFMEMORY").is_fatal());
    }
}
