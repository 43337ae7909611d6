use std::sync::PoisonError;

use ash::vk;
/// Possible errors
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq, Hash)]
pub enum StagehandError {
    #[error("Invalid resource descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Allocator could not satisfy the memory request: {0}")]
    AllocationFailure(String),

    #[error("Handle does not reference a live resource")]
    NotFound,

    #[error("Usage could not be mapped with full confidence: {0}")]
    UnmappedUsage(String),

    #[error("Resource has an outstanding transfer that has not been flushed")]
    TransferPending,

    #[error("Resource does not have a mapped pointer. You're most likely using GPU only")]
    NoMappedPointer,

    #[error("Poisoned mutex")]
    PoisonError,

    #[error("Device operation failed: {0}")]
    Device(String),

    #[error("Transfer submission failed: {0}")]
    Submission(String),

    #[error(transparent)]
    VkError(#[from] vk::Result),
}

impl<T> From<PoisonError<T>> for StagehandError {
    fn from(_: PoisonError<T>) -> Self {
        StagehandError::PoisonError
    }
}

impl StagehandError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        StagehandError::InvalidDescriptor(message.into())
    }

    /// Wrap a device-side failure raised while building a native object
    pub(crate) fn device(error: anyhow::Error) -> Self {
        match error.downcast::<StagehandError>() {
            Ok(error) => error,
            Err(error) => match error.downcast::<vk::Result>() {
                Ok(result) => StagehandError::VkError(result),
                Err(error) => StagehandError::Device(format!("{error:#}")),
            },
        }
    }
}
